//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DST__*` 覆盖（双下划线表示嵌套，如 `DST__QUEUE__ACTION_CAPACITY=30`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub queue: QueueSection,
    pub agent: AgentSection,
    pub side_tasks: SideTaskSection,
    pub paths: PathsSection,
}

/// [llm] 段：后端选择与采样参数
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: default_temperature(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "kimi-k2-0711-preview".to_string()
}

fn default_temperature() -> f32 {
    0.6
}

/// [queue] 段：动作/对白队列容量与准入阈值
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_queue_capacity")]
    pub action_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub dialog_capacity: usize,
    /// 待执行动作数超过此值时，新的 `do` 动作被静默丢弃（背压）
    #[serde(default = "default_action_admission")]
    pub action_admission: usize,
    /// 轮询端单次 get 的最长等待（毫秒）
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            action_capacity: default_queue_capacity(),
            dialog_capacity: default_queue_capacity(),
            action_admission: default_action_admission(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl QueueSection {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

fn default_queue_capacity() -> usize {
    20
}

fn default_action_admission() -> usize {
    1
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

/// [agent] 段：对话编排
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 对话条数超过此值时触发异步摘要
    #[serde(default = "default_history_threshold")]
    pub history_threshold: usize,
    /// 抢占旧 worker 时的最长等待（毫秒），超时则放弃等待（detach）
    #[serde(default = "default_turn_join_timeout_ms")]
    pub join_timeout_ms: u64,
    /// 首条命令作为长期目标，先做一次规划再开始分发工具
    #[serde(default)]
    pub initial_planning: bool,
    /// system prompt 文件；不存在时使用内置简版
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            history_threshold: default_history_threshold(),
            join_timeout_ms: default_turn_join_timeout_ms(),
            initial_planning: false,
            system_prompt_path: None,
        }
    }
}

impl AgentSection {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

fn default_history_threshold() -> usize {
    60
}

fn default_turn_join_timeout_ms() -> u64 {
    2000
}

/// [side_tasks] 段：observer / pathfind 后台任务
#[derive(Debug, Clone, Deserialize)]
pub struct SideTaskSection {
    #[serde(default = "default_observer_interval_ms")]
    pub observer_interval_ms: u64,
    /// 已通知实体集合的清空周期（秒），之后同一实体可再次触发
    #[serde(default = "default_observer_reset_secs")]
    pub observer_reset_secs: u64,
    #[serde(default = "default_side_task_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

impl Default for SideTaskSection {
    fn default() -> Self {
        Self {
            observer_interval_ms: default_observer_interval_ms(),
            observer_reset_secs: default_observer_reset_secs(),
            join_timeout_ms: default_side_task_join_timeout_ms(),
        }
    }
}

impl SideTaskSection {
    pub fn observer_interval(&self) -> Duration {
        Duration::from_millis(self.observer_interval_ms)
    }

    pub fn observer_reset(&self) -> Duration {
        Duration::from_secs(self.observer_reset_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

fn default_observer_interval_ms() -> u64 {
    1000
}

fn default_observer_reset_secs() -> u64 {
    120
}

fn default_side_task_join_timeout_ms() -> u64 {
    1000
}

/// [paths] 段：地图、配方表、对话日志
#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_map_file")]
    pub map_file: PathBuf,
    #[serde(default = "default_recipe_file")]
    pub recipe_file: PathBuf,
    #[serde(default = "default_chat_log_dir")]
    pub chat_log_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            map_file: default_map_file(),
            recipe_file: default_recipe_file(),
            chat_log_dir: default_chat_log_dir(),
        }
    }
}

fn default_map_file() -> PathBuf {
    PathBuf::from("memory/map.json")
}

fn default_recipe_file() -> PathBuf {
    PathBuf::from("data/recipes/recipes_merged_processed.json")
}

fn default_chat_log_dir() -> PathBuf {
    PathBuf::from("logs/chat_log")
}

/// 从 config 目录加载配置，环境变量 DST__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DST__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DST")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.queue.action_capacity, 20);
        assert_eq!(cfg.queue.dialog_capacity, 20);
        assert_eq!(cfg.queue.action_admission, 1);
        assert_eq!(cfg.side_tasks.observer_reset_secs, 120);
        assert!(!cfg.agent.initial_planning);
        assert!((cfg.llm.temperature - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[queue]\naction_capacity = 5\n\n[agent]\nhistory_threshold = 12\ninitial_planning = true\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.queue.action_capacity, 5);
        assert_eq!(cfg.queue.dialog_capacity, 20);
        assert_eq!(cfg.agent.history_threshold, 12);
        assert!(cfg.agent.initial_planning);
    }
}

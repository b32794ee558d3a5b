//! Headless Agent 运行时
//!
//! create_agent_components 按配置装配队列、世界快照、地图 / 配方、后台任务、分发器与编排器；
//! AgentRuntime 处理一行控制台输入（感知、事件、命令），并按游戏客户端的节奏取出动作与对白。

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::core::{
    ActionQueue, BoundedQueue, DialogQueue, EventRouter, GameEvent, Orchestrator,
    OrchestratorDeps, ReentryReceiver, SideTaskSupervisor,
};
use crate::llm::LlmClient;
use crate::memory::{ChatLog, LocationStore, RecipeBook};
use crate::tools::ToolDispatcher;
use crate::world::{AgentId, WorldState};

const FALLBACK_SYSTEM_PROMPT: &str = "You control a Don't Starve Together character. \
Answer with short text and at most one tool call per message, e.g. <check_surroundings></check_surroundings> \
or <do>Action(CHOP, -, -, -, -) = GUID</do>. Finish a task with <task_completion><result>...</result></task_completion>.";

/// 读取 system prompt：配置路径 > config/prompts/system.txt > 内置简版
pub fn load_system_prompt(path: Option<&Path>) -> String {
    let configured = path.and_then(|p| std::fs::read_to_string(p).ok());
    configured
        .or_else(|| {
            ["config/prompts/system.txt", "../config/prompts/system.txt"]
                .into_iter()
                .find_map(|p| std::fs::read_to_string(p).ok())
        })
        .unwrap_or_else(|| FALLBACK_SYSTEM_PROMPT.to_string())
}

/// 装配好的运行时组件，单角色
pub struct AgentComponents {
    pub world: Arc<WorldState>,
    pub action_queue: Arc<ActionQueue>,
    pub dialog_queue: Arc<DialogQueue>,
    pub locations: Arc<LocationStore>,
    pub side_tasks: Arc<SideTaskSupervisor>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub orchestrator: Arc<Orchestrator>,
    pub events: EventRouter,
}

/// 创建组件；返回的 ReentryReceiver 需交给 `Orchestrator::spawn_reentry_listener`
pub fn create_agent_components(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
) -> anyhow::Result<(AgentComponents, ReentryReceiver)> {
    let world = Arc::new(WorldState::new());
    let action_queue: Arc<ActionQueue> =
        Arc::new(BoundedQueue::new("action", cfg.queue.action_capacity));
    let dialog_queue: Arc<DialogQueue> =
        Arc::new(BoundedQueue::new("dialog", cfg.queue.dialog_capacity));

    let locations = Arc::new(
        LocationStore::open(&cfg.paths.map_file)
            .with_context(|| format!("Failed to open map file {}", cfg.paths.map_file.display()))?,
    );
    let recipes = match RecipeBook::load(&cfg.paths.recipe_file) {
        Ok(book) => {
            tracing::info!(recipes = book.len(), "Recipe book loaded");
            book
        }
        Err(e) => {
            tracing::warn!(error = %e, "Recipe book unavailable, check_recipe will find nothing");
            RecipeBook::default()
        }
    };

    let (reentry_tx, reentry_rx) = mpsc::unbounded_channel();
    let side_tasks = Arc::new(SideTaskSupervisor::new(
        world.clone(),
        action_queue.clone(),
        dialog_queue.clone(),
        reentry_tx,
        cfg.side_tasks.clone(),
    ));
    let dispatcher = Arc::new(ToolDispatcher::new(
        world.clone(),
        locations.clone(),
        Arc::new(recipes),
        action_queue.clone(),
        dialog_queue.clone(),
        side_tasks.clone(),
        cfg.queue.action_admission,
    ));

    let chat_log = ChatLog::new(&cfg.paths.chat_log_dir);
    let orchestrator = Orchestrator::new(OrchestratorDeps {
        llm,
        dispatcher: dispatcher.clone(),
        dialog_queue: dialog_queue.clone(),
        chat_log,
        system_prompt: load_system_prompt(cfg.agent.system_prompt_path.as_deref()),
        settings: cfg.agent.clone(),
        temperature: cfg.llm.temperature,
    });

    let events = EventRouter::new(side_tasks.clone(), world.clone());
    Ok((
        AgentComponents {
            world,
            action_queue,
            dialog_queue,
            locations,
            side_tasks,
            dispatcher,
            orchestrator,
            events,
        },
        reentry_rx,
    ))
}

/// 一行输入的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Continue,
    /// 需要回显给操作者的 JSON
    Reply(Value),
    Quit,
}

/// 控制台前端：绑定一个角色身份
pub struct AgentRuntime {
    components: AgentComponents,
    agent: Mutex<AgentId>,
}

impl AgentRuntime {
    pub fn new(components: AgentComponents, agent: AgentId) -> Self {
        Self {
            components,
            agent: Mutex::new(agent),
        }
    }

    pub fn components(&self) -> &AgentComponents {
        &self.components
    }

    pub fn agent(&self) -> AgentId {
        self.agent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// `/perception <file|json>`、`/event <json>`、`/guid <id>`、`/abort`、`/stats`、`/quit`，其余视为玩家命令
    pub async fn handle_line(&self, line: &str) -> anyhow::Result<LineOutcome> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(LineOutcome::Continue);
        }
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        let c = &self.components;

        match head {
            "/quit" => Ok(LineOutcome::Quit),
            "/abort" => {
                let aborted = c.orchestrator.abort().await;
                Ok(LineOutcome::Reply(json!({ "aborted": aborted })))
            }
            "/stats" => Ok(LineOutcome::Reply(json!({
                "action_queue": c.action_queue.stats(),
                "dialog_queue": c.dialog_queue.stats(),
                "running": c.orchestrator.is_running().await,
                "history": c.orchestrator.history().len(),
                "locations": c.locations.len(),
                "observer": c.side_tasks.is_observer_active(),
                "pathfind": c.side_tasks.is_pathfind_active(),
            }))),
            "/guid" => {
                let agent = AgentId::new(rest);
                tracing::info!(%agent, "Bound agent identity");
                *self.agent.lock().unwrap_or_else(|e| e.into_inner()) = agent;
                Ok(LineOutcome::Continue)
            }
            "/perception" => {
                let raw = if rest.starts_with('{') {
                    rest.to_string()
                } else {
                    std::fs::read_to_string(rest)
                        .with_context(|| format!("Failed to read perception file {}", rest))?
                };
                let value: Value = serde_json::from_str(&raw).context("Invalid perception JSON")?;
                c.world
                    .replace_json(value)
                    .context("Perception does not match the expected shape")?;
                tracing::debug!("Perception replaced");
                Ok(LineOutcome::Continue)
            }
            "/event" => {
                let event: GameEvent = serde_json::from_str(rest).context("Invalid event JSON")?;
                let feedback = c.events.route(&event).await;
                if !feedback.is_empty() {
                    c.orchestrator.process(self.agent(), feedback.join("\n")).await;
                }
                Ok(LineOutcome::Continue)
            }
            _ => {
                c.orchestrator.submit_command(self.agent(), line).await;
                Ok(LineOutcome::Continue)
            }
        }
    }

    /// 模拟客户端的一次轮询：两个队列各取至多一条
    pub async fn poll_outbox(&self, wait: Duration) -> Vec<Value> {
        let c = &self.components;
        let (action, dialog) = tokio::join!(c.action_queue.get(wait), c.dialog_queue.get(wait));
        let mut out = Vec::new();
        if let Some(action) = action {
            out.push(action.wire_json());
        }
        if let Some(utterance) = dialog {
            out.push(json!({ "Type": "Speak", "Utterance": utterance }));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn runtime(dir: &Path, mock: MockLlmClient) -> AgentRuntime {
        let mut cfg = AppConfig::default();
        cfg.paths.map_file = dir.join("map.json");
        cfg.paths.recipe_file = dir.join("missing_recipes.json");
        cfg.paths.chat_log_dir = dir.join("chat");
        let (components, _rx) = create_agent_components(&cfg, Arc::new(mock)).unwrap();
        AgentRuntime::new(components, AgentId::new("107210"))
    }

    #[tokio::test]
    async fn test_perception_inline_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), MockLlmClient::new());

        rt.handle_line(r#"/perception {"PosX": 1.0, "PosZ": 2.0}"#).await.unwrap();
        assert_eq!(rt.components().world.current().pos_x, Some(1.0));

        let file = dir.path().join("p.json");
        std::fs::write(&file, r#"{"PosX": 5.0}"#).unwrap();
        rt.handle_line(&format!("/perception {}", file.display())).await.unwrap();
        assert_eq!(rt.components().world.current().pos_x, Some(5.0));

        assert!(rt.handle_line("/perception {not json").await.is_err());
    }

    #[tokio::test]
    async fn test_guid_and_quit() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), MockLlmClient::new());
        rt.handle_line("/guid 42").await.unwrap();
        assert_eq!(rt.agent(), AgentId::new("42"));
        assert_eq!(rt.handle_line("/quit").await.unwrap(), LineOutcome::Quit);
        assert_eq!(rt.handle_line("   ").await.unwrap(), LineOutcome::Continue);
    }

    #[tokio::test]
    async fn test_stats_reply() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), MockLlmClient::new());
        let LineOutcome::Reply(stats) = rt.handle_line("/stats").await.unwrap() else {
            panic!("expected a reply");
        };
        assert_eq!(stats["running"], false);
        assert_eq!(stats["history"], 1);
        assert_eq!(stats["action_queue"]["capacity"], 20);
    }

    #[tokio::test]
    async fn test_poll_outbox_speaks_dialog() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), MockLlmClient::new());
        rt.components().dialog_queue.put("hello".to_string());
        let out = rt.poll_outbox(Duration::from_millis(10)).await;
        assert_eq!(out, vec![json!({ "Type": "Speak", "Utterance": "hello" })]);
        assert!(rt.poll_outbox(Duration::from_millis(10)).await.is_empty());
    }
}

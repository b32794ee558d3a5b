//! 工具分发器
//!
//! 一轮只执行第一个工具调用；文本块与 `task_completion` 结果转发到对白队列。
//! 所有失败都降级为反馈文本（模型可自行纠正）或记录日志后静默结束，不向上传播。

use std::sync::Arc;
use std::time::Instant;

use crate::core::queue::{ActionQueue, DialogQueue};
use crate::core::side_task::SideTaskSupervisor;
use crate::memory::{LocationDescriptor, LocationStore, RecipeBook};
use crate::react::{Action, ActionKind, ContentBlock};
use crate::tools::{render, ToolCall};
use crate::world::{AgentId, WorldState};

/// 单轮调用上下文：显式携带角色身份
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub agent: AgentId,
}

impl TurnContext {
    pub fn new(agent: AgentId) -> Self {
        Self { agent }
    }
}

/// 分发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 作为下一轮 user 消息继续循环
    Feedback(String),
    /// 工具已执行但无反馈，回合结束
    Silent,
    /// task_completion，回合结束
    Completed,
    /// 没有可识别的工具调用，回合静默结束
    NoToolCall,
}

impl DispatchOutcome {
    pub fn feedback(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Feedback(text) => Some(text),
            _ => None,
        }
    }
}

/// 工具分发器：持有世界快照、地图、配方表、两条队列与后台任务监督器
pub struct ToolDispatcher {
    world: Arc<WorldState>,
    locations: Arc<LocationStore>,
    recipes: Arc<RecipeBook>,
    action_queue: Arc<ActionQueue>,
    dialog_queue: Arc<DialogQueue>,
    side_tasks: Arc<SideTaskSupervisor>,
    /// 动作队列深度超过该值时新动作被静默丢弃
    admission: usize,
}

impl ToolDispatcher {
    pub fn new(
        world: Arc<WorldState>,
        locations: Arc<LocationStore>,
        recipes: Arc<RecipeBook>,
        action_queue: Arc<ActionQueue>,
        dialog_queue: Arc<DialogQueue>,
        side_tasks: Arc<SideTaskSupervisor>,
        admission: usize,
    ) -> Self {
        Self {
            world,
            locations,
            recipes,
            action_queue,
            dialog_queue,
            side_tasks,
            admission,
        }
    }

    pub fn side_tasks(&self) -> &Arc<SideTaskSupervisor> {
        &self.side_tasks
    }

    pub fn world(&self) -> &Arc<WorldState> {
        &self.world
    }

    /// 文本块逐条进入对白队列；task_completion 的结果加前缀后进入
    pub fn forward_dialog(&self, blocks: &[ContentBlock]) {
        for block in blocks {
            match block {
                ContentBlock::Text { content } => {
                    self.dialog_queue.put(content.clone());
                }
                ContentBlock::ToolUse { name, params, .. } if name == "task_completion" => {
                    let result = params.get("result").map(String::as_str).unwrap_or("");
                    self.dialog_queue.put(format!("Task Complete: {}", result));
                }
                ContentBlock::ToolUse { .. } => {}
            }
        }
    }

    /// 执行第一个工具调用，其余忽略
    pub async fn dispatch(&self, blocks: &[ContentBlock], ctx: &TurnContext) -> DispatchOutcome {
        let Some(block) = blocks.iter().find(|b| b.is_tool_use()) else {
            tracing::debug!("No tool use found in content blocks");
            return DispatchOutcome::NoToolCall;
        };
        let Some(call) = ToolCall::from_block(block) else {
            // 未知工具名：不反馈，回合静默结束
            tracing::warn!(block = ?block, "Unrecognized tool, ending turn without feedback");
            return DispatchOutcome::NoToolCall;
        };

        let start = Instant::now();
        let tool = call.name();
        let outcome = self.execute(call, ctx).await;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool,
            "agent": ctx.agent.as_str(),
            "outcome": match &outcome {
                DispatchOutcome::Feedback(_) => "feedback",
                DispatchOutcome::Silent => "silent",
                DispatchOutcome::Completed => "completed",
                DispatchOutcome::NoToolCall => "none",
            },
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit, "tool");
        outcome
    }

    async fn execute(&self, call: ToolCall, ctx: &TurnContext) -> DispatchOutcome {
        use DispatchOutcome::Feedback;

        match call {
            ToolCall::CheckInventory { item_name } => {
                let world = self.world.current();
                Feedback(match item_name {
                    Some(name) => render::item_counts(&world, &name),
                    None => render::inventory(&world),
                })
            }
            ToolCall::CheckEquipslots => Feedback(render::equipment(&self.world.current())),
            ToolCall::CheckSurroundings => Feedback(render::surroundings(&self.world.current())),
            ToolCall::CheckStatus => Feedback(self.world.current().status_line()),
            ToolCall::CheckMap { name } => Feedback(self.check_map(name.as_deref())),
            ToolCall::MarkLoc { name, coords, info } => {
                Feedback(self.mark_loc(&name, coords, info))
            }
            ToolCall::CheckSelfGuid => Feedback(format!("You GUID is: {}", ctx.agent)),
            ToolCall::CheckRecipe { recipe } => Feedback(self.check_recipe(recipe.as_deref())),
            ToolCall::Do { action } => match self.execute_do(&action).await {
                Some(text) => Feedback(text),
                None => DispatchOutcome::Silent,
            },
            ToolCall::Explore { entities } => Feedback(self.explore(ctx, entities).await),
            ToolCall::StopExplore => Feedback(if self.side_tasks.stop_observer().await {
                "Exploration stopped.".to_string()
            } else {
                "No exploration in progress.".to_string()
            }),
            ToolCall::StopPathfind => Feedback(if self.side_tasks.stop_pathfind().await {
                "Pathfinding stopped.".to_string()
            } else {
                "No pathfinding in progress.".to_string()
            }),
            ToolCall::TaskCompletion { .. } => DispatchOutcome::Completed,
            ToolCall::Wait => DispatchOutcome::Silent,
            ToolCall::Invalid { tool, reason } => {
                tracing::warn!(tool, %reason, "Tool call missing required parameters");
                Feedback(reason)
            }
        }
    }

    fn check_map(&self, name: Option<&str>) -> String {
        match name {
            Some(name) => match self.locations.get(name) {
                Some(desc) => format!(
                    "The location {} is at:\n{}",
                    name,
                    serde_json::to_string(&desc).unwrap_or_default()
                ),
                None => format!("The location {} is not on the map.", name),
            },
            None => format!(
                "The map has the following locations:\n{}",
                serde_json::to_string(&self.locations.snapshot()).unwrap_or_default()
            ),
        }
    }

    fn mark_loc(&self, name: &str, coords: String, info: Option<String>) -> String {
        match self.locations.upsert(name, LocationDescriptor { coords, info }) {
            Ok(()) => format!("The location {} has been marked", name),
            Err(e) => {
                tracing::error!(error = %e, location = name, "Failed to persist map");
                format!(
                    "The location {} has been marked, but saving the map failed: {}",
                    name, e
                )
            }
        }
    }

    fn check_recipe(&self, recipe: Option<&str>) -> String {
        let Some(recipe) = recipe else {
            return "You should specify the recipe you want to check.".to_string();
        };
        match self.recipes.ingredients(recipe) {
            Some(ingredients) => format!(
                "The recipe {} is available.\n{}",
                recipe,
                serde_json::to_string(ingredients).unwrap_or_default()
            ),
            None => "Recipe not found".to_string(),
        }
    }

    /// 解析 -> 后台任务检查 -> 准入检查 -> 入队
    async fn execute_do(&self, text: &str) -> Option<String> {
        let action = match Action::parse(text) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(action = text, error = %e, "Failed to parse action");
                return Some(format!("Cannot parse the action `{}`: {}", text, e));
            }
        };
        let verb = action.kind;

        if self.side_tasks.is_observer_active() {
            tracing::warn!(%verb, "Currently exploring, blocking new action");
            return Some(format!(
                "Action '{}' cannot be added because exploration is currently in progress. \
                 Please wait for the exploration to complete or use <stop_explore></stop_explore> to stop the exploration.",
                verb
            ));
        }
        if self.side_tasks.is_pathfind_active() {
            tracing::warn!(%verb, "Currently going towards the destination, blocking new action");
            return Some(format!(
                "Action '{}' cannot be added because you are currently going towards the destination. \
                 Please wait for the pathfinding to complete or use <stop_pathfind></stop_pathfind> to stop the pathfinding.",
                verb
            ));
        }
        if self.action_queue.len() > self.admission {
            tracing::warn!(%verb, depth = self.action_queue.len(), "Action queue over admission threshold, dropping");
            return None;
        }

        self.action_queue.put(action);

        if verb == ActionKind::Pathfind {
            self.side_tasks.start_pathfind().await;
            return Some(
                "You are on your way now, output <wait></wait> if you have nothing to do while the character goes towards the destination."
                    .to_string(),
            );
        }
        if verb.is_long_running() {
            return Some(format!(
                "You are now performing {}, send next action to the action queue if you want. Or do other stuffs instead.",
                verb
            ));
        }
        None
    }

    async fn explore(&self, ctx: &TurnContext, entities: Vec<String>) -> String {
        if self.side_tasks.is_observer_active() {
            tracing::warn!("Already exploring, cannot start new observer");
            return "Cannot start observer because exploration is already in progress. \
                    Please wait for the current exploration to complete."
                .to_string();
        }
        let requested = entities.join(",");
        self.action_queue.put(Action::bare(ActionKind::Explore));
        self.side_tasks.start_observer(ctx.agent.clone(), entities).await;
        format!(
            "You are now exploring the map, monitoring the surroundings for '{}', no `do` tool and explore tool is allowed when exploring.",
            requested
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SideTaskSection;
    use crate::core::queue::BoundedQueue;
    use crate::react::parse_assistant_message;
    use tokio::sync::mpsc;

    struct Fixture {
        dispatcher: ToolDispatcher,
        actions: Arc<ActionQueue>,
        dialog: Arc<DialogQueue>,
        _dir: tempfile::TempDir,
    }

    fn fixture(admission: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let world = Arc::new(WorldState::new());
        let actions = Arc::new(BoundedQueue::new("action", 20));
        let dialog = Arc::new(BoundedQueue::new("dialog", 20));
        let (tx, _rx) = mpsc::unbounded_channel();
        let side_tasks = Arc::new(SideTaskSupervisor::new(
            world.clone(),
            actions.clone(),
            dialog.clone(),
            tx,
            SideTaskSection {
                observer_interval_ms: 10,
                observer_reset_secs: 120,
                join_timeout_ms: 200,
            },
        ));
        let locations = Arc::new(LocationStore::open(dir.path().join("map.json")).unwrap());
        let recipes = Arc::new(
            RecipeBook::from_json(
                r#"[{"name": "axe", "product": "axe", "display_name_en": "Axe", "display_name_zh": "斧头",
                     "ingredients": [{"type": "twigs", "amount": 1}, {"type": "flint", "amount": 1}]}]"#,
            )
            .unwrap(),
        );
        Fixture {
            dispatcher: ToolDispatcher::new(
                world,
                locations,
                recipes,
                actions.clone(),
                dialog.clone(),
                side_tasks,
                admission,
            ),
            actions,
            dialog,
            _dir: dir,
        }
    }

    async fn run(f: &Fixture, text: &str) -> DispatchOutcome {
        let parsed = parse_assistant_message(text);
        f.dispatcher
            .dispatch(&parsed.blocks, &TurnContext::new(AgentId::new("118707")))
            .await
    }

    #[tokio::test]
    async fn test_do_chop_enqueues_action() {
        let f = fixture(2);
        let outcome = run(&f, "<do>Action(CHOP, -, -, -, -) = 12345</do>").await;
        assert!(outcome.feedback().unwrap().contains("CHOP"));
        let action = f.actions.try_get().unwrap();
        assert_eq!(action.kind, ActionKind::Chop);
        assert_eq!(action.target, "12345");
        assert_eq!(action.inv_object, "-");
    }

    #[tokio::test]
    async fn test_do_rejected_while_exploring() {
        let f = fixture(2);
        let outcome = run(&f, "<explore><entities>rocks</entities></explore>").await;
        assert!(outcome.feedback().unwrap().starts_with("You are now exploring the map"));
        assert_eq!(f.actions.try_get().unwrap().kind, ActionKind::Explore);

        let outcome = run(&f, "<do>Action(CHOP, -, -, -, -) = 12345</do>").await;
        let text = outcome.feedback().unwrap();
        assert!(text.starts_with("Action 'CHOP' cannot be added because exploration"));
        assert!(f.actions.is_empty());

        // 再次 explore 被拒绝
        let outcome = run(&f, "<explore><entities>flint</entities></explore>").await;
        assert!(outcome.feedback().unwrap().starts_with("Cannot start observer"));

        let outcome = run(&f, "<stop_explore></stop_explore>").await;
        assert_eq!(outcome.feedback(), Some("Exploration stopped."));
        let outcome = run(&f, "<stop_explore></stop_explore>").await;
        assert_eq!(outcome.feedback(), Some("No exploration in progress."));
    }

    #[tokio::test]
    async fn test_pathfind_gates_following_actions() {
        let f = fixture(2);
        let outcome = run(&f, "<do>Action(PATHFIND, -, 400, 350, -) = -</do>").await;
        assert!(outcome.feedback().unwrap().starts_with("You are on your way now"));
        assert!(f.dispatcher.side_tasks().is_pathfind_active());

        let outcome = run(&f, "<do>Action(PICKUP, -, -, -, -) = 99</do>").await;
        assert!(outcome.feedback().unwrap().contains("going towards the destination"));

        let outcome = run(&f, "<stop_pathfind></stop_pathfind>").await;
        assert_eq!(outcome.feedback(), Some("Pathfinding stopped."));
        assert_eq!(run(&f, "<wait></wait>").await, DispatchOutcome::Silent);
    }

    #[tokio::test]
    async fn test_admission_threshold_drops_silently() {
        let f = fixture(1);
        for guid in 1..=2 {
            f.actions.put(Action::parse(&format!("Action(PICKUP, -, -, -, -) = {guid}")).unwrap());
        }
        let outcome = run(&f, "<do>Action(PICKUP, -, -, -, -) = 3</do>").await;
        assert_eq!(outcome, DispatchOutcome::Silent);
        assert_eq!(f.actions.len(), 2);
    }

    #[tokio::test]
    async fn test_parse_failure_returns_diagnostic() {
        let f = fixture(2);
        let outcome = run(&f, "<do>Action(FLY, -, -, -, -) = -</do>").await;
        assert!(outcome.feedback().unwrap().contains("unknown action verb `FLY`"));
        assert!(f.actions.is_empty());
    }

    #[tokio::test]
    async fn test_mark_loc_overwrites_and_check_map() {
        let f = fixture(2);
        run(&f, "<mark_loc><name>Pig King</name><coords>(457,24)</coords></mark_loc>").await;
        let outcome =
            run(&f, "<mark_loc><name>Pig King</name><coords>(500,30)</coords></mark_loc>").await;
        assert_eq!(outcome.feedback(), Some("The location Pig King has been marked"));

        let outcome = run(&f, "<check_map></check_map>").await;
        assert_eq!(
            outcome.feedback(),
            Some("The map has the following locations:\n{\"Pig King\":{\"coords\":\"(500,30)\"}}")
        );
        let outcome = run(&f, "<check_map><name>Beefalo</name></check_map>").await;
        assert_eq!(outcome.feedback(), Some("The location Beefalo is not on the map."));
    }

    #[tokio::test]
    async fn test_check_recipe_by_alias() {
        let f = fixture(2);
        let outcome = run(&f, "<check_recipe><recipe>斧头</recipe></check_recipe>").await;
        assert!(outcome.feedback().unwrap().starts_with("The recipe 斧头 is available.\n"));
        assert_eq!(
            run(&f, "<check_recipe><recipe>spear</recipe></check_recipe>").await.feedback(),
            Some("Recipe not found")
        );
        assert_eq!(
            run(&f, "<check_recipe></check_recipe>").await.feedback(),
            Some("You should specify the recipe you want to check.")
        );
    }

    #[tokio::test]
    async fn test_first_tool_only_and_self_guid() {
        let f = fixture(2);
        let outcome = run(
            &f,
            "<check_self_GUID></check_self_GUID><do>Action(CHOP, -, -, -, -) = 1</do>",
        )
        .await;
        assert_eq!(outcome.feedback(), Some("You GUID is: 118707"));
        assert!(f.actions.is_empty());
    }

    #[tokio::test]
    async fn test_forward_dialog_and_completion() {
        let f = fixture(2);
        let parsed = parse_assistant_message(
            "Done chopping.<task_completion><result>Collected 5 logs</result></task_completion>",
        );
        f.dispatcher.forward_dialog(&parsed.blocks);
        assert_eq!(f.dialog.try_get().as_deref(), Some("Done chopping."));
        assert_eq!(f.dialog.try_get().as_deref(), Some("Task Complete: Collected 5 logs"));
        let outcome = f
            .dispatcher
            .dispatch(&parsed.blocks, &TurnContext::default())
            .await;
        assert_eq!(outcome, DispatchOutcome::Completed);
    }

    #[tokio::test]
    async fn test_plain_text_has_no_tool_call() {
        let f = fixture(2);
        assert_eq!(run(&f, "Just thinking.").await, DispatchOutcome::NoToolCall);
    }
}

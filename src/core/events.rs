//! 游戏事件路由：客户端上报的动作结束 / 失败 / 属性变化 -> 反馈文本
//!
//! 与赶路、守望后台任务联动：寻路事件结束 pathfind-wait，入夜时先停 observer，否则停 pathfind。

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::core::side_task::SideTaskSupervisor;
use crate::world::{display_value, WorldState};

const NIGHT_WARNING: &str = "You are about to enter night. Make sure you have a light source like a torch etc. \
You have to equip the light source to prevent you from being attacked by Charlie.";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum EventKind {
    #[serde(rename = "Action-End")]
    ActionEnd,
    #[serde(rename = "Action-Failed")]
    ActionFailed,
    #[serde(rename = "Property-Change")]
    PropertyChange,
    #[serde(other)]
    Other,
}

/// 客户端事件
#[derive(Debug, Clone, Deserialize)]
pub struct GameEvent {
    #[serde(rename = "Type")]
    pub kind: EventKind,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Value,
    #[serde(rename = "Info", default)]
    pub info: Option<String>,
}

impl GameEvent {
    fn value_is_true(&self) -> bool {
        match &self.value {
            Value::Bool(b) => *b,
            Value::String(s) => s == "True",
            _ => false,
        }
    }

    fn info_suffix(&self) -> String {
        match self.info.as_deref() {
            Some(info) if !info.is_empty() => format!("Info: {}", info),
            _ => String::new(),
        }
    }
}

pub struct EventRouter {
    side_tasks: Arc<SideTaskSupervisor>,
    world: Arc<WorldState>,
}

impl EventRouter {
    pub fn new(side_tasks: Arc<SideTaskSupervisor>, world: Arc<WorldState>) -> Self {
        Self { side_tasks, world }
    }

    /// 返回需要送回编排器的反馈（可能为空）
    pub async fn route(&self, event: &GameEvent) -> Vec<String> {
        tracing::info!(kind = ?event.kind, name = %event.name, value = %event.value, "Game event");
        let mut feedback = Vec::new();
        let value = display_value(&event.value);

        if event.name.contains("PATHFIND") {
            if self.side_tasks.is_pathfind_active() {
                self.side_tasks.stop_pathfind().await;
            }
            match event.kind {
                EventKind::ActionEnd => feedback.push(format!("You've arrived at {}", value)),
                _ => {
                    let position = self.world.current().position_text();
                    feedback.push(format!(
                        "Can't find way to {} or is interrupted. Your current location is {}",
                        value, position
                    ));
                }
            }
        } else {
            let outcome = match event.kind {
                EventKind::ActionEnd => Some("done"),
                EventKind::ActionFailed => Some("failed"),
                _ => None,
            };
            if let Some(outcome) = outcome {
                let text = format!(
                    "The action {} -> {} {}. {}",
                    event.name,
                    value,
                    outcome,
                    event.info_suffix()
                );
                feedback.push(text.trim_end().to_string());
            }
        }

        if event.kind == EventKind::PropertyChange {
            if event.name.starts_with("InLight(") {
                if event.value_is_true() {
                    feedback.push("You are in light now.".to_string());
                } else {
                    feedback.push("You are in dark now.".to_string());
                }
            } else if event.name == "EnteringNight" && event.value_is_true() {
                let mut prefix = "";
                if self.side_tasks.is_observer_active() {
                    self.side_tasks.stop_observer().await;
                    prefix = "[Exploration Stopped]\n";
                } else if self.side_tasks.is_pathfind_active() {
                    self.side_tasks.stop_pathfind().await;
                    prefix = "[Pathfind Stopped]\n";
                }
                feedback.push(format!("{}{}", prefix, NIGHT_WARNING));
            }
        }

        feedback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SideTaskSection;
    use crate::core::queue::BoundedQueue;
    use crate::world::{AgentId, Perception};
    use tokio::sync::mpsc;

    fn router() -> (EventRouter, Arc<SideTaskSupervisor>, Arc<WorldState>) {
        let world = Arc::new(WorldState::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let side_tasks = Arc::new(SideTaskSupervisor::new(
            world.clone(),
            Arc::new(BoundedQueue::new("action", 20)),
            Arc::new(BoundedQueue::new("dialog", 20)),
            tx,
            SideTaskSection::default(),
        ));
        (
            EventRouter::new(side_tasks.clone(), world.clone()),
            side_tasks,
            world,
        )
    }

    fn event(json: &str) -> GameEvent {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_general_action_events() {
        let (router, _, _) = router();
        let done = router
            .route(&event(r#"{"Type":"Action-End","Name":"CHOP","Value":"12345"}"#))
            .await;
        assert_eq!(done, vec!["The action CHOP -> 12345 done."]);

        let failed = router
            .route(&event(
                r#"{"Type":"Action-Failed","Name":"BUILD","Value":"campfire","Info":"missing logs"}"#,
            ))
            .await;
        assert_eq!(failed, vec!["The action BUILD -> campfire failed. Info: missing logs"]);
    }

    #[tokio::test]
    async fn test_pathfind_event_stops_wait_and_reports() {
        let (router, side_tasks, world) = router();
        world.replace(Perception {
            pos_x: Some(10.0),
            pos_z: Some(-4.5),
            ..Default::default()
        });
        side_tasks.start_pathfind().await;
        assert!(side_tasks.is_pathfind_active());

        let arrived = router
            .route(&event(r#"{"Type":"Action-End","Name":"PATHFIND","Value":"base"}"#))
            .await;
        assert_eq!(arrived, vec!["You've arrived at base"]);
        assert!(!side_tasks.is_pathfind_active());

        let failed = router
            .route(&event(r#"{"Type":"Action-Failed","Name":"PATHFIND","Value":"base"}"#))
            .await;
        assert_eq!(
            failed,
            vec!["Can't find way to base or is interrupted. Your current location is x: 10, z: -4.5"]
        );
    }

    #[tokio::test]
    async fn test_light_change() {
        let (router, _, _) = router();
        let light = router
            .route(&event(r#"{"Type":"Property-Change","Name":"InLight(Walter)","Value":"True"}"#))
            .await;
        assert_eq!(light, vec!["You are in light now."]);
        let dark = router
            .route(&event(r#"{"Type":"Property-Change","Name":"InLight(Wilson)","Value":false}"#))
            .await;
        assert_eq!(dark, vec!["You are in dark now."]);
    }

    #[tokio::test]
    async fn test_entering_night_stops_exploration() {
        let (router, side_tasks, _) = router();
        side_tasks
            .start_observer(AgentId::new("1"), vec!["flint".into()])
            .await;
        side_tasks.start_pathfind().await;

        let text = router
            .route(&event(r#"{"Type":"Property-Change","Name":"EnteringNight","Value":"True"}"#))
            .await;
        assert_eq!(text.len(), 1);
        assert!(text[0].starts_with("[Exploration Stopped]\nYou are about to enter night."));
        assert!(!side_tasks.is_observer_active());
        assert!(side_tasks.is_pathfind_active());

        let quiet = router
            .route(&event(r#"{"Type":"Property-Change","Name":"EnteringNight","Value":"False"}"#))
            .await;
        assert!(quiet.is_empty());
        side_tasks.shutdown().await;
    }

    #[test]
    fn test_unknown_kind_deserializes() {
        let e = event(r#"{"Type":"Heartbeat","Name":"x"}"#);
        assert_eq!(e.kind, EventKind::Other);
        assert_eq!(e.value, Value::Null);
    }
}

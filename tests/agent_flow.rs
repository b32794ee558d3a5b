//! 端到端流程：命令 -> 流式回复 -> 工具分发 -> 队列 -> 客户端轮询

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use dst_agent::agent::{create_agent_components, AgentRuntime};
    use dst_agent::config::AppConfig;
    use dst_agent::llm::MockLlmClient;
    use dst_agent::memory::{LocationStore, Role};
    use dst_agent::react::ActionKind;
    use dst_agent::world::{AgentId, Entity, Perception};
    use tokio_util::sync::CancellationToken;

    fn config(dir: &Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.paths.map_file = dir.join("map.json");
        cfg.paths.recipe_file = dir.join("recipes.json");
        cfg.paths.chat_log_dir = dir.join("chat_log");
        cfg.side_tasks.observer_interval_ms = 10;
        cfg
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..300 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    async fn wait_idle(rt: &AgentRuntime) {
        for _ in 0..300 {
            if !rt.components().orchestrator.is_running().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("orchestrator still running");
    }

    #[tokio::test]
    async fn test_command_produces_action_and_dialog() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockLlmClient::new()
            .with_script(["Chopping that tree.<do>Action(CHOP, -, -, -, -) = 12345</do>"])
            .with_chunking(5, Duration::ZERO);
        let (components, _rx) = create_agent_components(&config(dir.path()), Arc::new(mock)).unwrap();
        let rt = AgentRuntime::new(components, AgentId::new("107210"));

        rt.handle_line("chop the tree").await.unwrap();
        wait_idle(&rt).await;

        let out = rt.poll_outbox(Duration::from_millis(50)).await;
        assert_eq!(out[0]["Type"], "Action");
        assert_eq!(out[0]["Action"], "CHOP");
        assert_eq!(out[0]["Target"], "12345");
        assert_eq!(out[1]["Utterance"], "Task Start: chop the tree");

        let mut spoken = Vec::new();
        while let Some(line) = rt.components().dialog_queue.try_get() {
            spoken.push(line);
        }
        assert_eq!(spoken[0], "Chopping that tree.");
        assert!(spoken.last().unwrap().starts_with("Task Complete: Echo from Mock"));

        let history = rt.components().orchestrator.history();
        assert!(history[1].content.starts_with("The current entities are surrounding you:"));
        assert!(history[1].content.ends_with("chop the tree"));
        assert!(history[3].content.starts_with("You are now performing CHOP"));

        // 对话日志写入了 user / assistant 消息
        let logs: Vec<_> = std::fs::read_dir(dir.path().join("chat_log")).unwrap().collect();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_observer_reentry_resumes_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockLlmClient::new().with_script([
            "<explore><entities>flint</entities></explore>",
            "<wait></wait>",
        ]);
        let (components, reentry_rx) =
            create_agent_components(&config(dir.path()), Arc::new(mock)).unwrap();
        let shutdown = CancellationToken::new();
        let listener = components
            .orchestrator
            .spawn_reentry_listener(reentry_rx, shutdown.clone());
        let rt = AgentRuntime::new(components, AgentId::new("107210"));

        rt.handle_line("find some flint").await.unwrap();
        wait_idle(&rt).await;
        assert!(rt.components().side_tasks.is_observer_active());

        rt.components().world.replace(Perception {
            vision: vec![Entity {
                guid: 99,
                prefab: "flint".into(),
                ..Default::default()
            }],
            ..Default::default()
        });

        let orchestrator = rt.components().orchestrator.clone();
        wait_until(|| {
            orchestrator
                .history()
                .iter()
                .any(|m| m.role == Role::User && m.content.starts_with("Observer Shutting down"))
        })
        .await;
        wait_idle(&rt).await;
        assert!(!rt.components().side_tasks.is_observer_active());

        // EXPLORE 被清掉，只剩 STOP
        let stop = rt.components().action_queue.try_get().unwrap();
        assert_eq!(stop.kind, ActionKind::Stop);
        assert!(rt.components().action_queue.try_get().is_none());

        shutdown.cancel();
        listener.await.unwrap();
    }

    #[tokio::test]
    async fn test_marked_location_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mock = MockLlmClient::new().with_script([
            "<mark_loc><name>base</name><coords>(10, -4)</coords><info>campfire</info></mark_loc>",
        ]);
        let (components, _rx) = create_agent_components(&cfg, Arc::new(mock)).unwrap();
        let rt = AgentRuntime::new(components, AgentId::new("1"));

        rt.handle_line("remember this place as base").await.unwrap();
        wait_idle(&rt).await;

        let reopened = LocationStore::open(&cfg.paths.map_file).unwrap();
        let base = reopened.get("base").unwrap();
        assert_eq!(base.coords, "(10, -4)");
        assert_eq!(base.info.as_deref(), Some("campfire"));
    }
}

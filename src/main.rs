//! dst-agent - 饥荒联机版 LLM 角色控制运行时
//!
//! 入口：初始化日志与配置，装配组件，从 stdin 读取命令 / 感知 / 事件，
//! 并按轮询间隔把动作与对白以 JSON 行输出到 stdout。
//!
//! 用法：dst-agent [config.toml] [GUID]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use dst_agent::agent::{create_agent_components, AgentRuntime, LineOutcome};
use dst_agent::config::{load_config, AppConfig};
use dst_agent::core::{
    OrchestratorCleanup, QueueReportCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason,
    SideTaskCleanup,
};
use dst_agent::llm::create_client;
use dst_agent::observability;
use dst_agent::world::AgentId;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let agent = AgentId::new(args.next().unwrap_or_else(|| "0".to_string()));

    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let llm = create_client(&cfg.llm);
    let (components, reentry_rx) =
        create_agent_components(&cfg, llm).context("Failed to create agent components")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let orchestrator = components.orchestrator.clone();
    let listener = orchestrator.spawn_reentry_listener(reentry_rx, shutdown.token());
    let reset_timer = components.side_tasks.start_reset_timer(shutdown.token());

    let mut coordinator = ShutdownCoordinator::new(shutdown.clone());
    coordinator.register(OrchestratorCleanup::new(orchestrator.clone()));
    coordinator.register(SideTaskCleanup::new(components.side_tasks.clone()));
    coordinator.register(QueueReportCleanup::new(
        components.action_queue.clone(),
        components.dialog_queue.clone(),
    ));

    let runtime = Arc::new(AgentRuntime::new(components, agent));

    // 客户端轮询：动作与对白逐行输出
    let poller = {
        let runtime = runtime.clone();
        let token = shutdown.token();
        let wait = cfg.queue.poll_timeout();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    out = runtime.poll_outbox(wait) => {
                        for item in out {
                            println!("{}", item);
                        }
                    }
                }
            }
        })
    };

    tracing::info!(agent = %runtime.agent(), "dst-agent ready, reading commands from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                shutdown.shutdown(ShutdownReason::InputClosed);
                break;
            }
            Err(e) => {
                tracing::error!("Failed to read stdin: {}", e);
                shutdown.shutdown(ShutdownReason::InputClosed);
                break;
            }
        };
        match runtime.handle_line(&line).await {
            Ok(LineOutcome::Continue) => {}
            Ok(LineOutcome::Reply(value)) => println!("{}", value),
            Ok(LineOutcome::Quit) => {
                shutdown.shutdown(ShutdownReason::UserInitiated);
                break;
            }
            Err(e) => tracing::warn!("{:#}", e),
        }
    }

    coordinator.run_cleanup().await;
    let _ = tokio::join!(listener, reset_timer, poller);
    tracing::info!("dst-agent stopped");
    Ok(())
}

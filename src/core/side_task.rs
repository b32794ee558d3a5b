//! 后台任务监督：observer（实体守望）与 pathfind-wait（赶路标志）
//!
//! 每类最多一个循环；启动同类新循环前先取消并限时 join 旧循环（超时则分离）。
//! 分发器通过 `is_observer_active` / `is_pathfind_active` 决定是否放行 `do` / `explore`。
//! observer 发现目标后经 re-entry 通道把提示送回编排器，自身随即结束。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SideTaskSection;
use crate::core::queue::{ActionQueue, DialogQueue};
use crate::react::{Action, ActionKind};
use crate::world::{AgentId, WorldState};

/// observer 发往编排器的重入提示
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reentry {
    pub agent: AgentId,
    pub prompt: String,
}

pub type ReentrySender = mpsc::UnboundedSender<Reentry>;
pub type ReentryReceiver = mpsc::UnboundedReceiver<Reentry>;

/// 观察目标同义词：请求一方时自动补上另一方
const SYNONYMS: &[(&str, &str)] = &[
    ("cutgrass", "grass"),
    ("grass", "cutgrass"),
    ("twig", "twigs"),
    ("goldnugget", "goldnuggets"),
];

/// 展开同义词并去重，保持请求顺序
pub fn expand_synonyms(names: &[String]) -> Vec<String> {
    let mut expanded: Vec<String> = Vec::new();
    for name in names {
        for (from, to) in SYNONYMS {
            if name == from && !names.iter().any(|n| n == to) {
                expanded.push(to.to_string());
            }
        }
        expanded.push(name.clone());
    }
    let mut seen = HashSet::new();
    expanded.retain(|n| seen.insert(n.clone()));
    expanded
}

struct LoopHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl LoopHandle {
    fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

/// 后台任务监督器
pub struct SideTaskSupervisor {
    world: Arc<WorldState>,
    action_queue: Arc<ActionQueue>,
    dialog_queue: Arc<DialogQueue>,
    reentry: ReentrySender,
    /// 已通知过的实体 GUID，由定时器周期性清空
    observed: Arc<Mutex<HashSet<u64>>>,
    observer: Mutex<Option<LoopHandle>>,
    pathfind: Mutex<Option<LoopHandle>>,
    settings: SideTaskSection,
}

impl SideTaskSupervisor {
    pub fn new(
        world: Arc<WorldState>,
        action_queue: Arc<ActionQueue>,
        dialog_queue: Arc<DialogQueue>,
        reentry: ReentrySender,
        settings: SideTaskSection,
    ) -> Self {
        Self {
            world,
            action_queue,
            dialog_queue,
            reentry,
            observed: Arc::new(Mutex::new(HashSet::new())),
            observer: Mutex::new(None),
            pathfind: Mutex::new(None),
            settings,
        }
    }

    pub fn is_observer_active(&self) -> bool {
        lock(&self.observer).as_ref().is_some_and(LoopHandle::is_live)
    }

    pub fn is_pathfind_active(&self) -> bool {
        lock(&self.pathfind).as_ref().is_some_and(LoopHandle::is_live)
    }

    /// 启动 observer；已有的 observer 先被停止
    pub async fn start_observer(&self, agent: AgentId, targets: Vec<String>) {
        self.stop_observer().await;

        let token = CancellationToken::new();
        let ctx = ObserverContext {
            agent,
            targets: expand_synonyms(&targets),
            token: token.clone(),
            world: self.world.clone(),
            action_queue: self.action_queue.clone(),
            dialog_queue: self.dialog_queue.clone(),
            reentry: self.reentry.clone(),
            observed: self.observed.clone(),
            interval: self.settings.observer_interval(),
        };
        let handle = tokio::spawn(observe_loop(ctx));
        *lock(&self.observer) = Some(LoopHandle { token, handle });
    }

    /// 启动 pathfind-wait；已有的先被停止
    pub async fn start_pathfind(&self) {
        self.stop_pathfind().await;

        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            tracing::info!("Pathfind started going towards the destination");
            child.cancelled().await;
            tracing::info!("Pathfind stopped going towards the destination");
        });
        *lock(&self.pathfind) = Some(LoopHandle { token, handle });
    }

    /// 停止 observer，返回停止前是否处于活动状态
    pub async fn stop_observer(&self) -> bool {
        let previous = lock(&self.observer).take();
        self.stop_loop("observer", previous).await
    }

    /// 停止 pathfind-wait，返回停止前是否处于活动状态
    pub async fn stop_pathfind(&self) -> bool {
        let previous = lock(&self.pathfind).take();
        self.stop_loop("pathfind", previous).await
    }

    async fn stop_loop(&self, kind: &'static str, previous: Option<LoopHandle>) -> bool {
        let Some(LoopHandle { token, handle }) = previous else {
            return false;
        };
        let was_live = !token.is_cancelled() && !handle.is_finished();
        token.cancel();
        match tokio::time::timeout(self.settings.join_timeout(), handle).await {
            Ok(Ok(())) => tracing::debug!(kind, "Side task joined"),
            Ok(Err(e)) => tracing::warn!(kind, error = %e, "Side task ended abnormally"),
            Err(_) => tracing::warn!(kind, "Side task did not stop in time, detaching"),
        }
        was_live
    }

    /// 周期性清空已通知集合，使同一实体之后可被再次发现
    pub fn start_reset_timer(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let observed = self.observed.clone();
        let period = self.settings.observer_reset();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let cleared = {
                            let mut set = lock(&observed);
                            let n = set.len();
                            set.clear();
                            n
                        };
                        tracing::debug!(cleared, "Clearing observed GUIDs");
                    }
                }
            }
        })
    }

    /// 停止全部循环（关闭时调用）
    pub async fn shutdown(&self) {
        self.stop_observer().await;
        self.stop_pathfind().await;
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct ObserverContext {
    agent: AgentId,
    targets: Vec<String>,
    token: CancellationToken,
    world: Arc<WorldState>,
    action_queue: Arc<ActionQueue>,
    dialog_queue: Arc<DialogQueue>,
    reentry: ReentrySender,
    observed: Arc<Mutex<HashSet<u64>>>,
    interval: Duration,
}

async fn observe_loop(ctx: ObserverContext) {
    tracing::info!(targets = ?ctx.targets, "Observer started");
    let mut ticker = tokio::time::interval(ctx.interval);
    loop {
        tokio::select! {
            _ = ctx.token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = ctx.world.current();
        let found: Vec<serde_json::Value> = {
            let mut seen = lock(&ctx.observed);
            snapshot
                .vision
                .iter()
                .filter(|e| ctx.targets.contains(&e.prefab) && seen.insert(e.guid))
                .map(|e| json!({"GUID": e.guid, "Prefab": e.prefab}))
                .collect()
        };
        if found.is_empty() {
            continue;
        }
        if ctx.token.is_cancelled() {
            break;
        }
        // 先标记结束，分发器随即放行新动作
        ctx.token.cancel();

        let found = serde_json::Value::Array(found).to_string();
        tracing::info!(%found, "Observer found target, triggering new inference");
        ctx.action_queue.clear();
        ctx.action_queue.put(Action::bare(ActionKind::Stop));
        ctx.dialog_queue.put(format!("I found {}", found));
        let prompt = format!(
            "Observer Shutting down: The item you were waiting for, '{}', is now in your surroundings. \
             You can proceed with the next action. You may set up the observer again if you are done with your action.",
            found
        );
        let reentry = Reentry {
            agent: ctx.agent.clone(),
            prompt,
        };
        if ctx.reentry.send(reentry).is_err() {
            tracing::warn!("Re-entry channel closed, observer result dropped");
        }
        return;
    }
    tracing::info!(targets = ?ctx.targets, "Observer stopped");
}

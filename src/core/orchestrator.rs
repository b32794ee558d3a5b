//! 对话编排器：主控循环
//!
//! 持有对话历史，驱动「流式生成 -> 解析 -> 分发 -> 反馈」回合循环。
//! 新命令到达时取消当前 worker、限时 join（超时则分离），递增 generation 后启动新 worker；
//! 每次修改历史、队列之前都比较 generation，被分离的旧 worker 不会再产生副作用。
//! 历史过长时异步摘要，成功后整体替换历史并重启循环。

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AgentSection;
use crate::core::queue::DialogQueue;
use crate::core::side_task::ReentryReceiver;
use crate::core::summarizer;
use crate::llm::{LlmClient, LlmError};
use crate::memory::{ChatLog, Message};
use crate::react::parse_assistant_message;
use crate::tools::{render, DispatchOutcome, ToolDispatcher, TurnContext};
use crate::world::AgentId;

const SERVICE_APOLOGY: &str = "Sorry, there was an error with the service.";

/// 单个 worker 的取消令牌与 generation
#[derive(Debug, Clone)]
pub struct TurnGuard {
    token: CancellationToken,
    generation: u64,
    current: Arc<AtomicU64>,
}

impl TurnGuard {
    /// 未被取消且仍是最新一代
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled() && self.current.load(Ordering::SeqCst) == self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct Worker {
    guard: TurnGuard,
    handle: JoinHandle<()>,
}

/// worker 的起点
enum TurnStart {
    /// 以一条新 user 消息开始
    Input(String),
    /// 直接基于当前历史继续（摘要替换之后）
    Resume,
}

/// 一条输入在规划模式下的去向
enum Admission {
    Run,
    Plan,
    Defer(String),
}

/// 初始规划模式的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanningState {
    Disabled,
    AwaitingGoal,
    Planning { goal: String },
    Ready { goal: String },
}

/// 编排器依赖
pub struct OrchestratorDeps {
    pub llm: Arc<dyn LlmClient>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub dialog_queue: Arc<DialogQueue>,
    pub chat_log: ChatLog,
    pub system_prompt: String,
    pub settings: AgentSection,
    pub temperature: f32,
}

/// 对话编排器；以 `Arc<Orchestrator>` 共享
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    dispatcher: Arc<ToolDispatcher>,
    dialog_queue: Arc<DialogQueue>,
    chat_log: ChatLog,
    system_prompt: String,
    settings: AgentSection,
    temperature: f32,
    history: Mutex<Vec<Message>>,
    generation: Arc<AtomicU64>,
    /// 串行化抢占：同一时刻只有一个调用者在替换 worker
    worker: tokio::sync::Mutex<Option<Worker>>,
    summarizing: AtomicBool,
    summaries_started: AtomicUsize,
    planning: Mutex<PlanningState>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Arc<Self> {
        let planning = if deps.settings.initial_planning {
            PlanningState::AwaitingGoal
        } else {
            PlanningState::Disabled
        };
        Arc::new(Self {
            history: Mutex::new(vec![Message::system(deps.system_prompt.clone())]),
            llm: deps.llm,
            dispatcher: deps.dispatcher,
            dialog_queue: deps.dialog_queue,
            chat_log: deps.chat_log,
            system_prompt: deps.system_prompt,
            settings: deps.settings,
            temperature: deps.temperature,
            generation: Arc::new(AtomicU64::new(0)),
            worker: tokio::sync::Mutex::new(None),
            summarizing: AtomicBool::new(false),
            summaries_started: AtomicUsize::new(0),
            planning: Mutex::new(planning),
        })
    }

    /// 处理一条外部输入（命令、事件反馈或 observer 重入）
    pub async fn process(self: &Arc<Self>, agent: AgentId, input: impl Into<String>) {
        let input = input.into();

        // 判断与状态迁移在同一把锁内：并发到达的命令只有一条成为目标
        let admission = {
            let mut state = lock(&self.planning);
            let admission = match &*state {
                PlanningState::AwaitingGoal => Admission::Plan,
                PlanningState::Planning { goal } => Admission::Defer(goal.clone()),
                PlanningState::Disabled | PlanningState::Ready { .. } => Admission::Run,
            };
            if matches!(admission, Admission::Plan) {
                *state = PlanningState::Planning {
                    goal: input.clone(),
                };
            }
            admission
        };

        match admission {
            Admission::Plan => {
                tracing::info!(goal = %input, "Initial planning started");
                let this = self.clone();
                tokio::spawn(async move { this.run_planning(agent, input).await });
            }
            Admission::Defer(goal) => {
                tracing::warn!(%goal, "Command arrived while planning, deferring");
                self.dialog_queue.put(format!(
                    "I am still planning for '{}'. Please send the command again once planning is done.",
                    goal
                ));
            }
            Admission::Run => {
                self.start_worker(agent, TurnStart::Input(input), None, None).await;
            }
        }
    }

    /// 玩家命令：附上周围实体与可去地点，并在对白队列播报任务开始
    pub async fn submit_command(self: &Arc<Self>, agent: AgentId, command: &str) {
        let world = self.dispatcher.world().current();
        let input = format!(
            "The current entities are surrounding you:\n{}\n\n{}\n\n{}",
            render::surroundings(&world),
            render::positions(&world),
            command
        );
        self.dialog_queue.put(format!("Task Start: {}", command));
        self.process(agent, input).await;
    }

    /// 取消当前 worker；返回取消前是否在运行
    pub async fn abort(&self) -> bool {
        let mut slot = self.worker.lock().await;
        match slot.take() {
            Some(worker) if !worker.handle.is_finished() => {
                tracing::info!(generation = worker.guard.generation, "Force aborting current inference");
                self.retire(worker).await;
                true
            }
            _ => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn history(&self) -> Vec<Message> {
        lock(&self.history).clone()
    }

    pub fn planning_state(&self) -> PlanningState {
        lock(&self.planning).clone()
    }

    /// 已启动的摘要次数
    pub fn summaries_started(&self) -> usize {
        self.summaries_started.load(Ordering::SeqCst)
    }

    /// 消费 observer 重入提示
    pub fn spawn_reentry_listener(
        self: &Arc<Self>,
        mut rx: ReentryReceiver,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(reentry) => this.process(reentry.agent, reentry.prompt).await,
                        None => break,
                    }
                }
            }
        })
    }

    /// 历史超过阈值且没有摘要在进行时启动一次；返回本次是否启动
    pub fn maybe_summarize(self: &Arc<Self>, agent: AgentId) -> bool {
        if lock(&self.history).len() <= self.settings.history_threshold {
            return false;
        }
        if self
            .summarizing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.summaries_started.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        tracing::info!(generation, "History over threshold, summarizing");
        let this = self.clone();
        tokio::spawn(async move {
            this.run_summary(agent, generation).await;
            this.summarizing.store(false, Ordering::SeqCst);
        });
        true
    }

    /// 摘要基于 `generation` 时的历史；完成时若已有更新的 worker，则丢弃结果
    async fn run_summary(self: &Arc<Self>, agent: AgentId, generation: u64) {
        let history = self.history();
        let world = self.dispatcher.world().current();
        let goal = match self.planning_state() {
            PlanningState::Ready { goal } => Some(goal),
            _ => None,
        };
        match summarizer::summarize(&*self.llm, &world, &history, goal.as_deref()).await {
            Ok(report) => {
                let seeded = vec![
                    Message::system(self.system_prompt.clone()),
                    Message::user(report.to_prompt(goal.as_deref())),
                ];
                let restarted = self
                    .start_worker(agent, TurnStart::Resume, Some(seeded), Some(generation))
                    .await;
                if restarted {
                    tracing::info!("Summary ready, restarted with condensed history");
                }
            }
            Err(e) => {
                if self.generation.load(Ordering::SeqCst) != generation {
                    tracing::info!(error = %e, "Stale summarization failed, ignoring");
                    return;
                }
                tracing::warn!(error = %e, "Summarization failed, keeping history");
                self.dialog_queue
                    .put("I could not summarize my progress, continuing with the full history.".to_string());
            }
        }
    }

    async fn run_planning(self: Arc<Self>, agent: AgentId, goal: String) {
        let world = self.dispatcher.world().current();
        let seed = match summarizer::summarize(&*self.llm, &world, &[], Some(&goal)).await {
            Ok(report) => report.to_prompt(Some(&goal)),
            Err(e) => {
                tracing::warn!(error = %e, "Initial planning failed, running the goal directly");
                goal.clone()
            }
        };
        *lock(&self.planning) = PlanningState::Ready { goal };
        tracing::info!("Initial planning finished");
        self.start_worker(agent, TurnStart::Input(seed), None, None).await;
    }

    /// 取消旧 worker 并限时 join；超时则分离，由 generation 阻止其后续修改
    async fn retire(&self, worker: Worker) {
        worker.guard.token.cancel();
        if worker.handle.is_finished() {
            return;
        }
        tracing::info!(generation = worker.guard.generation, "Aborting previous inference");
        match tokio::time::timeout(self.settings.join_timeout(), worker.handle).await {
            Ok(_) => tracing::debug!("Previous worker joined"),
            Err(_) => tracing::warn!("Previous worker did not stop in time, detaching"),
        }
    }

    /// 抢占并启动新 worker。`expected` 为 Some 时，仅当 generation 仍等于它才执行；
    /// generation 只在持有 worker 槽位锁时递增，因此检查不会与其他启动交错。返回是否启动
    async fn start_worker(
        self: &Arc<Self>,
        agent: AgentId,
        start: TurnStart,
        reseed: Option<Vec<Message>>,
        expected: Option<u64>,
    ) -> bool {
        let mut slot = self.worker.lock().await;
        if let Some(expected) = expected {
            let current = self.generation.load(Ordering::SeqCst);
            if current != expected {
                tracing::info!(expected, current, "Newer input arrived, discarding stale restart");
                return false;
            }
        }
        if let Some(previous) = slot.take() {
            self.retire(previous).await;
        }

        // generation 递增与历史替换在同一把锁内完成
        let generation = {
            let mut history = lock(&self.history);
            if let Some(messages) = reseed {
                *history = messages;
            }
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        let guard = TurnGuard {
            token: CancellationToken::new(),
            generation,
            current: self.generation.clone(),
        };

        let this = self.clone();
        let worker_guard = guard.clone();
        let handle = tokio::spawn(async move {
            this.run_worker(worker_guard, agent, start).await;
        });
        *slot = Some(Worker { guard, handle });
        true
    }

    /// 仅在 guard 仍有效时追加消息；检查与追加在同一把锁内
    fn append_if_live(&self, guard: &TurnGuard, message: Message) -> bool {
        {
            let mut history = lock(&self.history);
            if !guard.is_live() {
                return false;
            }
            history.push(message.clone());
        }
        self.chat_log.append(&message);
        true
    }

    async fn run_worker(self: Arc<Self>, guard: TurnGuard, agent: AgentId, start: TurnStart) {
        let ctx = TurnContext::new(agent);
        let mut pending = match start {
            TurnStart::Input(text) => Some(text),
            TurnStart::Resume => None,
        };

        loop {
            if let Some(text) = pending.take() {
                let preview: String = text.chars().take(50).collect();
                tracing::info!(generation = guard.generation, input = %preview, "Starting new inference");
                if !self.append_if_live(&guard, Message::user(text)) {
                    return;
                }
            }

            let messages = self.history();
            let text = match self.stream_turn(&guard, &messages).await {
                Ok(Some(text)) => text,
                Ok(None) => {
                    tracing::info!(generation = guard.generation, "Inference aborted");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error in inference");
                    if guard.is_live() {
                        self.dialog_queue.put(SERVICE_APOLOGY.to_string());
                    }
                    return;
                }
            };
            if text.trim().is_empty() {
                tracing::warn!("Model returned an empty message, ending turn");
                return;
            }
            tracing::info!(assistant = %text, "Assistant message");
            if !self.append_if_live(&guard, Message::assistant(text.clone())) {
                return;
            }

            let parsed = parse_assistant_message(&text);
            if !guard.is_live() {
                return;
            }
            self.dispatcher.forward_dialog(&parsed.blocks);
            let outcome = self.dispatcher.dispatch(&parsed.blocks, &ctx).await;
            self.maybe_summarize(ctx.agent.clone());

            match outcome {
                DispatchOutcome::Feedback(feedback) if guard.is_live() => pending = Some(feedback),
                _ => {
                    tracing::debug!(generation = guard.generation, "Turn loop finished");
                    return;
                }
            }
        }
    }

    /// 流式生成；首个工具调用闭合即停止读取。被取消时返回 Ok(None)
    async fn stream_turn(
        &self,
        guard: &TurnGuard,
        messages: &[Message],
    ) -> Result<Option<String>, LlmError> {
        let mut stream = tokio::select! {
            _ = guard.token.cancelled() => return Ok(None),
            result = self.llm.complete_stream(messages, self.temperature) => result?,
        };

        let mut buffer = String::new();
        loop {
            tokio::select! {
                _ = guard.token.cancelled() => return Ok(None),
                chunk = stream.next() => match chunk {
                    Some(Ok(piece)) => {
                        buffer.push_str(&piece);
                        if parse_assistant_message(&buffer).has_tool_use {
                            tracing::debug!("Tool use closed, stopping stream");
                            break;
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => break,
                }
            }
        }

        if guard.is_live() {
            Ok(Some(buffer))
        } else {
            Ok(None)
        }
    }
}

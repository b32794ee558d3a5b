//! 核心编排层：错误、有界队列、后台任务监督、主控循环、摘要、事件路由与优雅关闭

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod queue;
pub mod shutdown;
pub mod side_task;
pub mod summarizer;

pub use error::AgentError;
pub use events::{EventKind, EventRouter, GameEvent};
pub use orchestrator::{Orchestrator, OrchestratorDeps, PlanningState, TurnGuard};
pub use queue::{ActionQueue, BoundedQueue, DialogQueue, QueueStats};
pub use shutdown::{
    OrchestratorCleanup, QueueReportCleanup, ShutdownCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason, SideTaskCleanup,
};
pub use side_task::{Reentry, ReentryReceiver, ReentrySender, SideTaskSupervisor};
pub use summarizer::StatusReport;

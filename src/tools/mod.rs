//! 工具层：类型化工具调用、分发器与快照渲染

pub mod call;
pub mod dispatcher;
pub mod render;

pub use call::ToolCall;
pub use dispatcher::{DispatchOutcome, ToolDispatcher, TurnContext};

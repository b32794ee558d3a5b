//! 文法层：助手消息标签解析与动作字符串解析

pub mod action;
pub mod parser;

pub use action::{Action, ActionKind, ActionParseError};
pub use parser::{parse_assistant_message, ContentBlock, ParsedMessage, TOOL_ALLOW_LIST};

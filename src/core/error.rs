//! Agent 错误类型
//!
//! 回合循环、分发器与后台任务内部的失败都不向 Orchestrator 之外传播：
//! 要么降级为反馈文本（让模型自行纠正），要么记录日志后吞掉。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::StoreError;
use crate::react::ActionParseError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 动作字符串不符合 `Action(...) = target` 语法
    #[error("Action parse error: {0}")]
    ActionParse(#[from] ActionParseError),

    /// 前置条件不满足（后台任务进行中等）
    #[error("Dispatch rejected: {0}")]
    DispatchRejected(String),

    /// 模型流式或一次性完成失败
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 地图等持久化写入失败
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// 摘要为空或缺少固定段落
    #[error("Summary unusable: {0}")]
    SummaryUnusable(String),

    #[error("Config error: {0}")]
    Config(String),

    /// 当前回合已被新命令抢占
    #[error("Cancelled")]
    Cancelled,
}

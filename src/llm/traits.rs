//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式 Token）。
//! 温度由调用方逐次传入：主循环用配置温度，摘要固定 0.5。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::memory::Message;

/// 流式 Token 流
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 模型服务错误
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LlmError {
    /// 请求构造或服务端返回错误
    #[error("LLM API error: {0}")]
    Api(String),

    /// 流式传输中断
    #[error("LLM stream error: {0}")]
    Stream(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// LLM 客户端 trait：非流式完成与流式完成（返回 Token 流）
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message], temperature: f32) -> Result<String, LlmError>;

    /// 流式完成，返回 Token 流；不可重放，中途失败即整轮失败
    async fn complete_stream(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<TokenStream, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

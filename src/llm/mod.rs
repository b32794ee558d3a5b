//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, TokenStream};

use std::sync::Arc;

use crate::config::LlmSection;

/// 按配置构造客户端；provider 为 mock 或未设置 OPENAI_API_KEY 时退回 Mock
pub fn create_client(section: &LlmSection) -> Arc<dyn LlmClient> {
    let provider = section.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    match (provider.as_str(), api_key) {
        ("mock", _) => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        (_, Some(key)) => {
            tracing::info!(model = %section.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                section.base_url.as_deref(),
                &section.model,
                Some(&key),
            ))
        }
        (_, None) => {
            tracing::warn!("No API key set, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

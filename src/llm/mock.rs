//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 脚本模式：按顺序弹出预设回复（或错误），流式时按固定字符数切块并可逐块延迟。
//! 脚本耗尽后回落到默认模式：取最后一条 User 消息，回显为 `task_completion`，使每轮自然结束。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::llm::{LlmClient, LlmError, TokenStream};
use crate::memory::{Message, Role};

/// Mock 客户端
#[derive(Debug)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    chunk_chars: usize,
    chunk_delay: Duration,
    /// 非流式 complete 在取到回复后的额外延迟
    complete_delay: Duration,
    calls: AtomicUsize,
    /// 每次请求收到的消息列表，供测试断言
    requests: Mutex<Vec<Vec<Message>>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            chunk_chars: 8,
            chunk_delay: Duration::ZERO,
            complete_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 预设回复，按调用顺序消费
    pub fn with_script<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            script.extend(replies.into_iter().map(|s| Ok(s.into())));
        }
        self
    }

    /// 流式切块大小与逐块延迟
    pub fn with_chunking(mut self, chunk_chars: usize, chunk_delay: Duration) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self.chunk_delay = chunk_delay;
        self
    }

    /// 让 complete（摘要、规划）变慢；回复在调用时即已取出，不影响后续流式请求的顺序
    pub fn with_complete_delay(mut self, delay: Duration) -> Self {
        self.complete_delay = delay;
        self
    }

    /// 追加一条回复
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(reply.into()));
    }

    /// 追加一次失败
    pub fn push_error(&self, error: LlmError) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_reply(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(reply) = scripted {
            return reply;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!(
            "<task_completion><result>Echo from Mock: {}</result></task_completion>",
            last_user
        ))
    }

    fn split_chunks(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.chunk_chars)
            .map(|c| c.iter().collect())
            .collect()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], _temperature: f32) -> Result<String, LlmError> {
        let reply = self.next_reply(messages);
        if !self.complete_delay.is_zero() {
            tokio::time::sleep(self.complete_delay).await;
        }
        reply
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        _temperature: f32,
    ) -> Result<TokenStream, LlmError> {
        let content = self.next_reply(messages)?;
        let delay = self.chunk_delay;
        let chunks = self.split_chunks(&content);
        let tokens = stream::iter(chunks).then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<String, LlmError>(chunk)
        });
        Ok(Box::pin(tokens))
    }
}

//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 默认把最后一条 User 消息原样回显；也可设置固定回复或模拟失败。

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::llm::{ChatMessage, ChatRole, LlmClient};

/// Mock 客户端：回显 / 固定回复 / 固定失败
#[derive(Debug, Default)]
pub struct MockLlmClient {
    reply: Option<String>,
    fail_with: Option<String>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次都返回同一段回复
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            ..Self::default()
        }
    }

    /// 每次都返回错误
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::default()
        }
    }

    /// 已被调用的次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.fail_with {
            return Err(reason.clone());
        }
        if let Some(reply) = &self.reply {
            return Ok(reply.clone());
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {last_user}"))
    }
}

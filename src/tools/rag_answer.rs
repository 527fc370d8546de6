//! 基于检索上下文的回答子代理
//!
//! 输入 `{"query": string, "context"?: string, "selective"?: boolean}`：
//! - 无 context：先从知识库检索 top_k 片段，检索为空时直接给出兜底回答（不调用模型）；
//! - 有 context：只依据给定上下文回答；selective 为 true 时视为用户选中的一段原文。
//! 输出 `{"answer": string, "citations": [string]}`。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{ChatMessage, LlmClient};
use crate::memory::{build_context, RetrievalEngine};
use crate::tools::{Subagent, SubagentTool};

/// 知识库中找不到相关内容时的回答
pub const FALLBACK_ANSWER: &str =
    "I can only answer questions using the contents of the knowledge base.";

/// 选中文本中找不到答案时的回答
pub const SELECTIVE_FALLBACK_ANSWER: &str =
    "I cannot find the answer within the selected text portion.";

pub struct RagAnswerSubagent {
    engine: Arc<RetrievalEngine>,
    llm: Arc<dyn LlmClient>,
    collection: String,
    top_k: usize,
}

impl RagAnswerSubagent {
    pub fn new(
        engine: Arc<RetrievalEngine>,
        llm: Arc<dyn LlmClient>,
        collection: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            engine,
            llm,
            collection: collection.into(),
            top_k: top_k.max(1),
        }
    }

    /// 包装为注册表工具
    pub fn into_tool(self, name: impl Into<String>) -> SubagentTool {
        SubagentTool::new(
            name,
            "Answer a question strictly from knowledge-base context. Input: {\"query\": string, \"context\"?: string, \"selective\"?: boolean}. Output: {\"answer\", \"citations\"}.",
            self,
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "context": { "type": "string" },
                "selective": { "type": "boolean" }
            },
            "required": ["query"]
        }))
    }

    fn grounded_prompt(context: &str, query: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(format!(
                "Answer the user's question based ONLY on the provided context. \
                 If the context does not contain the answer, politely state, '{FALLBACK_ANSWER}'"
            )),
            ChatMessage::user(format!("Context:\n{context}\n\nQuestion: {query}")),
        ]
    }

    fn selective_prompt(selection: &str, query: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(format!(
                "Answer the user's question based ONLY on this SPECIFIC selected text: '{selection}'. \
                 Do not use any other knowledge. If the answer is not in this exact text, state, \
                 '{SELECTIVE_FALLBACK_ANSWER}'"
            )),
            ChatMessage::user(query.to_string()),
        ]
    }

    async fn ask(&self, messages: &[ChatMessage]) -> Result<String, String> {
        self.llm
            .complete(messages)
            .await
            .map_err(|e| format!("LLM error: {e}"))
    }
}

#[async_trait]
impl Subagent for RagAnswerSubagent {
    async fn handle(&self, input: Value) -> Result<Value, String> {
        let query = input["query"].as_str().unwrap_or_default().trim();
        if query.is_empty() {
            return Err("query must not be empty".to_string());
        }
        let selective = input["selective"].as_bool().unwrap_or(false);

        if let Some(context) = input.get("context").and_then(Value::as_str) {
            let fallback = if selective {
                SELECTIVE_FALLBACK_ANSWER
            } else {
                FALLBACK_ANSWER
            };
            if context.trim().is_empty() {
                return Ok(json!({ "answer": fallback, "citations": [] }));
            }
            let messages = if selective {
                Self::selective_prompt(context, query)
            } else {
                Self::grounded_prompt(context, query)
            };
            let answer = self.ask(&messages).await?;
            return Ok(json!({ "answer": answer, "citations": [] }));
        }

        let snippets = self
            .engine
            .retrieve(&self.collection, query, self.top_k)
            .await
            .map_err(|e| e.to_string())?;
        let context = build_context(&snippets);
        if context.is_empty() {
            return Ok(json!({ "answer": FALLBACK_ANSWER, "citations": [] }));
        }
        let citations: Vec<String> = snippets
            .iter()
            .filter(|s| s.text().is_some())
            .map(|s| s.id.clone())
            .collect();
        let answer = self.ask(&Self::grounded_prompt(&context, query)).await?;
        Ok(json!({ "answer": answer, "citations": citations }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{HashEmbedder, MockLlmClient};
    use crate::vector::{Payload, VectorIndex};

    fn engine() -> Arc<RetrievalEngine> {
        let index = Arc::new(VectorIndex::new());
        index.create_collection("docs", 64).unwrap();
        Arc::new(RetrievalEngine::new(index, Arc::new(HashEmbedder::new(64))))
    }

    #[tokio::test]
    async fn test_fallback_without_model_call() {
        let llm = Arc::new(MockLlmClient::with_reply("should not be used"));
        let agent = RagAnswerSubagent::new(engine(), llm.clone(), "docs", 4);
        let out = agent.handle(json!({"query": "anything"})).await.unwrap();
        assert_eq!(out["answer"], FALLBACK_ANSWER);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_grounded_answer_with_citations() {
        let engine = engine();
        engine
            .index_text("docs", "ch1", "alpha is the first letter", Payload::new())
            .await
            .unwrap();
        let llm = Arc::new(MockLlmClient::new());
        let agent = RagAnswerSubagent::new(engine, llm.clone(), "docs", 4);

        let out = agent.handle(json!({"query": "what is alpha"})).await.unwrap();
        assert_eq!(out["citations"], json!(["ch1"]));
        let answer = out["answer"].as_str().unwrap();
        assert!(answer.contains("alpha is the first letter"));
        assert!(answer.contains("Question: what is alpha"));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_selective_mode() {
        let llm = Arc::new(MockLlmClient::new());
        let agent = RagAnswerSubagent::new(engine(), llm.clone(), "docs", 4);

        let out = agent
            .handle(json!({"query": "who?", "context": "Ada wrote it", "selective": true}))
            .await
            .unwrap();
        assert_eq!(out["answer"], "Echo from Mock: who?");

        let out = agent
            .handle(json!({"query": "who?", "context": "", "selective": true}))
            .await
            .unwrap();
        assert_eq!(out["answer"], SELECTIVE_FALLBACK_ANSWER);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_is_reported() {
        let agent = RagAnswerSubagent::new(
            engine(),
            Arc::new(MockLlmClient::failing("rate limited")),
            "docs",
            4,
        );
        let err = agent
            .handle(json!({"query": "q", "context": "some text"}))
            .await
            .unwrap_err();
        assert_eq!(err, "LLM error: rate limited");
    }
}

//! 检索工具：把检索引擎暴露给 Run 引擎
//!
//! 输入 `{"query": string, "k"?: integer}`；
//! 输出 `{"hits": [{"id", "payload", "score"}], "context": string}`，context 为命中文本的拼接。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::memory::{build_context, RetrievalEngine};
use crate::tools::registry::validate_against_schema;
use crate::tools::{Tool, ToolKind};

pub struct RetrievalTool {
    name: String,
    collection: String,
    default_k: usize,
    engine: Arc<RetrievalEngine>,
}

impl RetrievalTool {
    pub fn new(
        name: impl Into<String>,
        engine: Arc<RetrievalEngine>,
        collection: impl Into<String>,
        default_k: usize,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            default_k: default_k.max(1),
            engine,
        }
    }
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Search the knowledge base. Input: {\"query\": string, \"k\"?: integer}. Output: ranked hits and a joined context."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Retrieval
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "k": { "type": "integer", "minimum": 1 }
            },
            "required": ["query"]
        })
    }

    fn validate(&self, input: &Value) -> Result<(), String> {
        validate_against_schema(&self.parameters_schema(), input)?;
        if input["query"].as_str().map(str::trim).unwrap_or_default().is_empty() {
            return Err("query must not be empty".to_string());
        }
        Ok(())
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        let query = input["query"].as_str().unwrap_or_default();
        let k = input
            .get("k")
            .and_then(Value::as_u64)
            .map(|k| k as usize)
            .unwrap_or(self.default_k);
        let snippets = self
            .engine
            .retrieve(&self.collection, query, k)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "collection": self.collection,
            "context": build_context(&snippets),
            "hits": snippets,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HiveError;
    use crate::llm::HashEmbedder;
    use crate::tools::ToolRegistry;
    use crate::vector::{Payload, VectorIndex};

    async fn registry() -> ToolRegistry {
        let index = Arc::new(VectorIndex::new());
        index.create_collection("docs", 64).unwrap();
        let engine = Arc::new(RetrievalEngine::new(index, Arc::new(HashEmbedder::new(64))));
        engine
            .index_text("docs", "manual", "manuals describe behaviour", Payload::new())
            .await
            .unwrap();
        engine
            .index_text("docs", "bread", "bread needs flour", Payload::new())
            .await
            .unwrap();
        let mut registry = ToolRegistry::new();
        registry
            .register(RetrievalTool::new("retrieve", engine, "docs", 4))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_retrieval_tool_output() {
        let registry = registry().await;
        let out = registry
            .invoke("retrieve", json!({"query": "what do manuals describe", "k": 1}))
            .await
            .unwrap();
        let hits = out["hits"].as_array().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["id"], "manual");
        assert_eq!(out["context"], "manuals describe behaviour");
        assert_eq!(registry.get("retrieve").unwrap().kind(), ToolKind::Retrieval);
    }

    #[tokio::test]
    async fn test_retrieval_tool_rejects_bad_input() {
        let registry = registry().await;
        for input in [
            json!({}),
            json!({"query": "  "}),
            json!({"query": "x", "k": 0}),
            json!({"query": "x", "k": -1}),
            json!({"query": "x", "k": 1.5}),
        ] {
            assert!(matches!(
                registry.invoke("retrieve", input).await.unwrap_err(),
                HiveError::InvalidToolInput { .. }
            ));
        }
    }
}

//! 嵌入函数：文本 -> 定长向量
//!
//! 同一模型版本下对相同输入必须确定；失败是可恢复错误（由检索引擎映射为 EmbeddingUnavailable）。
//! - OpenAiEmbedder：调用 OpenAI 兼容的 /embeddings 端点
//! - HashEmbedder：离线、确定性的词袋哈希嵌入，用于测试与无密钥演示

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

/// 嵌入提供方
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 将文本编码为向量；失败时返回错误字符串
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;

    /// 已知的输出维度（用于创建集合）；未知时返回 None
    fn dimensions(&self) -> Option<usize> {
        None
    }
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    /// 从环境变量与可选 base_url 创建（与 LLM 共用 OPENAI_API_KEY / base_url）
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            dimensions: None,
        }
    }

    /// 声明模型输出维度（如 text-embedding-3-small 为 1536）
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("cannot embed empty text".to_string());
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| e.to_string())?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;
        response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .ok_or_else(|| "embedding response contained no data".to_string())
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

/// 词袋哈希嵌入：小写分词后按 FNV-1a 哈希落桶，再做 L2 归一化
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % self.dimensions as u64) as usize
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let mut vector = vec![0.0f32; self.dimensions];
        let mut tokens = 0usize;
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.bucket(&token.to_lowercase())] += 1.0;
            tokens += 1;
        }
        if tokens == 0 {
            return Err("cannot embed text without tokens".to_string());
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut vector {
            *x /= norm;
        }
        Ok(vector)
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions)
    }
}

/// 从应用配置创建嵌入提供方；没有 OPENAI_API_KEY 时返回 None
pub fn create_embedder_from_config(
    base_url: Option<&str>,
    model: &str,
    dimensions: usize,
    api_key: Option<&str>,
) -> Option<Arc<dyn EmbeddingProvider>> {
    let key = api_key
        .map(String::from)
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    if key.as_deref().unwrap_or("").is_empty() || key.as_deref() == Some("sk-placeholder") {
        tracing::debug!("embedding skipped: no OPENAI_API_KEY");
        return None;
    }
    Some(Arc::new(
        OpenAiEmbedder::new(base_url, model, key.as_deref()).with_dimensions(dimensions),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("Rust ownership rules").await.unwrap();
        let b = embedder.embed("rust OWNERSHIP rules").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hash_embedder_similarity() {
        let embedder = HashEmbedder::new(256);
        let query = embedder.embed("vector search").await.unwrap();
        let close = embedder.embed("search over a vector index").await.unwrap();
        let far = embedder.embed("baking bread at home").await.unwrap();
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[tokio::test]
    async fn test_hash_embedder_rejects_empty() {
        let embedder = HashEmbedder::new(8);
        assert!(embedder.embed("   ").await.is_err());
    }
}

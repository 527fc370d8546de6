//! 检索引擎（RAG）
//!
//! 把文本查询变成排好序的上下文片段：嵌入函数 + 向量索引。
//! 同时提供文档分块入库与上下文拼接，供检索工具与回答子代理使用。

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::core::{HiveError, HiveResult};
use crate::llm::EmbeddingProvider;
use crate::vector::{Payload, Record, SearchHit, VectorIndex};

/// 拼接多个片段时使用的分隔符
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// 文档块
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source_id: String,
    /// 在原文档中的字节偏移
    pub offset: usize,
}

/// 分块策略
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// 目标块大小（字符数）
    pub chunk_size: usize,
    /// 块之间的重叠（字符数）
    pub chunk_overlap: usize,
    /// 分隔符优先级（从高到低）
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 80,
            separators: ["\n\n", "\n", ". ", "! ", "? ", "。", " "]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// 文档分块器：尽量在分隔符处断开，UTF-8 安全
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn chunk(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let size = self.config.chunk_size.max(1);
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let target_end = (start + size).min(total);
            let mut end = target_end;

            if target_end < total {
                let window: String = chars[start..target_end].iter().collect();
                if let Some(cut) = self
                    .config
                    .separators
                    .iter()
                    .filter_map(|sep| window.rfind(sep.as_str()).map(|pos| (pos, sep)))
                    .map(|(pos, sep)| window[..pos].chars().count() + sep.chars().count())
                    .find(|&n| n > 0)
                {
                    end = start + cut;
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(Chunk {
                    id: format!("{}_{}", doc_id, chunks.len()),
                    text: trimmed.to_string(),
                    source_id: doc_id.to_string(),
                    offset: chars[..start].iter().map(|c| c.len_utf8()).sum(),
                });
            }

            if end >= total {
                break;
            }
            let overlap = self.config.chunk_overlap.min(end - start);
            let next = end - overlap;
            start = if next > start { next } else { end };
        }

        chunks
    }
}

/// 检索结果：负载 + 相似度（附带记录 id，便于引用）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedSnippet {
    pub id: String,
    pub payload: Payload,
    pub score: f32,
}

impl RetrievedSnippet {
    /// 负载中的 `text` 字段
    pub fn text(&self) -> Option<&str> {
        self.payload.get("text").and_then(Value::as_str)
    }
}

impl From<SearchHit> for RetrievedSnippet {
    fn from(hit: SearchHit) -> Self {
        Self {
            id: hit.id,
            payload: hit.payload,
            score: hit.score,
        }
    }
}

/// 检索引擎：注入的嵌入函数 + 向量索引
pub struct RetrievalEngine {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
}

impl RetrievalEngine {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index,
            embedder,
            chunker: Chunker::default(),
        }
    }

    pub fn with_chunking_config(mut self, config: ChunkingConfig) -> Self {
        self.chunker = Chunker::new(config);
        self
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    async fn embed(&self, text: &str) -> HiveResult<Vec<f32>> {
        let vector = self
            .embedder
            .embed(text)
            .await
            .map_err(HiveError::EmbeddingUnavailable)?;
        if vector.is_empty() {
            return Err(HiveError::EmbeddingUnavailable("empty embedding".to_string()));
        }
        Ok(vector)
    }

    /// 文本查询 -> 排序后的 (payload, score)；集合不存在时不调用嵌入函数
    pub async fn retrieve(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> HiveResult<Vec<RetrievedSnippet>> {
        self.index.dimensions(collection)?;
        let vector = self.embed(query).await?;
        let hits = self.index.search(collection, &vector, k)?;
        tracing::debug!(collection, k, hits = hits.len(), "retrieve");
        Ok(hits.into_iter().map(RetrievedSnippet::from).collect())
    }

    /// 嵌入一段文本并以 `{"text": .., ..extra}` 为负载写入
    pub async fn index_text(
        &self,
        collection: &str,
        id: &str,
        text: &str,
        extra: Payload,
    ) -> HiveResult<()> {
        self.index.dimensions(collection)?;
        let vector = self.embed(text).await?;
        let mut record = Record::new(id, vector).with_payload("text", text);
        record.payload.extend(extra);
        self.index.upsert(collection, record)
    }

    /// 分块并索引整篇文档（先删除同一文档的旧块），返回写入的块数
    pub async fn index_document(
        &self,
        collection: &str,
        doc_id: &str,
        text: &str,
    ) -> HiveResult<usize> {
        self.index.remove_by_source(collection, doc_id)?;
        let chunks = self.chunker.chunk(doc_id, text);
        for chunk in &chunks {
            let mut extra = Payload::new();
            extra.insert("source_id".into(), Value::from(chunk.source_id.clone()));
            extra.insert("offset".into(), Value::from(chunk.offset));
            self.index_text(collection, &chunk.id, &chunk.text, extra).await?;
        }
        tracing::info!(collection, doc_id, chunks = chunks.len(), "document indexed");
        Ok(chunks.len())
    }
}

/// 拼接命中片段的 `text` 字段；没有文本的命中被跳过
pub fn build_context(snippets: &[RetrievedSnippet]) -> String {
    snippets
        .iter()
        .filter_map(RetrievedSnippet::text)
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

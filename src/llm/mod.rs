//! LLM 层：生成客户端与嵌入函数（OpenAI 兼容 / 离线实现 / Mock）

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{create_embedder_from_config, EmbeddingProvider, HashEmbedder, OpenAiEmbedder};
pub use mock::MockLlmClient;
pub use openai::{create_llm_from_config, OpenAiClient, TokenUsage};
pub use traits::{ChatMessage, ChatRole, LlmClient};

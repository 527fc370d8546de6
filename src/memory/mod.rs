//! 记忆层：会话线程（短期）、检索增强（长期知识库）、线程快照持久化

pub mod conversation;
pub mod persistence;
pub mod rag;

pub use conversation::{Message, MessageContent, Role, Thread, ThreadId, ThreadLease, ThreadStore};
pub use persistence::ThreadPersistence;
pub use rag::{
    build_context, Chunk, Chunker, ChunkingConfig, RetrievalEngine, RetrievedSnippet,
    CONTEXT_SEPARATOR,
};

pub mod executor;
pub mod rag_answer;
pub mod registry;
pub mod retrieval;
pub mod schema;
pub mod subagent;

pub use executor::ToolExecutor;
pub use rag_answer::{RagAnswerSubagent, FALLBACK_ANSWER, SELECTIVE_FALLBACK_ANSWER};
pub use registry::{Tool, ToolKind, ToolRegistry};
pub use retrieval::RetrievalTool;
pub use schema::tool_call_schema_json;
pub use subagent::{FnSubagent, Subagent, SubagentTool};

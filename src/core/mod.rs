//! 核心层：错误分类、运行时组装、任务执行器、反馈记录

pub mod builder;
pub mod error;
pub mod feedback;
pub mod task_executor;

pub use builder::{Runtime, RuntimeBuilder, ANSWER_TOOL, RAG_AGENT, RETRIEVE_TOOL};
pub use error::{ErrorKind, HiveError, HiveResult};
pub use feedback::{FeedbackRecord, FeedbackSink, JsonlFeedbackSink};
pub use task_executor::{
    SubmitRequest, Task, TaskExecutor, TaskHandle, TaskId, TaskNotification, TaskOutcome, TaskPoll,
    ThreadTarget,
};

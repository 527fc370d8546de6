//! 运行时错误类型与分类
//!
//! 三类错误：输入错误（同步拒绝，不改变任何状态）、执行错误（使 Run 进入 failed 并记录原因）、
//! 并发冲突（提交时拒绝）。核心不做任何自动重试。

use thiserror::Error;

use crate::run::RunStatus;

/// 错误大类，供传输层映射状态码、供 Run 引擎判断是否终止
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 调用方输入有误，同步拒绝
    Input,
    /// 执行期失败，终止当前 Run
    Execution,
    /// 同一线程上已有未结束的 Run
    Conflict,
}

/// 运行时各组件共用的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HiveError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool already registered: {0}")]
    ToolAlreadyRegistered(String),

    #[error("Invalid input for tool {tool}: {reason}")]
    InvalidToolInput { tool: String, reason: String },

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Unknown thread: {0}")]
    UnknownThread(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent already registered: {0}")]
    AgentAlreadyRegistered(String),

    #[error("Task {0} has not completed")]
    TaskNotCompleted(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Tool {tool} failed: {reason}")]
    ToolExecutionFailed { tool: String, reason: String },

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Step limit exceeded: {0} steps")]
    StepLimitExceeded(usize),

    #[error("Policy failed: {0}")]
    PolicyFailed(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Thread {thread_id} already has an active run {run_id}")]
    RunAlreadyActive { thread_id: String, run_id: String },
}

impl HiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HiveError::DimensionMismatch { .. }
            | HiveError::UnknownCollection(_)
            | HiveError::CollectionAlreadyExists(_)
            | HiveError::UnknownTool(_)
            | HiveError::ToolAlreadyRegistered(_)
            | HiveError::InvalidToolInput { .. }
            | HiveError::UnknownTask(_)
            | HiveError::UnknownThread(_)
            | HiveError::UnknownAgent(_)
            | HiveError::AgentAlreadyRegistered(_)
            | HiveError::TaskNotCompleted(_)
            | HiveError::InvalidInput(_) => ErrorKind::Input,
            HiveError::RunAlreadyActive { .. } => ErrorKind::Conflict,
            HiveError::EmbeddingUnavailable(_)
            | HiveError::ToolExecutionFailed { .. }
            | HiveError::ToolTimeout(_)
            | HiveError::StepLimitExceeded(_)
            | HiveError::PolicyFailed(_)
            | HiveError::LlmError(_)
            | HiveError::InvalidTransition { .. }
            | HiveError::Persistence(_) => ErrorKind::Execution,
        }
    }

    /// 是否为「找不到某个 id」类错误（传输层映射为 404）
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HiveError::UnknownCollection(_)
                | HiveError::UnknownTool(_)
                | HiveError::UnknownTask(_)
                | HiveError::UnknownThread(_)
                | HiveError::UnknownAgent(_)
        )
    }
}

impl From<serde_json::Error> for HiveError {
    fn from(err: serde_json::Error) -> Self {
        HiveError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for HiveError {
    fn from(err: std::io::Error) -> Self {
        HiveError::Persistence(err.to_string())
    }
}

pub type HiveResult<T> = Result<T, HiveError>;

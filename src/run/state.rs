//! Run 状态机与 Run 存储
//!
//! queued -> in_progress -> {requires_action, completed, failed}
//! requires_action -> in_progress（工具结果写回后）/ failed（工具失败）
//! queued / in_progress -> cancelled（外部取消）
//! completed / failed / cancelled 为终态。

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{HiveError, HiveResult};
use crate::memory::{MessageContent, ThreadId};

pub type RunId = String;

/// Run 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Queued, InProgress)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (InProgress, RequiresAction)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
                | (RequiresAction, InProgress)
                | (RequiresAction, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 策略请求的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool: String,
    pub input: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, input: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            tool: tool.into(),
            input,
        }
    }
}

/// 一次 Run：针对某线程历史的一次智能体执行；进入终态后不再复用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub thread_id: ThreadId,
    pub agent_id: String,
    pub status: RunStatus,
    /// 处于 requires_action 时等待结果的工具调用
    pub pending_tool_calls: Vec<ToolCall>,
    /// completed 时的最终消息
    pub result: Option<MessageContent>,
    /// failed 时的原因
    pub failure: Option<String>,
    /// 已咨询策略的次数
    pub steps: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Run {
    pub fn new(thread_id: impl Into<ThreadId>, agent_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("run_{}", uuid::Uuid::new_v4()),
            thread_id: thread_id.into(),
            agent_id: agent_id.into(),
            status: RunStatus::Queued,
            pending_tool_calls: Vec::new(),
            result: None,
            failure: None,
            steps: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 执行一次状态迁移；非法迁移返回 InvalidTransition 且不改变状态
    pub fn transition(&mut self, next: RunStatus) -> HiveResult<RunStatus> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(HiveError::InvalidTransition { from, to: next });
        }
        self.status = next;
        self.updated_at = chrono::Utc::now().timestamp_millis();
        Ok(from)
    }
}

/// Run 快照存储：Run 引擎每次迁移后写入，供轮询读取
#[derive(Debug, Default)]
pub struct RunStore {
    runs: RwLock<HashMap<RunId, Run>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, run: Run) {
        self.runs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run.id.clone(), run);
    }

    pub fn get(&self, run_id: &str) -> Option<Run> {
        self.runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(run_id)
            .cloned()
    }

    pub fn status(&self, run_id: &str) -> Option<RunStatus> {
        self.runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(run_id)
            .map(|r| r.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        let mut run = Run::new("thread", "agent");
        assert_eq!(run.status, RunStatus::Queued);
        run.transition(RunStatus::InProgress).unwrap();
        run.transition(RunStatus::RequiresAction).unwrap();
        run.transition(RunStatus::InProgress).unwrap();
        assert_eq!(run.transition(RunStatus::Completed).unwrap(), RunStatus::InProgress);
        assert!(run.status.is_terminal());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut run = Run::new("thread", "agent");
        assert_eq!(
            run.transition(RunStatus::Completed).unwrap_err(),
            HiveError::InvalidTransition {
                from: RunStatus::Queued,
                to: RunStatus::Completed
            }
        );
        assert_eq!(run.status, RunStatus::Queued);

        run.transition(RunStatus::Cancelled).unwrap();
        for next in [RunStatus::InProgress, RunStatus::Queued, RunStatus::Failed] {
            assert!(run.transition(next).is_err());
        }
        assert!(!RunStatus::RequiresAction.can_transition_to(RunStatus::Cancelled));
    }

    #[test]
    fn test_status_serde_and_display() {
        assert_eq!(
            serde_json::to_value(RunStatus::RequiresAction).unwrap(),
            serde_json::json!("requires_action")
        );
        assert_eq!(RunStatus::InProgress.to_string(), "in_progress");
    }

    #[test]
    fn test_run_store() {
        let store = RunStore::new();
        let run = Run::new("thread", "agent");
        let id = run.id.clone();
        store.put(run);
        assert_eq!(store.status(&id), Some(RunStatus::Queued));
        assert!(store.get("missing").is_none());
    }
}

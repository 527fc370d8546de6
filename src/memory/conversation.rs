//! 会话存储：Thread / Message
//!
//! 每个线程是只追加、不删除的有序消息序列。写入必须持有线程租约（ThreadLease）：
//! 同一线程同一时刻至多一个未结束的 Run 持有租约，租约在 drop 时释放，
//! 以此串行化同一线程的追加、保证消息顺序。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{HiveError, HiveResult};

pub type ThreadId = String;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    Tool,
}

/// 结构化消息内容：文本 + 可选引用；工具消息额外携带工具名与结构化结果
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_citations(mut self, citations: Vec<String>) -> Self {
        self.citations = citations;
        self
    }

    /// 工具结果消息：text 为结果的紧凑 JSON，data 为原始结构化值
    pub fn tool_result(tool: impl Into<String>, data: Value) -> Self {
        Self {
            text: data.to_string(),
            citations: Vec::new(),
            tool: Some(tool.into()),
            data: Some(data),
        }
    }
}

/// 单条消息，追加后不可变
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// 在线程内的位置（从 0 开始连续递增）
    pub seq: usize,
    /// 追加时间（毫秒时间戳）
    pub created_at: i64,
}

/// 线程快照
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub messages: Vec<Message>,
}

#[derive(Default)]
struct ThreadSlot {
    messages: Mutex<Vec<Message>>,
    active_run: Mutex<Option<String>>,
}

impl ThreadSlot {
    fn messages(&self) -> MutexGuard<'_, Vec<Message>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_run(&self) -> MutexGuard<'_, Option<String>> {
        self.active_run.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 线程存储：线程 id -> 消息序列 + 当前持有租约的 Run
#[derive(Default)]
pub struct ThreadStore {
    threads: RwLock<HashMap<ThreadId, Arc<ThreadSlot>>>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, thread_id: &str) -> HiveResult<Arc<ThreadSlot>> {
        self.threads
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(thread_id)
            .cloned()
            .ok_or_else(|| HiveError::UnknownThread(thread_id.to_string()))
    }

    /// 新建空线程
    pub fn create_thread(&self) -> ThreadId {
        let id = format!("thread_{}", uuid::Uuid::new_v4());
        self.threads
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), Arc::new(ThreadSlot::default()));
        id
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        self.threads
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(thread_id)
    }

    pub fn messages(&self, thread_id: &str) -> HiveResult<Vec<Message>> {
        Ok(self.slot(thread_id)?.messages().clone())
    }

    pub fn snapshot(&self, thread_id: &str) -> HiveResult<Thread> {
        Ok(Thread {
            id: thread_id.to_string(),
            messages: self.messages(thread_id)?,
        })
    }

    /// 当前持有租约的 Run id
    pub fn active_run(&self, thread_id: &str) -> HiveResult<Option<String>> {
        Ok(self.slot(thread_id)?.active_run().clone())
    }

    /// 为 run_id 获取线程租约；已有其他未结束的 Run 时返回 RunAlreadyActive
    pub fn acquire(&self, thread_id: &str, run_id: &str) -> HiveResult<ThreadLease> {
        let slot = self.slot(thread_id)?;
        {
            let mut active = slot.active_run();
            if let Some(existing) = active.as_ref() {
                return Err(HiveError::RunAlreadyActive {
                    thread_id: thread_id.to_string(),
                    run_id: existing.clone(),
                });
            }
            *active = Some(run_id.to_string());
        }
        Ok(ThreadLease {
            thread_id: thread_id.to_string(),
            run_id: run_id.to_string(),
            slot,
        })
    }

    /// 从快照恢复线程；同 id 线程已存在时拒绝
    pub fn restore(&self, thread: Thread) -> HiveResult<()> {
        if thread.messages.iter().enumerate().any(|(i, m)| m.seq != i) {
            return Err(HiveError::InvalidInput(format!(
                "thread '{}' has non-contiguous message positions",
                thread.id
            )));
        }
        let mut threads = self.threads.write().unwrap_or_else(|e| e.into_inner());
        if threads.contains_key(&thread.id) {
            return Err(HiveError::InvalidInput(format!(
                "thread '{}' already exists",
                thread.id
            )));
        }
        let slot = ThreadSlot {
            messages: Mutex::new(thread.messages),
            active_run: Mutex::new(None),
        };
        threads.insert(thread.id, Arc::new(slot));
        Ok(())
    }
}

/// 线程写租约：持有期间该线程只接受本 Run 的追加；drop 时释放
pub struct ThreadLease {
    thread_id: ThreadId,
    run_id: String,
    slot: Arc<ThreadSlot>,
}

impl ThreadLease {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// 追加一条消息，返回带序号的副本
    pub fn append(&self, role: Role, content: MessageContent) -> Message {
        let mut messages = self.slot.messages();
        let message = Message {
            role,
            content,
            seq: messages.len(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        messages.push(message.clone());
        message
    }

    /// 完整历史（克隆）
    pub fn history(&self) -> Vec<Message> {
        self.slot.messages().clone()
    }
}

impl Drop for ThreadLease {
    fn drop(&mut self) {
        let mut active = self.slot.active_run();
        if active.as_deref() == Some(self.run_id.as_str()) {
            *active = None;
        }
    }
}

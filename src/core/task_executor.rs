//! 任务执行器
//!
//! submit 校验输入、为线程取得租约、追加用户消息并登记任务后立即返回；Run 在独立的 tokio 任务里
//! 由 RunEngine 驱动。poll 非阻塞地读取状态：未结束时只有状态，completed 带最终消息，
//! failed 带失败原因，cancelled 不带结果。
//!
//! 并发：不同线程上的 Run 完全并行（受 Semaphore 上限约束，等待许可的 Run 保持 queued）；
//! 同一线程同一时刻只允许一个未结束的 Run。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::agent::AgentRegistry;
use crate::core::{FeedbackRecord, HiveError, HiveResult};
use crate::memory::{Message, MessageContent, Role, ThreadId, ThreadStore};
use crate::run::{Run, RunEngine, RunId, RunStatus};

/// 任务 ID
pub type TaskId = String;

/// 任务结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { message: MessageContent },
    Failed { reason: String },
}

impl TaskOutcome {
    /// 由终态 Run 得出结果；cancelled 与非终态均无结果
    pub fn from_run(run: &Run) -> Option<Self> {
        match run.status {
            RunStatus::Completed => Some(TaskOutcome::Completed {
                message: run.result.clone().unwrap_or_default(),
            }),
            RunStatus::Failed => Some(TaskOutcome::Failed {
                reason: run
                    .failure
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string()),
            }),
            _ => None,
        }
    }
}

/// 一次异步提交：对应一个 Run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub thread_id: ThreadId,
    pub run_id: RunId,
    pub agent_id: String,
    /// 仅在提交（queued）与结束（终态）时写入；运行中的状态以 Run 快照为准
    pub status: RunStatus,
    pub outcome: Option<TaskOutcome>,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// 提交目标线程
#[derive(Debug, Clone, PartialEq)]
pub enum ThreadTarget {
    Existing(ThreadId),
    New,
}

/// 提交请求
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub thread: ThreadTarget,
    pub agent_id: String,
    pub message: MessageContent,
}

impl SubmitRequest {
    /// 在新线程上提交
    pub fn new_thread(agent_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            thread: ThreadTarget::New,
            agent_id: agent_id.into(),
            message: MessageContent::text(text),
        }
    }

    /// 在已有线程上追加一轮
    pub fn on_thread(
        thread_id: impl Into<ThreadId>,
        agent_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            thread: ThreadTarget::Existing(thread_id.into()),
            agent_id: agent_id.into(),
            message: MessageContent::text(text),
        }
    }
}

/// submit 的返回值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: TaskId,
    pub thread_id: ThreadId,
    pub run_id: RunId,
}

/// poll 的返回值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPoll {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutcome>,
}

/// 任务结束通知
#[derive(Debug, Clone)]
pub struct TaskNotification {
    pub task_id: TaskId,
    pub thread_id: ThreadId,
    pub run_id: RunId,
    pub status: RunStatus,
    pub outcome: Option<TaskOutcome>,
}

struct Inner {
    tasks: RwLock<HashMap<TaskId, Task>>,
    cancel_tokens: RwLock<HashMap<TaskId, CancellationToken>>,
    threads: Arc<ThreadStore>,
    agents: Arc<AgentRegistry>,
    engine: Arc<RunEngine>,
    permits: Arc<Semaphore>,
    notification_tx: Option<mpsc::UnboundedSender<TaskNotification>>,
}

impl Inner {
    /// 写入终态任务记录并发送通知
    async fn finish(&self, task_id: &str, run: &Run) {
        let outcome = TaskOutcome::from_run(run);
        let notification = {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get_mut(task_id) else {
                return;
            };
            task.status = run.status;
            task.outcome = outcome.clone();
            task.completed_at = Some(chrono::Utc::now().timestamp_millis());
            TaskNotification {
                task_id: task.id.clone(),
                thread_id: task.thread_id.clone(),
                run_id: task.run_id.clone(),
                status: run.status,
                outcome,
            }
        };
        self.cancel_tokens.write().await.remove(task_id);
        tracing::info!(task_id, run_id = %run.id, status = %run.status, "task finished");
        if let Some(tx) = &self.notification_tx {
            let _ = tx.send(notification);
        }
    }
}

/// 任务执行器（Clone 共享同一份状态）
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<Inner>,
}

impl TaskExecutor {
    pub fn new(
        threads: Arc<ThreadStore>,
        agents: Arc<AgentRegistry>,
        engine: Arc<RunEngine>,
        max_concurrent_runs: usize,
    ) -> Self {
        Self::build(threads, agents, engine, max_concurrent_runs, None)
    }

    /// 带结束通知通道的执行器
    pub fn with_notifications(
        threads: Arc<ThreadStore>,
        agents: Arc<AgentRegistry>,
        engine: Arc<RunEngine>,
        max_concurrent_runs: usize,
    ) -> (Self, mpsc::UnboundedReceiver<TaskNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self::build(threads, agents, engine, max_concurrent_runs, Some(tx)),
            rx,
        )
    }

    fn build(
        threads: Arc<ThreadStore>,
        agents: Arc<AgentRegistry>,
        engine: Arc<RunEngine>,
        max_concurrent_runs: usize,
        notification_tx: Option<mpsc::UnboundedSender<TaskNotification>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: RwLock::new(HashMap::new()),
                cancel_tokens: RwLock::new(HashMap::new()),
                threads,
                agents,
                engine,
                permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
                notification_tx,
            }),
        }
    }

    pub fn threads(&self) -> &Arc<ThreadStore> {
        &self.inner.threads
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.inner.agents
    }

    /// 提交任务：输入错误同步返回且不改变任何状态；成功时立即返回句柄
    pub async fn submit(&self, request: SubmitRequest) -> HiveResult<TaskHandle> {
        if request.message.text.trim().is_empty() {
            return Err(HiveError::InvalidInput("message must not be empty".to_string()));
        }
        let agent = self.inner.agents.get(&request.agent_id)?;
        let thread_id = match request.thread {
            ThreadTarget::Existing(id) => id,
            ThreadTarget::New => self.inner.threads.create_thread(),
        };

        let run = Run::new(&thread_id, agent.id());
        let lease = self.inner.threads.acquire(&thread_id, &run.id)?;
        lease.append(Role::User, request.message);

        let task = Task {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            thread_id: thread_id.clone(),
            run_id: run.id.clone(),
            agent_id: agent.id().to_string(),
            status: RunStatus::Queued,
            outcome: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            completed_at: None,
        };
        let handle = TaskHandle {
            task_id: task.id.clone(),
            thread_id,
            run_id: run.id.clone(),
        };
        let token = CancellationToken::new();
        self.inner.engine.runs().put(run.clone());
        self.inner.tasks.write().await.insert(task.id.clone(), task);
        self.inner
            .cancel_tokens
            .write()
            .await
            .insert(handle.task_id.clone(), token.clone());

        tracing::info!(
            task_id = %handle.task_id,
            thread_id = %handle.thread_id,
            run_id = %handle.run_id,
            agent = agent.id(),
            "task submitted"
        );

        let inner = self.inner.clone();
        let task_id = handle.task_id.clone();
        tokio::spawn(async move {
            let _permit = tokio::select! {
                permit = inner.permits.clone().acquire_owned() => permit.ok(),
                _ = token.cancelled() => None,
            };
            let run = inner.engine.execute(run, &lease, &agent, &token).await;
            drop(lease);
            inner.finish(&task_id, &run).await;
        });

        Ok(handle)
    }

    /// 非阻塞查询任务状态
    pub async fn poll(&self, task_id: &str) -> HiveResult<TaskPoll> {
        let task = self
            .get_task(task_id)
            .await
            .ok_or_else(|| HiveError::UnknownTask(task_id.to_string()))?;
        if task.status.is_terminal() {
            return Ok(TaskPoll {
                status: task.status,
                result: task.outcome,
            });
        }
        // Run 已终结但任务记录尚未写入时仍报告 in_progress
        let status = match self.inner.engine.runs().status(&task.run_id) {
            Some(status) if status.is_terminal() => RunStatus::InProgress,
            Some(status) => status,
            None => task.status,
        };
        Ok(TaskPoll {
            status,
            result: None,
        })
    }

    /// 轮询直到任务结束
    pub async fn wait(&self, task_id: &str, interval: Duration) -> HiveResult<TaskPoll> {
        loop {
            let poll = self.poll(task_id).await?;
            if poll.status.is_terminal() {
                return Ok(poll);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// 请求取消：在下一个步骤边界生效；任务已结束时返回 false
    pub async fn cancel(&self, task_id: &str) -> HiveResult<bool> {
        let task = self
            .get_task(task_id)
            .await
            .ok_or_else(|| HiveError::UnknownTask(task_id.to_string()))?;
        if task.status.is_terminal() {
            return Ok(false);
        }
        match self.inner.cancel_tokens.read().await.get(task_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(task_id, run_id = %task.run_id, "task cancellation requested");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.tasks.read().await.get(task_id).cloned()
    }

    /// 线程的全部消息（按顺序）
    pub fn thread_messages(&self, thread_id: &str) -> HiveResult<Vec<Message>> {
        self.inner.threads.messages(thread_id)
    }

    /// 为已完成的任务生成反馈记录
    pub async fn feedback_for(
        &self,
        task_id: &str,
        score: i32,
        text: Option<String>,
    ) -> HiveResult<FeedbackRecord> {
        let task = self
            .get_task(task_id)
            .await
            .ok_or_else(|| HiveError::UnknownTask(task_id.to_string()))?;
        if task.status != RunStatus::Completed {
            return Err(HiveError::TaskNotCompleted(task_id.to_string()));
        }
        Ok(FeedbackRecord::new(task.thread_id, task.run_id, score, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::run::{Action, FnPolicy, PolicyInput, RunStore, ScriptedPolicy};
    use crate::tools::{FnSubagent, Subagent, SubagentTool, ToolExecutor, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Gate(Arc<tokio::sync::Notify>);

    #[async_trait]
    impl Subagent for Gate {
        async fn handle(&self, _input: Value) -> Result<Value, String> {
            self.0.notified().await;
            Ok(json!({"opened": true}))
        }
    }

    fn executor(gate: Arc<tokio::sync::Notify>) -> (TaskExecutor, mpsc::UnboundedReceiver<TaskNotification>) {
        let mut registry = ToolRegistry::new();
        registry
            .register(SubagentTool::new(
                "researcher",
                "Returns a finding",
                FnSubagent::new(|_: Value| Ok(json!({"finding": "X"}))),
            ))
            .unwrap();
        registry
            .register(SubagentTool::new("gate", "Waits until opened", Gate(gate)))
            .unwrap();
        let engine = RunEngine::new(
            Arc::new(ToolExecutor::new(registry, 5)),
            Arc::new(RunStore::new()),
            8,
        );

        let agents = AgentRegistry::new();
        agents
            .register(
                AgentConfig::builder("echo")
                    .policy(FnPolicy::new("echo", |input: &PolicyInput<'_>| {
                        let (_, user) = input
                            .last_user_message()
                            .ok_or_else(|| "no user message".to_string())?;
                        Ok(Action::finish(format!("you said {}", user.content.text)))
                    }))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        agents
            .register(
                AgentConfig::builder("waiter")
                    .tools(["gate"])
                    .policy(ScriptedPolicy::new(vec![
                        Action::call("gate", json!({})),
                        Action::finish("opened"),
                    ]))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        TaskExecutor::with_notifications(
            Arc::new(ThreadStore::new()),
            Arc::new(agents),
            Arc::new(engine),
            2,
        )
    }

    #[tokio::test]
    async fn test_submit_and_poll() {
        let (executor, mut notifications) = executor(Arc::new(tokio::sync::Notify::new()));
        let handle = executor
            .submit(SubmitRequest::new_thread("echo", "hello"))
            .await
            .unwrap();

        let poll = executor.wait(&handle.task_id, Duration::from_millis(5)).await.unwrap();
        assert_eq!(poll.status, RunStatus::Completed);
        assert_eq!(
            poll.result,
            Some(TaskOutcome::Completed {
                message: MessageContent::text("you said hello")
            })
        );

        let messages = executor.thread_messages(&handle.thread_id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Agent);

        let note = notifications.recv().await.unwrap();
        assert_eq!(note.task_id, handle.task_id);
        assert_eq!(note.status, RunStatus::Completed);

        // 同一线程上的第二轮
        let second = executor
            .submit(SubmitRequest::on_thread(&handle.thread_id, "echo", "again"))
            .await
            .unwrap();
        assert_eq!(second.thread_id, handle.thread_id);
        executor.wait(&second.task_id, Duration::from_millis(5)).await.unwrap();
        assert_eq!(executor.thread_messages(&handle.thread_id).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_input_errors_do_not_change_state() {
        let (executor, _rx) = executor(Arc::new(tokio::sync::Notify::new()));
        assert_eq!(
            executor
                .submit(SubmitRequest::new_thread("nobody", "hi"))
                .await
                .unwrap_err(),
            HiveError::UnknownAgent("nobody".into())
        );
        assert_eq!(
            executor
                .submit(SubmitRequest::on_thread("thread_missing", "echo", "hi"))
                .await
                .unwrap_err(),
            HiveError::UnknownThread("thread_missing".into())
        );
        assert!(matches!(
            executor.submit(SubmitRequest::new_thread("echo", "  ")).await,
            Err(HiveError::InvalidInput(_))
        ));
        assert_eq!(
            executor.poll("task_missing").await.unwrap_err(),
            HiveError::UnknownTask("task_missing".into())
        );
    }

    #[tokio::test]
    async fn test_run_already_active_and_cancel() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let (executor, _rx) = executor(gate.clone());
        let handle = executor
            .submit(SubmitRequest::new_thread("waiter", "wait"))
            .await
            .unwrap();

        let err = executor
            .submit(SubmitRequest::on_thread(&handle.thread_id, "echo", "again"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HiveError::RunAlreadyActive {
                thread_id: handle.thread_id.clone(),
                run_id: handle.run_id.clone()
            }
        );
        assert_eq!(executor.thread_messages(&handle.thread_id).unwrap().len(), 1);

        assert!(executor.cancel(&handle.task_id).await.unwrap());
        gate.notify_one();
        let poll = executor.wait(&handle.task_id, Duration::from_millis(5)).await.unwrap();
        assert_eq!(poll.status, RunStatus::Cancelled);
        assert_eq!(poll.result, None);
        assert!(!executor.cancel(&handle.task_id).await.unwrap());

        assert!(matches!(
            executor.feedback_for(&handle.task_id, 1, None).await,
            Err(HiveError::TaskNotCompleted(_))
        ));
        executor
            .submit(SubmitRequest::on_thread(&handle.thread_id, "echo", "again"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_feedback_for_completed_task() {
        let (executor, _rx) = executor(Arc::new(tokio::sync::Notify::new()));
        let handle = executor
            .submit(SubmitRequest::new_thread("echo", "hello"))
            .await
            .unwrap();
        executor.wait(&handle.task_id, Duration::from_millis(5)).await.unwrap();

        let record = executor
            .feedback_for(&handle.task_id, 1, Some("great".into()))
            .await
            .unwrap();
        assert_eq!(record.thread_id, handle.thread_id);
        assert_eq!(record.run_id, handle.run_id);
        assert_eq!(record.score, 1);
    }
}

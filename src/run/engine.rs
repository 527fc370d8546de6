//! Run 引擎主循环
//!
//! queued -> in_progress -> 咨询策略 -> (工具调用: requires_action -> 执行 -> 写回 tool 消息 -> in_progress)
//! -> ... -> 策略结束（追加 agent 消息，completed）。
//! 同一 Run 的步骤严格串行；同一步内的多个工具调用并发执行，结果按请求顺序写回。
//! 工具失败、策略失败、超出步数上限均使 Run 进入 failed 并记录原因，不做重试。
//! 工具或策略 panic 同样记为失败，不会让 Run 停在中间状态。
//! 取消是协作式的：只在每轮循环开始处检查，正在执行的工具调用会先完成。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentConfig;
use crate::core::{HiveError, HiveResult};
use crate::memory::{MessageContent, Role, ThreadLease};
use crate::run::{Action, PolicyInput, Run, RunEvent, RunStatus, RunStore, ToolCall};
use crate::tools::ToolExecutor;

/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

pub struct RunEngine {
    tools: Arc<ToolExecutor>,
    runs: Arc<RunStore>,
    max_steps: usize,
    event_tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl RunEngine {
    pub fn new(tools: Arc<ToolExecutor>, runs: Arc<RunStore>, max_steps: usize) -> Self {
        Self {
            tools,
            runs,
            max_steps: max_steps.max(1),
            event_tx: None,
        }
    }

    /// 设置事件推送通道
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn runs(&self) -> &Arc<RunStore> {
        &self.runs
    }

    pub fn tools(&self) -> &Arc<ToolExecutor> {
        &self.tools
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// 迁移状态并写入 RunStore；非法迁移只记录日志
    fn commit(&self, run: &mut Run, next: RunStatus) -> bool {
        match run.transition(next) {
            Ok(from) => {
                tracing::debug!(run_id = %run.id, %from, to = %next, "run transition");
                self.runs.put(run.clone());
                self.emit(RunEvent::StatusChanged {
                    run_id: run.id.clone(),
                    from,
                    to: next,
                });
                if next.is_terminal() {
                    self.emit(RunEvent::Finished {
                        run_id: run.id.clone(),
                        status: next,
                        reason: run.failure.clone(),
                    });
                }
                true
            }
            Err(e) => {
                tracing::error!(run_id = %run.id, error = %e, "rejected run transition");
                false
            }
        }
    }

    fn fail(&self, run: &mut Run, error: HiveError) {
        tracing::warn!(run_id = %run.id, error = %error, "run failed");
        run.failure = Some(error.to_string());
        run.pending_tool_calls.clear();
        self.commit(run, RunStatus::Failed);
    }

    async fn invoke(&self, agent: &AgentConfig, run_id: &str, call: &ToolCall) -> HiveResult<Value> {
        self.emit(RunEvent::ToolCall {
            run_id: run_id.to_string(),
            tool: call.tool.clone(),
            input: call.input.clone(),
        });
        let result = if agent.allows_tool(&call.tool) {
            AssertUnwindSafe(self.tools.execute(&call.tool, call.input.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(HiveError::ToolExecutionFailed {
                        tool: call.tool.clone(),
                        reason: format!("tool panicked: {}", panic_message(panic.as_ref())),
                    })
                })
        } else {
            Err(HiveError::UnknownTool(call.tool.clone()))
        };
        let (ok, preview) = match &result {
            Ok(v) => (true, preview(&v.to_string())),
            Err(e) => (false, preview(&e.to_string())),
        };
        self.emit(RunEvent::ToolResult {
            run_id: run_id.to_string(),
            tool: call.tool.clone(),
            ok,
            preview,
        });
        result
    }

    /// 驱动 Run 直到终态并返回最终快照；调用方须持有该线程的租约
    pub async fn execute(
        &self,
        mut run: Run,
        lease: &ThreadLease,
        agent: &AgentConfig,
        cancel: &CancellationToken,
    ) -> Run {
        tracing::info!(run_id = %run.id, thread_id = %run.thread_id, agent = agent.id(), "run started");
        let available_tools = agent.tools().to_vec();

        while !run.status.is_terminal() {
            if cancel.is_cancelled() {
                tracing::info!(run_id = %run.id, "run cancelled");
                run.pending_tool_calls.clear();
                self.commit(&mut run, RunStatus::Cancelled);
                break;
            }
            if run.status == RunStatus::Queued && !self.commit(&mut run, RunStatus::InProgress) {
                break;
            }
            if run.steps >= self.max_steps {
                self.fail(&mut run, HiveError::StepLimitExceeded(self.max_steps));
                break;
            }
            run.steps += 1;

            let history = lease.history();
            let input = PolicyInput {
                run_id: &run.id,
                history: &history,
                available_tools: &available_tools,
                instructions: agent.instructions(),
                step: run.steps,
            };
            let decision = AssertUnwindSafe(agent.policy().decide(&input))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(format!("policy panicked: {}", panic_message(panic.as_ref())))
                });
            let action = match decision {
                Ok(action) => action,
                Err(reason) => {
                    self.fail(&mut run, HiveError::PolicyFailed(reason));
                    break;
                }
            };

            match action {
                Action::Finish(content) => {
                    lease.append(Role::Agent, content.clone());
                    run.result = Some(content);
                    self.commit(&mut run, RunStatus::Completed);
                }
                Action::CallTools(calls) if calls.is_empty() => {
                    self.fail(
                        &mut run,
                        HiveError::PolicyFailed("policy requested zero tool calls".to_string()),
                    );
                }
                Action::CallTools(calls) => {
                    tracing::debug!(run_id = %run.id, step = run.steps, calls = calls.len(), "tool step");
                    run.pending_tool_calls = calls.clone();
                    if !self.commit(&mut run, RunStatus::RequiresAction) {
                        break;
                    }

                    let results =
                        join_all(calls.iter().map(|call| self.invoke(agent, &run.id, call))).await;

                    let mut failure = None;
                    for (call, result) in calls.iter().zip(results) {
                        match result {
                            Ok(output) => {
                                lease.append(Role::Tool, MessageContent::tool_result(&call.tool, output));
                            }
                            Err(e) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                    run.pending_tool_calls.clear();
                    match failure {
                        Some(e) => self.fail(&mut run, e),
                        None => {
                            self.commit(&mut run, RunStatus::InProgress);
                        }
                    }
                }
            }
        }

        tracing::info!(run_id = %run.id, status = %run.status, steps = run.steps, "run finished");
        run
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > RESULT_PREVIEW_CHARS {
        format!("{}...", s.chars().take(RESULT_PREVIEW_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}

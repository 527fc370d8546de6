//! HTTP 传输层（feature `server`）
//!
//! 把任务执行器暴露为 JSON API：
//! - `POST /api/tasks` 提交 `{thread_id?, agent_id, message}`，返回 `{task_id, thread_id, run_id}`
//! - `GET /api/tasks/:id` 轮询 `{status, result?}`
//! - `POST /api/tasks/:id/cancel` 请求取消
//! - `POST /api/feedback` 为已完成任务记录反馈
//! - `GET /api/threads/:id/messages` 线程消息
//! - `GET /api/tools` 已注册工具的 schema
//! - `GET /api/health`
//!
//! 错误映射：未知 id 404，RunAlreadyActive 409，其余输入错误 400，执行错误 500。
//! 允许任意来源跨域访问，浏览器前端可直接调用。

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::core::{
    ErrorKind, FeedbackRecord, FeedbackSink, HiveError, SubmitRequest, TaskExecutor, TaskHandle,
    TaskPoll, ThreadTarget, RAG_AGENT,
};
use crate::memory::{Message, MessageContent};
use crate::tools::{tool_call_schema_json, ToolExecutor};

/// 服务共享状态
#[derive(Clone)]
pub struct AppState {
    pub executor: TaskExecutor,
    pub tools: Arc<ToolExecutor>,
    pub feedback: Arc<dyn FeedbackSink>,
}

/// HiveError -> HTTP 响应
#[derive(Debug)]
pub struct ApiError(pub HiveError);

impl From<HiveError> for ApiError {
    fn from(err: HiveError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        if self.0.is_not_found() {
            return StatusCode::NOT_FOUND;
        }
        match self.0.kind() {
            ErrorKind::Input => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Execution => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub thread_id: Option<String>,
    #[serde(default = "default_agent")]
    pub agent_id: String,
    pub message: String,
}

fn default_agent() -> String {
    RAG_AGENT.to_string()
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub task_id: String,
    pub score: i32,
    pub text: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/tasks", post(create_task))
        .route("/api/tasks/:id", get(poll_task))
        .route("/api/tasks/:id/cancel", post(cancel_task))
        .route("/api/feedback", post(submit_feedback))
        .route("/api/threads/:id/messages", get(thread_messages))
        .route("/api/tools", get(list_tools))
        .route("/api/health", get(|| async { "OK" }))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskHandle>), ApiError> {
    let request = SubmitRequest {
        thread: match req.thread_id {
            Some(id) => ThreadTarget::Existing(id),
            None => ThreadTarget::New,
        },
        agent_id: req.agent_id,
        message: MessageContent::text(req.message),
    };
    let handle = state.executor.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

async fn poll_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskPoll>, ApiError> {
    Ok(Json(state.executor.poll(&id).await?))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cancelled = state.executor.cancel(&id).await?;
    Ok(Json(json!({ "task_id": id, "cancelled": cancelled })))
}

async fn submit_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackRecord>, ApiError> {
    let record = state
        .executor
        .feedback_for(&req.task_id, req.score, req.text)
        .await?;
    state.feedback.append(&record)?;
    Ok(Json(record))
}

async fn thread_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(state.executor.thread_messages(&id)?))
}

async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let tools: Value =
        serde_json::from_str(&state.tools.registry().to_schema_json()).unwrap_or_else(|_| json!([]));
    let call_format: Value =
        serde_json::from_str(&tool_call_schema_json()).unwrap_or(Value::Null);
    Json(json!({ "tools": tools, "call_format": call_format }))
}

/// 绑定地址并运行服务，直到进程退出
pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("hive server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

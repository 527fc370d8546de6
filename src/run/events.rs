//! Run 过程事件：可选的推送通道，补充轮询（例如转发为 SSE）

use serde::Serialize;

use crate::run::RunStatus;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// 状态迁移
    StatusChanged {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },
    /// 发起工具调用
    ToolCall {
        run_id: String,
        tool: String,
        input: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        run_id: String,
        tool: String,
        ok: bool,
        preview: String,
    },
    /// Run 进入终态
    Finished {
        run_id: String,
        status: RunStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

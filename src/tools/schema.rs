//! 工具调用 JSON Schema 生成（schemars）
//!
//! 用于把「合法 tool call」的结构注入模型驱动策略的 system prompt，减少格式错误。

use schemars::{schema_for, JsonSchema};

/// 工具调用请求格式：与策略返回的 `{"tool": "...", "input": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，必须是当前智能体配置允许的工具之一
    pub tool: String,
    /// 结构化输入，形状由各工具的 parameters schema 决定
    pub input: serde_json::Map<String, serde_json::Value>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute(tool_name, input) 在超时内调用 registry.invoke，
//! 超时返回 ToolTimeout；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::{HiveError, HiveResult};
use crate::tools::{Tool, ToolRegistry};

/// 工具执行器：对每次调用施加超时；可在多个 Run 间共享（工具须可重入）
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 执行指定工具；超时返回 ToolTimeout，其余错误原样透传；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, input: Value) -> HiveResult<Value> {
        let start = Instant::now();
        let input_preview = input_preview(&input);
        let result = timeout(self.timeout, self.registry.invoke(tool_name, input)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(HiveError::InvalidToolInput { .. })) => (false, "invalid_input"),
            Ok(Err(HiveError::UnknownTool(_))) => (false, "unknown_tool"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "input_preview": input_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(output) => output,
            Err(_) => Err(HiveError::ToolTimeout(tool_name.to_string())),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn input_preview(input: &Value) -> String {
    let s = input.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

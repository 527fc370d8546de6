//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / kind / execute），由 ToolRegistry 按名注册与调用。
//! 工具之间只交换结构化 JSON：输入先按 parameters_schema 校验，输出必须是 JSON 对象，
//! Run 引擎据此按字段分支，而不是解析自由文本。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::{HiveError, HiveResult};

/// 工具能力类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// 子代理调用
    Subagent,
    /// 检索调用
    Retrieval,
}

/// 工具 trait：名称、描述、类别、参数 schema、异步执行（输入输出均为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// 工具描述（供策略 / 模型理解功能）
    fn description(&self) -> &str;

    fn kind(&self) -> ToolKind;

    /// 参数 JSON Schema；默认任意对象
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 校验输入形状；默认按 parameters_schema 做完整 JSON Schema 校验
    fn validate(&self, input: &Value) -> Result<(), String> {
        validate_against_schema(&self.parameters_schema(), input)
    }

    /// 执行工具；Err 为工具自身的失败原因
    async fn execute(&self, input: Value) -> Result<Value, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具已存在时返回 ToolAlreadyRegistered
    pub fn register(&mut self, tool: impl Tool + 'static) -> HiveResult<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> HiveResult<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(HiveError::ToolAlreadyRegistered(name));
        }
        tracing::debug!(tool = %name, kind = ?tool.kind(), "tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 调用工具：UnknownTool / InvalidToolInput / ToolExecutionFailed；成功时返回 JSON 对象
    pub async fn invoke(&self, name: &str, input: Value) -> HiveResult<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| HiveError::UnknownTool(name.to_string()))?;
        tool.validate(&input)
            .map_err(|reason| HiveError::InvalidToolInput {
                tool: name.to_string(),
                reason,
            })?;
        let output = tool
            .execute(input)
            .await
            .map_err(|reason| HiveError::ToolExecutionFailed {
                tool: name.to_string(),
                reason,
            })?;
        if !output.is_object() {
            return Err(HiveError::ToolExecutionFailed {
                tool: name.to_string(),
                reason: "tool returned a non-object output".to_string(),
            });
        }
        Ok(output)
    }

    /// 已注册工具名（按字典序）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回 (name, description) 列表，用于生成 prompt 中的 Available tools 段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tool_names()
            .into_iter()
            .filter_map(|name| {
                let tool = self.tools.get(&name)?;
                Some((name, tool.description().to_string()))
            })
            .collect()
    }

    /// 动态生成工具 schema JSON，与实际注册的工具一致
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "kind": tool.kind(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}

/// 按 JSON Schema 校验输入；所有违规项以 "; " 拼接为失败原因
pub fn validate_against_schema(schema: &Value, input: &Value) -> Result<(), String> {
    let validator =
        jsonschema::Validator::new(schema).map_err(|e| format!("invalid tool schema: {e}"))?;
    if validator.is_valid(input) {
        return Ok(());
    }
    let errors: Vec<String> = validator.iter_errors(input).map(|e| e.to_string()).collect();
    Err(errors.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase text. Input: {\"text\": string}"
        }

        fn kind(&self) -> ToolKind {
            ToolKind::Subagent
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        async fn execute(&self, input: Value) -> Result<Value, String> {
            let text = input["text"].as_str().unwrap_or_default();
            if text == "boom" {
                return Err("exploded".to_string());
            }
            if text == "prose" {
                return Ok(Value::from("just some words"));
            }
            Ok(json!({ "text": text.to_uppercase() }))
        }
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper).unwrap();
        assert_eq!(
            registry.register(Upper).unwrap_err(),
            HiveError::ToolAlreadyRegistered("upper".into())
        );

        let out = registry.invoke("upper", json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, json!({"text": "HI"}));
        assert_eq!(registry.tool_names(), vec!["upper".to_string()]);
    }

    #[tokio::test]
    async fn test_invoke_errors() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper).unwrap();

        assert_eq!(
            registry.invoke("missing", json!({})).await.unwrap_err(),
            HiveError::UnknownTool("missing".into())
        );
        assert!(matches!(
            registry.invoke("upper", json!({})).await.unwrap_err(),
            HiveError::InvalidToolInput { .. }
        ));
        assert!(matches!(
            registry.invoke("upper", json!({"text": 3})).await.unwrap_err(),
            HiveError::InvalidToolInput { .. }
        ));
        assert!(matches!(
            registry.invoke("upper", json!("text")).await.unwrap_err(),
            HiveError::InvalidToolInput { .. }
        ));
        assert_eq!(
            registry.invoke("upper", json!({"text": "boom"})).await.unwrap_err(),
            HiveError::ToolExecutionFailed {
                tool: "upper".into(),
                reason: "exploded".into()
            }
        );
        assert!(matches!(
            registry.invoke("upper", json!({"text": "prose"})).await.unwrap_err(),
            HiveError::ToolExecutionFailed { .. }
        ));
    }

    struct Configure;

    #[async_trait]
    impl Tool for Configure {
        fn name(&self) -> &str {
            "configure"
        }

        fn description(&self) -> &str {
            "Echoes validated options"
        }

        fn kind(&self) -> ToolKind {
            ToolKind::Subagent
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "opts": {
                        "type": "object",
                        "properties": { "n": { "type": "integer", "minimum": 1 } },
                        "required": ["n"]
                    },
                    "mode": { "enum": ["a", "b"] }
                },
                "required": ["opts"],
                "additionalProperties": false
            })
        }

        async fn execute(&self, input: Value) -> Result<Value, String> {
            Ok(json!({ "got": input }))
        }
    }

    #[tokio::test]
    async fn test_nested_schema_violations_never_reach_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Configure).unwrap();

        for input in [
            json!({"opts": {}, "mode": "a"}),
            json!({"opts": {"n": 2}, "mode": "zzz"}),
            json!({"opts": {"n": 0}}),
            json!({"opts": {"n": 2}, "extra": true}),
        ] {
            match registry.invoke("configure", input.clone()).await.unwrap_err() {
                HiveError::InvalidToolInput { tool, reason } => {
                    assert_eq!(tool, "configure");
                    assert!(!reason.is_empty(), "empty reason for {input}");
                }
                other => panic!("unexpected error for {input}: {other:?}"),
            }
        }

        let out = registry
            .invoke("configure", json!({"opts": {"n": 2}, "mode": "b"}))
            .await
            .unwrap();
        assert_eq!(out["got"]["mode"], "b");
    }

    #[test]
    fn test_schema_json_lists_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper).unwrap();
        let schema: Value = serde_json::from_str(&registry.to_schema_json()).unwrap();
        assert_eq!(schema[0]["name"], "upper");
        assert_eq!(schema[0]["kind"], "subagent");
        assert_eq!(registry.tool_descriptions()[0].0, "upper");
    }
}

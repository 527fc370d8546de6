//! 子代理工具
//!
//! 子代理是「结构化输入 -> 结构化输出」的能力（可以是本地逻辑，也可以是远程调用），
//! 从注册表视角看是同步的一次调用；若有自然语言内容，放在输出的某个约定字段里。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolKind};

/// 子代理：处理一个结构化请求
#[async_trait]
pub trait Subagent: Send + Sync {
    async fn handle(&self, input: Value) -> Result<Value, String>;
}

/// 用闭包实现的同步子代理
pub struct FnSubagent<F> {
    f: F,
}

impl<F> FnSubagent<F>
where
    F: Fn(Value) -> Result<Value, String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Subagent for FnSubagent<F>
where
    F: Fn(Value) -> Result<Value, String> + Send + Sync,
{
    async fn handle(&self, input: Value) -> Result<Value, String> {
        (self.f)(input)
    }
}

/// 把子代理包装成可注册的工具
pub struct SubagentTool {
    name: String,
    description: String,
    schema: Option<Value>,
    agent: Arc<dyn Subagent>,
}

impl SubagentTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        agent: impl Subagent + 'static,
    ) -> Self {
        Self::from_arc(name, description, Arc::new(agent))
    }

    pub fn from_arc(
        name: impl Into<String>,
        description: impl Into<String>,
        agent: Arc<dyn Subagent>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: None,
            agent,
        }
    }

    /// 声明输入 schema（调用前据此校验）
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

#[async_trait]
impl Tool for SubagentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Subagent
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone().unwrap_or_else(|| {
            serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            })
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        self.agent.handle(input).await
    }
}

//! Agent 配置与注册表
//!
//! AgentConfig 描述一个智能体：指令、允许调用的工具名、编排策略。构建后不可变，
//! 以 Arc 在多个 Run 间共享。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::core::{HiveError, HiveResult};
use crate::run::OrchestratorPolicy;

/// 智能体配置
pub struct AgentConfig {
    id: String,
    instructions: String,
    tools: Vec<String>,
    policy: Arc<dyn OrchestratorPolicy>,
}

impl AgentConfig {
    pub fn builder(id: impl Into<String>) -> AgentConfigBuilder {
        AgentConfigBuilder {
            id: id.into(),
            instructions: String::new(),
            tools: Vec::new(),
            policy: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// 允许调用的工具名（策略的 available_tools）
    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    pub fn policy(&self) -> &Arc<dyn OrchestratorPolicy> {
        &self.policy
    }

    pub fn allows_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name)
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("id", &self.id)
            .field("tools", &self.tools)
            .field("policy", &self.policy.name())
            .finish()
    }
}

pub struct AgentConfigBuilder {
    id: String,
    instructions: String,
    tools: Vec<String>,
    policy: Option<Arc<dyn OrchestratorPolicy>>,
}

impl AgentConfigBuilder {
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn tool(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.tools.contains(&name) {
            self.tools.push(name);
        }
        self
    }

    pub fn tools<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |b, name| b.tool(name))
    }

    pub fn policy(self, policy: impl OrchestratorPolicy + 'static) -> Self {
        self.policy_arc(Arc::new(policy))
    }

    pub fn policy_arc(mut self, policy: Arc<dyn OrchestratorPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn build(self) -> HiveResult<AgentConfig> {
        if self.id.trim().is_empty() {
            return Err(HiveError::InvalidInput("agent id must not be empty".to_string()));
        }
        let policy = self.policy.ok_or_else(|| {
            HiveError::InvalidInput(format!("agent '{}' has no orchestrator policy", self.id))
        })?;
        Ok(AgentConfig {
            id: self.id,
            instructions: self.instructions,
            tools: self.tools,
            policy,
        })
    }
}

/// Agent 注册表：id -> 配置
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentConfig>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent: AgentConfig) -> HiveResult<()> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        if agents.contains_key(agent.id()) {
            return Err(HiveError::AgentAlreadyRegistered(agent.id().to_string()));
        }
        tracing::debug!(agent = agent.id(), policy = agent.policy().name(), "agent registered");
        agents.insert(agent.id().to_string(), Arc::new(agent));
        Ok(())
    }

    pub fn get(&self, id: &str) -> HiveResult<Arc<AgentConfig>> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| HiveError::UnknownAgent(id.to_string()))
    }

    /// 已注册的 agent id（按字典序）
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{Action, ScriptedPolicy};

    #[test]
    fn test_builder() {
        let agent = AgentConfig::builder("researcher")
            .instructions("find things")
            .tools(["search", "summarize", "search"])
            .policy(ScriptedPolicy::new(vec![Action::finish("ok")]))
            .build()
            .unwrap();
        assert_eq!(agent.tools(), &["search".to_string(), "summarize".to_string()]);
        assert!(agent.allows_tool("summarize"));
        assert!(!agent.allows_tool("shell"));
        assert_eq!(agent.policy().name(), "scripted");

        let err = AgentConfig::builder("nopolicy").build().unwrap_err();
        assert!(matches!(err, HiveError::InvalidInput(_)));
    }

    #[test]
    fn test_registry() {
        let registry = AgentRegistry::new();
        let make = || {
            AgentConfig::builder("a")
                .policy(ScriptedPolicy::new(vec![]))
                .build()
                .unwrap()
        };
        registry.register(make()).unwrap();
        assert_eq!(
            registry.register(make()).unwrap_err(),
            HiveError::AgentAlreadyRegistered("a".into())
        );
        assert_eq!(registry.get("a").unwrap().id(), "a");
        assert_eq!(
            registry.get("b").unwrap_err(),
            HiveError::UnknownAgent("b".into())
        );
        assert_eq!(registry.ids(), vec!["a".to_string()]);
    }
}

//! 运行时构建器：统一的初始化逻辑
//!
//! 从 AppConfig 组装向量索引、检索引擎、工具注册表、Run 引擎、Agent 注册表与任务执行器。
//! 默认注册 `retrieve` 检索工具；有对话模型时再注册 `answer` 回答子代理，
//! 以及使用二者的 `rag` agent。命令行与 HTTP 服务共用同一套组装。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::agent::{AgentConfig, AgentRegistry};
use crate::config::AppConfig;
use crate::core::{HiveError, HiveResult, TaskExecutor, TaskNotification};
use crate::llm::{create_embedder_from_config, create_llm_from_config, EmbeddingProvider, HashEmbedder, LlmClient};
use crate::memory::{RetrievalEngine, ThreadStore};
use crate::run::{RetrieveThenAnswerPolicy, RunEngine, RunEvent, RunStore};
use crate::tools::{RagAnswerSubagent, RetrievalTool, Tool, ToolExecutor, ToolRegistry};
use crate::vector::VectorIndex;

/// 检索工具名
pub const RETRIEVE_TOOL: &str = "retrieve";
/// 回答子代理工具名
pub const ANSWER_TOOL: &str = "answer";
/// 内置检索问答 agent
pub const RAG_AGENT: &str = "rag";

const RAG_INSTRUCTIONS: &str =
    "Answer questions using only the contents of the knowledge base, citing the snippets used.";

/// 运行时构建器
pub struct RuntimeBuilder {
    config: AppConfig,
    offline: bool,
    index: Option<Arc<VectorIndex>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    llm: Option<Arc<dyn LlmClient>>,
    tools: Vec<Arc<dyn Tool>>,
    agents: Vec<AgentConfig>,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            offline: false,
            index: None,
            embedder: None,
            llm: None,
            tools: Vec::new(),
            agents: Vec::new(),
            events: None,
        }
    }

    /// 不根据 OPENAI_API_KEY 自动创建远程嵌入 / 对话客户端
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    /// 使用已有索引（例如从快照加载）
    pub fn with_index(mut self, index: Arc<VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 额外注册一个工具
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    /// 额外注册一个 agent
    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.agents.push(agent);
        self
    }

    /// 订阅 Run 过程事件
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn resolve_embedder(&mut self) -> Arc<dyn EmbeddingProvider> {
        if let Some(embedder) = self.embedder.take() {
            return embedder;
        }
        let retrieval = &self.config.retrieval;
        if !self.offline {
            if let Some(embedder) = create_embedder_from_config(
                retrieval.base_url.as_deref(),
                &retrieval.embedding_model,
                retrieval.dimensions,
                None,
            ) {
                return embedder;
            }
        }
        tracing::warn!(
            dimensions = retrieval.dimensions,
            "no embedding backend configured, using local hash embedder"
        );
        Arc::new(HashEmbedder::new(retrieval.dimensions))
    }

    fn resolve_llm(&mut self) -> Option<Arc<dyn LlmClient>> {
        if self.llm.is_some() || self.offline {
            return self.llm.take();
        }
        create_llm_from_config(self.config.llm.base_url.as_deref(), &self.config.llm.model, None)
    }

    pub fn build(mut self) -> HiveResult<Runtime> {
        let embedder = self.resolve_embedder();
        let llm = self.resolve_llm();
        let collection = self.config.retrieval.collection.clone();
        let top_k = self.config.retrieval.top_k;
        let dimensions = embedder.dimensions().unwrap_or(self.config.retrieval.dimensions);

        let index = self.index.take().unwrap_or_else(|| Arc::new(VectorIndex::new()));
        if index.has_collection(&collection) {
            let existing = index.dimensions(&collection)?;
            if existing != dimensions {
                return Err(HiveError::DimensionMismatch {
                    expected: existing,
                    actual: dimensions,
                });
            }
        } else {
            index.create_collection(&collection, dimensions)?;
        }
        let retrieval = Arc::new(RetrievalEngine::new(index.clone(), embedder));

        let mut registry = ToolRegistry::new();
        registry.register(RetrievalTool::new(
            RETRIEVE_TOOL,
            retrieval.clone(),
            &collection,
            top_k,
        ))?;
        let mut rag_tools = vec![RETRIEVE_TOOL];
        match llm {
            Some(llm) => {
                registry.register(
                    RagAnswerSubagent::new(retrieval.clone(), llm, &collection, top_k)
                        .into_tool(ANSWER_TOOL),
                )?;
                rag_tools.push(ANSWER_TOOL);
            }
            None => tracing::info!("no llm configured, rag agent answers with retrieved context"),
        }
        for tool in self.tools {
            registry.register_arc(tool)?;
        }
        let tools = Arc::new(ToolExecutor::new(
            registry,
            self.config.runtime.tool_timeout_secs,
        ));

        let mut engine = RunEngine::new(
            tools.clone(),
            Arc::new(RunStore::new()),
            self.config.runtime.max_steps,
        );
        if let Some(tx) = self.events {
            engine = engine.with_events(tx);
        }

        let agents = AgentRegistry::new();
        agents.register(
            AgentConfig::builder(RAG_AGENT)
                .instructions(RAG_INSTRUCTIONS)
                .tools(rag_tools)
                .policy(RetrieveThenAnswerPolicy::new(RETRIEVE_TOOL, ANSWER_TOOL))
                .build()?,
        )?;
        for agent in self.agents {
            agents.register(agent)?;
        }

        let (executor, notifications) = TaskExecutor::with_notifications(
            Arc::new(ThreadStore::new()),
            Arc::new(agents),
            Arc::new(engine),
            self.config.runtime.max_concurrent_runs,
        );

        tracing::info!(
            collection = %collection,
            dimensions,
            tools = ?tools.tool_names(),
            max_steps = self.config.runtime.max_steps,
            "runtime ready"
        );

        Ok(Runtime {
            config: self.config,
            index,
            retrieval,
            tools,
            executor,
            notifications: Some(notifications),
        })
    }
}

/// 组装完成的运行时
pub struct Runtime {
    pub config: AppConfig,
    pub index: Arc<VectorIndex>,
    pub retrieval: Arc<RetrievalEngine>,
    pub tools: Arc<ToolExecutor>,
    pub executor: TaskExecutor,
    notifications: Option<mpsc::UnboundedReceiver<TaskNotification>>,
}

impl Runtime {
    pub fn builder(config: AppConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// 知识库集合名
    pub fn collection(&self) -> &str {
        &self.config.retrieval.collection
    }

    /// 分块索引一篇文档到知识库集合，返回块数
    pub async fn index_document(&self, doc_id: &str, text: &str) -> HiveResult<usize> {
        self.retrieval
            .index_document(self.collection(), doc_id, text)
            .await
    }

    /// 取走任务结束通知的接收端（只能取一次）
    pub fn take_notifications(&mut self) -> Option<mpsc::UnboundedReceiver<TaskNotification>> {
        self.notifications.take()
    }
}

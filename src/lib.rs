//! Hive - Rust 智能体执行运行时
//!
//! 模块划分：
//! - **agent**: Agent 配置（指令、工具、编排策略）与注册表
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、运行时组装、任务执行器（submit / poll）、反馈记录
//! - **llm**: 生成与嵌入客户端抽象与实现（OpenAI 兼容 / Mock / 本地哈希嵌入）
//! - **memory**: 会话线程、检索增强、线程持久化
//! - **observability**: tracing 初始化
//! - **run**: Run 状态机、编排策略、Run 引擎
//! - **tools**: 工具注册表、执行器、子代理与检索工具
//! - **vector**: 带命名集合的向量索引
//! - **server**: HTTP 传输层（feature `server`）

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod run;
#[cfg(feature = "server")]
pub mod server;
pub mod tools;
pub mod vector;

pub use crate::core::{HiveError, HiveResult, Runtime, SubmitRequest, TaskExecutor};

//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__RUNTIME__MAX_STEPS=12`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub runtime: RuntimeSection,
    pub retrieval: RetrievalSection,
    pub llm: LlmSection,
    pub server: ServerSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [runtime] 段：Run 步数上限、并发上限、工具超时
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_concurrent_runs: default_max_concurrent_runs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_max_steps() -> usize {
    8
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [retrieval] 段：知识库集合与嵌入模型
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalSection {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// 嵌入维度；嵌入后端自报维度时以后端为准
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    pub base_url: Option<String>,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            top_k: default_top_k(),
            dimensions: default_dimensions(),
            embedding_model: default_embedding_model(),
            base_url: None,
        }
    }
}

fn default_collection() -> String {
    "docs".to_string()
}

fn default_top_k() -> usize {
    4
}

fn default_dimensions() -> usize {
    1536
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// [llm] 段：回答子代理使用的对话模型
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
        }
    }
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

/// [server] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置；调用方决定是否据此重建运行时
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.runtime.max_steps, 8);
        assert_eq!(cfg.runtime.max_concurrent_runs, 4);
        assert_eq!(cfg.retrieval.collection, "docs");
        assert_eq!(cfg.retrieval.top_k, 4);
        assert_eq!(cfg.server.bind, "0.0.0.0:8000");
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[runtime]\nmax_steps = 3\n\n[retrieval]\ncollection = \"kb\"\ndimensions = 64"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.runtime.max_steps, 3);
        assert_eq!(cfg.runtime.tool_timeout_secs, 30);
        assert_eq!(cfg.retrieval.collection, "kb");
        assert_eq!(cfg.retrieval.dimensions, 64);
        assert_eq!(cfg.llm.model, "gpt-3.5-turbo");
    }
}

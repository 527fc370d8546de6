//! Hive 命令行
//!
//! 用法：`hive <question> [doc files...]`
//! 把给定文件索引进知识库，向 `rag` agent 提交问题，轮询到结束后以 JSON 打印结果与线程消息。

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use hive::config::load_config;
use hive::core::{Runtime, SubmitRequest, RAG_AGENT};
use hive::vector::VectorIndex;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let mut args = std::env::args().skip(1);
    let question = args
        .next()
        .context("usage: hive <question> [doc files...]")?;
    let docs: Vec<PathBuf> = args.map(PathBuf::from).collect();

    let config_path = std::env::var("HIVE_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    // 可选：从快照恢复知识库
    let snapshot = std::env::var("HIVE_INDEX_SNAPSHOT").ok().map(PathBuf::from);
    let mut builder = Runtime::builder(cfg);
    if let Some(path) = snapshot.as_ref().filter(|p| p.exists()) {
        let index = VectorIndex::load_snapshot(path)
            .with_context(|| format!("Failed to load index snapshot {}", path.display()))?;
        builder = builder.with_index(std::sync::Arc::new(index));
    }
    let runtime = builder.build().context("Failed to build runtime")?;

    for path in &docs {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let doc_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("doc")
            .to_string();
        let chunks = runtime
            .index_document(&doc_id, &text)
            .await
            .with_context(|| format!("Failed to index {}", path.display()))?;
        tracing::info!(doc = %doc_id, chunks, "indexed");
    }

    let handle = runtime
        .executor
        .submit(SubmitRequest::new_thread(RAG_AGENT, question))
        .await
        .context("Failed to submit task")?;
    let poll = runtime
        .executor
        .wait(&handle.task_id, Duration::from_millis(50))
        .await
        .context("Failed to poll task")?;
    let messages = runtime.executor.thread_messages(&handle.thread_id)?;

    if let Some(path) = snapshot {
        runtime
            .index
            .save_snapshot(&path)
            .with_context(|| format!("Failed to save index snapshot {}", path.display()))?;
    }

    let output = serde_json::json!({
        "task": handle,
        "poll": poll,
        "messages": messages,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

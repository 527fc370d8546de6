//! Hive HTTP 服务
//!
//! 启动: cargo run --bin hive-server --features server
//! 监听地址取自 `[server] bind`（环境变量 HIVE__SERVER__BIND 可覆盖）。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hive::config::load_config;
use hive::core::{JsonlFeedbackSink, Runtime};
use hive::server::{serve, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::var("HIVE_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let bind = cfg.server.bind.clone();
    let mut runtime = Runtime::builder(cfg)
        .build()
        .context("Failed to build runtime")?;

    // 任务结束通知只记日志
    if let Some(mut notifications) = runtime.take_notifications() {
        tokio::spawn(async move {
            while let Some(note) = notifications.recv().await {
                tracing::info!(task_id = %note.task_id, status = %note.status, "task notification");
            }
        });
    }

    let feedback_path = std::env::var("HIVE_FEEDBACK_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/feedback.jsonl"));
    let state = AppState {
        executor: runtime.executor.clone(),
        tools: runtime.tools.clone(),
        feedback: Arc::new(JsonlFeedbackSink::new(feedback_path)),
    };

    serve(state, &bind).await.context("Server failed")
}

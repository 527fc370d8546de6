//! 用户反馈记录
//!
//! 运行时只负责给出已完成 Run 的 id 与最终消息；反馈由调用方填写后交给 FeedbackSink 追加保存，
//! 不做任何分析。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::core::HiveResult;

/// 一条反馈
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    /// 毫秒时间戳
    pub timestamp: i64,
    pub thread_id: String,
    pub run_id: String,
    pub score: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl FeedbackRecord {
    pub fn new(
        thread_id: impl Into<String>,
        run_id: impl Into<String>,
        score: i32,
        text: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            score,
            text,
        }
    }
}

/// 反馈存储（只追加）
pub trait FeedbackSink: Send + Sync {
    fn append(&self, record: &FeedbackRecord) -> HiveResult<()>;
}

/// JSON Lines 文件：每条反馈一行
pub struct JsonlFeedbackSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlFeedbackSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读回全部记录（按写入顺序）
    pub fn read_all(&self) -> HiveResult<Vec<FeedbackRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        data.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Into::into))
            .collect()
    }
}

impl FeedbackSink for JsonlFeedbackSink {
    fn append(&self, record: &FeedbackRecord) -> HiveResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        tracing::debug!(run_id = %record.run_id, score = record.score, "feedback recorded");
        Ok(())
    }
}

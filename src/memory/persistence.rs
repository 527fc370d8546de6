//! 线程持久化
//!
//! 每个线程一个 JSON 文件（目录/线程 id.json），用于跨进程恢复会话（可选使用）。

use std::path::{Path, PathBuf};

use crate::memory::Thread;

/// 简单的文件持久化：目录下每个线程一个 JSON 文件
#[derive(Debug)]
pub struct ThreadPersistence {
    dir: PathBuf,
}

impl ThreadPersistence {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{thread_id}.json"))
    }

    /// 加载线程快照；文件不存在时返回 None
    pub fn load(&self, thread_id: &str) -> anyhow::Result<Option<Thread>> {
        let path = self.path_for(thread_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// 写入线程快照；目录不存在时自动创建
    pub fn save(&self, thread: &Thread) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(
            self.path_for(&thread.id),
            serde_json::to_string_pretty(thread)?,
        )?;
        Ok(())
    }

    /// 目录下所有已保存的线程 id（按字典序）
    pub fn list(&self) -> anyhow::Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

//! 会话日志持久化
//!
//! 每个追加到会话中的 turn 都写一行 JSONL（时间、角色、内容、调用），只追加不改写。
//! 内容按 max_content_chars 截断；写入失败只记日志，不影响编排。

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{Role, Turn};

/// 日志中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug)]
pub struct HistoryLog {
    path: PathBuf,
    max_content_chars: usize,
}

impl HistoryLog {
    pub fn new(path: impl AsRef<Path>, max_content_chars: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_content_chars,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, turn: &Turn) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = if turn.content.chars().count() > self.max_content_chars {
            format!(
                "{}...[truncated]",
                turn.content.chars().take(self.max_content_chars).collect::<String>()
            )
        } else {
            turn.content.clone()
        };
        let entry = HistoryEntry {
            timestamp: turn.timestamp,
            role: turn.role,
            content,
            tool_calls: turn.tool_calls.iter().map(|c| c.name.clone()).collect(),
            tool_call_id: turn.tool_call_id.clone(),
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        Ok(())
    }

    /// 追加并吞掉错误（编排循环用）
    pub fn record(&self, turn: &Turn) {
        if let Err(e) = self.append(turn) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to append history");
        }
    }

    /// 逐行读取日志；坏行跳过
    fn scan(&self, mut visit: impl FnMut(HistoryEntry)) -> anyhow::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let reader = BufReader::new(std::fs::File::open(&self.path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(&line) {
                Ok(entry) => visit(entry),
                Err(e) => tracing::debug!(error = %e, "skipping malformed history line"),
            }
        }
        Ok(())
    }

    /// 只保留最后 limit 条命中
    fn tail(
        &self,
        limit: usize,
        mut keep: impl FnMut(&HistoryEntry) -> bool,
    ) -> anyhow::Result<Vec<HistoryEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut window = VecDeque::with_capacity(limit.min(256));
        self.scan(|entry| {
            if keep(&entry) {
                if window.len() == limit {
                    window.pop_front();
                }
                window.push_back(entry);
            }
        })?;
        Ok(window.into())
    }

    /// 最近 limit 条，按时间正序
    pub fn recent(&self, limit: usize) -> anyhow::Result<Vec<HistoryEntry>> {
        self.tail(limit, |_| true)
    }

    /// 内容包含 query（不区分大小写）的最近 limit 条
    pub fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<HistoryEntry>> {
        let needle = query.to_lowercase();
        self.tail(limit, |e| e.content.to_lowercase().contains(&needle))
    }

    pub fn count(&self) -> anyhow::Result<usize> {
        let mut n = 0;
        self.scan(|_| n += 1)?;
        Ok(n)
    }
}

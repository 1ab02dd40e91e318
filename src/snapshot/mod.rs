//! 快照存储：工作区状态的线性版本链
//!
//! 只有「变更已成功应用」之后才保存快照（或显式 /checkpoint）。
//! 后端：内容寻址文件快照（默认）、git 提交、不做版本化。
//! 撤销/重做的重做栈由核心的 UndoHistory 维护，后端只提供 save / undo / list / restore。

pub mod fs_store;
pub mod git;
pub mod history;
pub mod noop;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, SnapshotBackend};
use crate::core::SnapshotError;
use crate::tools::filesystem::IgnoreRules;

pub use fs_store::FsSnapshotStore;
pub use git::GitSnapshotStore;
pub use history::{Restored, UndoHistory, BEFORE_RESTORE_LABEL};
pub use noop::NoopSnapshotStore;

const UNVERSIONED: &str = "unversioned";

/// 快照 id；未初始化/失败时为哨兵值 "unversioned"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn unversioned() -> Self {
        Self(UNVERSIONED.to_string())
    }

    pub fn is_versioned(&self) -> bool {
        self.0 != UNVERSIONED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 展示用短 id
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 快照元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: SnapshotId,
    pub label: String,
    /// 线性前驱
    pub parent: Option<SnapshotId>,
    pub timestamp: DateTime<Utc>,
}

/// 快照后端 trait
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    fn backend(&self) -> &'static str;

    fn is_versioned(&self) -> bool {
        true
    }

    /// 保存当前工作区；从不让调用方失败，出错时记日志并返回哨兵 id
    async fn save(&self, label: &str) -> SnapshotId;

    /// 回到 head 之前第 n 个快照（会改写工作区）
    async fn undo(&self, n: usize) -> Result<SnapshotRecord, SnapshotError>;

    /// 从 head 沿前驱链，最近的在前
    async fn list(&self, limit: usize) -> Result<Vec<SnapshotRecord>, SnapshotError>;

    /// 按完整 id 或唯一前缀查找快照，不改动工作区
    async fn resolve(&self, id: &str) -> Result<SnapshotRecord, SnapshotError>;

    /// 回到任意快照；id 可用唯一前缀
    async fn restore(&self, id: &str) -> Result<SnapshotRecord, SnapshotError>;

    async fn head(&self) -> Option<SnapshotRecord> {
        self.list(1).await.ok().and_then(|mut v| v.pop())
    }
}

/// 按配置打开快照后端；初始化失败时降级为不做版本化
pub async fn open_store(cfg: &AppConfig, workspace: &Path) -> Arc<dyn SnapshotStore> {
    let ignore = IgnoreRules::new(&cfg.tools.ignore);
    match cfg.snapshot.backend {
        SnapshotBackend::Fs => match FsSnapshotStore::open(workspace, ignore).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!("Snapshot store init failed ({}), running unversioned", e);
                Arc::new(NoopSnapshotStore)
            }
        },
        SnapshotBackend::Git => match GitSnapshotStore::open(workspace).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!("Git snapshot init failed ({}), running unversioned", e);
                Arc::new(NoopSnapshotStore)
            }
        },
        SnapshotBackend::None => Arc::new(NoopSnapshotStore),
    }
}

//! 撤销/重做
//!
//! 重做栈只在核心维护：undo(n) 把被跨过的快照按「最近撤销的在栈顶」压栈，
//! 任何新快照或显式恢复都会清空它。

use std::sync::Arc;

use crate::core::SnapshotError;
use crate::snapshot::{SnapshotId, SnapshotRecord, SnapshotStore};

pub const BEFORE_RESTORE_LABEL: &str = "before restore";

/// 恢复结果：目标快照与恢复前保存的快照
#[derive(Debug, Clone)]
pub struct Restored {
    pub record: SnapshotRecord,
    pub previous: SnapshotId,
}

pub struct UndoHistory {
    store: Arc<dyn SnapshotStore>,
    redo: Vec<SnapshotId>,
}

impl UndoHistory {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            redo: Vec::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    /// 有新快照产生：重做分支作废
    pub fn record(&mut self, id: &SnapshotId) {
        if id.is_versioned() {
            self.redo.clear();
        }
    }

    pub async fn checkpoint(&mut self, label: &str) -> SnapshotId {
        let id = self.store.save(label).await;
        self.record(&id);
        id
    }

    pub async fn undo(&mut self, n: usize) -> Result<SnapshotRecord, SnapshotError> {
        let n = n.max(1);
        let chain = self.store.list(n + 1).await?;
        let record = self.store.undo(n).await?;
        // chain[0] 是撤销前的 head，chain[n-1] 是离目标最近的那个
        for skipped in chain.iter().take(n) {
            self.redo.push(skipped.id.clone());
        }
        Ok(record)
    }

    pub async fn redo(&mut self) -> Result<SnapshotRecord, SnapshotError> {
        let id = self.redo.pop().ok_or(SnapshotError::NothingToRedo)?;
        match self.store.restore(id.as_str()).await {
            Ok(record) => Ok(record),
            Err(e) => {
                self.redo.push(id);
                Err(e)
            }
        }
    }

    /// 显式恢复：先把当前工作区存为 "before restore"，再回到目标
    pub async fn restore(&mut self, id: &str) -> Result<Restored, SnapshotError> {
        let target = self.store.resolve(id).await?;
        let previous = self.store.save(BEFORE_RESTORE_LABEL).await;
        let record = self.store.restore(target.id.as_str()).await?;
        self.redo.clear();
        Ok(Restored { record, previous })
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<SnapshotRecord>, SnapshotError> {
        self.store.list(limit).await
    }
}

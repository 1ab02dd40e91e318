//! 不做版本化的后端：save 返回哨兵 id，其余操作报 Unversioned

use async_trait::async_trait;

use crate::core::SnapshotError;
use crate::snapshot::{SnapshotId, SnapshotRecord, SnapshotStore};

#[derive(Debug, Default)]
pub struct NoopSnapshotStore;

#[async_trait]
impl SnapshotStore for NoopSnapshotStore {
    fn backend(&self) -> &'static str {
        "none"
    }

    fn is_versioned(&self) -> bool {
        false
    }

    async fn save(&self, _label: &str) -> SnapshotId {
        SnapshotId::unversioned()
    }

    async fn undo(&self, _n: usize) -> Result<SnapshotRecord, SnapshotError> {
        Err(SnapshotError::Unversioned)
    }

    async fn list(&self, _limit: usize) -> Result<Vec<SnapshotRecord>, SnapshotError> {
        Err(SnapshotError::Unversioned)
    }

    async fn resolve(&self, _id: &str) -> Result<SnapshotRecord, SnapshotError> {
        Err(SnapshotError::Unversioned)
    }

    async fn restore(&self, _id: &str) -> Result<SnapshotRecord, SnapshotError> {
        Err(SnapshotError::Unversioned)
    }
}

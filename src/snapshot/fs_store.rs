//! 内容寻址文件快照
//!
//! 布局（<workspace>/.amas/snapshots）：
//! - objects/<sha256>：文件内容
//! - records.jsonl：每行一个快照（元数据 + 相对路径 -> 内容哈希）
//! - HEAD：当前快照 id
//!
//! 打开时若没有任何快照，先记录一个基线，保证第一次变更也能撤销。

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use walkdir::WalkDir;

use crate::config::STATE_DIR as STORE_DIR;
use crate::core::SnapshotError;
use crate::snapshot::{SnapshotId, SnapshotRecord, SnapshotStore};
use crate::tools::filesystem::IgnoreRules;

const BASELINE_LABEL: &str = "baseline";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSnapshot {
    #[serde(flatten)]
    record: SnapshotRecord,
    files: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct FsState {
    snapshots: Vec<StoredSnapshot>,
    head: Option<SnapshotId>,
}

impl FsState {
    fn find(&self, id: &SnapshotId) -> Option<&StoredSnapshot> {
        self.snapshots.iter().find(|s| &s.record.id == id)
    }

    /// 从 head 沿前驱链
    fn chain(&self) -> Vec<&StoredSnapshot> {
        let mut out = Vec::new();
        let mut cursor = self.head.clone();
        while let Some(id) = cursor {
            match self.find(&id) {
                Some(s) => {
                    cursor = s.record.parent.clone();
                    out.push(s);
                }
                None => break,
            }
        }
        out
    }
}

/// 文件快照后端
#[derive(Debug)]
pub struct FsSnapshotStore {
    root: PathBuf,
    dir: PathBuf,
    ignore: IgnoreRules,
    state: Mutex<FsState>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl FsSnapshotStore {
    pub async fn open(workspace: &Path, ignore: IgnoreRules) -> Result<Self, SnapshotError> {
        let root = workspace.canonicalize()?;
        let dir = root.join(STORE_DIR).join("snapshots");
        std::fs::create_dir_all(dir.join("objects"))?;

        let mut state = FsState::default();
        let records_path = dir.join("records.jsonl");
        if records_path.exists() {
            let reader = BufReader::new(std::fs::File::open(&records_path)?);
            for (n, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let snap: StoredSnapshot = serde_json::from_str(&line).map_err(|e| {
                    SnapshotError::Corrupted(format!("records.jsonl line {}: {e}", n + 1))
                })?;
                state.snapshots.push(snap);
            }
        }
        let head_path = dir.join("HEAD");
        if head_path.exists() {
            let head = std::fs::read_to_string(&head_path)?.trim().to_string();
            if !head.is_empty() {
                state.head = Some(SnapshotId::new(head));
            }
        }
        if state.head.is_none() {
            state.head = state.snapshots.last().map(|s| s.record.id.clone());
        }

        let store = Self {
            root,
            dir,
            ignore,
            state: Mutex::new(state),
        };

        if store.state.lock().await.snapshots.is_empty() {
            let id = store.try_save(BASELINE_LABEL).await?;
            tracing::info!(id = %id, "recorded baseline snapshot");
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        self.dir.join("objects").join(hash)
    }

    /// 工作区内受跟踪的文件（相对路径，统一用 '/'）
    fn scan(&self) -> Result<BTreeMap<String, PathBuf>, SnapshotError> {
        let mut files = BTreeMap::new();
        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            name != STORE_DIR && !self.ignore.is_ignored_name(&name)
        });
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| SnapshotError::Corrupted(e.to_string()))?;
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(key, entry.path().to_path_buf());
        }
        Ok(files)
    }

    /// 写入对象并返回清单
    fn capture(&self) -> Result<BTreeMap<String, String>, SnapshotError> {
        let mut manifest = BTreeMap::new();
        for (rel, path) in self.scan()? {
            let bytes = std::fs::read(&path)?;
            let hash = sha256_hex(&bytes);
            let object = self.object_path(&hash);
            if !object.exists() {
                std::fs::write(&object, &bytes)?;
            }
            manifest.insert(rel, hash);
        }
        Ok(manifest)
    }

    /// 让工作区与清单一致：删多余文件，写回缺失或不同的文件
    fn checkout(&self, manifest: &BTreeMap<String, String>) -> Result<(), SnapshotError> {
        let current = self.scan()?;
        for (rel, path) in &current {
            if !manifest.contains_key(rel) {
                std::fs::remove_file(path)?;
                self.prune_empty_dirs(path);
            }
        }
        for (rel, hash) in manifest {
            let target = self.root.join(rel);
            let unchanged = current.contains_key(rel)
                && std::fs::read(&target)
                    .map(|b| &sha256_hex(&b) == hash)
                    .unwrap_or(false);
            if unchanged {
                continue;
            }
            let bytes = std::fs::read(self.object_path(hash)).map_err(|e| {
                SnapshotError::Corrupted(format!("missing object {hash} for {rel}: {e}"))
            })?;
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, bytes)?;
        }
        Ok(())
    }

    fn prune_empty_dirs(&self, removed: &Path) {
        let mut dir = removed.parent();
        while let Some(d) = dir {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            if std::fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }

    fn append_record(&self, snap: &StoredSnapshot) -> Result<(), SnapshotError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join("records.jsonl"))?;
        let line = serde_json::to_string(snap).map_err(|e| SnapshotError::Corrupted(e.to_string()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn write_head(&self, id: &SnapshotId) -> Result<(), SnapshotError> {
        std::fs::write(self.dir.join("HEAD"), id.as_str())?;
        Ok(())
    }

    async fn try_save(&self, label: &str) -> Result<SnapshotId, SnapshotError> {
        let mut state = self.state.lock().await;
        let files = self.capture()?;
        let parent = state.head.clone();
        let timestamp = Utc::now();
        let material = format!(
            "{}\n{}\n{}\n{}",
            parent.as_ref().map(|p| p.as_str()).unwrap_or(""),
            label,
            timestamp.to_rfc3339(),
            serde_json::to_string(&files).unwrap_or_default()
        );
        let id = SnapshotId::new(&sha256_hex(material.as_bytes())[..16]);
        let snap = StoredSnapshot {
            record: SnapshotRecord {
                id: id.clone(),
                label: label.to_string(),
                parent,
                timestamp,
            },
            files,
        };
        self.append_record(&snap)?;
        self.write_head(&id)?;
        state.snapshots.push(snap);
        state.head = Some(id.clone());
        Ok(id)
    }

    fn move_head(&self, state: &mut FsState, target: StoredSnapshot) -> Result<SnapshotRecord, SnapshotError> {
        self.checkout(&target.files)?;
        self.write_head(&target.record.id)?;
        state.head = Some(target.record.id.clone());
        Ok(target.record)
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    fn backend(&self) -> &'static str {
        "fs"
    }

    async fn save(&self, label: &str) -> SnapshotId {
        match self.try_save(label).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(label = %label, error = %e, "snapshot save failed");
                SnapshotId::unversioned()
            }
        }
    }

    async fn undo(&self, n: usize) -> Result<SnapshotRecord, SnapshotError> {
        let mut state = self.state.lock().await;
        let chain = state.chain();
        let Some(target) = chain.get(n).map(|s| (*s).clone()) else {
            return Err(SnapshotError::NothingToUndo {
                available: chain.len().saturating_sub(1),
            });
        };
        self.move_head(&mut state, target)
    }

    async fn list(&self, limit: usize) -> Result<Vec<SnapshotRecord>, SnapshotError> {
        let state = self.state.lock().await;
        Ok(state
            .chain()
            .into_iter()
            .take(limit)
            .map(|s| s.record.clone())
            .collect())
    }

    async fn resolve(&self, id: &str) -> Result<SnapshotRecord, SnapshotError> {
        let state = self.state.lock().await;
        Ok(find_snapshot(&state, id)?.record)
    }

    async fn restore(&self, id: &str) -> Result<SnapshotRecord, SnapshotError> {
        let mut state = self.state.lock().await;
        let target = find_snapshot(&state, id)?;
        self.move_head(&mut state, target)
    }
}

/// 完整 id 优先，否则要求唯一前缀
fn find_snapshot(state: &FsState, id: &str) -> Result<StoredSnapshot, SnapshotError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(SnapshotError::NotFound(String::new()));
    }
    if let Some(exact) = state.snapshots.iter().find(|s| s.record.id.as_str() == id) {
        return Ok(exact.clone());
    }
    let matches: Vec<&StoredSnapshot> = state
        .snapshots
        .iter()
        .filter(|s| s.record.id.as_str().starts_with(id))
        .collect();
    match matches.as_slice() {
        [] => Err(SnapshotError::NotFound(id.to_string())),
        [one] => Ok((*one).clone()),
        _ => Err(SnapshotError::Ambiguous(id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(dir: &Path) -> FsSnapshotStore {
        FsSnapshotStore::open(dir, IgnoreRules::new(&["target".to_string()]))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_baseline_created_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path()).await;
        let list = s.list(10).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].label, "baseline");
        assert!(list[0].parent.is_none());
    }

    #[tokio::test]
    async fn test_undo_restores_bytes_and_removes_new_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"v1\r\n\x00raw").unwrap();
        let s = store(dir.path()).await;

        std::fs::write(dir.path().join("a.txt"), b"v2").unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg/new.txt"), b"new").unwrap();
        let id = s.save("write a.txt").await;
        assert!(id.is_versioned());

        let rec = s.undo(1).await.unwrap();
        assert_eq!(rec.label, "baseline");
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"v1\r\n\x00raw");
        assert!(!dir.path().join("pkg/new.txt").exists());
        assert!(!dir.path().join("pkg").exists());

        let rec = s.restore(id.short()).await.unwrap();
        assert_eq!(rec.id, id);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"v2");
        assert_eq!(std::fs::read(dir.path().join("pkg/new.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_undo_past_baseline_fails() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path()).await;
        s.save("one").await;
        assert!(matches!(
            s.undo(2).await,
            Err(SnapshotError::NothingToUndo { available: 1 })
        ));
    }

    #[tokio::test]
    async fn test_ignored_dirs_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path()).await;
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/out.bin"), b"build").unwrap();
        s.save("build").await;
        s.undo(1).await.unwrap();
        assert!(dir.path().join("target/out.bin").exists());
    }

    #[tokio::test]
    async fn test_reopen_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = store(dir.path()).await;
            std::fs::write(dir.path().join("x"), "1").unwrap();
            s.save("x").await;
        }
        let s = store(dir.path()).await;
        let list = s.list(10).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].label, "x");
    }

    #[tokio::test]
    async fn test_restore_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path()).await;
        assert!(matches!(s.restore("zzzz").await, Err(SnapshotError::NotFound(_))));
    }
}

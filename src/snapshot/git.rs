//! git 后端：每个快照是一次 "[amas] <label>" 提交
//!
//! 工作区不是仓库时先 git init 并提交基线。.amas/ 写入 .git/info/exclude。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;

use crate::core::SnapshotError;
use crate::snapshot::{SnapshotId, SnapshotRecord, SnapshotStore};

const COMMIT_PREFIX: &str = "[amas] ";

#[derive(Debug)]
pub struct GitSnapshotStore {
    root: PathBuf,
}

impl GitSnapshotStore {
    pub async fn open(workspace: &Path) -> Result<Self, SnapshotError> {
        let store = Self {
            root: workspace.canonicalize()?,
        };
        if !store.root.join(".git").exists() {
            store.git(&["init", "-q"]).await?;
        }
        store.exclude_state_dir()?;
        if store.git(&["rev-parse", "--verify", "-q", "HEAD"]).await.is_err() {
            store.commit("baseline").await?;
        }
        Ok(store)
    }

    fn exclude_state_dir(&self) -> Result<(), SnapshotError> {
        let info = self.root.join(".git").join("info");
        std::fs::create_dir_all(&info)?;
        let exclude = info.join("exclude");
        let current = std::fs::read_to_string(&exclude).unwrap_or_default();
        if !current.lines().any(|l| l.trim() == ".amas/") {
            let mut next = current;
            if !next.is_empty() && !next.ends_with('\n') {
                next.push('\n');
            }
            next.push_str(".amas/\n");
            std::fs::write(&exclude, next)?;
        }
        Ok(())
    }

    async fn git(&self, args: &[&str]) -> Result<String, SnapshotError> {
        let output = Command::new("git")
            .args(["-c", "user.name=amas", "-c", "user.email=amas@localhost"])
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| SnapshotError::Git(format!("failed to run git {}: {}", args.join(" "), e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SnapshotError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn commit(&self, label: &str) -> Result<SnapshotId, SnapshotError> {
        self.git(&["add", "-A"]).await?;
        let message = format!("{COMMIT_PREFIX}{label}");
        self.git(&["commit", "-q", "--allow-empty", "--no-verify", "-m", &message])
            .await?;
        let head = self.git(&["rev-parse", "HEAD"]).await?;
        Ok(SnapshotId::new(head.trim()))
    }

    fn parse_log(stdout: &str) -> Vec<SnapshotRecord> {
        stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.split('\x1f');
                let id = parts.next()?.trim();
                let parent = parts.next()?.split_whitespace().next().map(SnapshotId::new);
                let subject = parts.next()?;
                let timestamp = parts
                    .next()
                    .and_then(|t| DateTime::parse_from_rfc3339(t.trim()).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                Some(SnapshotRecord {
                    id: SnapshotId::new(id),
                    label: subject.strip_prefix(COMMIT_PREFIX).unwrap_or(subject).to_string(),
                    parent,
                    timestamp,
                })
            })
            .collect()
    }

    async fn record_of(&self, rev: &str) -> Result<SnapshotRecord, SnapshotError> {
        let out = self
            .git(&["log", "-1", "--format=%H%x1f%P%x1f%s%x1f%cI", rev])
            .await?;
        Self::parse_log(&out)
            .pop()
            .ok_or_else(|| SnapshotError::NotFound(rev.to_string()))
    }
}

#[async_trait]
impl SnapshotStore for GitSnapshotStore {
    fn backend(&self) -> &'static str {
        "git"
    }

    async fn save(&self, label: &str) -> SnapshotId {
        match self.commit(label).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(label = %label, error = %e, "git snapshot failed");
                SnapshotId::unversioned()
            }
        }
    }

    async fn undo(&self, n: usize) -> Result<SnapshotRecord, SnapshotError> {
        let chain = self.list(n + 1).await?;
        if chain.len() <= n {
            return Err(SnapshotError::NothingToUndo {
                available: chain.len().saturating_sub(1),
            });
        }
        let target = chain[n].clone();
        self.git(&["reset", "-q", "--hard", target.id.as_str()]).await?;
        Ok(target)
    }

    async fn list(&self, limit: usize) -> Result<Vec<SnapshotRecord>, SnapshotError> {
        let max = format!("-{}", limit.max(1));
        let out = self
            .git(&["log", &max, "--first-parent", "--format=%H%x1f%P%x1f%s%x1f%cI"])
            .await?;
        let mut records = Self::parse_log(&out);
        records.truncate(limit);
        Ok(records)
    }

    async fn resolve(&self, id: &str) -> Result<SnapshotRecord, SnapshotError> {
        let id = id.trim();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SnapshotError::NotFound(id.to_string()));
        }
        let rev = format!("{id}^{{commit}}");
        let full = match self.git(&["rev-parse", "--verify", "-q", &rev]).await {
            Ok(out) => out.trim().to_string(),
            Err(SnapshotError::Git(msg)) if msg.contains("ambiguous") => {
                return Err(SnapshotError::Ambiguous(id.to_string()))
            }
            Err(_) => return Err(SnapshotError::NotFound(id.to_string())),
        };
        self.record_of(&full).await
    }

    async fn restore(&self, id: &str) -> Result<SnapshotRecord, SnapshotError> {
        let target = self.resolve(id).await?;
        self.git(&["reset", "-q", "--hard", target.id.as_str()]).await?;
        Ok(target)
    }
}

//! Durable recipient queue with an append-only completion log

use crate::config::QueueConfig;
use crate::error::{AirdropError, AirdropResult};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// An address awaiting the airdrop
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Recipient(String);

impl Recipient {
    /// Returns `None` for blank input
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage backend for pending and completed recipients.
///
/// `commit` is the only mutation and must be called only after the batch it
/// describes was accepted by the network.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Full pending queue in insertion order
    async fn load_pending(&self) -> AirdropResult<VecDeque<Recipient>>;

    /// Move `consumed` to the completed log and persist `remaining` as the new queue
    async fn commit(
        &self,
        consumed: &[Recipient],
        remaining: &VecDeque<Recipient>,
    ) -> AirdropResult<()>;

    /// Completed log in append order
    async fn load_completed(&self) -> AirdropResult<Vec<Recipient>>;
}

/// Queue backed by two line-oriented text files
pub struct FileQueueStore {
    pending_path: PathBuf,
    completed_path: PathBuf,
}

impl FileQueueStore {
    /// Open the store, failing if the pending file cannot be read.
    ///
    /// The completed log is created empty when missing. A commit cut short
    /// after the completed log was written is finished here.
    pub async fn open(config: &QueueConfig) -> AirdropResult<Self> {
        let store = Self {
            pending_path: config.pending_path.clone(),
            completed_path: config.completed_path.clone(),
        };

        fs::metadata(&store.pending_path)
            .await
            .map_err(|e| AirdropError::storage(&store.pending_path, e))?;

        if let Some(parent) = store.completed_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AirdropError::storage(parent, e))?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&store.completed_path)
            .await
            .map_err(|e| AirdropError::storage(&store.completed_path, e))?;

        store.finish_interrupted_commit().await?;

        let pending = store.load_pending().await?;
        info!(
            "Queue opened: {} pending recipients in {:?}",
            pending.len(),
            store.pending_path
        );

        Ok(store)
    }

    /// Drop the head of the pending queue that already sits at the tail of the
    /// completed log.
    async fn finish_interrupted_commit(&self) -> AirdropResult<()> {
        let completed = Self::read_lines(&self.completed_path).await?;
        let mut pending: VecDeque<Recipient> = Self::read_lines(&self.pending_path).await?.into();

        let overlap = committed_overlap(&completed, pending.make_contiguous());
        if overlap == 0 {
            return Ok(());
        }

        warn!(
            "Found {} recipients both completed and pending, finishing interrupted commit",
            overlap
        );
        pending.drain(..overlap);
        self.replace_pending(&pending).await
    }

    async fn read_lines(path: &Path) -> AirdropResult<Vec<Recipient>> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|e| AirdropError::storage(path, e))?;
        Ok(parse_lines(&contents))
    }

    async fn append_completed(&self, consumed: &[Recipient]) -> AirdropResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.completed_path)
            .await
            .map_err(|e| AirdropError::storage(&self.completed_path, e))?;

        file.write_all(render_lines(consumed.iter()).as_bytes())
            .await
            .map_err(|e| AirdropError::storage(&self.completed_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| AirdropError::storage(&self.completed_path, e))?;
        Ok(())
    }

    async fn replace_pending(&self, remaining: &VecDeque<Recipient>) -> AirdropResult<()> {
        let temp_path = self.pending_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| AirdropError::storage(&temp_path, e))?;
        file.write_all(render_lines(remaining.iter()).as_bytes())
            .await
            .map_err(|e| AirdropError::storage(&temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| AirdropError::storage(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &self.pending_path)
            .await
            .map_err(|e| AirdropError::storage(&self.pending_path, e))?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn load_pending(&self) -> AirdropResult<VecDeque<Recipient>> {
        let lines = Self::read_lines(&self.pending_path).await?;
        Ok(lines.into())
    }

    async fn commit(
        &self,
        consumed: &[Recipient],
        remaining: &VecDeque<Recipient>,
    ) -> AirdropResult<()> {
        // Completed log first: a crash in between duplicates the batch, never loses it
        if !consumed.is_empty() {
            self.append_completed(consumed).await?;
        }
        self.replace_pending(remaining).await?;

        debug!(
            "Committed {} recipients, {} remaining",
            consumed.len(),
            remaining.len()
        );
        Ok(())
    }

    async fn load_completed(&self) -> AirdropResult<Vec<Recipient>> {
        Self::read_lines(&self.completed_path).await
    }
}

/// Longest run at the end of `completed` that repeats the start of `pending`
fn committed_overlap(completed: &[Recipient], pending: &[Recipient]) -> usize {
    let longest = completed.len().min(pending.len());
    (1..=longest)
        .rev()
        .find(|&len| completed[completed.len() - len..] == pending[..len])
        .unwrap_or(0)
}

fn parse_lines(contents: &str) -> Vec<Recipient> {
    contents.lines().filter_map(Recipient::new).collect()
}

fn render_lines<'a>(items: impl Iterator<Item = &'a Recipient>) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(item.as_str());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn recipients(names: &[&str]) -> Vec<Recipient> {
        names.iter().map(|n| Recipient::new(n).unwrap()).collect()
    }

    async fn store_with(dir: &TempDir, pending: &str) -> FileQueueStore {
        let pending_path = dir.path().join("source.csv");
        std::fs::write(&pending_path, pending).unwrap();
        FileQueueStore::open(&QueueConfig {
            pending_path,
            completed_path: dir.path().join("out").join("done.csv"),
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_recipient_rejects_blank_lines() {
        assert!(Recipient::new("").is_none());
        assert!(Recipient::new("   \t").is_none());
        assert_eq!(Recipient::new("  SP1ABC \r").unwrap().as_str(), "SP1ABC");
    }

    #[tokio::test]
    async fn test_open_missing_pending_file_fails() {
        let dir = TempDir::new().unwrap();
        let result = FileQueueStore::open(&QueueConfig {
            pending_path: dir.path().join("missing.csv"),
            completed_path: dir.path().join("done.csv"),
        })
        .await;

        assert!(matches!(result, Err(AirdropError::Storage { .. })));
    }

    #[tokio::test]
    async fn test_load_pending_keeps_order_and_skips_blanks() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, "SP1\n\nSP2\r\nSP3\n   \n").await;

        let pending = store.load_pending().await.unwrap();
        assert_eq!(Vec::from(pending), recipients(&["SP1", "SP2", "SP3"]));
        assert!(store.load_completed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_moves_items_to_completed_log() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, "SP1\nSP2\nSP3\nSP4\n").await;

        let mut pending = store.load_pending().await.unwrap();
        let consumed: Vec<_> = pending.drain(..2).collect();
        store.commit(&consumed, &pending).await.unwrap();

        let mut pending = store.load_pending().await.unwrap();
        assert_eq!(Vec::from(pending.clone()), recipients(&["SP3", "SP4"]));

        let consumed: Vec<_> = pending.drain(..).collect();
        store.commit(&consumed, &pending).await.unwrap();

        assert!(store.load_pending().await.unwrap().is_empty());
        assert_eq!(
            store.load_completed().await.unwrap(),
            recipients(&["SP1", "SP2", "SP3", "SP4"])
        );

        let raw = std::fs::read_to_string(dir.path().join("out").join("done.csv")).unwrap();
        assert_eq!(raw, "SP1\nSP2\nSP3\nSP4\n");
        assert!(!dir.path().join("source.tmp").exists());
    }

    #[test]
    fn test_committed_overlap() {
        let done = recipients(&["SP1", "SP2", "SP3"]);
        assert_eq!(committed_overlap(&done, &recipients(&["SP2", "SP3", "SP4"])), 2);
        assert_eq!(committed_overlap(&done, &recipients(&["SP3"])), 1);
        assert_eq!(committed_overlap(&done, &recipients(&["SP4", "SP5"])), 0);
        assert_eq!(committed_overlap(&[], &recipients(&["SP1"])), 0);
    }

    #[tokio::test]
    async fn test_open_finishes_interrupted_commit() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        // Completed log was appended but the pending file was never replaced
        std::fs::write(out.join("done.csv"), "SP0\nSP1\nSP2\n").unwrap();

        let store = store_with(&dir, "SP1\nSP2\nSP3\nSP4\n").await;

        assert_eq!(
            Vec::from(store.load_pending().await.unwrap()),
            recipients(&["SP3", "SP4"])
        );
        assert_eq!(
            store.load_completed().await.unwrap(),
            recipients(&["SP0", "SP1", "SP2"])
        );
        let raw = std::fs::read_to_string(dir.path().join("source.csv")).unwrap();
        assert_eq!(raw, "SP3\nSP4\n");
    }

    #[tokio::test]
    async fn test_open_leaves_unrelated_queue_alone() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("done.csv"), "SP0\n").unwrap();

        let store = store_with(&dir, "SP1\nSP2\n").await;

        assert_eq!(
            Vec::from(store.load_pending().await.unwrap()),
            recipients(&["SP1", "SP2"])
        );
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, "SP1\nSP2\nSP3\n").await;

        let mut pending = store.load_pending().await.unwrap();
        let consumed: Vec<_> = pending.drain(..1).collect();
        store.commit(&consumed, &pending).await.unwrap();
        drop(store);

        let reopened = FileQueueStore::open(&QueueConfig {
            pending_path: dir.path().join("source.csv"),
            completed_path: dir.path().join("out").join("done.csv"),
        })
        .await
        .unwrap();

        assert_eq!(
            Vec::from(reopened.load_pending().await.unwrap()),
            recipients(&["SP2", "SP3"])
        );
        assert_eq!(reopened.load_completed().await.unwrap(), recipients(&["SP1"]));
    }
}

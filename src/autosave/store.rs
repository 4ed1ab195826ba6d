//! Durable key-value storage for drafts
//!
//! - `FileDraftStore` — one JSON file per key, written atomically (temp file + rename)
//! - `MemoryDraftStore` — in-process map with write counting and fault injection

use super::draft::DraftSnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Key-value persistence for draft snapshots
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Write (or overwrite) the draft stored under `key`
    async fn put(&self, key: &str, draft: &DraftSnapshot) -> Result<()>;

    /// Read the draft stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<DraftSnapshot>>;

    /// Delete the draft stored under `key`; deleting a missing key succeeds
    async fn delete(&self, key: &str) -> Result<()>;
}

// ============================================================================
// File-backed store
// ============================================================================

/// Stores each draft as `<dir>/<key>.json`
#[derive(Debug, Clone)]
pub struct FileDraftStore {
    dir: PathBuf,
}

impl FileDraftStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for a key; characters outside `[A-Za-z0-9._-]` become `_`
    pub fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl DraftStore for FileDraftStore {
    async fn put(&self, key: &str, draft: &DraftSnapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create draft dir {}", self.dir.display()))?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_vec(draft).context("Failed to serialize draft")?;

        tokio::fs::write(&tmp, &payload)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move draft into {}", path.display()))?;

        debug!(path = %path.display(), bytes = payload.len(), "Draft written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<DraftSnapshot>> {
        let path = self.path_for(key);
        let contents = match tokio::fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        let draft = serde_json::from_slice(&contents)
            .with_context(|| format!("Failed to parse draft {}", path.display()))?;
        Ok(Some(draft))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory draft store.
///
/// Counts successful writes and can be told to fail reads or writes, which
/// makes it the store of choice for tests and for embedders without disk access.
#[derive(Debug, Default)]
pub struct MemoryDraftStore {
    drafts: RwLock<HashMap<String, DraftSnapshot>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Seed a draft without counting it as a write
    pub async fn insert(&self, key: &str, draft: DraftSnapshot) {
        self.drafts.write().await.insert(key.to_string(), draft);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.drafts.read().await.contains_key(key)
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn put(&self, key: &str, draft: &DraftSnapshot) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("simulated write failure for {}", key);
        }
        self.drafts
            .write()
            .await
            .insert(key.to_string(), draft.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<DraftSnapshot>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("simulated read failure for {}", key);
        }
        Ok(self.drafts.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.drafts.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autosave::draft::SCHEMA_VERSION;
    use crate::graph::{GraphModel, Mutation, Node, Position};
    use chrono::Utc;

    fn sample_draft() -> DraftSnapshot {
        let mut graph = GraphModel::new();
        graph
            .apply_all(&[Mutation::InsertNode(
                Node::new("script", Position::new(3.0, 4.0)).with_id("n1"),
            )])
            .unwrap();
        DraftSnapshot::capture(&graph, Utc::now(), SCHEMA_VERSION)
    }

    #[tokio::test]
    async fn test_file_store_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDraftStore::new(dir.path().join("drafts"));
        let draft = sample_draft();

        assert!(store.get("session-1").await.unwrap().is_none());

        store.put("session-1", &draft).await.unwrap();
        assert_eq!(store.get("session-1").await.unwrap(), Some(draft));
        assert!(!store.path_for("session-1").with_extension("json.tmp").exists());

        store.delete("session-1").await.unwrap();
        assert!(store.get("session-1").await.unwrap().is_none());
        // Deleting again is fine
        store.delete("session-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDraftStore::new(dir.path());
        std::fs::write(store.path_for("bad"), b"{not json").unwrap();
        assert!(store.get("bad").await.is_err());
    }

    #[test]
    fn test_path_for_sanitizes_key() {
        let store = FileDraftStore::new("/tmp/drafts");
        assert_eq!(
            store.path_for("pipeline-draft:../etc"),
            PathBuf::from("/tmp/drafts/pipeline-draft_.._etc.json")
        );
    }

    #[tokio::test]
    async fn test_memory_store_fault_injection() {
        let store = MemoryDraftStore::new();
        let draft = sample_draft();

        store.set_fail_writes(true);
        assert!(store.put("k", &draft).await.is_err());
        assert_eq!(store.write_count(), 0);

        store.set_fail_writes(false);
        store.put("k", &draft).await.unwrap();
        assert_eq!(store.write_count(), 1);

        store.set_fail_reads(true);
        assert!(store.get("k").await.is_err());
        store.set_fail_reads(false);
        assert!(store.get("k").await.unwrap().is_some());
    }
}

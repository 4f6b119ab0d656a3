//! # Filesystem-backed local store
//!
//! [`FileStore`] is a [`LocalStore`] that keeps the whole document set in a
//! single JSON snapshot so files and tombstones survive restarts of the CLI.
//!
//! ## Layout
//!
//! ```text
//! <base_dir>/
//! ├── state.json        # files + tombstones, binary bytes base64-encoded
//! └── state.json.tmp    # only present while a write is in progress
//! ```
//!
//! Every mutation rewrites `state.json` through a temporary file and a rename,
//! so a crash leaves either the old or the new snapshot behind.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::local::LocalStore;
use crate::memory::{MemoryLocalStore, Snapshot};
use crate::models::{Content, FileId, FileMeta, RepoFile, SyncMark, Tombstone};

const STATE_FILE: &str = "state.json";

#[derive(Clone, Debug)]
pub struct FileStore {
    base: PathBuf,
    inner: MemoryLocalStore,
}

impl FileStore {
    /// Open the store under `base`, creating the directory if needed.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        let state_path = base.join(STATE_FILE);
        let snapshot = if state_path.exists() {
            serde_json::from_slice(&std::fs::read(&state_path)?)?
        } else {
            Snapshot::default()
        };
        Ok(Self {
            base,
            inner: MemoryLocalStore::from_snapshot(snapshot),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn state_path(&self) -> PathBuf {
        self.base.join(STATE_FILE)
    }

    fn persist(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.inner.snapshot())?;
        let tmp = self.base.join(format!("{STATE_FILE}.tmp"));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, self.state_path())?;
        Ok(())
    }

    fn persisted<T>(&self, result: Result<T>) -> Result<T> {
        let value = result?;
        self.persist()?;
        Ok(value)
    }

    pub fn write_file(&self, path: &str, content: Content) -> Result<FileId> {
        self.persisted(self.inner.write_file(path, content))
    }

    pub fn delete_file(&self, id: FileId) -> Result<()> {
        self.persisted(self.inner.delete_file(id))
    }

    pub fn rename_file(&self, id: FileId, new_path: &str) -> Result<()> {
        self.persisted(self.inner.rename_file(id, new_path))
    }
}

impl LocalStore for FileStore {
    async fn create_file(&self, path: &str, content: Content, meta: FileMeta) -> Result<FileId> {
        let result = self.inner.create_file(path, content, meta).await;
        self.persisted(result)
    }

    async fn load_file_by_id(&self, id: FileId) -> Result<Option<RepoFile>> {
        self.inner.load_file_by_id(id).await
    }

    async fn list_files(&self) -> Result<Vec<RepoFile>> {
        self.inner.list_files().await
    }

    async fn update_file(&self, id: FileId, content: Content, mime: Option<String>) -> Result<()> {
        let result = self.inner.update_file(id, content, mime).await;
        self.persisted(result)
    }

    async fn delete_file_by_id(&self, id: FileId) -> Result<()> {
        let result = self.inner.delete_file_by_id(id).await;
        self.persisted(result)
    }

    async fn move_file_path(&self, id: FileId, new_path: &str) -> Result<()> {
        let result = self.inner.move_file_path(id, new_path).await;
        self.persisted(result)
    }

    async fn mark_synced(&self, id: FileId, mark: SyncMark) -> Result<()> {
        let result = self.inner.mark_synced(id, mark).await;
        self.persisted(result)
    }

    async fn find_file_by_path(&self, path: &str) -> Result<Option<RepoFile>> {
        self.inner.find_file_by_path(path).await
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<RepoFile>> {
        self.inner.find_by_remote_id(remote_id).await
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<RepoFile>> {
        self.inner.find_by_fingerprint(fingerprint).await
    }

    async fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
        self.inner.list_tombstones().await
    }

    async fn remove_tombstones<P>(&self, predicate: P) -> Result<usize>
    where
        P: Fn(&Tombstone) -> bool,
    {
        let removed = self.inner.remove_tombstones(predicate).await?;
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }
}

//! The local document store contract consumed by the sync engine.
//!
//! Implementations own persistence; the engine only ever goes through this
//! trait. Two families of mutation exist and must not be confused:
//!
//! - `delete_file_by_id` / `move_file_path` are the orchestrator's tools for
//!   mirroring remote state and never queue tombstones;
//! - the editor-facing `delete_file` / `rename_file` on the concrete stores do
//!   queue them when the file had already been reconciled with the remote.

use std::future::Future;

use crate::error::Result;
use crate::models::{Content, FileId, FileKind, FileMeta, RepoFile, SyncMark, Tombstone};

pub trait LocalStore {
    fn create_file(
        &self,
        path: &str,
        content: Content,
        meta: FileMeta,
    ) -> impl Future<Output = Result<FileId>>;

    fn load_file_by_id(&self, id: FileId) -> impl Future<Output = Result<Option<RepoFile>>>;

    fn list_files(&self) -> impl Future<Output = Result<Vec<RepoFile>>>;

    fn update_file(
        &self,
        id: FileId,
        content: Content,
        mime: Option<String>,
    ) -> impl Future<Output = Result<()>>;

    fn delete_file_by_id(&self, id: FileId) -> impl Future<Output = Result<()>>;

    fn move_file_path(&self, id: FileId, new_path: &str) -> impl Future<Output = Result<()>>;

    fn mark_synced(&self, id: FileId, mark: SyncMark) -> impl Future<Output = Result<()>>;

    fn find_file_by_path(&self, path: &str) -> impl Future<Output = Result<Option<RepoFile>>>;

    fn find_by_remote_id(&self, remote_id: &str)
        -> impl Future<Output = Result<Option<RepoFile>>>;

    /// A file whose current content fingerprints to `fingerprint`.
    fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> impl Future<Output = Result<Option<RepoFile>>>;

    fn list_tombstones(&self) -> impl Future<Output = Result<Vec<Tombstone>>>;

    /// Drop every tombstone matching `predicate`; returns how many went.
    fn remove_tombstones<P>(&self, predicate: P) -> impl Future<Output = Result<usize>>
    where
        P: Fn(&Tombstone) -> bool;

    fn fingerprint(&self, kind: FileKind, content: &Content, remote_id: Option<&str>) -> String {
        crate::fingerprint::fingerprint(kind, content, remote_id)
    }
}

/// Fingerprint of a file's current content.
pub fn current_fingerprint<S: LocalStore>(store: &S, file: &RepoFile) -> String {
    store.fingerprint(file.kind, &file.content, file.last_remote_id.as_deref())
}

/// Whether `file` carries edits made since its last sync. Files that were
/// never synced count as dirty.
pub fn is_dirty<S: LocalStore>(store: &S, file: &RepoFile) -> bool {
    file.last_synced_fingerprint.as_deref() != Some(current_fingerprint(store, file).as_str())
}

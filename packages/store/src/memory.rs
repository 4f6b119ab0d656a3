use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::local::{current_fingerprint, LocalStore};
use crate::models::{Content, FileId, FileMeta, RepoFile, SyncMark, Tombstone};
use crate::objects::Sha;
use crate::repo::ObjectStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory ObjectStore backing the in-memory remote.
#[derive(Clone, Debug, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    refs: Arc<Mutex<HashMap<String, Sha>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        lock(&self.objects).len()
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn get(&self, sha: &Sha) -> Option<Vec<u8>> {
        lock(&self.objects).get(&sha.to_hex()).cloned()
    }

    async fn put(&self, sha: &Sha, data: Vec<u8>) {
        lock(&self.objects).insert(sha.to_hex(), data);
    }

    async fn get_ref(&self, name: &str) -> Option<Sha> {
        lock(&self.refs).get(name).cloned()
    }

    async fn set_ref(&self, name: &str, sha: &Sha) {
        lock(&self.refs).insert(name.to_string(), sha.clone());
    }

    async fn swap_ref(&self, name: &str, expected: Option<&Sha>, new: &Sha) -> bool {
        let mut refs = lock(&self.refs);
        if refs.get(name) != expected {
            return false;
        }
        refs.insert(name.to_string(), new.clone());
        true
    }
}

/// Serialisable image of a local store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub files: Vec<RepoFile>,
    pub tombstones: Vec<Tombstone>,
}

/// In-memory local document store. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct MemoryLocalStore {
    state: Arc<Mutex<Snapshot>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            state: Arc::new(Mutex::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        lock(&self.state).clone()
    }

    /// Delete a file as the editor does: queue a tombstone when the remote
    /// already knows the file.
    pub fn delete_file(&self, id: FileId) -> Result<()> {
        let mut state = lock(&self.state);
        let file = take_file(&mut state, id)?;
        if file.last_remote_id.is_some() {
            state.tombstones.push(Tombstone::Delete {
                path: file.path,
                deleted_at: Utc::now(),
                last_remote_id: file.last_remote_id,
            });
        }
        Ok(())
    }

    /// Rename a file as the editor does: queue a tombstone when the remote
    /// already knows the file under its old path.
    pub fn rename_file(&self, id: FileId, new_path: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let from = relocate(&mut state, id, new_path)?;
        let Some(file) = state.files.iter().find(|f| f.id == id) else {
            return Err(StoreError::NotFound(id));
        };
        if from != new_path && file.last_remote_id.is_some() {
            let last_remote_id = file.last_remote_id.clone();
            state.tombstones.push(Tombstone::Rename {
                from,
                to: new_path.to_string(),
                renamed_at: Utc::now(),
                last_remote_id,
            });
        }
        Ok(())
    }

    /// Create the file at `path` or replace its content.
    pub fn write_file(&self, path: &str, content: Content) -> Result<FileId> {
        let existing = lock(&self.state)
            .files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.id);
        match existing {
            Some(id) => {
                update(&mut lock(&self.state), id, content, None)?;
                Ok(id)
            }
            None => {
                let meta = FileMeta::for_path(path, content.kind());
                insert(&mut lock(&self.state), path, content, meta)
            }
        }
    }

    fn find<P: Fn(&RepoFile) -> bool>(&self, predicate: P) -> Option<RepoFile> {
        lock(&self.state).files.iter().find(|f| predicate(f)).cloned()
    }
}

fn insert(state: &mut Snapshot, path: &str, content: Content, meta: FileMeta) -> Result<FileId> {
    if state.files.iter().any(|f| f.path == path) {
        return Err(StoreError::PathTaken(path.to_string()));
    }
    if meta.kind != content.kind() {
        return Err(StoreError::KindMismatch {
            expected: meta.kind,
            found: content.kind(),
        });
    }
    let id = FileId::new();
    state.files.push(RepoFile {
        id,
        path: path.to_string(),
        kind: meta.kind,
        content,
        mime: meta.mime,
        last_remote_id: None,
        last_synced_fingerprint: None,
    });
    clear_delete_tombstones(state, path);
    Ok(id)
}

fn update(state: &mut Snapshot, id: FileId, content: Content, mime: Option<String>) -> Result<()> {
    let file = file_mut(state, id)?;
    file.kind = content.kind();
    file.content = content;
    if mime.is_some() {
        file.mime = mime;
    }
    Ok(())
}

fn take_file(state: &mut Snapshot, id: FileId) -> Result<RepoFile> {
    let index = state
        .files
        .iter()
        .position(|f| f.id == id)
        .ok_or(StoreError::NotFound(id))?;
    Ok(state.files.remove(index))
}

/// Move file `id` to `new_path`, returning its previous path.
fn relocate(state: &mut Snapshot, id: FileId, new_path: &str) -> Result<String> {
    if state.files.iter().any(|f| f.path == new_path && f.id != id) {
        return Err(StoreError::PathTaken(new_path.to_string()));
    }
    let file = file_mut(state, id)?;
    let from = std::mem::replace(&mut file.path, new_path.to_string());
    clear_delete_tombstones(state, new_path);
    Ok(from)
}

fn file_mut(state: &mut Snapshot, id: FileId) -> Result<&mut RepoFile> {
    state
        .files
        .iter_mut()
        .find(|f| f.id == id)
        .ok_or(StoreError::NotFound(id))
}

/// A live file and a pending delete must never share a path.
fn clear_delete_tombstones(state: &mut Snapshot, path: &str) {
    state
        .tombstones
        .retain(|t| !matches!(t, Tombstone::Delete { path: p, .. } if p == path));
}

impl LocalStore for MemoryLocalStore {
    async fn create_file(&self, path: &str, content: Content, meta: FileMeta) -> Result<FileId> {
        insert(&mut lock(&self.state), path, content, meta)
    }

    async fn load_file_by_id(&self, id: FileId) -> Result<Option<RepoFile>> {
        Ok(self.find(|f| f.id == id))
    }

    async fn list_files(&self) -> Result<Vec<RepoFile>> {
        let mut files = lock(&self.state).files.clone();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn update_file(&self, id: FileId, content: Content, mime: Option<String>) -> Result<()> {
        update(&mut lock(&self.state), id, content, mime)
    }

    async fn delete_file_by_id(&self, id: FileId) -> Result<()> {
        take_file(&mut lock(&self.state), id).map(|_| ())
    }

    async fn move_file_path(&self, id: FileId, new_path: &str) -> Result<()> {
        relocate(&mut lock(&self.state), id, new_path).map(|_| ())
    }

    async fn mark_synced(&self, id: FileId, mark: SyncMark) -> Result<()> {
        let mut state = lock(&self.state);
        let file = file_mut(&mut state, id)?;
        file.last_remote_id = Some(mark.remote_id);
        file.last_synced_fingerprint = Some(mark.synced_fingerprint);
        Ok(())
    }

    async fn find_file_by_path(&self, path: &str) -> Result<Option<RepoFile>> {
        Ok(self.find(|f| f.path == path))
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<RepoFile>> {
        Ok(self.find(|f| f.last_remote_id.as_deref() == Some(remote_id)))
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<RepoFile>> {
        Ok(self.find(|f| current_fingerprint(self, f) == fingerprint))
    }

    async fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
        Ok(lock(&self.state).tombstones.clone())
    }

    async fn remove_tombstones<P>(&self, predicate: P) -> Result<usize>
    where
        P: Fn(&Tombstone) -> bool,
    {
        let mut state = lock(&self.state);
        let before = state.tombstones.len();
        state.tombstones.retain(|t| !predicate(t));
        Ok(before - state.tombstones.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::is_dirty;
    use crate::models::FileKind;
    use crate::repo::{Repository, TreeOverride};
    use crate::objects::EntryMode;

    fn meta(path: &str) -> FileMeta {
        FileMeta::for_path(path, FileKind::Markdown)
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = MemoryLocalStore::new();
        let id = store
            .create_file("work/a.md", Content::text("A"), meta("work/a.md"))
            .await
            .unwrap();

        let file = store.load_file_by_id(id).await.unwrap().unwrap();
        assert_eq!(file.path, "work/a.md");
        assert_eq!(file.mime.as_deref(), Some("text/markdown"));
        assert!(is_dirty(&store, &file));

        let dup = store
            .create_file("work/a.md", Content::text("B"), meta("work/a.md"))
            .await;
        assert!(matches!(dup, Err(StoreError::PathTaken(_))));
    }

    #[tokio::test]
    async fn test_mark_synced_makes_file_clean() {
        let store = MemoryLocalStore::new();
        let id = store
            .create_file("a.md", Content::text("A"), meta("a.md"))
            .await
            .unwrap();
        let file = store.load_file_by_id(id).await.unwrap().unwrap();
        let fp = current_fingerprint(&store, &file);
        store
            .mark_synced(
                id,
                SyncMark {
                    remote_id: "r1".into(),
                    synced_fingerprint: fp.clone(),
                },
            )
            .await
            .unwrap();

        let file = store.find_by_remote_id("r1").await.unwrap().unwrap();
        assert!(!is_dirty(&store, &file));
        assert_eq!(store.find_by_fingerprint(&fp).await.unwrap().unwrap().id, id);

        store.update_file(id, Content::text("A2"), None).await.unwrap();
        let file = store.load_file_by_id(id).await.unwrap().unwrap();
        assert!(is_dirty(&store, &file));
    }

    #[tokio::test]
    async fn test_editor_ops_queue_tombstones_only_for_synced_files() {
        let store = MemoryLocalStore::new();
        let local_only = store.write_file("draft.md", Content::text("d")).unwrap();
        let synced = store.write_file("keep.md", Content::text("k")).unwrap();
        store
            .mark_synced(
                synced,
                SyncMark {
                    remote_id: "r-keep".into(),
                    synced_fingerprint: "fp".into(),
                },
            )
            .await
            .unwrap();

        store.delete_file(local_only).unwrap();
        store.rename_file(synced, "kept.md").unwrap();

        let tombstones = store.list_tombstones().await.unwrap();
        assert_eq!(tombstones.len(), 1);
        assert!(matches!(
            &tombstones[0],
            Tombstone::Rename { from, to, last_remote_id, .. }
                if from == "keep.md" && to == "kept.md" && last_remote_id.as_deref() == Some("r-keep")
        ));
    }

    #[tokio::test]
    async fn test_orchestrator_ops_do_not_queue_tombstones() {
        let store = MemoryLocalStore::new();
        let id = store.write_file("a.md", Content::text("a")).unwrap();
        store
            .mark_synced(
                id,
                SyncMark {
                    remote_id: "r".into(),
                    synced_fingerprint: "fp".into(),
                },
            )
            .await
            .unwrap();
        store.move_file_path(id, "b.md").await.unwrap();
        store.delete_file_by_id(id).await.unwrap();
        assert!(store.list_tombstones().await.unwrap().is_empty());
        assert!(store.list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recreating_path_clears_pending_delete() {
        let store = MemoryLocalStore::new();
        let id = store.write_file("a.md", Content::text("a")).unwrap();
        store
            .mark_synced(
                id,
                SyncMark {
                    remote_id: "r".into(),
                    synced_fingerprint: "fp".into(),
                },
            )
            .await
            .unwrap();
        store.delete_file(id).unwrap();
        assert_eq!(store.list_tombstones().await.unwrap().len(), 1);

        store.write_file("a.md", Content::text("again")).unwrap();
        assert!(store.list_tombstones().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_tombstones_by_predicate() {
        let store = MemoryLocalStore::from_snapshot(Snapshot {
            files: Vec::new(),
            tombstones: vec![
                Tombstone::Delete {
                    path: "a.md".into(),
                    deleted_at: Utc::now(),
                    last_remote_id: None,
                },
                Tombstone::Delete {
                    path: "b.md".into(),
                    deleted_at: Utc::now(),
                    last_remote_id: None,
                },
            ],
        });
        let removed = store
            .remove_tombstones(|t| t.guarded_path() == "a.md")
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.list_tombstones().await.unwrap()[0].guarded_path(), "b.md");
    }

    #[tokio::test]
    async fn test_repository_build_tree_and_prune() {
        let repo = Repository::new(MemoryObjectStore::new());
        let first = repo
            .commit_files(
                "main",
                &[("docs/a.md", Some(b"A".as_slice())), ("b.md", Some(b"B".as_slice()))],
                "init",
            )
            .await
            .unwrap();
        assert_eq!(repo.head("main").await, Some(first.clone()));
        assert_eq!(repo.read_file("main", "docs/a.md").await.unwrap(), b"A");

        let (tree_sha, _) = repo.head_tree("main").await.unwrap();
        let pruned = repo
            .build_tree(
                Some(&tree_sha),
                &[TreeOverride {
                    path: "docs/a.md".into(),
                    target: None,
                }],
            )
            .await;
        let listing = repo.flatten_tree(&pruned).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path, "b.md");
        assert_eq!(listing[0].mode, EntryMode::File);
        assert_eq!(listing[0].size, Some(1));
    }

    #[tokio::test]
    async fn test_swap_branch_rejects_stale_expectation() {
        let repo = Repository::new(MemoryObjectStore::new());
        let first = repo
            .commit_files("main", &[("a.md", Some(b"1".as_slice()))], "one")
            .await
            .unwrap();
        let second = repo
            .commit_files("main", &[("a.md", Some(b"2".as_slice()))], "two")
            .await
            .unwrap();

        let tree = repo.build_tree(None, &[]).await;
        let orphan = repo.write_commit(tree, Some(first.clone()), "stale").await;
        assert!(!repo.swap_branch("main", Some(&first), &orphan).await);
        assert_eq!(repo.head("main").await, Some(second));
        assert_eq!(
            repo.read_commit(&orphan).await.unwrap().parent,
            Some(first)
        );
    }
}

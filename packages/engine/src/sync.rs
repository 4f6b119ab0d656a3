//! # Sync orchestrator
//!
//! [`Syncer::sync_bidirectional`] runs one reconciliation pass between a
//! [`LocalStore`] and the remote branch:
//!
//! 1. **Remote entries.** Every tracked remote file is matched with the local
//!    file at the same path. Missing local files are recovered from a local
//!    rename when one fits (same remote id, or same content) and pulled
//!    otherwise, unless a pending tombstone still guards the path. Existing
//!    files are pushed, pulled, adopted or merged depending on which side
//!    moved since the last sync.
//! 2. **Local-only files.** Files the remote does not list are pushed when
//!    they carry local edits and deleted locally when they do not.
//! 3. **Tombstones.** Pending deletes and renames are replayed, but only
//!    against remote paths that still hold the content the tombstone saw.
//!    A tombstone whose path changed remotely is dropped and the remote
//!    version wins.
//! 4. **Commit.** All pushes and remote deletes of the pass land in a single
//!    commit. Files are marked synced and tombstones cleared only afterwards.
//!
//! A moved branch aborts the pass with [`SyncError::Conflict`]; running the
//! pass again starts over from the new remote state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use store::{
    current_fingerprint, is_dirty, Content, FileId, FileKind, FileMeta, LocalStore, RepoFile,
    SyncMark, Tombstone, TrackingConfig,
};
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::commit::{commit, Change};
use crate::error::{Result, SyncError};
use crate::merge;
use crate::pull::{pull, PulledFile};
use crate::remote::RemoteTransport;
use crate::tree::{list_entries, RemoteEntry};

/// Per-pass counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub pulled: usize,
    pub pushed: usize,
    pub merged: usize,
    pub deleted_remote: usize,
    pub deleted_local: usize,
}

impl SyncSummary {
    pub fn is_noop(&self) -> bool {
        *self == SyncSummary::default()
    }
}

impl std::fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pulled {}, pushed {}, merged {}, deleted remotely {}, deleted locally {}",
            self.pulled, self.pushed, self.merged, self.deleted_remote, self.deleted_local
        )
    }
}

struct Push {
    id: FileId,
    path: String,
    kind: FileKind,
    content: Content,
}

#[derive(Default)]
struct Pass {
    pushes: Vec<Push>,
    deletes: Vec<String>,
    resolved: Vec<Tombstone>,
    summary: SyncSummary,
}

impl Pass {
    fn push(&mut self, id: FileId, path: &str, kind: FileKind, content: Content) {
        if self.pushes.iter().any(|p| p.id == id) {
            return;
        }
        debug!(path, "queued push");
        self.pushes.push(Push {
            id,
            path: path.to_string(),
            kind,
            content,
        });
    }

    fn push_file(&mut self, file: &RepoFile) {
        self.push(file.id, &file.path, file.kind, file.content.clone());
    }

    fn delete(&mut self, path: &str) {
        if !self.deletes.iter().any(|p| p == path) {
            debug!(path, "queued remote delete");
            self.deletes.push(path.to_string());
        }
    }
}

/// Tombstones recorded against the remote state they were made from.
struct Tombstones {
    live: Vec<Tombstone>,
    /// Paths a live tombstone keeps from being pulled.
    guarded: HashSet<String>,
    /// Destinations of live renames; replayed rather than reconciled.
    rename_targets: HashSet<String>,
}

impl Tombstones {
    /// Whether `file` may follow a remote rename onto another path. A file
    /// that sits where a live local rename put it only qualifies once the
    /// rename's source is gone remotely too; the inner value is that rename,
    /// which the move then settles.
    fn move_candidate(
        &self,
        file: &RepoFile,
        by_path: &HashMap<&str, &RemoteEntry>,
    ) -> Option<Option<Tombstone>> {
        if by_path.contains_key(file.path.as_str()) {
            return None;
        }
        if !self.rename_targets.contains(&file.path) {
            return Some(None);
        }
        let rename = self
            .live
            .iter()
            .find(|t| matches!(t, Tombstone::Rename { to, .. } if *to == file.path))?;
        if by_path.contains_key(rename.guarded_path()) {
            return None;
        }
        Some(Some(rename.clone()))
    }
}

pub struct Syncer<T> {
    transport: T,
    branch: String,
    rules: TrackingConfig,
    assets: TtlCache<String, Vec<u8>>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag however the pass ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::InFlight)?;
        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: RemoteTransport> Syncer<T> {
    pub fn new(transport: T, branch: impl Into<String>, rules: TrackingConfig) -> Self {
        let ttl = Duration::from_secs(rules.asset_cache_ttl_secs);
        Self {
            transport,
            branch: branch.into(),
            rules,
            assets: TtlCache::new(ttl),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one full reconciliation pass.
    pub async fn sync_bidirectional<S: LocalStore>(&self, store: &S) -> Result<SyncSummary> {
        let _guard = InFlight::acquire(&self.in_flight)?;
        self.assets.purge().await;

        let remote = list_entries(&self.transport, &self.branch, &self.rules).await?;
        let by_path: HashMap<&str, &RemoteEntry> =
            remote.iter().map(|e| (e.path.as_str(), e)).collect();
        let tombstones = self.triage_tombstones(store, &by_path).await?;
        let mut pass = Pass::default();

        for entry in &remote {
            if let Err(err) = self
                .reconcile_entry(store, entry, &by_path, &tombstones, &mut pass)
                .await
            {
                if !err.is_file_local() {
                    return Err(err);
                }
                warn!(path = %entry.path, error = %err, "skipping file this pass");
            }
        }

        for file in store.list_files().await? {
            if by_path.contains_key(file.path.as_str()) {
                continue;
            }
            if tombstones.rename_targets.contains(&file.path) {
                continue;
            }
            if self.rules.kind_for(&file.path).is_none() {
                debug!(path = %file.path, "untracked local file left alone");
                continue;
            }
            if is_dirty(store, &file) {
                pass.push_file(&file);
            } else {
                debug!(path = %file.path, "deleted upstream, removing local copy");
                store.delete_file_by_id(file.id).await?;
                pass.summary.deleted_local += 1;
            }
        }

        self.replay_tombstones(store, &by_path, tombstones.live, &mut pass)
            .await?;
        let summary = self.finish(store, pass).await?;
        info!(branch = %self.branch, %summary, "sync pass complete");
        Ok(summary)
    }

    /// Split tombstones into live ones and stale ones, dropping the latter.
    async fn triage_tombstones<S: LocalStore>(
        &self,
        store: &S,
        by_path: &HashMap<&str, &RemoteEntry>,
    ) -> Result<Tombstones> {
        let (live, stale): (Vec<_>, Vec<_>) = store
            .list_tombstones()
            .await?
            .into_iter()
            .partition(|t| is_live(t, by_path));

        if !stale.is_empty() {
            for t in &stale {
                debug!(path = t.guarded_path(), "remote changed since tombstone, remote wins");
            }
            store.remove_tombstones(|t| stale.contains(t)).await?;
        }

        let guarded = live.iter().map(|t| t.guarded_path().to_string()).collect();
        let rename_targets = live
            .iter()
            .filter_map(|t| match t {
                Tombstone::Rename { to, .. } => Some(to.clone()),
                Tombstone::Delete { .. } => None,
            })
            .collect();
        Ok(Tombstones {
            live,
            guarded,
            rename_targets,
        })
    }

    async fn reconcile_entry<S: LocalStore>(
        &self,
        store: &S,
        entry: &RemoteEntry,
        by_path: &HashMap<&str, &RemoteEntry>,
        tombstones: &Tombstones,
        pass: &mut Pass,
    ) -> Result<()> {
        if let Some(file) = store.find_file_by_path(&entry.path).await? {
            return self.reconcile_existing(store, file, entry, None, pass).await;
        }
        if tombstones.guarded.contains(&entry.path) {
            debug!(path = %entry.path, "pending tombstone, not pulling");
            return Ok(());
        }

        if let Some(file) = store.find_by_remote_id(&entry.content_id).await? {
            if let Some(settles) = tombstones.move_candidate(&file, by_path) {
                return self
                    .adopt_move(store, file, entry, None, settles, pass)
                    .await;
            }
        }

        let Some(pulled) = self.pull(entry).await? else {
            return Ok(());
        };
        let remote_fp = self.fingerprint_pulled(store, &pulled);
        if let Some(file) = store.find_by_fingerprint(&remote_fp).await? {
            if let Some(settles) = tombstones.move_candidate(&file, by_path) {
                return self
                    .adopt_move(store, file, entry, Some(pulled), settles, pass)
                    .await;
            }
        }

        debug!(path = %entry.path, "new remote file");
        let meta = FileMeta::for_path(&entry.path, pulled.kind);
        let id = store.create_file(&entry.path, pulled.content, meta).await?;
        store
            .mark_synced(
                id,
                SyncMark {
                    remote_id: pulled.content_id,
                    synced_fingerprint: remote_fp,
                },
            )
            .await?;
        pass.summary.pulled += 1;
        Ok(())
    }

    /// Move a local file that was renamed away from the remote layout onto
    /// the remote path, then reconcile it there. The remote name wins over a
    /// competing local rename, which is resolved without replay.
    async fn adopt_move<S: LocalStore>(
        &self,
        store: &S,
        file: RepoFile,
        entry: &RemoteEntry,
        pulled: Option<PulledFile>,
        settles: Option<Tombstone>,
        pass: &mut Pass,
    ) -> Result<()> {
        debug!(from = %file.path, to = %entry.path, "following remote rename");
        store.move_file_path(file.id, &entry.path).await?;
        if let Some(rename) = settles {
            debug!(path = %file.path, "local rename superseded by remote rename");
            pass.resolved.push(rename);
        }
        pass.summary.pulled += 1;
        let file = RepoFile {
            path: entry.path.clone(),
            ..file
        };
        self.reconcile_existing(store, file, entry, pulled, pass)
            .await
    }

    async fn reconcile_existing<S: LocalStore>(
        &self,
        store: &S,
        file: RepoFile,
        entry: &RemoteEntry,
        pulled: Option<PulledFile>,
        pass: &mut Pass,
    ) -> Result<()> {
        let path = entry.path.as_str();
        let local_fp = current_fingerprint(store, &file);
        let dirty = file.last_synced_fingerprint.as_deref() != Some(local_fp.as_str());

        if file.last_remote_id.as_deref() == Some(entry.content_id.as_str()) {
            if dirty {
                pass.push_file(&file);
            }
            return Ok(());
        }

        let pulled = match pulled {
            Some(pulled) => pulled,
            None => match self.pull(entry).await? {
                Some(pulled) => pulled,
                None => return Ok(()),
            },
        };
        let remote_fp = self.fingerprint_pulled(store, &pulled);
        let mark = SyncMark {
            remote_id: pulled.content_id.clone(),
            synced_fingerprint: remote_fp.clone(),
        };

        if remote_fp == local_fp {
            debug!(path, "same content on both sides, adopting remote id");
            store
                .mark_synced(
                    file.id,
                    SyncMark {
                        remote_id: pulled.content_id,
                        synced_fingerprint: local_fp,
                    },
                )
                .await?;
            return Ok(());
        }

        if !dirty {
            debug!(path, "remote changed, local clean: pulling");
            store.update_file(file.id, pulled.content, None).await?;
            store.mark_synced(file.id, mark).await?;
            pass.summary.pulled += 1;
            return Ok(());
        }

        if file.last_synced_fingerprint.as_deref() == Some(remote_fp.as_str()) {
            debug!(path, "remote only re-identified, pushing local edits");
            store.mark_synced(file.id, mark).await?;
            pass.push_file(&file);
            return Ok(());
        }

        match (file.content.as_text(), pulled.content.as_text()) {
            (Some(ours), Some(theirs)) => {
                let merged = match self.base_text(&file).await? {
                    Some(base) => merge::merge(&base, ours, theirs),
                    None => {
                        debug!(path, "no merge base, using line union");
                        merge::union(ours, theirs)
                    }
                };
                debug!(path, "both sides changed, merged");
                let differs = merged != theirs;
                let content = Content::text(merged);
                store.update_file(file.id, content.clone(), None).await?;
                store.mark_synced(file.id, mark).await?;
                pass.summary.merged += 1;
                if differs {
                    pass.push(file.id, path, FileKind::Markdown, content);
                }
            }
            _ => {
                warn!(path, "binary changed on both sides, keeping local version");
                store.mark_synced(file.id, mark).await?;
                pass.push_file(&file);
            }
        }
        Ok(())
    }

    /// Replay live tombstones onto the pending commit.
    async fn replay_tombstones<S: LocalStore>(
        &self,
        store: &S,
        by_path: &HashMap<&str, &RemoteEntry>,
        live: Vec<Tombstone>,
        pass: &mut Pass,
    ) -> Result<()> {
        for tombstone in live {
            if pass.resolved.contains(&tombstone) {
                continue;
            }
            let gone = tombstone.guarded_path();
            if by_path.contains_key(gone) {
                if store.find_file_by_path(gone).await?.is_some() {
                    debug!(path = gone, "live local file at tombstoned path, keeping remote copy");
                } else {
                    pass.delete(gone);
                }
            }
            if let Tombstone::Rename { to, .. } = &tombstone {
                if !by_path.contains_key(to.as_str()) {
                    if let Some(file) = store.find_file_by_path(to).await? {
                        pass.push_file(&file);
                    }
                }
            }
            pass.resolved.push(tombstone);
        }
        Ok(())
    }

    /// Land the pass in one commit, then record the outcome locally.
    async fn finish<S: LocalStore>(&self, store: &S, mut pass: Pass) -> Result<SyncSummary> {
        let mut changes: Vec<Change> = pass
            .pushes
            .iter()
            .map(|p| Change::Write {
                path: self.rules.to_remote(&p.path),
                content: p.content.clone(),
            })
            .collect();
        changes.extend(pass.deletes.iter().map(|p| Change::Delete {
            path: self.rules.to_remote(p),
        }));

        if !changes.is_empty() {
            let message = format!(
                "notesync: {} change(s) at {}",
                changes.len(),
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            );
            let outcome = commit(&self.transport, &self.branch, &changes, &message, &self.assets)
                .await?;

            for push in &pass.pushes {
                let Some(remote_id) = outcome.remote_ids.get(&self.rules.to_remote(&push.path))
                else {
                    continue;
                };
                let synced_fingerprint =
                    store.fingerprint(push.kind, &push.content, Some(remote_id.as_str()));
                store
                    .mark_synced(
                        push.id,
                        SyncMark {
                            remote_id: remote_id.clone(),
                            synced_fingerprint,
                        },
                    )
                    .await?;
                pass.summary.pushed += 1;
            }
            pass.summary.deleted_remote += outcome.deleted.len();
        }

        if !pass.resolved.is_empty() {
            let resolved = pass.resolved;
            store.remove_tombstones(|t| resolved.contains(t)).await?;
        }
        Ok(pass.summary)
    }

    async fn pull(&self, entry: &RemoteEntry) -> Result<Option<PulledFile>> {
        pull(
            &self.transport,
            &self.branch,
            &entry.path,
            entry.kind,
            &self.rules,
        )
        .await
    }

    fn fingerprint_pulled<S: LocalStore>(&self, store: &S, pulled: &PulledFile) -> String {
        store.fingerprint(pulled.kind, &pulled.content, Some(pulled.content_id.as_str()))
    }

    /// Text of the remote blob the file was last synced against.
    async fn base_text(&self, file: &RepoFile) -> Result<Option<String>> {
        let Some(remote_id) = &file.last_remote_id else {
            return Ok(None);
        };
        let bytes = self.transport.read_blob(remote_id).await?;
        Ok(bytes.and_then(|b| String::from_utf8(b).ok()))
    }
}

/// A tombstone stays live while its path is gone remotely or still holds the
/// content the tombstone was recorded against.
fn is_live(tombstone: &Tombstone, by_path: &HashMap<&str, &RemoteEntry>) -> bool {
    match by_path.get(tombstone.guarded_path()) {
        None => true,
        Some(entry) => tombstone.last_remote_id() == Some(entry.content_id.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::MemoryLocalStore;

    use crate::remote::MemoryRemote;

    fn syncer(remote: &MemoryRemote) -> Syncer<MemoryRemote> {
        Syncer::new(remote.clone(), "main", TrackingConfig::default())
    }

    #[tokio::test]
    async fn test_first_sync_pulls_everything() {
        let remote = MemoryRemote::new();
        remote.write_file("main", "a.md", b"A\n").await.unwrap();
        remote.write_file("main", "img/x.png", b"PNG").await.unwrap();
        let store = MemoryLocalStore::new();

        let summary = syncer(&remote).sync_bidirectional(&store).await.unwrap();
        assert_eq!(summary.pulled, 2);

        let files = store.list_files().await.unwrap();
        assert_eq!(files[0].content, Content::text("A\n"));
        assert_eq!(files[1].kind, FileKind::Binary);
        assert!(files.iter().all(|f| !is_dirty(&store, f)));
    }

    #[tokio::test]
    async fn test_merges_concurrent_edits() {
        let remote = MemoryRemote::new();
        remote
            .write_file("main", "a.md", b"one\ntwo\nthree\n")
            .await
            .unwrap();
        let store = MemoryLocalStore::new();
        let syncer = syncer(&remote);
        syncer.sync_bidirectional(&store).await.unwrap();

        let id = store.find_file_by_path("a.md").await.unwrap().unwrap().id;
        store
            .update_file(id, Content::text("ONE\ntwo\nthree\n"), None)
            .await
            .unwrap();
        remote
            .write_file("main", "a.md", b"one\ntwo\nTHREE\n")
            .await
            .unwrap();

        let summary = syncer.sync_bidirectional(&store).await.unwrap();
        assert_eq!(summary.merged, 1);
        assert_eq!(summary.pushed, 1);
        assert_eq!(
            remote.read_file("main", "a.md").await.unwrap(),
            b"ONE\ntwo\nTHREE\n"
        );
        let file = store.load_file_by_id(id).await.unwrap().unwrap();
        assert_eq!(file.content, Content::text("ONE\ntwo\nTHREE\n"));
        assert!(!is_dirty(&store, &file));
    }

    #[tokio::test]
    async fn test_concurrent_pass_is_rejected() {
        let remote = MemoryRemote::new();
        let syncer = syncer(&remote);
        let _held = InFlight::acquire(&syncer.in_flight).unwrap();
        let err = syncer
            .sync_bidirectional(&MemoryLocalStore::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InFlight));
    }

    #[tokio::test]
    async fn test_in_flight_flag_released_after_error() {
        let remote = MemoryRemote::new();
        remote.write_file("main", "a.md", b"a").await.unwrap();
        remote.set_truncated(true);
        let syncer = syncer(&remote);
        let store = MemoryLocalStore::new();
        assert!(syncer.sync_bidirectional(&store).await.is_err());

        remote.set_truncated(false);
        assert_eq!(syncer.sync_bidirectional(&store).await.unwrap().pulled, 1);
    }

    #[tokio::test]
    async fn test_undecodable_remote_file_is_skipped() {
        let remote = MemoryRemote::new();
        remote.write_file("main", "bad.md", &[0xff, 0xff]).await.unwrap();
        remote.write_file("main", "good.md", b"ok").await.unwrap();
        let store = MemoryLocalStore::new();

        let summary = syncer(&remote).sync_bidirectional(&store).await.unwrap();
        assert_eq!(summary.pulled, 1);
        assert!(store.find_file_by_path("bad.md").await.unwrap().is_none());
    }
}

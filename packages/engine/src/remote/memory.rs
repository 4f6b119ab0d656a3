use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use store::objects::EntryMode;
use store::{MemoryObjectStore, Repository, Sha, TreeOverride};

use super::{CommitInfo, RemoteContents, RemoteTransport, TreeItem, TreeListing, TreeUpdate};
use crate::error::{Result, SyncError};

const DOWNLOAD_PREFIX: &str = "memory://blob/";

/// A remote held entirely in memory, backed by a real Git object graph.
///
/// Clones share the same objects and refs, so a test can keep one handle to
/// edit the "server side" while the syncer works through another.
pub struct MemoryRemote {
    repo: Repository<MemoryObjectStore>,
    inline_limit: Option<u64>,
    truncated: Arc<AtomicBool>,
}

impl Clone for MemoryRemote {
    fn clone(&self) -> Self {
        Self {
            repo: Repository::new(self.repo.store().clone()),
            inline_limit: self.inline_limit,
            truncated: self.truncated.clone(),
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            repo: Repository::new(MemoryObjectStore::new()),
            inline_limit: None,
            truncated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Leave file bodies larger than `limit` out of contents responses, the
    /// way hosted APIs do for big files.
    pub fn with_inline_limit(mut self, limit: u64) -> Self {
        self.inline_limit = Some(limit);
        self
    }

    /// Report every tree listing as truncated.
    pub fn set_truncated(&self, truncated: bool) {
        self.truncated.store(truncated, Ordering::SeqCst);
    }

    pub fn repository(&self) -> &Repository<MemoryObjectStore> {
        &self.repo
    }

    pub async fn head(&self, branch: &str) -> Option<String> {
        self.repo.head(branch).await.map(|sha| sha.to_hex())
    }

    /// Commit a single file write directly on the remote.
    pub async fn write_file(&self, branch: &str, path: &str, content: &[u8]) -> Option<String> {
        self.commit(branch, &[(path, Some(content))], &format!("write {path}"))
            .await
    }

    pub async fn delete_file(&self, branch: &str, path: &str) -> Option<String> {
        self.commit(branch, &[(path, None)], &format!("delete {path}"))
            .await
    }

    pub async fn rename_file(&self, branch: &str, from: &str, to: &str) -> Option<String> {
        let content = self.read_file(branch, from).await?;
        self.commit(
            branch,
            &[(from, None), (to, Some(content.as_slice()))],
            &format!("rename {from} -> {to}"),
        )
        .await
    }

    pub async fn commit(
        &self,
        branch: &str,
        changes: &[(&str, Option<&[u8]>)],
        message: &str,
    ) -> Option<String> {
        self.repo
            .commit_files(branch, changes, message)
            .await
            .map(|sha| sha.to_hex())
    }

    pub async fn read_file(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        self.repo.read_file(branch, path).await
    }

    /// Every blob path on `branch`, sorted.
    pub async fn paths(&self, branch: &str) -> Vec<String> {
        let Some((tree, _)) = self.repo.head_tree(branch).await else {
            return Vec::new();
        };
        let mut paths: Vec<String> = self
            .repo
            .flatten_tree(&tree)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|e| e.mode.is_regular_blob())
            .map(|e| e.path)
            .collect();
        paths.sort();
        paths
    }
}

fn parse_sha(sha: &str) -> Result<Sha> {
    Sha::from_hex(sha).ok_or_else(|| SyncError::Transport {
        status: 422,
        path: sha.to_string(),
        message: "not a valid object id".to_string(),
    })
}

fn not_found(path: &str) -> SyncError {
    SyncError::Transport {
        status: 404,
        path: path.to_string(),
        message: "Not Found".to_string(),
    }
}

fn item_kind(mode: EntryMode) -> &'static str {
    match mode {
        EntryMode::Tree => "tree",
        EntryMode::Gitlink => "commit",
        _ => "blob",
    }
}

impl RemoteTransport for MemoryRemote {
    async fn read_ref(&self, branch: &str) -> Result<Option<String>> {
        Ok(self.head(branch).await)
    }

    async fn read_commit(&self, sha: &str) -> Result<CommitInfo> {
        let commit = self
            .repo
            .read_commit(&parse_sha(sha)?)
            .await
            .ok_or_else(|| not_found(sha))?;
        Ok(CommitInfo {
            sha: sha.to_string(),
            tree: commit.tree.to_hex(),
        })
    }

    async fn list_tree(&self, sha: &str) -> Result<TreeListing> {
        let entries = self
            .repo
            .flatten_tree(&parse_sha(sha)?)
            .await
            .ok_or_else(|| not_found(sha))?;
        let items = entries
            .into_iter()
            .map(|e| TreeItem {
                path: e.path,
                mode: e.mode.as_str().to_string(),
                kind: item_kind(e.mode).to_string(),
                sha: e.sha.to_hex(),
                size: e.size,
            })
            .collect();
        Ok(TreeListing {
            sha: sha.to_string(),
            items,
            truncated: self.truncated.load(Ordering::SeqCst),
        })
    }

    async fn read_contents(&self, path: &str, branch: &str) -> Result<Option<RemoteContents>> {
        let Some((_, tree)) = self.repo.head_tree(branch).await else {
            return Ok(None);
        };
        let Some(entry) = self.repo.resolve_path(&tree, path).await else {
            return Ok(None);
        };
        if !entry.mode.is_regular_blob() {
            return Ok(None);
        }
        let bytes = self
            .repo
            .read_blob(&entry.sha)
            .await
            .ok_or_else(|| not_found(path))?;
        let size = bytes.len() as u64;
        let inline = self.inline_limit.map_or(true, |limit| size <= limit);
        Ok(Some(RemoteContents {
            path: path.to_string(),
            sha: entry.sha.to_hex(),
            size,
            content: inline.then_some(bytes),
            download_url: Some(format!("{DOWNLOAD_PREFIX}{}", entry.sha.to_hex())),
        }))
    }

    async fn read_blob(&self, sha: &str) -> Result<Option<Vec<u8>>> {
        match Sha::from_hex(sha) {
            Some(sha) => Ok(self.repo.read_blob(&sha).await),
            None => Ok(None),
        }
    }

    async fn download(&self, url: &str) -> Result<Option<Vec<u8>>> {
        match url.strip_prefix(DOWNLOAD_PREFIX) {
            Some(sha) => self.read_blob(sha).await,
            None => Ok(None),
        }
    }

    async fn create_blob(&self, content: &[u8]) -> Result<String> {
        Ok(self.repo.write_blob(content).await.to_hex())
    }

    async fn create_tree(&self, base: Option<&str>, updates: &[TreeUpdate]) -> Result<String> {
        let base = base.map(parse_sha).transpose()?;
        let mut overrides = Vec::with_capacity(updates.len());
        for update in updates {
            let target = match &update.sha {
                Some(sha) => {
                    let mode = EntryMode::parse(&update.mode).unwrap_or(EntryMode::File);
                    Some((mode, parse_sha(sha)?))
                }
                None => None,
            };
            overrides.push(TreeOverride {
                path: update.path.clone(),
                target,
            });
        }
        Ok(self.repo.build_tree(base.as_ref(), &overrides).await.to_hex())
    }

    async fn create_commit(&self, message: &str, tree: &str, parents: &[String]) -> Result<String> {
        let tree = parse_sha(tree)?;
        let parent = parents.first().map(|p| parse_sha(p)).transpose()?;
        Ok(self.repo.write_commit(tree, parent, message).await.to_hex())
    }

    async fn update_ref(&self, branch: &str, expected: Option<&str>, new: &str) -> Result<()> {
        let expected_sha = expected.map(parse_sha).transpose()?;
        let new_sha = parse_sha(new)?;
        if self
            .repo
            .swap_branch(branch, expected_sha.as_ref(), &new_sha)
            .await
        {
            return Ok(());
        }
        Err(SyncError::Conflict {
            branch: branch.to_string(),
            expected: expected.map(str::to_string),
            actual: self.head(branch).await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_remote_has_no_ref() {
        let remote = MemoryRemote::new();
        assert_eq!(remote.read_ref("main").await.unwrap(), None);
        assert!(remote.paths("main").await.is_empty());
    }

    #[tokio::test]
    async fn test_contents_and_download() {
        let remote = MemoryRemote::new().with_inline_limit(4);
        remote.write_file("main", "notes/small.md", b"tiny").await.unwrap();
        remote.write_file("main", "notes/big.md", b"much bigger").await.unwrap();

        let small = remote.read_contents("notes/small.md", "main").await.unwrap().unwrap();
        assert_eq!(small.content.as_deref(), Some(b"tiny".as_slice()));

        let big = remote.read_contents("notes/big.md", "main").await.unwrap().unwrap();
        assert_eq!(big.content, None);
        let url = big.download_url.unwrap();
        assert_eq!(remote.download(&url).await.unwrap().unwrap(), b"much bigger");

        assert!(remote.read_contents("notes/none.md", "main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_ref_is_compare_and_swap() {
        let remote = MemoryRemote::new();
        let first = remote.write_file("main", "a.md", b"1").await.unwrap();
        let second = remote.write_file("main", "a.md", b"2").await.unwrap();

        let commit = remote.read_commit(&second).await.unwrap();
        let orphan = remote
            .create_commit("stale", &commit.tree, &[first.clone()])
            .await
            .unwrap();
        let err = remote.update_ref("main", Some(&first), &orphan).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Conflict { actual: Some(ref a), .. } if *a == second
        ));

        let err = remote.update_ref("main", None, &orphan).await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict { .. }));
        assert_eq!(remote.head("main").await, Some(second));
    }

    #[tokio::test]
    async fn test_create_tree_applies_sparse_updates() {
        let remote = MemoryRemote::new();
        let head = remote.write_file("main", "a.md", b"a").await.unwrap();
        let base = remote.read_commit(&head).await.unwrap().tree;
        let blob = remote.create_blob(b"b").await.unwrap();

        let tree = remote
            .create_tree(
                Some(&base),
                &[TreeUpdate::write("dir/b.md", blob), TreeUpdate::delete("a.md")],
            )
            .await
            .unwrap();
        let listing = remote.list_tree(&tree).await.unwrap();
        let paths: Vec<_> = listing.items.iter().map(|i| (i.path.as_str(), i.kind.as_str())).collect();
        assert_eq!(paths, vec![("dir", "tree"), ("dir/b.md", "blob")]);
    }
}

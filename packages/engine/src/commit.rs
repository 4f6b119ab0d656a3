//! Atomic multi-file commits.
//!
//! [`commit`] turns a batch of [`Change`]s into exactly one commit on top of
//! the branch head it read at the start, or into nothing at all:
//!
//! 1. read the head commit and flatten its tree;
//! 2. drop changes that would not alter the tree (deleting an absent path,
//!    writing bytes whose blob id matches what is already there);
//! 3. upload the remaining blobs and build a tree from the base plus sparse
//!    overrides;
//! 4. commit with the head as sole parent and move the branch only if it is
//!    still at that head. A moved branch surfaces as [`SyncError::Conflict`]
//!    and leaves the branch untouched.

use std::collections::HashMap;

use store::objects::{blob_id, EntryMode};
use store::Content;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::error::{Result, SyncError};
use crate::remote::{RemoteTransport, TreeUpdate};

/// One file-level change, addressed by repository path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    Write { path: String, content: Content },
    Delete { path: String },
}

impl Change {
    pub fn path(&self) -> &str {
        match self {
            Change::Write { path, .. } | Change::Delete { path } => path,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Branch head after the call: the new commit, or the unchanged head when
    /// every change was a no-op.
    pub commit: Option<String>,
    /// Whether a new commit landed.
    pub committed: bool,
    /// Blob id now at each written path.
    pub remote_ids: HashMap<String, String>,
    /// Writes dropped because their bytes could not be resolved.
    pub skipped: Vec<String>,
    /// Paths removed by the new commit.
    pub deleted: Vec<String>,
}

enum Payload {
    Bytes(Vec<u8>),
    Existing(String),
}

pub async fn commit<T: RemoteTransport>(
    transport: &T,
    branch: &str,
    changes: &[Change],
    message: &str,
    assets: &TtlCache<String, Vec<u8>>,
) -> Result<CommitOutcome> {
    let head = transport.read_ref(branch).await?;
    let base_tree = match &head {
        Some(sha) => Some(transport.read_commit(sha).await?.tree),
        None => None,
    };
    let base: HashMap<String, (String, String)> = match &base_tree {
        Some(tree) => {
            let listing = transport.list_tree(tree).await?;
            if listing.truncated {
                return Err(SyncError::TruncatedTree { sha: listing.sha });
            }
            listing
                .items
                .into_iter()
                .filter(|i| EntryMode::parse(&i.mode).is_some_and(|m| m.is_regular_blob()))
                .map(|i| (i.path, (i.mode, i.sha)))
                .collect()
        }
        None => HashMap::new(),
    };

    let mut outcome = CommitOutcome {
        commit: head.clone(),
        ..CommitOutcome::default()
    };
    let mut uploads: Vec<(String, String, Vec<u8>)> = Vec::new();
    let mut updates: Vec<TreeUpdate> = Vec::new();

    for change in changes {
        match change {
            Change::Delete { path } => {
                if base.contains_key(path) {
                    updates.push(TreeUpdate::delete(path.as_str()));
                    outcome.deleted.push(path.clone());
                } else {
                    debug!(path = %path, "delete of absent path dropped");
                }
            }
            Change::Write { path, content } => {
                let Some(payload) = resolve(transport, path, content, assets).await? else {
                    warn!(path = %path, "no bytes available, skipping push");
                    outcome.skipped.push(path.clone());
                    continue;
                };
                let id = match &payload {
                    Payload::Bytes(bytes) => blob_id(bytes).to_hex(),
                    Payload::Existing(sha) => sha.clone(),
                };
                let mode = match base.get(path) {
                    Some((_, sha)) if *sha == id => {
                        debug!(path = %path, "write matches remote, dropped");
                        outcome.remote_ids.insert(path.clone(), id);
                        continue;
                    }
                    Some((mode, _)) => mode.clone(),
                    None => EntryMode::File.as_str().to_string(),
                };
                match payload {
                    Payload::Bytes(bytes) => uploads.push((path.clone(), mode, bytes)),
                    Payload::Existing(sha) => {
                        outcome.remote_ids.insert(path.clone(), sha.clone());
                        updates.push(TreeUpdate {
                            mode,
                            ..TreeUpdate::write(path.as_str(), sha)
                        });
                    }
                }
            }
        }
    }

    if uploads.is_empty() && updates.is_empty() {
        return Ok(outcome);
    }

    for (path, mode, bytes) in uploads {
        let sha = transport.create_blob(&bytes).await?;
        outcome.remote_ids.insert(path.clone(), sha.clone());
        updates.push(TreeUpdate {
            mode,
            ..TreeUpdate::write(path, sha)
        });
    }

    let tree = transport.create_tree(base_tree.as_deref(), &updates).await?;
    let parents: Vec<String> = head.iter().cloned().collect();
    let new_commit = transport.create_commit(message, &tree, &parents).await?;
    transport
        .update_ref(branch, head.as_deref(), &new_commit)
        .await?;

    debug!(branch, commit = %new_commit, files = updates.len(), "commit landed");
    outcome.commit = Some(new_commit);
    outcome.committed = true;
    Ok(outcome)
}

async fn resolve<T: RemoteTransport>(
    transport: &T,
    path: &str,
    content: &Content,
    assets: &TtlCache<String, Vec<u8>>,
) -> Result<Option<Payload>> {
    let payload = match content {
        Content::Text { text } => Payload::Bytes(text.as_bytes().to_vec()),
        Content::Binary { bytes } => Payload::Bytes(bytes.clone()),
        Content::Reference { sha: Some(sha), .. } => Payload::Existing(sha.clone()),
        Content::Reference { url, sha: None } => {
            if let Some(bytes) = assets.get(url).await {
                return Ok(Some(Payload::Bytes(bytes)));
            }
            match transport.download(url).await? {
                Some(bytes) => {
                    assets.insert(url.clone(), bytes.clone()).await;
                    Payload::Bytes(bytes)
                }
                None => {
                    debug!(path, url = %url, "asset reference did not resolve");
                    return Ok(None);
                }
            }
        }
    };
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::remote::MemoryRemote;

    fn cache() -> TtlCache<String, Vec<u8>> {
        TtlCache::new(Duration::from_secs(60))
    }

    fn write(path: &str, text: &str) -> Change {
        Change::Write {
            path: path.to_string(),
            content: Content::text(text),
        }
    }

    #[tokio::test]
    async fn test_first_commit_creates_branch() {
        let remote = MemoryRemote::new();
        let outcome = commit(&remote, "main", &[write("a.md", "A")], "init", &cache())
            .await
            .unwrap();
        assert!(outcome.committed);
        assert_eq!(remote.head("main").await, outcome.commit);
        assert_eq!(remote.read_file("main", "a.md").await.unwrap(), b"A");
        assert_eq!(outcome.remote_ids["a.md"], blob_id(b"A").to_hex());

        let parent = remote
            .repository()
            .read_commit(&store::Sha::from_hex(outcome.commit.as_deref().unwrap()).unwrap())
            .await
            .unwrap()
            .parent;
        assert_eq!(parent, None);
    }

    #[tokio::test]
    async fn test_noop_changes_do_not_commit() {
        let remote = MemoryRemote::new();
        let head = remote.write_file("main", "a.md", b"A").await.unwrap();
        let objects = remote.repository().store().object_count();

        let outcome = commit(
            &remote,
            "main",
            &[
                write("a.md", "A"),
                Change::Delete {
                    path: "missing.md".into(),
                },
            ],
            "noop",
            &cache(),
        )
        .await
        .unwrap();
        assert!(!outcome.committed);
        assert!(outcome.deleted.is_empty());
        assert_eq!(outcome.commit.as_deref(), Some(head.as_str()));
        assert_eq!(remote.head("main").await, Some(head));
        assert!(outcome.remote_ids.contains_key("a.md"));
        assert_eq!(remote.repository().store().object_count(), objects);
    }

    #[tokio::test]
    async fn test_writes_and_deletes_land_in_one_commit() {
        let remote = MemoryRemote::new();
        let head = remote
            .commit(
                "main",
                &[("a.md", Some(b"A".as_slice())), ("b.md", Some(b"B".as_slice()))],
                "seed",
            )
            .await
            .unwrap();

        let outcome = commit(
            &remote,
            "main",
            &[
                write("a.md", "A2"),
                Change::Delete { path: "b.md".into() },
                write("dir/c.md", "C"),
            ],
            "batch",
            &cache(),
        )
        .await
        .unwrap();

        assert_eq!(remote.paths("main").await, vec!["a.md", "dir/c.md"]);
        assert_eq!(outcome.deleted, vec!["b.md".to_string()]);
        let new_head = store::Sha::from_hex(outcome.commit.as_deref().unwrap()).unwrap();
        let parent = remote.repository().read_commit(&new_head).await.unwrap().parent;
        assert_eq!(parent.map(|p| p.to_hex()), Some(head));
    }

    #[tokio::test]
    async fn test_reference_with_sha_links_existing_blob() {
        let remote = MemoryRemote::new();
        remote.write_file("main", "img/a.png", b"PNG").await.unwrap();
        let sha = blob_id(b"PNG").to_hex();

        let outcome = commit(
            &remote,
            "main",
            &[Change::Write {
                path: "img/b.png".into(),
                content: Content::Reference {
                    url: "memory://blob/unused".into(),
                    sha: Some(sha.clone()),
                },
            }],
            "copy",
            &cache(),
        )
        .await
        .unwrap();
        assert!(outcome.committed);
        assert_eq!(remote.read_file("main", "img/b.png").await.unwrap(), b"PNG");
        assert_eq!(outcome.remote_ids["img/b.png"], sha);
    }

    #[tokio::test]
    async fn test_unresolvable_reference_is_skipped() {
        let remote = MemoryRemote::new();
        let outcome = commit(
            &remote,
            "main",
            &[
                Change::Write {
                    path: "img/gone.png".into(),
                    content: Content::Reference {
                        url: "memory://blob/0000000000000000000000000000000000000000".into(),
                        sha: None,
                    },
                },
                write("a.md", "A"),
            ],
            "partial",
            &cache(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.skipped, vec!["img/gone.png".to_string()]);
        assert_eq!(remote.paths("main").await, vec!["a.md"]);
    }

    #[tokio::test]
    async fn test_reference_bytes_come_from_cache() {
        let remote = MemoryRemote::new();
        let assets = cache();
        assets
            .insert("https://cdn.example.test/x.png".to_string(), b"XPNG".to_vec())
            .await;
        commit(
            &remote,
            "main",
            &[Change::Write {
                path: "x.png".into(),
                content: Content::Reference {
                    url: "https://cdn.example.test/x.png".into(),
                    sha: None,
                },
            }],
            "cached",
            &assets,
        )
        .await
        .unwrap();
        assert_eq!(remote.read_file("main", "x.png").await.unwrap(), b"XPNG");
    }
}

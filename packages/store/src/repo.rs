//! # Repository: Git object graph over an abstract object store
//!
//! [`Repository`] keeps a Git-compatible, content-addressed object graph without
//! a working directory or the `git` binary. All reads and writes go through the
//! [`ObjectStore`] trait; [`crate::MemoryObjectStore`] is the in-tree backend.
//! The engine's in-memory remote is built on it, which gives tests real blob
//! ids, real trees and a real compare-and-swap branch ref.
//!
//! ## Read path
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`head`](Repository::head) | SHA `refs/heads/{branch}` points to. |
//! | [`read_commit`](Repository::read_commit) / [`read_tree`](Repository::read_tree) / [`read_blob`](Repository::read_blob) | Typed object lookups. |
//! | [`flatten_tree`](Repository::flatten_tree) | Recursive listing of every entry below a tree, directories included, with blob sizes. |
//! | [`read_file`](Repository::read_file) | Blob bytes at a path on a branch. |
//!
//! ## Write path
//!
//! [`build_tree`](Repository::build_tree) applies sparse overrides (write or delete
//! per path) on top of a base tree, rebuilding every touched subtree from the
//! leaf up and pruning directories left empty. [`write_commit`](Repository::write_commit)
//! records a commit, and [`swap_branch`](Repository::swap_branch) advances the
//! branch only if it still points where the caller last saw it.

use std::future::Future;
use std::pin::Pin;

use crate::objects::*;

/// Async trait for storing and retrieving git objects.
pub trait ObjectStore {
    fn get(&self, sha: &Sha) -> impl Future<Output = Option<Vec<u8>>>;
    fn put(&self, sha: &Sha, data: Vec<u8>) -> impl Future<Output = ()>;
    fn get_ref(&self, name: &str) -> impl Future<Output = Option<Sha>>;
    fn set_ref(&self, name: &str, sha: &Sha) -> impl Future<Output = ()>;
    /// Point `name` at `new` only if it currently equals `expected`
    /// (`None` meaning the ref must not exist yet). Returns whether it moved.
    fn swap_ref(&self, name: &str, expected: Option<&Sha>, new: &Sha) -> impl Future<Output = bool>;
}

/// One entry of a flattened tree listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlatEntry {
    pub path: String,
    pub mode: EntryMode,
    pub sha: Sha,
    /// Blob size in bytes; `None` for directories and links to other repos.
    pub size: Option<u64>,
}

/// A change applied by [`Repository::build_tree`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeOverride {
    pub path: String,
    /// `None` removes the path.
    pub target: Option<(EntryMode, Sha)>,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

const DEFAULT_AUTHOR: &str = "Notesync <sync@notesync.dev>";

/// A git repository backed by an ObjectStore.
pub struct Repository<S: ObjectStore> {
    store: S,
    author: String,
}

impl<S: ObjectStore> Repository<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            author: DEFAULT_AUTHOR.to_string(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn branch_ref(branch: &str) -> String {
        format!("refs/heads/{branch}")
    }

    /// Current tip of `branch`.
    pub async fn head(&self, branch: &str) -> Option<Sha> {
        self.store.get_ref(&Self::branch_ref(branch)).await
    }

    pub async fn read_commit(&self, sha: &Sha) -> Option<Commit> {
        parse_commit(&self.store.get(sha).await?)
    }

    pub async fn read_tree(&self, sha: &Sha) -> Option<Tree> {
        parse_tree(&self.store.get(sha).await?)
    }

    pub async fn read_blob(&self, sha: &Sha) -> Option<Vec<u8>> {
        parse_blob(&self.store.get(sha).await?).map(|b| b.content)
    }

    /// Root tree of the commit `branch` points to.
    pub async fn head_tree(&self, branch: &str) -> Option<(Sha, Tree)> {
        let head = self.head(branch).await?;
        let commit = self.read_commit(&head).await?;
        let tree = self.read_tree(&commit.tree).await?;
        Some((commit.tree, tree))
    }

    /// List every entry below `tree_sha`, depth first, directories before
    /// their contents.
    pub async fn flatten_tree(&self, tree_sha: &Sha) -> Option<Vec<FlatEntry>> {
        let tree = self.read_tree(tree_sha).await?;
        let mut out = Vec::new();
        self.walk(&tree, "", &mut out).await;
        Some(out)
    }

    fn walk<'a>(
        &'a self,
        tree: &'a Tree,
        prefix: &'a str,
        out: &'a mut Vec<FlatEntry>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            for entry in &tree.entries {
                let path = join(prefix, &entry.name);
                match entry.mode {
                    EntryMode::Tree => {
                        out.push(FlatEntry {
                            path: path.clone(),
                            mode: entry.mode,
                            sha: entry.sha.clone(),
                            size: None,
                        });
                        if let Some(sub_tree) = self.read_tree(&entry.sha).await {
                            self.walk(&sub_tree, &path, out).await;
                        }
                    }
                    EntryMode::Gitlink => out.push(FlatEntry {
                        path,
                        mode: entry.mode,
                        sha: entry.sha.clone(),
                        size: None,
                    }),
                    _ => {
                        let size = self
                            .read_blob(&entry.sha)
                            .await
                            .map(|bytes| bytes.len() as u64);
                        out.push(FlatEntry {
                            path,
                            mode: entry.mode,
                            sha: entry.sha.clone(),
                            size,
                        });
                    }
                }
            }
        })
    }

    /// Resolve a slash-separated path below `tree`.
    pub fn resolve_path<'a>(
        &'a self,
        tree: &'a Tree,
        path: &'a str,
    ) -> BoxFuture<'a, Option<TreeEntry>> {
        Box::pin(async move {
            match path.split_once('/') {
                None => tree.entry(path).cloned(),
                Some((dir, rest)) => {
                    let entry = tree.entry(dir).filter(|e| e.mode == EntryMode::Tree)?;
                    let sub_tree = self.read_tree(&entry.sha).await?;
                    self.resolve_path(&sub_tree, rest).await
                }
            }
        })
    }

    /// Blob bytes at `path` on `branch`.
    pub async fn read_file(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        let (_, tree) = self.head_tree(branch).await?;
        let entry = self.resolve_path(&tree, path).await?;
        if !entry.mode.is_regular_blob() {
            return None;
        }
        self.read_blob(&entry.sha).await
    }

    pub async fn write_blob(&self, content: &[u8]) -> Sha {
        let (sha, raw) = hash_blob(&Blob {
            content: content.to_vec(),
        });
        self.store.put(&sha, raw).await;
        sha
    }

    /// Apply `overrides` on top of `base` (or an empty tree) and store every
    /// rebuilt tree. Returns the new root tree SHA.
    pub async fn build_tree(&self, base: Option<&Sha>, overrides: &[TreeOverride]) -> Sha {
        let mut root = match base {
            Some(sha) => self.read_tree(sha).await.unwrap_or_default(),
            None => Tree::default(),
        };
        for change in overrides {
            root = self
                .update_tree_at_path(&root, &change.path, change.target.clone())
                .await;
        }
        let (sha, raw) = hash_tree(&root);
        self.store.put(&sha, raw).await;
        sha
    }

    /// Insert, replace or remove the entry at `path`, returning the rebuilt
    /// tree. Intermediate subtrees are created on demand and dropped once
    /// empty.
    fn update_tree_at_path<'a>(
        &'a self,
        tree: &'a Tree,
        path: &'a str,
        target: Option<(EntryMode, Sha)>,
    ) -> BoxFuture<'a, Tree> {
        Box::pin(async move {
            let mut entries = tree.entries.clone();

            match path.split_once('/') {
                None => {
                    entries.retain(|e| e.name != path);
                    if let Some((mode, sha)) = target {
                        entries.push(TreeEntry {
                            mode,
                            name: path.to_string(),
                            sha,
                        });
                    }
                }
                Some((dir, rest)) => {
                    let existing = entries
                        .iter()
                        .find(|e| e.name == dir && e.mode == EntryMode::Tree)
                        .map(|e| e.sha.clone());
                    let sub_tree = match existing {
                        Some(sha) => self.read_tree(&sha).await.unwrap_or_default(),
                        None if target.is_none() => return Tree { entries },
                        None => Tree::default(),
                    };

                    let new_sub = self.update_tree_at_path(&sub_tree, rest, target).await;
                    entries.retain(|e| e.name != dir);
                    if !new_sub.entries.is_empty() {
                        let (sub_sha, sub_raw) = hash_tree(&new_sub);
                        self.store.put(&sub_sha, sub_raw).await;
                        entries.push(TreeEntry {
                            mode: EntryMode::Tree,
                            name: dir.to_string(),
                            sha: sub_sha,
                        });
                    }
                }
            }

            Tree { entries }
        })
    }

    pub async fn write_commit(&self, tree: Sha, parent: Option<Sha>, message: &str) -> Sha {
        let commit = Commit {
            tree,
            parent,
            author: self.author.clone(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let (sha, raw) = hash_commit(&commit);
        self.store.put(&sha, raw).await;
        sha
    }

    /// Advance `branch` to `new` if it still points at `expected`.
    pub async fn swap_branch(&self, branch: &str, expected: Option<&Sha>, new: &Sha) -> bool {
        self.store
            .swap_ref(&Self::branch_ref(branch), expected, new)
            .await
    }

    /// Write or delete files on `branch` in a single commit. `None` content
    /// deletes the path. Returns the new commit, or `None` if the branch moved
    /// underneath the call.
    pub async fn commit_files(
        &self,
        branch: &str,
        changes: &[(&str, Option<&[u8]>)],
        message: &str,
    ) -> Option<Sha> {
        let head = self.head(branch).await;
        let base = match &head {
            Some(sha) => Some(self.read_commit(sha).await?.tree),
            None => None,
        };

        let mut overrides = Vec::with_capacity(changes.len());
        for (path, content) in changes {
            let target = match content {
                Some(bytes) => Some((EntryMode::File, self.write_blob(bytes).await)),
                None => None,
            };
            overrides.push(TreeOverride {
                path: path.to_string(),
                target,
            });
        }

        let tree = self.build_tree(base.as_ref(), &overrides).await;
        let commit = self.write_commit(tree, head.clone(), message).await;
        self.swap_branch(branch, head.as_ref(), &commit)
            .await
            .then_some(commit)
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

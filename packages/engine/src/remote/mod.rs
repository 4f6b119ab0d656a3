//! # Remote transport
//!
//! The engine sees the remote only through [`RemoteTransport`], a thin layer
//! over the Git data primitives a hosted repository exposes: refs, commits,
//! recursive trees, blobs, plus a contents endpoint for single files.
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | [`GitHubTransport`] | GitHub REST (`git/*` and `contents/*` endpoints). |
//! | [`MemoryRemote`] | A [`store::Repository`] held in memory. |
//!
//! All paths are repository paths (not relative to the notes root) and all
//! ids are lowercase hex blob/tree/commit SHAs.

mod github;
mod memory;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use github::{GitHubTransport, DEFAULT_API_BASE};
pub use memory::MemoryRemote;

/// A commit as far as the engine cares.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub tree: String,
}

/// One row of a recursive tree listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeItem {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeListing {
    pub sha: String,
    #[serde(rename = "tree")]
    pub items: Vec<TreeItem>,
    #[serde(default)]
    pub truncated: bool,
}

/// A single file read through the contents endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteContents {
    pub path: String,
    pub sha: String,
    pub size: u64,
    /// Inline bytes; `None` when the remote left them out (large files).
    pub content: Option<Vec<u8>>,
    pub download_url: Option<String>,
}

/// A sparse tree change: `sha: None` removes the path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TreeUpdate {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sha: Option<String>,
}

impl TreeUpdate {
    pub fn write(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: "100644".to_string(),
            kind: "blob",
            sha: Some(sha.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: "100644".to_string(),
            kind: "blob",
            sha: None,
        }
    }
}

pub trait RemoteTransport {
    /// Commit SHA `branch` points to; `None` when it does not exist (this
    /// includes a repository with no commits at all).
    fn read_ref(&self, branch: &str) -> impl Future<Output = Result<Option<String>>>;

    fn read_commit(&self, sha: &str) -> impl Future<Output = Result<CommitInfo>>;

    /// Recursive listing of the tree `sha`.
    fn list_tree(&self, sha: &str) -> impl Future<Output = Result<TreeListing>>;

    /// `None` only when the path is confirmed absent.
    fn read_contents(
        &self,
        path: &str,
        branch: &str,
    ) -> impl Future<Output = Result<Option<RemoteContents>>>;

    fn read_blob(&self, sha: &str) -> impl Future<Output = Result<Option<Vec<u8>>>>;

    /// Bytes behind a download URL handed out by `read_contents`.
    fn download(&self, url: &str) -> impl Future<Output = Result<Option<Vec<u8>>>>;

    fn create_blob(&self, content: &[u8]) -> impl Future<Output = Result<String>>;

    fn create_tree(
        &self,
        base: Option<&str>,
        updates: &[TreeUpdate],
    ) -> impl Future<Output = Result<String>>;

    fn create_commit(
        &self,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> impl Future<Output = Result<String>>;

    /// Move `branch` from `expected` to `new` without forcing. `expected:
    /// None` creates the branch. Fails with `SyncError::Conflict` when the
    /// branch is no longer at `expected`.
    fn update_ref(
        &self,
        branch: &str,
        expected: Option<&str>,
        new: &str,
    ) -> impl Future<Output = Result<()>>;
}

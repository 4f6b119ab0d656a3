use store::objects::EntryMode;
use store::{FileKind, TrackingConfig};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::remote::RemoteTransport;

/// A tracked file as seen in the remote tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Path relative to the notes root.
    pub path: String,
    /// Remote blob id.
    pub content_id: String,
    pub kind: FileKind,
    pub size: Option<u64>,
}

/// List every tracked file on `branch`. A missing branch is an empty
/// repository and yields no entries.
pub async fn list_entries<T: RemoteTransport>(
    transport: &T,
    branch: &str,
    rules: &TrackingConfig,
) -> Result<Vec<RemoteEntry>> {
    let Some(head) = transport.read_ref(branch).await? else {
        debug!(branch, "branch does not exist yet");
        return Ok(Vec::new());
    };
    let commit = transport.read_commit(&head).await?;
    let listing = transport.list_tree(&commit.tree).await?;
    if listing.truncated {
        return Err(SyncError::TruncatedTree { sha: listing.sha });
    }

    let mut entries: Vec<RemoteEntry> = listing
        .items
        .into_iter()
        .filter(|item| {
            EntryMode::parse(&item.mode).is_some_and(|mode| mode.is_regular_blob())
        })
        .filter_map(|item| {
            let path = rules.to_local(&item.path)?.to_string();
            let kind = rules.kind_for(&path)?;
            Some(RemoteEntry {
                path,
                content_id: item.sha,
                kind,
                size: item.size,
            })
        })
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;

    #[tokio::test]
    async fn test_filters_to_tracked_files_under_root() {
        let remote = MemoryRemote::new();
        remote
            .commit(
                "main",
                &[
                    ("notes/a.md", Some(b"a".as_slice())),
                    ("notes/img/logo.png", Some(b"png".as_slice())),
                    ("notes/.hidden/x.md", Some(b"x".as_slice())),
                    ("notes/script.sh", Some(b"#!".as_slice())),
                    ("README.md", Some(b"readme".as_slice())),
                ],
                "seed",
            )
            .await
            .unwrap();

        let entries = list_entries(&remote, "main", &TrackingConfig::new("notes"))
            .await
            .unwrap();
        let paths: Vec<_> = entries.iter().map(|e| (e.path.as_str(), e.kind)).collect();
        assert_eq!(
            paths,
            vec![("a.md", FileKind::Markdown), ("img/logo.png", FileKind::Binary)]
        );
        assert_eq!(entries[0].size, Some(1));
    }

    #[tokio::test]
    async fn test_missing_branch_is_empty() {
        let entries = list_entries(&MemoryRemote::new(), "main", &TrackingConfig::default())
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_listing_is_an_error() {
        let remote = MemoryRemote::new();
        remote.write_file("main", "a.md", b"a").await.unwrap();
        remote.set_truncated(true);
        let err = list_entries(&remote, "main", &TrackingConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::TruncatedTree { .. }));
    }
}

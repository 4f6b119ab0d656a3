use store::{Content, FileKind, TrackingConfig};

use crate::error::{Result, SyncError};
use crate::remote::RemoteTransport;

/// Remote content materialised for the local store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PulledFile {
    pub content: Content,
    pub content_id: String,
    pub kind: FileKind,
}

/// Fetch the file at root-relative `path`. `Ok(None)` means the remote
/// confirmed the file is gone.
pub async fn pull<T: RemoteTransport>(
    transport: &T,
    branch: &str,
    path: &str,
    kind: FileKind,
    rules: &TrackingConfig,
) -> Result<Option<PulledFile>> {
    let remote_path = rules.to_remote(path);
    let Some(found) = transport.read_contents(&remote_path, branch).await? else {
        return Ok(None);
    };

    if !kind.is_text() && found.size > rules.inline_binary_limit {
        if let Some(url) = found.download_url {
            return Ok(Some(PulledFile {
                content: Content::Reference {
                    url,
                    sha: Some(found.sha.clone()),
                },
                content_id: found.sha,
                kind: FileKind::AssetReference,
            }));
        }
    }

    let bytes = match found.content {
        Some(bytes) => bytes,
        None => transport
            .read_blob(&found.sha)
            .await?
            .ok_or_else(|| SyncError::MissingContent {
                path: path.to_string(),
            })?,
    };

    let (content, kind) = if kind.is_text() {
        let text = String::from_utf8(bytes).map_err(|e| SyncError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        (Content::text(text), FileKind::Markdown)
    } else {
        (Content::binary(bytes), FileKind::Binary)
    };

    Ok(Some(PulledFile {
        content,
        content_id: found.sha,
        kind,
    }))
}

//! # Domain models for the local document store
//!
//! | Type | Represents |
//! |------|-----------|
//! | [`RepoFile`] | One tracked file: path, [`FileKind`], [`Content`], MIME type, and the two sync anchors `last_remote_id` / `last_synced_fingerprint`. |
//! | [`Content`] | The materialised representation: text, raw bytes, or a reference to bytes that live remotely. |
//! | [`Tombstone`] | A deferred delete or rename waiting to be replayed against the remote. |
//! | [`FileMeta`] / [`SyncMark`] | Argument bundles for `create_file` and `mark_synced`. |
//!
//! The helpers [`kind_from_ext`] and [`mime_from_path`] map file extensions the
//! same way in the store, the tree reader and the puller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a file in the local store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub Uuid);

impl FileId {
    pub fn new() -> Self {
        FileId(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// How a file is represented and merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    /// UTF-8 text, merged three-way.
    Markdown,
    /// Bytes held locally.
    Binary,
    /// Bytes held remotely, addressed by a download reference.
    AssetReference,
}

impl FileKind {
    pub fn is_text(&self) -> bool {
        matches!(self, FileKind::Markdown)
    }
}

/// File content in one of its three representations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Content {
    Text { text: String },
    Binary {
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
    Reference {
        url: String,
        /// Remote blob id of the referenced bytes, when known.
        sha: Option<String>,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Content::Binary {
            bytes: bytes.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }

    /// The kind this representation belongs to.
    pub fn kind(&self) -> FileKind {
        match self {
            Content::Text { .. } => FileKind::Markdown,
            Content::Binary { .. } => FileKind::Binary,
            Content::Reference { .. } => FileKind::AssetReference,
        }
    }
}

/// A file tracked by the local store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoFile {
    pub id: FileId,
    /// Path relative to the notes root: "work/project.md"
    pub path: String,
    pub kind: FileKind,
    pub content: Content,
    pub mime: Option<String>,
    /// Remote content id this file was last reconciled against.
    pub last_remote_id: Option<String>,
    /// Fingerprint of `content` at the last successful sync of this file.
    pub last_synced_fingerprint: Option<String>,
}

/// Metadata supplied when creating a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMeta {
    pub kind: FileKind,
    pub mime: Option<String>,
}

impl FileMeta {
    pub fn for_path(path: &str, kind: FileKind) -> Self {
        Self {
            kind,
            mime: mime_from_path(path).map(str::to_string),
        }
    }
}

/// Sync anchors recorded after a successful pull or push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncMark {
    pub remote_id: String,
    pub synced_fingerprint: String,
}

/// A locally queued delete or rename awaiting reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Tombstone {
    Delete {
        path: String,
        deleted_at: DateTime<Utc>,
        last_remote_id: Option<String>,
    },
    Rename {
        from: String,
        to: String,
        renamed_at: DateTime<Utc>,
        last_remote_id: Option<String>,
    },
}

impl Tombstone {
    /// The remote path this tombstone removes.
    pub fn guarded_path(&self) -> &str {
        match self {
            Tombstone::Delete { path, .. } => path,
            Tombstone::Rename { from, .. } => from,
        }
    }

    pub fn last_remote_id(&self) -> Option<&str> {
        match self {
            Tombstone::Delete { last_remote_id, .. } | Tombstone::Rename { last_remote_id, .. } => {
                last_remote_id.as_deref()
            }
        }
    }
}

/// Derive the file kind from an extension, given the tracked extension lists.
pub fn kind_from_ext(ext: &str, markdown: &[String], binary: &[String]) -> Option<FileKind> {
    let ext = ext.to_ascii_lowercase();
    if markdown.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
        Some(FileKind::Markdown)
    } else if binary.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
        Some(FileKind::Binary)
    } else {
        None
    }
}

/// Extension of the last path segment, without the dot.
pub fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => Some(ext),
        _ => None,
    }
}

pub fn mime_from_path(path: &str) -> Option<&'static str> {
    let mime = match extension(path)?.to_ascii_lowercase().as_str() {
        "md" | "markdown" | "mdx" => "text/markdown",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_ignores_dotfiles() {
        assert_eq!(extension("notes/a.md"), Some("md"));
        assert_eq!(extension("notes/.gitkeep"), None);
        assert_eq!(extension("README"), None);
    }

    #[test]
    fn test_kind_from_ext() {
        let md = vec!["md".to_string()];
        let bin = vec!["png".to_string()];
        assert_eq!(kind_from_ext("MD", &md, &bin), Some(FileKind::Markdown));
        assert_eq!(kind_from_ext("png", &md, &bin), Some(FileKind::Binary));
        assert_eq!(kind_from_ext("exe", &md, &bin), None);
    }

    #[test]
    fn test_binary_content_serializes_as_base64() {
        let json = serde_json::to_string(&Content::binary(vec![0u8, 255])).unwrap();
        assert_eq!(json, r#"{"type":"binary","bytes":"AP8="}"#);
        let back: Content = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Content::binary(vec![0u8, 255]));
    }
}

//! # Tracking configuration: `notesync.toml`
//!
//! Decides which remote paths are synchronised and how they are materialised
//! locally. The CLI embeds it as the `[tracking]` section of its settings; it
//! can also be read on its own from a `notesync.toml` file.
//!
//! ```toml
//! root = "notes"                     # subfolder holding documents (empty = repo root)
//! markdown_extensions = ["md", "markdown", "txt"]
//! binary_extensions = ["png", "jpg", "jpeg", "gif", "webp", "svg", "pdf"]
//! inline_binary_limit = 262144       # larger binaries stay remote as references
//! asset_cache_ttl_secs = 600
//! ```
//!
//! Every field has a default, so a missing or empty file is equivalent to
//! [`TrackingConfig::default`].

use serde::{Deserialize, Serialize};

use crate::models::{extension, kind_from_ext, FileKind};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Subfolder within the repository that contains documents.
    #[serde(default)]
    pub root: String,
    #[serde(default = "default_markdown_extensions")]
    pub markdown_extensions: Vec<String>,
    #[serde(default = "default_binary_extensions")]
    pub binary_extensions: Vec<String>,
    /// Binaries above this many bytes are pulled as download references.
    #[serde(default = "default_inline_binary_limit")]
    pub inline_binary_limit: u64,
    /// Lifetime of downloaded asset bytes in the session cache.
    #[serde(default = "default_asset_cache_ttl")]
    pub asset_cache_ttl_secs: u64,
}

fn default_markdown_extensions() -> Vec<String> {
    ["md", "markdown", "txt"].map(String::from).to_vec()
}

fn default_binary_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "webp", "svg", "pdf"]
        .map(String::from)
        .to_vec()
}

fn default_inline_binary_limit() -> u64 {
    256 * 1024
}

fn default_asset_cache_ttl() -> u64 {
    600
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            markdown_extensions: default_markdown_extensions(),
            binary_extensions: default_binary_extensions(),
            inline_binary_limit: default_inline_binary_limit(),
            asset_cache_ttl_secs: default_asset_cache_ttl(),
        }
    }
}

impl TrackingConfig {
    /// Create a config with the given notes root.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// The well-known filename for the config file.
    pub fn filename() -> &'static str {
        "notesync.toml"
    }

    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Kind of a root-relative path, or `None` when it is not tracked.
    pub fn kind_for(&self, path: &str) -> Option<FileKind> {
        if path.split('/').any(|seg| seg.is_empty() || seg.starts_with('.')) {
            return None;
        }
        kind_from_ext(
            extension(path)?,
            &self.markdown_extensions,
            &self.binary_extensions,
        )
    }

    /// Map a repository path into the notes root. `None` for paths outside it.
    pub fn to_local<'a>(&self, remote_path: &'a str) -> Option<&'a str> {
        let root = self.root.trim_matches('/');
        if root.is_empty() {
            return Some(remote_path);
        }
        remote_path
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
    }

    /// Map a root-relative path back to a repository path.
    pub fn to_remote(&self, local_path: &str) -> String {
        let root = self.root.trim_matches('/');
        if root.is_empty() {
            local_path.to_string()
        } else {
            format!("{root}/{local_path}")
        }
    }
}

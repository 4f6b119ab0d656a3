//! # Git object model: types, serialisation, parsing, and hashing
//!
//! A dependency-light implementation of the three Git object types the sync
//! engine needs. [`crate::Repository`] uses it to keep a real content-addressed
//! object graph in memory (the engine's in-memory remote), and
//! [`crate::fingerprint`] uses [`blob_id`] so that local fingerprints share the
//! remote's addressing scheme.
//!
//! | Struct | Git type | Description |
//! |--------|----------|-------------|
//! | [`Blob`] | `blob` | Raw file content. |
//! | [`Tree`] | `tree` | A directory listing of [`TreeEntry`] items (mode, name, child SHA). |
//! | [`Commit`] | `commit` | Root tree SHA, optional parent, author/timestamp, message. |
//! | [`Sha`] | - | 20-byte SHA-1 object id with hex round-tripping. |
//!
//! Each `hash_*` function serialises an object into the canonical
//! `"{type} {size}\0{content}"` form and returns the [`Sha`] together with the
//! bytes to store. The `parse_*` functions invert that and return `None` when
//! the data is malformed or the type tag does not match.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// A 20-byte SHA-1 hash identifying a git object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sha(pub [u8; 20]);

impl Sha {
    /// Create a Sha from a 40-character hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 40 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 20];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Sha(bytes))
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Sha {
    type Err = InvalidSha;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sha::from_hex(s).ok_or_else(|| InvalidSha(s.to_string()))
    }
}

/// Returned when a string is not a 40-character hex object id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid object id: {0:?}")]
pub struct InvalidSha(pub String);

/// File mode of a tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryMode {
    /// `100644`
    File,
    /// `100755`
    Executable,
    /// `120000`
    Symlink,
    /// `40000`
    Tree,
    /// `160000` (submodule commit link)
    Gitlink,
}

impl EntryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryMode::File => "100644",
            EntryMode::Executable => "100755",
            EntryMode::Symlink => "120000",
            EntryMode::Tree => "40000",
            EntryMode::Gitlink => "160000",
        }
    }

    /// Parse both the canonical tree form (`40000`) and the zero-padded form
    /// reported by hosting APIs (`040000`).
    pub fn parse(mode: &str) -> Option<Self> {
        match mode.trim_start_matches('0') {
            "100644" => Some(EntryMode::File),
            "100755" => Some(EntryMode::Executable),
            "120000" => Some(EntryMode::Symlink),
            "40000" => Some(EntryMode::Tree),
            "160000" => Some(EntryMode::Gitlink),
            _ => None,
        }
    }

    /// Regular file content (as opposed to links and directories).
    pub fn is_regular_blob(&self) -> bool {
        matches!(self, EntryMode::File | EntryMode::Executable)
    }
}

/// A git blob (file content).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub content: Vec<u8>,
}

/// A single entry in a git tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: EntryMode,
    pub name: String,
    pub sha: Sha,
}

/// A git tree (directory listing).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// A git commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub tree: Sha,
    pub parent: Option<Sha>,
    pub author: String,
    pub message: String,
    pub timestamp: i64,
}

fn hash_with_header(obj_type: &str, content: &[u8]) -> (Sha, Vec<u8>) {
    let header = format!("{} {}\0", obj_type, content.len());
    let mut full = Vec::with_capacity(header.len() + content.len());
    full.extend_from_slice(header.as_bytes());
    full.extend_from_slice(content);

    let digest = Sha1::digest(&full);
    let mut sha_bytes = [0u8; 20];
    sha_bytes.copy_from_slice(&digest);

    (Sha(sha_bytes), full)
}

/// The object id git assigns to `content` stored as a blob, without
/// materialising the serialised object.
pub fn blob_id(content: &[u8]) -> Sha {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    let mut sha_bytes = [0u8; 20];
    sha_bytes.copy_from_slice(&hasher.finalize());
    Sha(sha_bytes)
}

/// Serialize a blob and compute its SHA-1.
pub fn hash_blob(blob: &Blob) -> (Sha, Vec<u8>) {
    hash_with_header("blob", &blob.content)
}

/// Serialize a tree in git format and compute its SHA-1.
///
/// Entries are encoded as `"{mode} {name}\0{20-byte sha}"`, sorted the way git
/// sorts them: directories compare as if their name ended in `/`.
pub fn hash_tree(tree: &Tree) -> (Sha, Vec<u8>) {
    let mut sorted: Vec<&TreeEntry> = tree.entries.iter().collect();
    sorted.sort_by_key(|e| sort_key(e));

    let mut content = Vec::new();
    for entry in sorted {
        content.extend_from_slice(entry.mode.as_str().as_bytes());
        content.push(b' ');
        content.extend_from_slice(entry.name.as_bytes());
        content.push(0);
        content.extend_from_slice(&entry.sha.0);
    }
    hash_with_header("tree", &content)
}

fn sort_key(entry: &TreeEntry) -> Vec<u8> {
    let mut key = entry.name.as_bytes().to_vec();
    if entry.mode == EntryMode::Tree {
        key.push(b'/');
    }
    key
}

/// Serialize a commit in git format and compute its SHA-1.
pub fn hash_commit(commit: &Commit) -> (Sha, Vec<u8>) {
    let mut content = format!("tree {}\n", commit.tree);
    if let Some(parent) = &commit.parent {
        content.push_str(&format!("parent {parent}\n"));
    }
    content.push_str(&format!("author {} {} +0000\n", commit.author, commit.timestamp));
    content.push_str(&format!("committer {} {} +0000\n", commit.author, commit.timestamp));
    content.push('\n');
    content.push_str(&commit.message);
    content.push('\n');

    hash_with_header("commit", content.as_bytes())
}

/// Parse a blob from a raw stored object.
pub fn parse_blob(raw: &[u8]) -> Option<Blob> {
    let content = parse_header(raw, "blob")?;
    Some(Blob {
        content: content.to_vec(),
    })
}

/// Parse a tree from a raw stored object.
pub fn parse_tree(raw: &[u8]) -> Option<Tree> {
    let content = parse_header(raw, "tree")?;
    let mut entries = Vec::new();
    let mut rest = content;

    while !rest.is_empty() {
        let space = rest.iter().position(|&b| b == b' ')?;
        let mode = EntryMode::parse(std::str::from_utf8(&rest[..space]).ok()?)?;
        rest = &rest[space + 1..];

        let nul = rest.iter().position(|&b| b == 0)?;
        let name = std::str::from_utf8(&rest[..nul]).ok()?.to_string();
        rest = &rest[nul + 1..];

        if rest.len() < 20 {
            return None;
        }
        let mut sha_bytes = [0u8; 20];
        sha_bytes.copy_from_slice(&rest[..20]);
        rest = &rest[20..];

        entries.push(TreeEntry {
            mode,
            name,
            sha: Sha(sha_bytes),
        });
    }

    Some(Tree { entries })
}

/// Parse a commit from a raw stored object.
pub fn parse_commit(raw: &[u8]) -> Option<Commit> {
    let content = parse_header(raw, "commit")?;
    let text = std::str::from_utf8(content).ok()?;
    let (headers, message) = text.split_once("\n\n").unwrap_or((text, ""));

    let mut tree = None;
    let mut parent = None;
    let mut author = String::new();
    let mut timestamp = 0i64;

    for line in headers.lines() {
        if let Some(rest) = line.strip_prefix("tree ") {
            tree = Sha::from_hex(rest);
        } else if let Some(rest) = line.strip_prefix("parent ") {
            parent = Sha::from_hex(rest);
        } else if let Some(rest) = line.strip_prefix("author ") {
            // "Name <email> timestamp +0000"
            if let Some(end) = rest.rfind('>') {
                author = rest[..=end].to_string();
                timestamp = rest[end + 1..]
                    .split_whitespace()
                    .next()
                    .and_then(|ts| ts.parse().ok())
                    .unwrap_or(0);
            }
        }
    }

    Some(Commit {
        tree: tree?,
        parent,
        author,
        message: message.trim_end_matches('\n').to_string(),
        timestamp,
    })
}

/// Validate the `"{type} {size}\0"` header and return the content bytes.
fn parse_header<'a>(raw: &'a [u8], expected_type: &str) -> Option<&'a [u8]> {
    let nul = raw.iter().position(|&b| b == 0)?;
    let header = std::str::from_utf8(&raw[..nul]).ok()?;
    let (obj_type, size) = header.split_once(' ')?;
    if obj_type != expected_type {
        return None;
    }
    let size: usize = size.parse().ok()?;
    let content = &raw[nul + 1..];
    (content.len() == size).then_some(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha_hex_roundtrip() {
        let hex = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        let sha: Sha = hex.parse().unwrap();
        assert_eq!(sha.to_hex(), hex);
        assert!("not-a-sha".parse::<Sha>().is_err());
    }

    #[test]
    fn test_blob_id_matches_git() {
        // `printf 'hello\n' | git hash-object --stdin`
        assert_eq!(
            blob_id(b"hello\n").to_hex(),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
        let (sha, _) = hash_blob(&Blob {
            content: b"hello\n".to_vec(),
        });
        assert_eq!(sha, blob_id(b"hello\n"));
    }

    #[test]
    fn test_empty_tree_id() {
        let (sha, _) = hash_tree(&Tree::default());
        assert_eq!(sha.to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }

    #[test]
    fn test_tree_sorts_directories_with_slash() {
        let sha = blob_id(b"x");
        let tree = Tree {
            entries: vec![
                TreeEntry {
                    mode: EntryMode::File,
                    name: "a.md".into(),
                    sha: sha.clone(),
                },
                TreeEntry {
                    mode: EntryMode::Tree,
                    name: "a".into(),
                    sha: sha.clone(),
                },
            ],
        };
        let (_, raw) = hash_tree(&tree);
        let parsed = parse_tree(&raw).unwrap();
        // "a.md" < "a/" because '.' (0x2e) sorts before '/' (0x2f)
        assert_eq!(parsed.entries[0].name, "a.md");
        assert_eq!(parsed.entries[1].mode, EntryMode::Tree);
    }

    #[test]
    fn test_commit_parse_keeps_parent_and_message() {
        let tree = blob_id(b"tree");
        let parent = blob_id(b"parent");
        let commit = Commit {
            tree: tree.clone(),
            parent: Some(parent.clone()),
            author: "Notesync <sync@notesync.dev>".to_string(),
            message: "update 2 files\n\nbody".to_string(),
            timestamp: 1_700_000_000,
        };
        let (_, raw) = hash_commit(&commit);
        let parsed = parse_commit(&raw).unwrap();
        assert_eq!(parsed, commit);
    }

    #[test]
    fn test_parse_rejects_wrong_type() {
        let (_, raw) = hash_blob(&Blob {
            content: b"data".to_vec(),
        });
        assert!(parse_tree(&raw).is_none());
        assert!(parse_commit(&raw).is_none());
    }

    #[test]
    fn test_entry_mode_accepts_padded_tree_mode() {
        assert_eq!(EntryMode::parse("040000"), Some(EntryMode::Tree));
        assert_eq!(EntryMode::parse("100755"), Some(EntryMode::Executable));
        assert_eq!(EntryMode::parse("100600"), None);
    }
}

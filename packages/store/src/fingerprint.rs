//! Content fingerprints.
//!
//! Fingerprints use git's blob addressing (`SHA-1("blob {len}\0" + bytes)`), so
//! a clean LF-terminated markdown file fingerprints to the same id the remote
//! reports for it. Text is normalised first (BOM stripped, CRLF and lone CR
//! folded to LF) so that line-ending churn does not register as an edit.

use crate::models::{Content, FileKind};
use crate::objects::blob_id;

/// Fingerprint `content` of the given kind.
///
/// `remote_id` is only consulted for asset references without a known blob
/// sha: those have no local bytes to hash.
pub fn fingerprint(kind: FileKind, content: &Content, remote_id: Option<&str>) -> String {
    match (kind, content) {
        (_, Content::Text { text }) => blob_id(normalize_text(text).as_bytes()).to_hex(),
        (_, Content::Binary { bytes }) => blob_id(bytes).to_hex(),
        (_, Content::Reference { sha: Some(sha), .. }) => sha.clone(),
        (_, Content::Reference { url, sha: None }) => match remote_id {
            Some(id) => id.to_string(),
            None => blob_id(url.as_bytes()).to_hex(),
        },
    }
}

/// Normalise text for hashing.
pub fn normalize_text(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_fingerprint_matches_git_blob_id() {
        let fp = fingerprint(FileKind::Markdown, &Content::text("hello\n"), None);
        assert_eq!(fp, "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn test_line_endings_do_not_change_fingerprint() {
        let lf = fingerprint(FileKind::Markdown, &Content::text("a\nb\n"), None);
        let crlf = fingerprint(FileKind::Markdown, &Content::text("a\r\nb\r\n"), None);
        let bom = fingerprint(FileKind::Markdown, &Content::text("\u{feff}a\nb\n"), None);
        assert_eq!(lf, crlf);
        assert_eq!(lf, bom);
    }

    #[test]
    fn test_reference_reuses_remote_id() {
        let with_sha = Content::Reference {
            url: "https://example.test/a.png".into(),
            sha: Some("abc".into()),
        };
        assert_eq!(fingerprint(FileKind::AssetReference, &with_sha, Some("zzz")), "abc");

        let without_sha = Content::Reference {
            url: "https://example.test/a.png".into(),
            sha: None,
        };
        assert_eq!(
            fingerprint(FileKind::AssetReference, &without_sha, Some("zzz")),
            "zzz"
        );
        assert_eq!(
            fingerprint(FileKind::AssetReference, &without_sha, None),
            blob_id(b"https://example.test/a.png").to_hex()
        );
    }

    #[test]
    fn test_binary_fingerprint_is_blob_id() {
        let bytes = vec![0u8, 1, 2, 3];
        assert_eq!(
            fingerprint(FileKind::Binary, &Content::binary(bytes.clone()), Some("ignored")),
            blob_id(&bytes).to_hex()
        );
    }
}

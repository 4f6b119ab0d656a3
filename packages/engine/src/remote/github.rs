//! GitHub REST transport.
//!
//! Reads go through the Git data API (`git/ref`, `git/commits`, `git/trees`,
//! `git/blobs`) and the contents API; writes create blobs, a tree, a commit
//! and finally move the branch with a non-forced ref update, which is the
//! only place GitHub enforces fast-forward semantics for us.
//!
//! The token is fetched from the [`TokenProvider`] for every request. Without
//! one, reads are sent anonymously (public repositories) and writes fail with
//! [`SyncError::Unauthenticated`] before anything goes on the wire.
//!
//! ## Empty repositories
//!
//! A repository without commits reads as an empty tree (the ref lookup
//! answers 409), but GitHub's Git data API also refuses `git/blobs` and
//! `git/trees` with 409 until a first commit exists. A first push into such a
//! repository therefore fails with a 409 [`SyncError::Transport`] naming the
//! cause; creating any initial commit (a README from the web UI is enough)
//! unblocks it. [`super::MemoryRemote`] has no such restriction.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{CommitInfo, RemoteContents, RemoteTransport, TreeListing, TreeUpdate};
use crate::auth::TokenProvider;
use crate::error::{Result, SyncError};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "notesync";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaObject,
}

#[derive(Debug, Deserialize)]
struct ShaObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    tree: ShaObject,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    path: String,
    sha: String,
    size: u64,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

pub struct GitHubTransport<P> {
    client: Client,
    api_base: String,
    owner: String,
    repo: String,
    tokens: P,
}

impl<P: TokenProvider> GitHubTransport<P> {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, tokens: P) -> Self {
        Self {
            client: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            tokens,
        }
    }

    /// Point at a GitHub Enterprise (or mock) API root.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn repo_url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, tail
        )
    }

    async fn request(&self, method: Method, url: &str, write: bool) -> Result<RequestBuilder> {
        let token = self.tokens.access_token().await;
        if write && token.is_none() {
            return Err(SyncError::Unauthenticated);
        }
        let mut builder = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> Result<Response> {
        let response = builder.send().await?;
        debug!(status = response.status().as_u16(), path, "github response");
        Ok(response)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, path: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, url, false).await?, path).await?;
        Ok(ensure_success(response, path).await?.json().await?)
    }

    /// GET that maps 404 to `None`.
    async fn get_optional<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        path: &str,
    ) -> Result<Option<T>> {
        let response = self.send(self.request(Method::GET, url, false).await?, path).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(ensure_success(response, path).await?.json().await?))
    }

    async fn post_sha(&self, url: &str, path: &str, body: serde_json::Value) -> Result<String> {
        let builder = self.request(Method::POST, url, true).await?.json(&body);
        let response = self.send(builder, path).await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(empty_repository(path));
        }
        let response = ensure_success(response, path).await?;
        Ok(response.json::<ShaObject>().await?.sha)
    }
}

async fn ensure_success(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(SyncError::Transport {
        status: status.as_u16(),
        path: path.to_string(),
        message,
    })
}

/// GitHub's 409 for object writes into a repository with no commits.
fn empty_repository(path: &str) -> SyncError {
    SyncError::Transport {
        status: StatusCode::CONFLICT.as_u16(),
        path: path.to_string(),
        message: "repository has no commits yet; create an initial commit before the first sync"
            .to_string(),
    }
}

/// Percent-encode each segment of a repository path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Decode the newline-wrapped base64 GitHub returns for file bodies.
fn decode_base64(path: &str, encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| SyncError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })
}

impl<P: TokenProvider> RemoteTransport for GitHubTransport<P> {
    async fn read_ref(&self, branch: &str) -> Result<Option<String>> {
        let url = self.repo_url(&format!("git/ref/heads/{}", encode_path(branch)));
        let response = self
            .send(self.request(Method::GET, &url, false).await?, branch)
            .await?;
        // 409 is GitHub's answer for a repository without any commits.
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::CONFLICT) {
            return Ok(None);
        }
        let found: RefResponse = ensure_success(response, branch).await?.json().await?;
        Ok(Some(found.object.sha))
    }

    async fn read_commit(&self, sha: &str) -> Result<CommitInfo> {
        let commit: CommitResponse = self
            .get_json(&self.repo_url(&format!("git/commits/{sha}")), sha)
            .await?;
        Ok(CommitInfo {
            sha: commit.sha,
            tree: commit.tree.sha,
        })
    }

    async fn list_tree(&self, sha: &str) -> Result<TreeListing> {
        self.get_json(&self.repo_url(&format!("git/trees/{sha}?recursive=1")), sha)
            .await
    }

    async fn read_contents(&self, path: &str, branch: &str) -> Result<Option<RemoteContents>> {
        let url = self.repo_url(&format!(
            "contents/{}?ref={}",
            encode_path(path),
            urlencoding::encode(branch)
        ));
        let Some(found) = self.get_optional::<ContentsResponse>(&url, path).await? else {
            return Ok(None);
        };
        let content = match (found.encoding.as_deref(), found.content.as_deref()) {
            (Some("base64"), Some(body)) if !body.is_empty() || found.size == 0 => {
                Some(decode_base64(path, body)?)
            }
            _ => None,
        };
        Ok(Some(RemoteContents {
            path: found.path,
            sha: found.sha,
            size: found.size,
            content,
            download_url: found.download_url,
        }))
    }

    async fn read_blob(&self, sha: &str) -> Result<Option<Vec<u8>>> {
        let url = self.repo_url(&format!("git/blobs/{sha}"));
        let Some(blob) = self.get_optional::<BlobResponse>(&url, sha).await? else {
            return Ok(None);
        };
        match blob.encoding.as_deref() {
            Some("utf-8") => Ok(Some(blob.content.into_bytes())),
            _ => decode_base64(sha, &blob.content).map(Some),
        }
    }

    async fn download(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .send(self.request(Method::GET, url, false).await?, url)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = ensure_success(response, url).await?.bytes().await?;
        Ok(Some(bytes.to_vec()))
    }

    async fn create_blob(&self, content: &[u8]) -> Result<String> {
        self.post_sha(
            &self.repo_url("git/blobs"),
            "git/blobs",
            json!({ "content": STANDARD.encode(content), "encoding": "base64" }),
        )
        .await
    }

    async fn create_tree(&self, base: Option<&str>, updates: &[TreeUpdate]) -> Result<String> {
        let mut body = json!({ "tree": updates });
        if let Some(base) = base {
            body["base_tree"] = json!(base);
        }
        self.post_sha(&self.repo_url("git/trees"), "git/trees", body)
            .await
    }

    async fn create_commit(&self, message: &str, tree: &str, parents: &[String]) -> Result<String> {
        self.post_sha(
            &self.repo_url("git/commits"),
            "git/commits",
            json!({ "message": message, "tree": tree, "parents": parents }),
        )
        .await
    }

    async fn update_ref(&self, branch: &str, expected: Option<&str>, new: &str) -> Result<()> {
        let builder = match expected {
            Some(_) => {
                let url = self.repo_url(&format!("git/refs/heads/{}", encode_path(branch)));
                self.request(Method::PATCH, &url, true)
                    .await?
                    .json(&json!({ "sha": new, "force": false }))
            }
            None => self
                .request(Method::POST, &self.repo_url("git/refs"), true)
                .await?
                .json(&json!({ "ref": format!("refs/heads/{branch}"), "sha": new })),
        };
        let response = self.send(builder, branch).await?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let actual = self.read_ref(branch).await?;
            return Err(SyncError::Conflict {
                branch: branch.to_string(),
                expected: expected.map(str::to_string),
                actual,
            });
        }
        ensure_success(response, branch).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(encode_path("notes/my note.md"), "notes/my%20note.md");
        assert_eq!(encode_path("a/b#c.md"), "a/b%23c.md");
    }

    #[test]
    fn test_decode_wrapped_base64() {
        let decoded = decode_base64("a.md", "aGVs\nbG8K\n").unwrap();
        assert_eq!(decoded, b"hello\n");
        assert!(matches!(
            decode_base64("a.md", "!!"),
            Err(SyncError::Decode { .. })
        ));
    }

    #[test]
    fn test_repo_url() {
        let transport = GitHubTransport::new("octo", "notes", StaticToken::anonymous())
            .with_api_base("https://ghe.example.test/api/v3/");
        assert_eq!(
            transport.repo_url("git/blobs"),
            "https://ghe.example.test/api/v3/repos/octo/notes/git/blobs"
        );
    }

    #[tokio::test]
    async fn test_writes_require_token() {
        let transport = GitHubTransport::new("octo", "notes", StaticToken::anonymous())
            .with_api_base("http://127.0.0.1:9");
        let err = transport.create_blob(b"x").await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthenticated));
    }

    #[test]
    fn test_empty_repository_error_names_the_cause() {
        match empty_repository("git/blobs") {
            SyncError::Transport {
                status,
                path,
                message,
            } => {
                assert_eq!(status, 409);
                assert_eq!(path, "git/blobs");
                assert!(message.contains("initial commit"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_tree_listing_deserializes() {
        let listing: TreeListing = serde_json::from_str(
            r#"{"sha":"t1","truncated":false,"tree":[
                {"path":"notes","mode":"040000","type":"tree","sha":"t2"},
                {"path":"notes/a.md","mode":"100644","type":"blob","sha":"b1","size":3}
            ]}"#,
        )
        .unwrap();
        assert_eq!(listing.items.len(), 2);
        assert_eq!(listing.items[0].size, None);
        assert_eq!(listing.items[1].size, Some(3));
    }
}

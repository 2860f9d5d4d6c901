//! Repository URL parsing and the GitHub repository loader.
//!
//! The loader fetches the recursive git tree of a single branch via the
//! GitHub REST API, filters blobs against the configured include globs,
//! and fetches matching blob contents at a bounded concurrency. Any error
//! status from GitHub (bad token, unknown repository, unknown branch) is
//! surfaced as [`Error::Github`] with the upstream status and body.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{stream, StreamExt, TryStreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;

use crate::config::GithubConfig;
use crate::error::{Error, Result};
use crate::models::Document;

/// Extract `(owner, repo)` from `https://github.com/<owner>/<repo>[/...]`.
///
/// Only the first two path segments are captured; extra segments after the
/// repo name are ignored. Strings without the exact prefix never match.
pub fn parse_repo_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("https://github.com/")?;
    let mut segments = rest.splitn(3, '/');
    let owner = segments.next().unwrap_or("");
    let repo = segments.next().unwrap_or("");
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

/// True iff both fields are non-empty.
pub fn validate_owner_repo(owner: &str, repo: &str) -> bool {
    !owner.is_empty() && !repo.is_empty()
}

/// An `(owner, repo)` pair. Both fields are non-empty by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn from_url(url: &str) -> Result<Self> {
        match parse_repo_url(url) {
            Some((owner, repo)) if validate_owner_repo(&owner, &repo) => {
                Ok(Self { owner, repo })
            }
            _ => Err(Error::InvalidRepoUrl),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Build the include filter from config globs.
pub fn build_include_set(globs: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        let compiled = Glob::new(glob)
            .map_err(|e| Error::Config(format!("invalid include glob '{}': {}", glob, e)))?;
        builder.add(compiled);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("failed to build include filter: {}", e)))
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

/// Fetches a repository's files through the GitHub REST API.
#[derive(Clone)]
pub struct RepoLoader {
    client: reqwest::Client,
    api_base: String,
    token: String,
    branch: String,
    include: GlobSet,
    concurrency: usize,
}

impl RepoLoader {
    pub fn new(config: &GithubConfig, token: &str) -> Result<Self> {
        let include = build_include_set(&config.include_globs)?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("repochat/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            branch: config.branch.clone(),
            include,
            concurrency: config.concurrent_requests.max(1),
        })
    }

    /// Fetch all matching files on the configured branch.
    ///
    /// Documents are returned sorted by path. Invoked once per session;
    /// callers cache the result.
    pub async fn load(&self, repo: &RepoRef) -> Result<Vec<Document>> {
        let tree = self.fetch_tree(repo).await?;
        if tree.truncated {
            tracing::warn!(repo = %repo, "tree listing truncated by GitHub; some files will be missing");
        }

        let blobs: Vec<TreeEntry> = tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob" && self.include.is_match(&entry.path))
            .collect();

        tracing::info!(repo = %repo, branch = %self.branch, files = blobs.len(), "fetching repository files");

        let mut documents: Vec<Document> = stream::iter(blobs)
            .map(|entry| self.fetch_document(repo, entry))
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        documents.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(documents)
    }

    async fn fetch_tree(&self, repo: &RepoRef) -> Result<TreeResponse> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_base, repo.owner, repo.repo, self.branch
        );
        let response = check_github(self.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn fetch_document(&self, repo: &RepoRef, entry: TreeEntry) -> Result<Document> {
        let url = format!(
            "{}/repos/{}/{}/git/blobs/{}",
            self.api_base, repo.owner, repo.repo, entry.sha
        );
        let response = check_github(self.get(&url).send().await?).await?;
        let blob: BlobResponse = response.json().await?;
        let content = decode_blob(&entry.path, &blob)?;

        Ok(Document {
            path: entry.path,
            sha: entry.sha,
            size: entry.size.unwrap_or(0),
            content,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
    }
}

async fn check_github(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::Github {
        status: status.as_u16(),
        message: truncate_message(&message),
    })
}

/// Keep upstream error bodies short enough for a UI message.
fn truncate_message(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= 300 {
        return trimmed.to_string();
    }
    trimmed.char_indices().take_while(|(i, _)| *i < 300).map(|(_, c)| c).collect()
}

/// GitHub base64-encodes blob content with embedded line breaks; strip all
/// ASCII whitespace before decoding. Non-UTF-8 content is decoded lossily.
fn decode_blob(path: &str, blob: &BlobResponse) -> Result<String> {
    if blob.encoding == "base64" {
        let compact: String = blob
            .content
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let bytes = BASE64
            .decode(compact.as_bytes())
            .map_err(|source| Error::BlobDecode {
                path: path.to_string(),
                source,
            })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        Ok(blob.content.clone())
    }
}

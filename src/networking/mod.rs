use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use crate::env;
use crate::loader::AssetHost;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_DOWNLOAD_BYTES: usize = 32 * 1024 * 1024;

/// `owner/repo` pair extracted from a GitHub repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn parse(source_url: &str) -> Result<Self, String> {
        let path = source_url
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("www.")
            .trim_start_matches("github.com/");
        let mut parts = path.split('/').filter(|part| !part.is_empty());
        match (parts.next(), parts.next()) {
            (Some(owner), Some(repo)) => Ok(Self {
                owner: owner.to_owned(),
                repo: repo.trim_end_matches(".git").to_owned(),
            }),
            _ => Err(format!("invalid repository url: {source_url}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseInfo {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
}

/// Where release metadata and file contents come from.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    async fn latest_release(&self, repo: &RepoRef) -> Result<ReleaseInfo, String>;

    async fn latest_commit(&self, repo: &RepoRef, branch: &str) -> Result<CommitInfo, String>;

    async fn download(&self, url: &str) -> Result<Vec<u8>, String>;
}

#[derive(Clone)]
pub struct NetworkClient {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl NetworkClient {
    pub fn new() -> Self {
        Self::with_api_base(env::github_api_base(), env::github_token())
    }

    pub fn with_api_base(api_base: impl Into<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(env::USER_AGENT)
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self {
            client,
            api_base: api_base.into(),
            token,
        }
    }

    fn api_get(&self, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.api_base, path.trim_start_matches('/'));
        let request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl UpstreamSource for NetworkClient {
    async fn latest_release(&self, repo: &RepoRef) -> Result<ReleaseInfo, String> {
        let path = format!("repos/{}/{}/releases/latest", repo.owner, repo.repo);
        let release: ReleaseInfo = self
            .api_get(&path)
            .send()
            .await
            .map_err(|e| format!("release request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("release request bad status: {e}"))?
            .json()
            .await
            .map_err(|e| format!("release parse error: {e}"))?;
        if release.tag_name.trim().is_empty() {
            return Err("release has an empty tag_name".into());
        }
        Ok(release)
    }

    async fn latest_commit(&self, repo: &RepoRef, branch: &str) -> Result<CommitInfo, String> {
        let path = format!("repos/{}/{}/commits/{branch}", repo.owner, repo.repo);
        let commit: CommitInfo = self
            .api_get(&path)
            .send()
            .await
            .map_err(|e| format!("commit request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("commit request bad status: {e}"))?
            .json()
            .await
            .map_err(|e| format!("commit parse error: {e}"))?;
        if commit.sha.trim().is_empty() {
            return Err("commit has an empty sha".into());
        }
        Ok(commit)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("download request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("download status error: {e}"))?;

        let hint = response.content_length().unwrap_or(0).min(MAX_DOWNLOAD_BYTES as u64);
        let mut body = Vec::with_capacity(hint as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("stream error: {e}"))?;
            if body.len() + chunk.len() > MAX_DOWNLOAD_BYTES {
                return Err(format!(
                    "download of {url} exceeds {MAX_DOWNLOAD_BYTES} bytes"
                ));
            }
            body.extend_from_slice(&chunk);
        }
        debug!("download: {} bytes from {url}", body.len());
        Ok(body)
    }
}

#[async_trait]
impl AssetHost for NetworkClient {
    async fn fetch_text(&self, url: &str) -> Result<Option<String>, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("GET {url} failed: {e}"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| format!("GET {url} bad status: {e}"))?;
        response
            .text()
            .await
            .map(Some)
            .map_err(|e| format!("GET {url} body error: {e}"))
    }

    async fn probe(&self, url: &str) -> Result<bool, String> {
        let resp = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| format!("HEAD {url} failed: {e}"))?;
        Ok(resp.status().is_success())
    }

    async fn load(&self, url: &str) -> Result<(), String> {
        let body = self.download(url).await?;
        if body.is_empty() {
            return Err(format!("{url} returned an empty script"));
        }
        Ok(())
    }
}

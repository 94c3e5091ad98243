//! GitHub releases client
//!
//! Implements the ReleaseHost trait against the GitHub REST API (or a
//! GitHub Enterprise instance). Requests are blocking `ureq` calls run on
//! the blocking pool and raced against the cycle's cancellation token.

use crate::config::schema::RepositoryConfig;
use crate::error::{PullshipError, PullshipResult};
use crate::release::host::{AssetDownload, ReleaseHost};
use crate::release::Release;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use ureq::http::Response;
use ureq::{Agent, Body};
use url::Url;

const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_UPLOAD_URL: &str = "https://uploads.github.com";
const USER_AGENT: &str = concat!("pullship/", env!("CARGO_PKG_VERSION"));

/// Upper bound on a single artifact download
const MAX_ARTIFACT_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// GitHub release host
#[derive(Clone)]
pub struct GithubReleases {
    api: Agent,
    assets: Agent,
    api_url: String,
    upload_url: String,
    token: Option<String>,
}

impl GithubReleases {
    /// Create a client from repository config and the environment
    ///
    /// Endpoints resolve as config override, then `GITHUB_API_URL` /
    /// `GITHUB_UPLOAD_URL`, then the public GitHub defaults. The token is
    /// read from `GITHUB_TOKEN` when present.
    pub fn new(config: &RepositoryConfig, timeout: Duration) -> Self {
        let api_url = config
            .api_url
            .clone()
            .or_else(|| std::env::var("GITHUB_API_URL").ok())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let upload_url = config
            .upload_url
            .clone()
            .or_else(|| std::env::var("GITHUB_UPLOAD_URL").ok())
            .unwrap_or_else(|| DEFAULT_UPLOAD_URL.to_string());
        let token = std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        Self::with_endpoints(api_url, upload_url, token, timeout)
    }

    /// Create a client against explicit endpoints
    pub fn with_endpoints(
        api_url: impl Into<String>,
        upload_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Self {
        let api: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        // The asset endpoint answers with a redirect we follow ourselves
        let assets: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .max_redirects(0)
            .build()
            .into();

        Self {
            api,
            assets,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            upload_url: upload_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn repo_url(&self, owner: &str, name: &str) -> String {
        format!("{}/repos/{}/{}", self.api_url, owner, name)
    }

    fn authorization(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t))
    }
}

/// Run a blocking request on the blocking pool unless `cancel` fires first
async fn blocking<T, F>(cancel: &CancellationToken, what: String, f: F) -> PullshipResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> PullshipResult<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PullshipError::Cancelled(what)),
        joined = task => joined
            .map_err(|e| PullshipError::Internal(format!("{} panicked: {}", what, e)))?,
    }
}

fn ensure_success(resp: &mut Response<Body>, url: &str) -> PullshipResult<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }

    let body = resp.body_mut().read_to_string().unwrap_or_default();
    let detail = body.lines().next().unwrap_or("").chars().take(200).collect::<String>();
    Err(PullshipError::remote(
        url,
        format!("HTTP {} {}", status.as_u16(), detail).trim_end(),
    ))
}

fn get_json<T: DeserializeOwned>(agent: &Agent, url: &str, auth: Option<&str>) -> PullshipResult<T> {
    debug!("GET {}", url);
    let mut req = agent
        .get(url)
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", USER_AGENT);
    if let Some(auth) = auth {
        req = req.header("Authorization", auth);
    }

    let mut resp = req.call().map_err(|e| PullshipError::remote(url, e))?;
    ensure_success(&mut resp, url)?;

    let body = resp
        .body_mut()
        .read_to_string()
        .map_err(|e| PullshipError::remote(url, e))?;
    serde_json::from_str(&body)
        .map_err(|e| PullshipError::remote(url, format!("malformed response: {}", e)))
}

/// Stream the response body into `dest`, returning the byte count
fn save_body(resp: &mut Response<Body>, url: &str, dest: &Path) -> PullshipResult<u64> {
    let mut file = File::create(dest)
        .map_err(|e| PullshipError::io(format!("creating {}", dest.display()), e))?;
    let mut body = resp
        .body_mut()
        .with_config()
        .limit(MAX_ARTIFACT_BYTES)
        .reader();

    let size = std::io::copy(&mut body, &mut file).map_err(|e| PullshipError::remote(url, e))?;
    file.sync_all()
        .map_err(|e| PullshipError::io(format!("flushing {}", dest.display()), e))?;
    Ok(size)
}

#[async_trait]
impl ReleaseHost for GithubReleases {
    async fn list_releases(
        &self,
        owner: &str,
        name: &str,
        page: u32,
        cancel: &CancellationToken,
    ) -> PullshipResult<Vec<Release>> {
        let url = format!("{}/releases?page={}", self.repo_url(owner, name), page);
        let agent = self.api.clone();
        let auth = self.authorization();

        blocking(cancel, format!("listing releases of {}/{}", owner, name), move || {
            get_json(&agent, &url, auth.as_deref())
        })
        .await
    }

    async fn latest_release(
        &self,
        owner: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> PullshipResult<Release> {
        let url = format!("{}/releases/latest", self.repo_url(owner, name));
        let agent = self.api.clone();
        let auth = self.authorization();
        let repository = format!("{}/{}", owner, name);

        blocking(cancel, format!("fetching latest release of {}", repository), move || {
            match get_json(&agent, &url, auth.as_deref()) {
                // GitHub answers 404 when the repository has no final release
                Err(PullshipError::RemoteApi { reason, .. }) if reason.starts_with("HTTP 404") => {
                    Err(PullshipError::NoEligibleRelease { repository })
                }
                other => other,
            }
        })
        .await
    }

    async fn download_asset(
        &self,
        owner: &str,
        name: &str,
        asset_id: u64,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PullshipResult<AssetDownload> {
        let url = format!("{}/releases/assets/{}", self.repo_url(owner, name), asset_id);
        let agent = self.assets.clone();
        let auth = self.authorization();
        let dest = dest.to_path_buf();

        blocking(cancel, format!("downloading asset {}", asset_id), move || {
            debug!("GET {}", url);
            let mut req = agent
                .get(&url)
                .header("Accept", "application/octet-stream")
                .header("User-Agent", USER_AGENT);
            if let Some(auth) = auth.as_deref() {
                req = req.header("Authorization", auth);
            }

            let mut resp = req.call().map_err(|e| PullshipError::remote(&url, e))?;
            if resp.status().is_redirection() {
                let location = resp
                    .headers()
                    .get("location")
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| PullshipError::remote(&url, "redirect without location"))?;
                return Ok(AssetDownload::Redirect(location.to_string()));
            }

            ensure_success(&mut resp, &url)?;
            save_body(&mut resp, &url, &dest).map(AssetDownload::Saved)
        })
        .await
    }

    async fn fetch_redirect(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PullshipResult<u64> {
        let url = url.to_string();
        let agent = self.api.clone();
        let dest = dest.to_path_buf();

        // Credentials stay with the API host; the redirect target is pre-signed
        blocking(cancel, "following asset redirect".to_string(), move || {
            debug!("GET {}", url);
            let mut resp = agent
                .get(&url)
                .header("User-Agent", USER_AGENT)
                .call()
                .map_err(|e| PullshipError::remote(&url, e))?;
            ensure_success(&mut resp, &url)?;
            save_body(&mut resp, &url, &dest)
        })
        .await
    }

    async fn upload_asset(
        &self,
        owner: &str,
        name: &str,
        release_id: u64,
        filename: &str,
        data: Vec<u8>,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> PullshipResult<()> {
        let url = format!(
            "{}/repos/{}/{}/releases/{}/assets",
            self.upload_url, owner, name, release_id
        );
        let agent = self.api.clone();
        let auth = self.authorization();
        let filename = filename.to_string();
        let content_type = content_type.to_string();

        blocking(cancel, format!("uploading {}", filename), move || {
            debug!("POST {} ({} bytes)", url, data.len());
            let mut req = agent
                .post(&url)
                .query("name", &filename)
                .header("Accept", "application/vnd.github+json")
                .header("Content-Type", &content_type)
                .header("User-Agent", USER_AGENT);
            if let Some(auth) = auth.as_deref() {
                req = req.header("Authorization", auth);
            }

            let mut resp = req
                .send(&data[..])
                .map_err(|e| PullshipError::remote(&url, e))?;
            ensure_success(&mut resp, &url)
        })
        .await
    }

    fn web_host(&self) -> String {
        match Url::parse(&self.api_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
        {
            Some(host) if host != "api.github.com" => host,
            _ => "github.com".to_string(),
        }
    }
}

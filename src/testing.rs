//! In-memory collaborators for unit tests

use crate::config::schema::RepositoryConfig;
use crate::error::{PullshipError, PullshipResult};
use crate::notify::{Field, Notifier};
use crate::release::{Asset, AssetDownload, Release, ReleaseHost};
use crate::server::{ServerHandle, ServerStarter};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// In-memory release host counting every remote call
#[derive(Default)]
pub(crate) struct FakeHost {
    pub releases: Mutex<Vec<Release>>,
    pub latest: Mutex<Option<Release>>,
    pub payload: Mutex<Vec<u8>>,
    pub redirect: Mutex<Option<String>>,
    pub uploads: Mutex<Vec<(u64, String, String)>>,
    pub fail_upload: bool,
    pub fail_download: bool,
    pub calls: AtomicUsize,
    pub downloads: AtomicUsize,
}

impl FakeHost {
    pub fn with_release(release: Release, payload: &[u8]) -> Self {
        let host = Self::default();
        *host.releases.lock().unwrap() = vec![release];
        *host.payload.lock().unwrap() = payload.to_vec();
        host
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Write the payload to `dest`; with `fail_download`, only half of it
    fn save(&self, dest: &Path) -> PullshipResult<u64> {
        let payload = self.payload.lock().unwrap().clone();
        if self.fail_download {
            std::fs::write(dest, &payload[..payload.len() / 2]).unwrap();
            return Err(PullshipError::remote("download", "connection reset"));
        }
        std::fs::write(dest, &payload).unwrap();
        Ok(payload.len() as u64)
    }
}

#[async_trait]
impl ReleaseHost for FakeHost {
    async fn list_releases(
        &self,
        _owner: &str,
        _name: &str,
        _page: u32,
        _cancel: &CancellationToken,
    ) -> PullshipResult<Vec<Release>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.releases.lock().unwrap().clone())
    }

    async fn latest_release(
        &self,
        owner: &str,
        name: &str,
        _cancel: &CancellationToken,
    ) -> PullshipResult<Release> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latest) = self.latest.lock().unwrap().clone() {
            return Ok(latest);
        }
        self.releases
            .lock()
            .unwrap()
            .iter()
            .find(|r| !r.draft && !r.prerelease)
            .cloned()
            .ok_or_else(|| PullshipError::NoEligibleRelease {
                repository: format!("{}/{}", owner, name),
            })
    }

    async fn download_asset(
        &self,
        _owner: &str,
        _name: &str,
        _asset_id: u64,
        dest: &Path,
        _cancel: &CancellationToken,
    ) -> PullshipResult<AssetDownload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.downloads.fetch_add(1, Ordering::SeqCst);
        match self.redirect.lock().unwrap().clone() {
            Some(url) => Ok(AssetDownload::Redirect(url)),
            None => self.save(dest).map(AssetDownload::Saved),
        }
    }

    async fn fetch_redirect(
        &self,
        _url: &str,
        dest: &Path,
        _cancel: &CancellationToken,
    ) -> PullshipResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.save(dest)
    }

    async fn upload_asset(
        &self,
        _owner: &str,
        _name: &str,
        release_id: u64,
        filename: &str,
        data: Vec<u8>,
        _content_type: &str,
        _cancel: &CancellationToken,
    ) -> PullshipResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upload {
            return Err(PullshipError::remote("upload", "HTTP 403"));
        }
        self.uploads.lock().unwrap().push((
            release_id,
            filename.to_string(),
            String::from_utf8_lossy(&data).into_owned(),
        ));
        Ok(())
    }

    fn web_host(&self) -> String {
        "github.com".to_string()
    }
}

pub(crate) fn release(id: u64, tag: &str, artifact: &str, updated: i64) -> Release {
    Release {
        id,
        tag_name: tag.to_string(),
        html_url: format!("https://github.com/acme/app/releases/tag/{}", tag),
        draft: false,
        prerelease: false,
        assets: vec![Asset {
            id: id * 10,
            name: artifact.to_string(),
            browser_download_url: format!(
                "https://github.com/acme/app/releases/download/{}/{}",
                tag, artifact
            ),
            updated_at: Utc.timestamp_opt(updated, 0).unwrap(),
        }],
    }
}

pub(crate) fn repo_config(artifact: &str) -> RepositoryConfig {
    RepositoryConfig {
        owner: "acme".to_string(),
        name: "app".to_string(),
        artifact: artifact.to_string(),
        disable_record_shipping: true,
        ..Default::default()
    }
}

/// Starter counting lifecycle calls instead of spawning processes
#[derive(Default)]
pub(crate) struct FakeStarter {
    pub roots: Mutex<Vec<PathBuf>>,
    fail_start: bool,
    fail_restart: bool,
    starts: AtomicUsize,
    restarts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeStarter {
    /// Starter whose spawns always fail
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Default::default()
        }
    }

    /// Starter that starts fine but cannot deliver restart signals
    pub fn failing_restart() -> Self {
        Self {
            fail_restart: true,
            ..Default::default()
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerStarter for FakeStarter {
    async fn start_managed(&self, root: &Path) -> PullshipResult<ServerHandle> {
        if self.fail_start {
            return Err(PullshipError::ServerLifecycle("spawn refused".to_string()));
        }
        self.roots.lock().unwrap().push(root.to_path_buf());
        let n = self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(ServerHandle {
            pid: 4000 + n as u32,
            program: "fake-server".to_string(),
        })
    }

    async fn request_graceful_restart(&self, _handle: &ServerHandle) -> PullshipResult<()> {
        if self.fail_restart {
            return Err(PullshipError::ServerLifecycle("no such process".to_string()));
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _handle: &ServerHandle) -> PullshipResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Notifier remembering every message
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        message: &str,
        _fields: &[Field],
        _cancel: &CancellationToken,
    ) -> PullshipResult<()> {
        self.messages.lock().unwrap().push(message.to_string());
        if self.fail {
            return Err(PullshipError::Notify("channel_not_found".to_string()));
        }
        Ok(())
    }
}

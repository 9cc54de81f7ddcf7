//! Artifact fetchers: read a device config at a config-repo revision.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use netops_core::SourceUrl;
use netops_git::GitRepo;
use tracing::debug;

use crate::error::{DeviceError, DeviceResult};

#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Bytes of the repo-relative `path` at `revision`.
    async fn fetch(&self, revision: &str, path: &str) -> DeviceResult<Vec<u8>>;
}

/// Reads blobs straight out of a local clone of the config repository.
pub struct GitArtifactFetcher {
    repo: Arc<Mutex<GitRepo>>,
}

impl GitArtifactFetcher {
    pub fn new(repo: Arc<Mutex<GitRepo>>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl ArtifactFetcher for GitArtifactFetcher {
    async fn fetch(&self, revision: &str, path: &str) -> DeviceResult<Vec<u8>> {
        let repo = self.repo.clone();
        let (rev, rel) = (revision.to_string(), path.to_string());
        let what = format!("{path}@{revision}");
        tokio::task::spawn_blocking(move || {
            let repo = repo.lock().unwrap_or_else(|p| p.into_inner());
            repo.read_file_at(&rev, &rel)
        })
        .await?
        .map_err(|e| DeviceError::Fetch {
            what,
            message: e.to_string(),
        })
    }
}

/// Downloads `<base>/<revision>/<path>` from an artifact server. The host
/// can be redirected with `SOURCE_HOST`.
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
    source: SourceUrl,
}

impl HttpArtifactFetcher {
    pub fn new(source: SourceUrl, timeout: Duration) -> DeviceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeviceError::Fetch {
                what: "http client".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            source: source.with_env_override(),
        })
    }

    pub fn url(&self, revision: &str, path: &str) -> String {
        self.source.artifact_url(revision, path)
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, revision: &str, path: &str) -> DeviceResult<Vec<u8>> {
        let url = self.url(revision, path);
        debug!(%url, "fetching artifact");
        let fetch_error = |e: reqwest::Error| DeviceError::Fetch {
            what: url.clone(),
            message: e.to_string(),
        };
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(fetch_error)?
            .error_for_status()
            .map_err(fetch_error)?;
        let bytes = response.bytes().await.map_err(fetch_error)?;
        Ok(bytes.to_vec())
    }
}

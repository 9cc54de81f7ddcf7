//! The gNMI-style northbound service.
//!
//! `mu` serialises requests: Get takes it shared, Set exclusive, both
//! without waiting. `smu` guards the config worktree itself and is also
//! taken by the config sync loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, TryLockError};

use netops_core::{SERVICES_DIR, ServiceMetadata, TlsConfig, epoch_nanos};
use netops_git::GitRepo;
use netops_proto::gnmi_server::{Gnmi, GnmiServer};
use netops_proto::{
    CapabilityRequest, CapabilityResponse, Encoding, GNMI_VERSION, GetRequest, GetResponse,
    ModelData, SetRequest, SetResponse,
};
use tokio::sync::{RwLock, watch};
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::error::{NorthboundError, NorthboundResult};
use crate::get::{self, Source};
use crate::set::{self, SetOptions};
use crate::tls::server_tls_config;

#[derive(Clone)]
pub struct NorthboundServer {
    mu: Arc<RwLock<()>>,
    config: Arc<Mutex<GitRepo>>,
    status: Arc<Mutex<GitRepo>>,
    config_root: PathBuf,
    status_root: PathBuf,
    opts: Arc<SetOptions>,
}

impl NorthboundServer {
    pub fn new(config: GitRepo, status: GitRepo, opts: SetOptions) -> Self {
        Self {
            mu: Arc::new(RwLock::new(())),
            config_root: config.root().to_path_buf(),
            status_root: status.root().to_path_buf(),
            config: Arc::new(Mutex::new(config)),
            status: Arc::new(Mutex::new(status)),
            opts: Arc::new(opts),
        }
    }

    /// The config worktree lock (`smu`), shared with the config sync loop.
    pub fn config_repo(&self) -> Arc<Mutex<GitRepo>> {
        self.config.clone()
    }

    pub fn status_repo(&self) -> Arc<Mutex<GitRepo>> {
        self.status.clone()
    }

    /// The request lock (`mu`): Get holds it shared, Set exclusive.
    pub fn request_lock(&self) -> Arc<RwLock<()>> {
        self.mu.clone()
    }

    pub fn into_service(self) -> GnmiServer<Self> {
        GnmiServer::new(self)
    }

    /// Serve until `shutdown` fires.
    pub async fn serve(
        self,
        addr: SocketAddr,
        tls: &TlsConfig,
        mut shutdown: watch::Receiver<bool>,
    ) -> NorthboundResult<()> {
        let mut builder = tonic::transport::Server::builder();
        if let Some(config) = server_tls_config(&tls.mode()?)? {
            builder = builder.tls_config(config)?;
        }
        info!(%addr, "northbound server listening");
        builder
            .add_service(self.into_service())
            .serve_with_shutdown(addr, async move {
                let _ = shutdown.changed().await;
            })
            .await?;
        info!("northbound server stopped");
        Ok(())
    }

    /// Service models from `services/*/metadata.json`, sorted by kind.
    pub fn models(&self) -> NorthboundResult<Vec<ModelData>> {
        let dir = self.config_root.join(SERVICES_DIR);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(NorthboundError::io(dir.display().to_string(), e)),
        };
        let mut models = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path().join(netops_core::METADATA_FILE);
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            let kind = entry.file_name().to_string_lossy().into_owned();
            match serde_json::from_slice::<ServiceMetadata>(&bytes) {
                Ok(meta) => models.push(ModelData {
                    name: if meta.name.is_empty() { kind } else { meta.name },
                    organization: meta.organization,
                    version: meta.version,
                }),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable metadata"),
            }
        }
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }
}

/// HEAD author time of `repo` in nanoseconds, or now.
fn head_time(repo: &Mutex<GitRepo>) -> i64 {
    let repo = repo.lock().unwrap_or_else(|p| p.into_inner());
    match repo.head() {
        Ok(Some(head)) => head.time_nanos(),
        _ => epoch_nanos(),
    }
}

#[tonic::async_trait]
impl Gnmi for NorthboundServer {
    async fn capabilities(
        &self,
        _request: Request<CapabilityRequest>,
    ) -> Result<Response<CapabilityResponse>, Status> {
        let models = self.models()?;
        Ok(Response::new(CapabilityResponse {
            supported_models: models,
            supported_encodings: vec![Encoding::Json as i32],
            gnmi_version: GNMI_VERSION.to_string(),
        }))
    }

    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        let permit = self
            .mu
            .clone()
            .try_read_owned()
            .map_err(|_| NorthboundError::Locked)?;
        let req = request.into_inner();
        let server = self.clone();

        let notifications = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut notifications = Vec::with_capacity(req.path.len());
            for path in &req.path {
                let (source, update) =
                    get::read(&server.config_root, &server.status_root, req.prefix.as_ref(), path)?;
                let timestamp = match source {
                    Source::Config => head_time(&server.config),
                    Source::Status => head_time(&server.status),
                };
                notifications.push(get::notification(timestamp, req.prefix.clone(), vec![update]));
            }
            Ok::<_, NorthboundError>(notifications)
        })
        .await
        .map_err(NorthboundError::from)??;

        Ok(Response::new(GetResponse {
            notification: notifications,
        }))
    }

    async fn set(&self, request: Request<SetRequest>) -> Result<Response<SetResponse>, Status> {
        let permit = self
            .mu
            .clone()
            .try_write_owned()
            .map_err(|_| NorthboundError::Locked)?;
        let req = request.into_inner();
        let config = self.config.clone();
        let opts = self.opts.clone();

        let response = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let repo = match config.try_lock() {
                Ok(repo) => repo,
                Err(TryLockError::WouldBlock) => return Err(NorthboundError::Locked),
                Err(TryLockError::Poisoned(p)) => p.into_inner(),
            };
            set::run(&repo, &opts, &req)
        })
        .await
        .map_err(NorthboundError::from)??;

        info!(results = response.response.len(), "set applied");
        Ok(Response::new(response))
    }
}

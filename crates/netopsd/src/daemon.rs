//! Subsystem startup. Each `start_*` spawns its tasks and returns their
//! handles; all of them stop when `shutdown` fires.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use netops_aggregator::{Aggregator, AggregatorConfig};
use netops_core::{Inventory, SourceUrl};
use netops_device::{
    ArtifactFetcher, DeviceReconciler, DriverFactory, GitArtifactFetcher, GnmiDriverFactory,
    HttpArtifactFetcher, TaskWorkloadManager,
};
use netops_git::GitRepo;
use netops_northbound::{NorthboundServer, RepoSync};
use netops_rollout::{RolloutReconciler, RolloutWatcher};
use netops_state::{Controller, StateStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::args::{AggregatorArgs, ControllerArgs, NorthboundArgs, RepoArgs};
use crate::inventory;

pub type Handles = Vec<JoinHandle<()>>;

// ── Northbound ─────────────────────────────────────────────────

/// Start the gNMI server and the config sync loop. The status sync loop
/// only runs when `sync_status` is set; in standalone mode the status
/// worktree belongs to the aggregator. Returns the config repository
/// so other subsystems can share its lock.
pub fn start_northbound(
    repos: &RepoArgs,
    args: &NorthboundArgs,
    sync_status: bool,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<(Arc<Mutex<GitRepo>>, Handles)> {
    let tls = args.tls();
    tls.mode()?;

    let server = NorthboundServer::new(
        repos.open_config()?,
        repos.open_status()?,
        args.set_options(&repos.trunk),
    );
    let config_repo = server.config_repo();

    let mut handles = vec![tokio::spawn(
        RepoSync::new("config", server.config_repo(), &repos.trunk, repos.sync_period())
            .run(shutdown.clone()),
    )];
    if sync_status {
        handles.push(tokio::spawn(
            RepoSync::new("status", server.status_repo(), &repos.trunk, repos.sync_period())
                .run(shutdown.clone()),
        ));
    }

    let addr = args.grpc_addr;
    let stop = shutdown.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = server.serve(addr, &tls, stop).await {
            error!(error = %e, "northbound server failed");
        }
    }));
    Ok((config_repo, handles))
}

// ── Aggregator ─────────────────────────────────────────────────

pub fn start_aggregator(
    repos: &RepoArgs,
    args: &AggregatorArgs,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<Handles> {
    let aggregator = Aggregator::new(
        repos.open_status()?,
        AggregatorConfig {
            trunk: repos.trunk.clone(),
            update_check_duration: Duration::from_secs(args.commit_period),
            ..Default::default()
        },
    );
    let addr = args.aggregator_addr;
    let stop = shutdown.clone();
    Ok(vec![tokio::spawn(async move {
        if let Err(e) = aggregator.serve(addr, stop).await {
            error!(error = %e, "aggregator failed");
        }
    })])
}

// ── Controllers ────────────────────────────────────────────────

/// Start the object store, rollout watchers, both reconcilers and the
/// admin API.
pub async fn start_controllers(
    config_repo: Arc<Mutex<GitRepo>>,
    repos: &RepoArgs,
    args: &ControllerArgs,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<Handles> {
    std::fs::create_dir_all(&args.data_dir)?;
    let db_path = args.data_dir.join("netops.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "object store opened");

    let inventory = Inventory::from_file(&args.inventory)?;
    let changed = inventory::sync_devices(&store, &inventory)?;
    info!(devices = inventory.devices.len(), changed, "inventory loaded");

    let timeout = Duration::from_secs(args.device_timeout);
    let fetcher: Arc<dyn ArtifactFetcher> = match &args.artifact_source {
        Some(url) => {
            let fetcher = HttpArtifactFetcher::new(SourceUrl::parse(url)?, timeout)?;
            info!(source = %url, "fetching artifacts over HTTP");
            Arc::new(fetcher)
        }
        None => Arc::new(GitArtifactFetcher::new(config_repo.clone())),
    };
    let drivers: Arc<dyn DriverFactory> = Arc::new(GnmiDriverFactory { timeout });
    let workloads = Arc::new(TaskWorkloadManager::new(
        drivers.clone(),
        args.aggregator_url.clone(),
        Duration::from_secs(args.poll_interval),
        shutdown.clone(),
    ));

    let mut handles = Handles::new();

    for (rollout, devices) in inventory::rollouts(&inventory) {
        let watcher = RolloutWatcher::new(
            config_repo.clone(),
            store.clone(),
            rollout,
            repos.trunk.clone(),
            repos.sync_period(),
        )
        .with_devices(devices);
        handles.push(tokio::spawn(watcher.run(shutdown.clone())));
    }

    let rollouts = Controller::new(Arc::new(RolloutReconciler::new(store.clone())));
    let keys_store = store.clone();
    handles.push(rollouts.watch(store.subscribe(), shutdown.clone(), move |event| {
        RolloutReconciler::keys_for(&keys_store, event)
    }));
    for rollout in store.list_rollouts()? {
        rollouts.queue().add(rollout.key());
    }
    handles.push(tokio::spawn(rollouts.run(shutdown.clone())));

    let reconciler = DeviceReconciler::new(store.clone(), fetcher, drivers, workloads)
        .with_set_timeout(timeout);
    let devices = Controller::new(Arc::new(reconciler)).with_workers(args.workers);
    let keys_store = store.clone();
    handles.push(devices.watch(store.subscribe(), shutdown.clone(), move |event| {
        DeviceReconciler::keys_for(&keys_store, event)
    }));
    for device in store.list_devices()? {
        devices.queue().add(device.key());
    }
    handles.push(tokio::spawn(devices.run(shutdown.clone())));

    let router = netops_api::build_router(store);
    let listener = tokio::net::TcpListener::bind(args.api_addr).await?;
    info!(addr = %args.api_addr, "admin API listening");
    let mut stop = shutdown.clone();
    handles.push(tokio::spawn(async move {
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = stop.changed().await;
        });
        if let Err(e) = server.await {
            error!(error = %e, "admin API failed");
        }
    }));

    Ok(handles)
}

/// Config repository and sync loop for a controller running without the
/// northbound server in the same process.
pub fn open_config_with_sync(
    repos: &RepoArgs,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<(Arc<Mutex<GitRepo>>, JoinHandle<()>)> {
    let repo = Arc::new(Mutex::new(repos.open_config()?));
    let sync = RepoSync::new("config", repo.clone(), &repos.trunk, repos.sync_period());
    Ok((repo, tokio::spawn(sync.run(shutdown.clone()))))
}

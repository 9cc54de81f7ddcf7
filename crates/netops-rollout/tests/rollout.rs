//! Rollout reconciler and watcher against an in-memory object store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use netops_core::checksum;
use netops_git::{GitRepo, RepoOptions};
use netops_rollout::{RolloutReconciler, RolloutWatcher};
use netops_state::{
    Action, Controller, DeviceConfig, DeviceConfigMap, DeviceRollout, DeviceStatus, ObjectKey,
    Reconciler, RolloutPhase, RolloutStatus, StateStore,
};
use tokio::sync::watch;

fn key() -> ObjectKey {
    ObjectKey::new("net", "fabric")
}

fn config_map(checksum: &str, rev: &str) -> DeviceConfigMap {
    ["d1", "d2"]
        .iter()
        .map(|d| (d.to_string(), DeviceConfig::new(checksum, rev)))
        .collect()
}

fn set_spec(store: &StateStore, map: DeviceConfigMap) {
    match store.get_rollout(&key()).unwrap() {
        Some(_) => {
            store
                .update_rollout(&key(), |r| r.spec.device_config_map = map)
                .unwrap();
        }
        None => {
            let mut rollout = DeviceRollout::new("net", "fabric");
            rollout.spec.device_config_map = map;
            store.put_rollout(&rollout).unwrap();
        }
    }
}

fn mark(store: &StateStore, device: &str, state: DeviceStatus) {
    store
        .update_rollout(&key(), |r| {
            r.status.device_status_map.insert(device.to_string(), state);
        })
        .unwrap();
}

/// Reconcile until nothing changes.
async fn settle(reconciler: &RolloutReconciler, store: &StateStore) -> DeviceRollout {
    for _ in 0..10 {
        let before = store.get_rollout(&key()).unwrap();
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Action::Done);
        let after = store.get_rollout(&key()).unwrap();
        if before == after {
            break;
        }
    }
    store.get_rollout(&key()).unwrap().unwrap()
}

#[tokio::test]
async fn happy_path_then_rollback() {
    let store = StateStore::open_in_memory().unwrap();
    let reconciler = RolloutReconciler::new(store.clone());

    // Happy path.
    set_spec(&store, config_map("cs_a", "rev_a"));
    let r = settle(&reconciler, &store).await;
    assert_eq!(r.status.phase, RolloutPhase::Healthy);
    assert_eq!(r.status.status, Some(RolloutStatus::Running));
    assert_eq!(r.status.device_status_map["d1"], DeviceStatus::Running);
    assert_eq!(r.status.device_status_map["d2"], DeviceStatus::Running);

    mark(&store, "d1", DeviceStatus::Completed);
    mark(&store, "d2", DeviceStatus::Completed);
    let r = settle(&reconciler, &store).await;
    assert_eq!(r.status.status, Some(RolloutStatus::Completed));

    // New revision fails on one device.
    set_spec(&store, config_map("cs_b", "rev_b"));
    let r = settle(&reconciler, &store).await;
    assert_eq!(r.status.desired_device_config_map, config_map("cs_b", "rev_b"));
    assert_eq!(r.status.prev_device_config_map, config_map("cs_a", "rev_a"));
    assert_eq!(r.status.device_status_map["d1"], DeviceStatus::Running);

    mark(&store, "d1", DeviceStatus::Failed);
    let r = settle(&reconciler, &store).await;
    assert_eq!(r.status.phase, RolloutPhase::Rollback);
    assert_eq!(r.status.status, Some(RolloutStatus::Running));
    assert_eq!(r.status.device_status_map["d1"], DeviceStatus::Running);
    assert_eq!(r.status.device_status_map["d2"], DeviceStatus::Running);
    assert_eq!(
        netops_rollout::resolve_next_device_config(&r, "d1"),
        DeviceConfig::new("cs_a", "rev_a")
    );

    mark(&store, "d1", DeviceStatus::Completed);
    mark(&store, "d2", DeviceStatus::Completed);
    let r = settle(&reconciler, &store).await;
    assert_eq!(r.status.phase, RolloutPhase::Rollback);
    assert_eq!(r.status.status, Some(RolloutStatus::Completed));
}

#[tokio::test]
async fn missing_rollout_is_done() {
    let store = StateStore::open_in_memory().unwrap();
    let reconciler = RolloutReconciler::new(store);
    assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Action::Done);
}

#[tokio::test]
async fn controller_reacts_to_store_events() {
    let store = StateStore::open_in_memory().unwrap();
    let controller = Controller::new(Arc::new(RolloutReconciler::new(store.clone())));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let events = store.subscribe();
    let mapper_store = store.clone();
    let watch_handle = controller.watch(events, shutdown_rx.clone(), move |event| {
        RolloutReconciler::keys_for(&mapper_store, event)
    });
    let run = tokio::spawn(controller.run(shutdown_rx));

    set_spec(&store, config_map("cs_a", "rev_a"));
    let mut running = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let r = store.get_rollout(&key()).unwrap().unwrap();
        if r.status.status == Some(RolloutStatus::Running) {
            running = true;
            break;
        }
    }
    assert!(running, "rollout never started");

    mark(&store, "d1", DeviceStatus::Completed);
    mark(&store, "d2", DeviceStatus::Completed);
    let mut completed = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let r = store.get_rollout(&key()).unwrap().unwrap();
        if r.status.status == Some(RolloutStatus::Completed) {
            completed = true;
            break;
        }
    }
    assert!(completed, "rollout never completed");

    shutdown_tx.send(true).unwrap();
    watch_handle.await.unwrap();
    run.await.unwrap();
}

// ── Watcher ────────────────────────────────────────────────────

fn config_repo(dir: &std::path::Path) -> GitRepo {
    git2::Repository::init(dir).unwrap();
    let repo = GitRepo::open(RepoOptions {
        path: dir.to_path_buf(),
        ..Default::default()
    })
    .unwrap();
    repo.checkout("main", true).unwrap();
    repo
}

fn commit_config(repo: &GitRepo, device: &str, content: &str) -> String {
    let path = format!("devices/{device}/config.cue");
    let abs = repo.abs(&path);
    std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
    std::fs::write(abs, content).unwrap();
    repo.add("devices").unwrap();
    repo.commit(&format!("Updated: {device}")).unwrap()
}

#[tokio::test]
async fn watcher_tracks_trunk() {
    let dir = tempfile::tempdir().unwrap();
    let repo = config_repo(dir.path());
    commit_config(&repo, "d1", "hostname: \"d1\"\n");
    commit_config(&repo, "d2", "hostname: \"d2\"\n");
    let second = repo.head().unwrap().unwrap().id;
    let repo = Arc::new(Mutex::new(repo));

    let store = StateStore::open_in_memory().unwrap();
    let mut watcher = RolloutWatcher::new(
        repo.clone(),
        store.clone(),
        key(),
        "main",
        Duration::from_secs(10),
    );
    assert_eq!(watcher.poll_once().await.unwrap(), Some(second.clone()));
    assert_eq!(watcher.poll_once().await.unwrap(), None);

    let spec = store.get_rollout(&key()).unwrap().unwrap().spec.device_config_map;
    assert_eq!(
        spec["d1"],
        DeviceConfig::new(checksum(b"hostname: \"d1\"\n"), second.clone())
    );

    // Only d2 changes; d1 keeps the revision it already had.
    let third = commit_config(&repo.lock().unwrap(), "d2", "hostname: \"d2\"\nmtu: 9000\n");
    assert_eq!(watcher.poll_once().await.unwrap(), Some(third.clone()));
    let spec = store.get_rollout(&key()).unwrap().unwrap().spec.device_config_map;
    assert_eq!(spec["d1"].git_revision, second);
    assert_eq!(spec["d2"].git_revision, third);
    assert_eq!(spec["d2"].checksum, checksum(b"hostname: \"d2\"\nmtu: 9000\n"));
}

#[tokio::test]
async fn watcher_limited_to_inventory_devices() {
    let dir = tempfile::tempdir().unwrap();
    let repo = config_repo(dir.path());
    commit_config(&repo, "d1", "hostname: \"d1\"\n");
    commit_config(&repo, "d2", "hostname: \"d2\"\n");
    let repo = Arc::new(Mutex::new(repo));

    let store = StateStore::open_in_memory().unwrap();
    let mut watcher = RolloutWatcher::new(repo, store.clone(), key(), "main", Duration::from_secs(10))
        .with_devices(["d1".to_string()]);
    assert!(watcher.poll_once().await.unwrap().is_some());

    let spec = store.get_rollout(&key()).unwrap().unwrap().spec.device_config_map;
    assert_eq!(spec.keys().collect::<Vec<_>>(), vec!["d1"]);
}

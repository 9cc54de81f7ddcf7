//! Ingest, saver and committer against a scratch status repository.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use netops_aggregator::{
    Aggregator, AggregatorConfig, Committer, SaveConfigRequest, router, saver,
};
use netops_git::{GitRepo, RepoOptions};
use tokio::sync::{mpsc, watch};
use tower::ServiceExt;

fn status_repo(dir: &Path) -> (String, GitRepo) {
    let origin = dir.join("status.git");
    git2::Repository::init_bare(&origin).unwrap();
    let url = origin.to_str().unwrap().to_string();
    let repo = GitRepo::open(RepoOptions {
        path: dir.join("status"),
        url: Some(url.clone()),
        clone_if_not_exists: true,
        ..Default::default()
    })
    .unwrap();
    repo.checkout("main", true).unwrap();
    (url, repo)
}

fn origin_log(url: &str) -> Vec<String> {
    let origin = git2::Repository::open_bare(url).unwrap();
    let Ok(head) = origin.find_reference("refs/heads/main") else {
        return Vec::new();
    };
    let mut walk = origin.revwalk().unwrap();
    walk.push(head.target().unwrap()).unwrap();
    walk.map(|id| {
        origin
            .find_commit(id.unwrap())
            .unwrap()
            .message()
            .unwrap()
            .to_string()
    })
    .collect()
}

fn post(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/commit")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn ingest_validates_and_queues() {
    let (tx, mut rx) = mpsc::channel(4);
    let app = router(tx);

    let resp = app
        .clone()
        .oneshot(post(r#"{"device":"dev1","config":"mtu: 9000\n"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        rx.recv().await.unwrap(),
        SaveConfigRequest {
            device: "dev1".into(),
            config: "mtu: 9000\n".into(),
        }
    );

    let resp = app.clone().oneshot(post(r#"{"device":"dev1"}"#)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .clone()
        .oneshot(post(r#"{"device":"","config":"a: 1"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/commit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    drop(rx);
    let resp = app
        .oneshot(post(r#"{"device":"dev1","config":"a: 1"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn saver_writes_canonical_text() {
    let dir = tempfile::tempdir().unwrap();
    let (_, repo) = status_repo(dir.path());
    let root = repo.root().to_path_buf();
    let repo = Arc::new(Mutex::new(repo));

    saver::save(
        repo.clone(),
        SaveConfigRequest {
            device: "dev1".into(),
            config: "mtu: 9000, hostname: \"dev1\"".into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(
        std::fs::read_to_string(root.join("devices/dev1/actual_config.cue")).unwrap(),
        "hostname: \"dev1\"\nmtu: 9000\n"
    );

    let bad = saver::save(
        repo.clone(),
        SaveConfigRequest {
            device: "../etc".into(),
            config: "a: 1".into(),
        },
    )
    .await;
    assert!(bad.is_err());
    let unparsable = saver::save(
        repo,
        SaveConfigRequest {
            device: "dev2".into(),
            config: "a: {".into(),
        },
    )
    .await;
    assert!(unparsable.is_err());
}

#[tokio::test]
async fn committer_skips_empty_change_sets() {
    let dir = tempfile::tempdir().unwrap();
    let (url, repo) = status_repo(dir.path());
    let repo = Arc::new(Mutex::new(repo));
    let committer = Committer::new(repo.clone(), "main", Duration::from_secs(5));

    assert_eq!(committer.commit_once().await.unwrap(), None);

    saver::save(
        repo.clone(),
        SaveConfigRequest {
            device: "dev1".into(),
            config: "a: 1".into(),
        },
    )
    .await
    .unwrap();
    assert!(committer.commit_once().await.unwrap().is_some());
    assert_eq!(committer.commit_once().await.unwrap(), None);

    // Same content again: nothing changes.
    saver::save(
        repo,
        SaveConfigRequest {
            device: "dev1".into(),
            config: "a: 1\n".into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(committer.commit_once().await.unwrap(), None);
    assert_eq!(origin_log(&url).len(), 1);
}

#[tokio::test]
async fn batched_commit_for_two_devices() {
    let dir = tempfile::tempdir().unwrap();
    let (url, repo) = status_repo(dir.path());
    let aggregator = Aggregator::new(
        repo,
        AggregatorConfig {
            update_check_duration: Duration::from_secs(1),
            ..Default::default()
        },
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (app, handles) = aggregator.spawn(shutdown_rx);

    for device in ["dev2", "dev1"] {
        let body = format!(r#"{{"device":"{device}","config":"hostname: \"{device}\""}}"#);
        let resp = app.clone().oneshot(post(&body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let mut log = Vec::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        log = origin_log(&url);
        if !log.is_empty() {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    shutdown_tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    let log = if log.len() == 1 { origin_log(&url) } else { log };
    assert_eq!(log.len(), 1, "expected one commit, got {log:?}");
    assert_eq!(
        log[0],
        "Updated: dev1 dev2\n\nDevices:\nadded: dev1\nadded: dev2\n"
    );
}

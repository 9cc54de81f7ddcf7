//! Northbound Set/Get/Capabilities against scratch config and status
//! repositories with local bare origins.

use std::path::Path;

use netops_git::{GitRepo, RepoOptions};
use netops_northbound::{NorthboundServer, SetOptions};
use netops_proto::gnmi_server::Gnmi;
use netops_proto::update_result::Operation;
use netops_proto::{
    CapabilityRequest, GetRequest, Path as GnmiPath, PathElem, SetRequest, TypedValue, Update,
};
use tonic::{Code, Request};

const TRANSFORM: &str = r#"package foo

#Input: {
	bar: string
	baz: int
	intVal: int
	floatVal: float
	strVal: string
}

#Template: {
	input: #Input
	output: devices: dev1: config: services: {
		"\(input.bar)-\(input.baz)": intVal: input.intVal
	}
}
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    config_origin: String,
    config_root: std::path::PathBuf,
    server: NorthboundServer,
}

fn bare(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    git2::Repository::init_bare(&path).unwrap();
    path.to_str().unwrap().to_string()
}

fn clone(dir: &Path, name: &str, url: &str) -> GitRepo {
    let repo = GitRepo::open(RepoOptions {
        path: dir.join(name),
        url: Some(url.to_string()),
        clone_if_not_exists: true,
        ..Default::default()
    })
    .unwrap();
    repo.checkout("main", true).unwrap();
    repo
}

fn write(repo: &GitRepo, path: &str, content: &str) {
    let abs = repo.abs(path);
    std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
    std::fs::write(abs, content).unwrap();
}

fn seed(repo: &GitRepo, files: &[(&str, &str)]) {
    for (path, content) in files {
        write(repo, path, content);
    }
    repo.add(".").unwrap();
    repo.commit("seed\n").unwrap();
    repo.push("main").unwrap();
}

fn fixture(opts: SetOptions) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config_origin = bare(dir.path(), "config.git");
    let status_origin = bare(dir.path(), "status.git");

    let config = clone(dir.path(), "config", &config_origin);
    seed(
        &config,
        &[
            (
                "services/foo/metadata.json",
                r#"{"name":"foo","organization":"netops","version":"1.0.0","keys":["bar","baz"]}"#,
            ),
            ("services/foo/transform.cue", TRANSFORM),
        ],
    );
    let status = clone(dir.path(), "status", &status_origin);
    seed(
        &status,
        &[("devices/dev1/actual_config.cue", "hostname: \"dev1\"\nmtu: 9000\n")],
    );

    let config_root = config.root().to_path_buf();
    Fixture {
        config_origin,
        config_root,
        server: NorthboundServer::new(config, status, opts),
        _dir: dir,
    }
}

fn service_path(bar: &str, baz: &str) -> GnmiPath {
    GnmiPath::new(vec![
        PathElem::new("services"),
        PathElem::new("service")
            .with_key("kind", "foo")
            .with_key("bar", bar)
            .with_key("baz", baz),
    ])
}

fn json_update(path: GnmiPath, json: &str) -> Update {
    Update {
        path: Some(path),
        val: Some(TypedValue::json(json.as_bytes().to_vec())),
        duplicates: 0,
    }
}

fn read(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).unwrap()
}

fn origin_main_message(url: &str) -> String {
    let origin = git2::Repository::open_bare(url).unwrap();
    let commit = origin
        .find_reference("refs/heads/main")
        .unwrap()
        .peel_to_commit()
        .unwrap();
    commit.message().unwrap().to_string()
}

const S1_BODY: &str =
    r#"{"bar":"dummy","baz":100,"intVal":2,"floatVal":2.1,"notDefined":"test"}"#;

#[tokio::test]
async fn replace_creates_a_new_service_instance() {
    let fx = fixture(SetOptions::default());
    let resp = fx
        .server
        .set(Request::new(SetRequest {
            replace: vec![json_update(service_path("one", "2"), S1_BODY)],
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(resp.response.len(), 1);
    assert_eq!(resp.response[0].op, Operation::Replace as i32);
    assert_eq!(
        read(&fx.config_root, "services/foo/one/2/input.cue"),
        "bar: \"one\"\nbaz: 2\nfloatVal: 2.1\nintVal: 2\nnotDefined: \"test\"\n"
    );
    assert!(read(&fx.config_root, "devices/dev1/config.cue").contains("intVal: 2"));

    let message = origin_main_message(&fx.config_origin);
    assert!(message.starts_with("Updated: "));
    assert!(message.contains("added: services/foo/one/2"));
    assert!(message.contains("added: dev1"));

    let repo = fx.server.config_repo();
    assert!(repo.lock().unwrap().status().unwrap().is_empty());
}

#[tokio::test]
async fn update_merges_with_the_current_input() {
    let fx = fixture(SetOptions::default());
    fx.server
        .set(Request::new(SetRequest {
            replace: vec![json_update(
                service_path("one", "2"),
                r#"{"intVal":1,"floatVal":1.1,"strVal":"blabla"}"#,
            )],
            ..Default::default()
        }))
        .await
        .unwrap();

    let resp = fx
        .server
        .set(Request::new(SetRequest {
            update: vec![json_update(
                service_path("one", "2"),
                r#"{"intVal":2,"floatVal":2.1,"notDefined":"test"}"#,
            )],
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.response[0].op, Operation::Update as i32);
    assert_eq!(
        read(&fx.config_root, "services/foo/one/2/input.cue"),
        "bar: \"one\"\nbaz: 2\nfloatVal: 2.1\nintVal: 2\nnotDefined: \"test\"\nstrVal: \"blabla\"\n"
    );
    assert!(origin_main_message(&fx.config_origin).contains("modified: services/foo/one/2"));
}

#[tokio::test]
async fn update_of_missing_input_is_not_found() {
    let fx = fixture(SetOptions::default());
    let err = fx
        .server
        .set(Request::new(SetRequest {
            update: vec![json_update(service_path("one", "2"), r#"{"intVal":2}"#)],
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn delete_of_absent_input_succeeds() {
    let fx = fixture(SetOptions::default());
    let resp = fx
        .server
        .set(Request::new(SetRequest {
            delete: vec![service_path("one", "two")],
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.response[0].op, Operation::Delete as i32);
}

#[tokio::test]
async fn delete_removes_input_and_device_config() {
    let fx = fixture(SetOptions::default());
    fx.server
        .set(Request::new(SetRequest {
            replace: vec![json_update(service_path("one", "2"), S1_BODY)],
            ..Default::default()
        }))
        .await
        .unwrap();
    fx.server
        .set(Request::new(SetRequest {
            delete: vec![service_path("one", "2")],
            ..Default::default()
        }))
        .await
        .unwrap();

    assert!(!fx.config_root.join("services/foo/one/2/input.cue").exists());
    assert!(!fx.config_root.join("devices/dev1/config.cue").exists());
    let message = origin_main_message(&fx.config_origin);
    assert!(message.contains("deleted: services/foo/one/2"));
    assert!(message.contains("deleted: dev1"));
}

#[tokio::test]
async fn failed_set_leaves_a_clean_worktree() {
    let fx = fixture(SetOptions::default());
    let err = fx
        .server
        .set(Request::new(SetRequest {
            replace: vec![
                json_update(service_path("one", "2"), S1_BODY),
                json_update(service_path("two", "3"), r#"{"intVal":"not a number"}"#),
            ],
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(!fx.config_root.join("services/foo/one/2/input.cue").exists());
    let repo = fx.server.config_repo();
    assert!(repo.lock().unwrap().status().unwrap().is_empty());
}

#[tokio::test]
async fn device_paths_are_read_only() {
    let fx = fixture(SetOptions::default());
    let device = GnmiPath::new(vec![
        PathElem::new("devices"),
        PathElem::new("device").with_key("name", "dev1"),
    ]);
    let err = fx
        .server
        .set(Request::new(SetRequest {
            replace: vec![json_update(device, r#"{"mtu":1500}"#)],
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn set_is_unavailable_while_the_worktree_is_locked() {
    let fx = fixture(SetOptions::default());
    let repo = fx.server.config_repo();
    let guard = repo.lock().unwrap();
    let err = fx
        .server
        .set(Request::new(SetRequest {
            replace: vec![json_update(service_path("one", "2"), S1_BODY)],
            ..Default::default()
        }))
        .await
        .unwrap_err();
    drop(guard);
    assert_eq!(err.code(), Code::Unavailable);
    assert_eq!(err.message(), "locked");
}

#[tokio::test]
async fn get_reads_services_and_actual_device_configs() {
    let fx = fixture(SetOptions::default());
    fx.server
        .set(Request::new(SetRequest {
            replace: vec![json_update(service_path("one", "2"), S1_BODY)],
            ..Default::default()
        }))
        .await
        .unwrap();

    let resp = fx
        .server
        .get(Request::new(GetRequest {
            path: vec![
                service_path("one", "2"),
                GnmiPath::new(vec![
                    PathElem::new("devices"),
                    PathElem::new("device").with_key("name", "dev1"),
                ]),
            ],
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.notification.len(), 2);

    let service = &resp.notification[0];
    assert!(service.timestamp > 0);
    let json: serde_json::Value = serde_json::from_slice(
        service.update[0].val.as_ref().unwrap().json_bytes().unwrap(),
    )
    .unwrap();
    assert_eq!(
        json,
        serde_json::json!({"bar":"one","baz":2,"floatVal":2.1,"intVal":2,"notDefined":"test"})
    );

    let device: serde_json::Value = serde_json::from_slice(
        resp.notification[1].update[0]
            .val
            .as_ref()
            .unwrap()
            .json_bytes()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(device, serde_json::json!({"hostname":"dev1","mtu":9000}));
}

#[tokio::test]
async fn get_of_missing_input_is_not_found() {
    let fx = fixture(SetOptions::default());
    let err = fx
        .server
        .get(Request::new(GetRequest {
            path: vec![service_path("nope", "1")],
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn capabilities_list_service_models() {
    let fx = fixture(SetOptions::default());
    let caps = fx
        .server
        .capabilities(Request::new(CapabilityRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(caps.supported_models.len(), 1);
    assert_eq!(caps.supported_models[0].name, "foo");
    assert_eq!(caps.supported_models[0].organization, "netops");
    assert_eq!(caps.supported_encodings, vec![netops_proto::Encoding::Json as i32]);
    assert_eq!(caps.gnmi_version, netops_proto::GNMI_VERSION);
}

#[tokio::test]
async fn branch_per_commit_pushes_a_revision_branch() {
    let fx = fixture(SetOptions {
        branch_per_commit: true,
        ..Default::default()
    });
    fx.server
        .set(Request::new(SetRequest {
            replace: vec![json_update(service_path("one", "2"), S1_BODY)],
            ..Default::default()
        }))
        .await
        .unwrap();

    let origin = git2::Repository::open_bare(&fx.config_origin).unwrap();
    let branches: Vec<String> = origin
        .branches(Some(git2::BranchType::Local))
        .unwrap()
        .map(|b| b.unwrap().0.name().unwrap().unwrap().to_string())
        .collect();
    assert!(branches.iter().any(|b| b.starts_with("REV-")));
    assert_eq!(origin_main_message(&fx.config_origin), "seed\n");
    // Trunk is checked out again afterwards.
    assert!(!fx.config_root.join("services/foo/one/2/input.cue").exists());
}

fn device_path(name: &str) -> GnmiPath {
    GnmiPath::new(vec![
        PathElem::new("devices"),
        PathElem::new("device").with_key("name", name),
    ])
}

#[tokio::test]
async fn get_is_unavailable_during_a_set() {
    let fx = fixture(SetOptions::default());
    let lock = fx.server.request_lock();
    let _set_in_flight = lock.try_write_owned().unwrap();

    let err = fx
        .server
        .get(Request::new(GetRequest {
            path: vec![device_path("dev1")],
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    assert_eq!(err.message(), "locked");
}

#[tokio::test]
async fn set_is_unavailable_during_a_get() {
    let fx = fixture(SetOptions::default());
    let lock = fx.server.request_lock();
    let get_in_flight = lock.clone().try_read_owned().unwrap();

    let err = fx
        .server
        .set(Request::new(SetRequest {
            replace: vec![json_update(service_path("one", "2"), S1_BODY)],
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    assert_eq!(err.message(), "locked");
    assert!(!fx.config_root.join("services/foo/one/2/input.cue").exists());

    // Concurrent Gets share the lock.
    fx.server
        .get(Request::new(GetRequest {
            path: vec![device_path("dev1")],
            ..Default::default()
        }))
        .await
        .unwrap();

    drop(get_in_flight);
    fx.server
        .set(Request::new(SetRequest {
            replace: vec![json_update(service_path("one", "2"), S1_BODY)],
            ..Default::default()
        }))
        .await
        .unwrap();
}

#[tokio::test]
async fn persisted_git_state_keeps_the_revision_branch_checked_out() {
    let fx = fixture(SetOptions {
        branch_per_commit: true,
        persist_git_state: true,
        ..Default::default()
    });
    fx.server
        .set(Request::new(SetRequest {
            replace: vec![json_update(service_path("one", "2"), S1_BODY)],
            ..Default::default()
        }))
        .await
        .unwrap();

    let repo = fx.server.config_repo();
    let repo = repo.lock().unwrap();
    let branch = repo.current_branch().unwrap().unwrap();
    assert!(branch.starts_with("REV-"));
    assert!(fx.config_root.join("services/foo/one/2/input.cue").exists());
    assert!(fx.config_root.join("devices/dev1/config.cue").exists());
}

#[tokio::test]
async fn persisted_git_state_keeps_a_failed_set_in_the_worktree() {
    let fx = fixture(SetOptions {
        persist_git_state: true,
        ..Default::default()
    });
    let err = fx
        .server
        .set(Request::new(SetRequest {
            replace: vec![
                json_update(service_path("one", "2"), S1_BODY),
                json_update(service_path("two", "3"), r#"{"intVal":"not a number"}"#),
            ],
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let repo = fx.server.config_repo();
    assert!(!repo.lock().unwrap().status().unwrap().is_empty());
}

#[tokio::test]
async fn integers_beyond_i64_are_invalid() {
    let fx = fixture(SetOptions::default());
    let err = fx
        .server
        .set(Request::new(SetRequest {
            replace: vec![json_update(
                service_path("one", "2"),
                r#"{"intVal":18446744073709551615}"#,
            )],
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(err.message().contains("intVal"));
}

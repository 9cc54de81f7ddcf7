//! ServiceApply against a scratch worktree.

use std::path::Path;

use netops_apply::{ApplyError, DeviceChange, ServiceApply, ServiceOp};
use netops_git::{GitRepo, RepoOptions};
use netops_value::Value;

const TRANSFORM: &str = r#"package vlan

#Input: {
	name: string
	id: int
	device: string
	mtu: *1500 | int
}

#Template: {
	input: #Input
	output: devices: {
		(input.device): config: vlans: {
			"\(input.id)": {
				name: input.name
				mtu: input.mtu
			}
		}
	}
}
"#;

fn init(dir: &Path) -> GitRepo {
    git2::Repository::init(dir).unwrap();
    let repo = GitRepo::open(RepoOptions {
        path: dir.to_path_buf(),
        ..Default::default()
    })
    .unwrap();
    write(&repo, "services/vlan/transform.cue", TRANSFORM);
    repo.add("services").unwrap();
    repo.commit("add vlan service\n").unwrap();
    repo
}

fn write(repo: &GitRepo, path: &str, content: &str) {
    let abs = repo.abs(path);
    std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
    std::fs::write(abs, content).unwrap();
}

fn read_config(repo: &GitRepo, device: &str) -> Value {
    let text = std::fs::read_to_string(repo.abs(&format!("devices/{device}/config.cue"))).unwrap();
    netops_value::parse(&text).unwrap()
}

fn add_vlan(repo: &GitRepo, key: &str, id: i64, device: &str) {
    write(
        repo,
        &format!("services/vlan/{key}/input.cue"),
        &format!("name: \"{key}\"\nid: {id}\ndevice: \"{device}\"\n"),
    );
    repo.add("services").unwrap();
}

#[test]
fn compiles_services_and_composes_devices() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init(dir.path());
    add_vlan(&repo, "a", 10, "dev1");
    add_vlan(&repo, "b", 20, "dev1");
    add_vlan(&repo, "c", 30, "dev2");

    let report = ServiceApply::new(&repo).run().unwrap();
    assert_eq!(report.services.entries.len(), 3);
    assert_eq!(
        report.devices,
        vec![
            ("dev1".to_string(), DeviceChange::Written),
            ("dev2".to_string(), DeviceChange::Written),
        ]
    );

    let computed = std::fs::read_to_string(repo.abs("services/vlan/a/computed/dev1.cue")).unwrap();
    assert!(computed.starts_with("vlans: {"));

    let dev1 = read_config(&repo, "dev1");
    assert_eq!(
        dev1.lookup(&["vlans", "10", "name"]),
        Some(&Value::String("a".into()))
    );
    assert_eq!(dev1.lookup(&["vlans", "20", "mtu"]), Some(&Value::Int(1500)));
    assert_eq!(dev1.lookup(&["vlans", "30"]), None);

    let status = repo.status().unwrap();
    assert!(status.contains_key("devices/dev1/config.cue"));
    assert!(status.values().all(|fs| fs.worktree == netops_git::StatusCode::Unmodified));
}

#[test]
fn deleting_services_recomposes_and_removes_devices() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init(dir.path());
    add_vlan(&repo, "a", 10, "dev1");
    add_vlan(&repo, "b", 20, "dev1");
    ServiceApply::new(&repo).run().unwrap();
    repo.commit("add vlans\n").unwrap();

    repo.remove("services/vlan/b/input.cue").unwrap();
    let report = ServiceApply::new(&repo).run().unwrap();
    assert_eq!(report.services.entries[0].0, ServiceOp::Delete);
    assert_eq!(report.devices, vec![("dev1".to_string(), DeviceChange::Written)]);
    assert!(!repo.abs("services/vlan/b/computed").exists());
    let dev1 = read_config(&repo, "dev1");
    assert!(dev1.lookup(&["vlans", "10"]).is_some());
    assert!(dev1.lookup(&["vlans", "20"]).is_none());
    repo.commit("drop b\n").unwrap();

    repo.remove("services/vlan/a/input.cue").unwrap();
    let report = ServiceApply::new(&repo).run().unwrap();
    assert_eq!(report.devices, vec![("dev1".to_string(), DeviceChange::Removed)]);
    assert!(!repo.abs("devices/dev1/config.cue").exists());
}

#[test]
fn moving_a_service_to_another_device() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init(dir.path());
    add_vlan(&repo, "a", 10, "dev1");
    ServiceApply::new(&repo).run().unwrap();
    repo.commit("a on dev1\n").unwrap();

    add_vlan(&repo, "a", 10, "dev2");
    let report = ServiceApply::new(&repo).run().unwrap();
    assert_eq!(
        report.devices,
        vec![
            ("dev1".to_string(), DeviceChange::Removed),
            ("dev2".to_string(), DeviceChange::Written),
        ]
    );
}

#[test]
fn rejects_hand_edited_computed_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init(dir.path());
    add_vlan(&repo, "a", 10, "dev1");
    ServiceApply::new(&repo).run().unwrap();
    repo.commit("a\n").unwrap();

    write(&repo, "services/vlan/a/computed/dev1.cue", "vlans: {}\n");
    match ServiceApply::new(&repo).run() {
        Err(ApplyError::Preflight { path, .. }) => {
            assert_eq!(path, "services/vlan/a/computed/dev1.cue")
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn schema_violations_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init(dir.path());
    write(
        &repo,
        "services/vlan/bad/input.cue",
        "name: \"bad\"\nid: \"ten\"\ndevice: \"dev1\"\n",
    );
    repo.add("services").unwrap();
    assert!(matches!(
        ServiceApply::new(&repo).run(),
        Err(ApplyError::Value { .. })
    ));
    assert!(!repo.abs("devices/dev1/config.cue").exists());
}

//! Inventory entries become Device objects.

use std::collections::{BTreeMap, BTreeSet};

use netops_core::{DeviceEntry, Inventory};
use netops_state::{Device, DeviceSpec, ObjectKey, StateResult, StateStore};
use tracing::info;

pub fn device_spec(entry: &DeviceEntry) -> DeviceSpec {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    DeviceSpec {
        address: entry.address.clone(),
        port: entry.port,
        username: non_empty(&entry.username),
        password: non_empty(&entry.password),
        rollout_ref: entry.rollout.clone(),
        base_revision: entry.base_revision.clone().unwrap_or_default(),
    }
}

/// Create or update one Device per inventory entry. Status is kept;
/// devices missing from the inventory are left alone.
pub fn sync_devices(store: &StateStore, inventory: &Inventory) -> StateResult<usize> {
    let mut changed = 0;
    for entry in &inventory.devices {
        let key = ObjectKey::new(entry.namespace.clone(), entry.name.clone());
        let spec = device_spec(entry);
        match store.get_device(&key)? {
            Some(existing) if existing.spec == spec => continue,
            Some(_) => {
                store.update_device(&key, |d| d.spec = spec)?;
                info!(device = %key, "device spec updated");
            }
            None => {
                store.put_device(&Device::new(key.namespace.clone(), key.name.clone(), spec))?;
                info!(device = %key, "device registered");
            }
        }
        changed += 1;
    }
    Ok(changed)
}

/// Rollouts referenced by the inventory, each with its device names.
pub fn rollouts(inventory: &Inventory) -> BTreeMap<ObjectKey, BTreeSet<String>> {
    let mut out: BTreeMap<ObjectKey, BTreeSet<String>> = BTreeMap::new();
    for entry in inventory.devices.iter().filter(|e| !e.rollout.is_empty()) {
        out.entry(ObjectKey::new(entry.namespace.clone(), entry.rollout.clone()))
            .or_default()
            .insert(entry.name.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> Inventory {
        toml::from_str(
            r#"
            [[device]]
            name = "leaf1"
            namespace = "net"
            address = "10.0.0.11"
            port = 57400
            username = "admin"
            rollout = "fabric"
            base_revision = "abc123"

            [[device]]
            name = "leaf2"
            namespace = "net"
            address = "10.0.0.12"
            port = 57400
            rollout = "fabric"

            [[device]]
            name = "edge1"
            address = "10.0.1.1"
            port = 57400
            rollout = "edge"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn specs_from_entries() {
        let inv = inventory();
        let spec = device_spec(&inv.devices[0]);
        assert_eq!(spec.username.as_deref(), Some("admin"));
        assert_eq!(spec.password, None);
        assert_eq!(spec.base_revision, "abc123");
        assert_eq!(device_spec(&inv.devices[1]).base_revision, "");
    }

    #[test]
    fn rollouts_group_devices() {
        let groups = rollouts(&inventory());
        assert_eq!(groups.len(), 2);
        let fabric = &groups[&ObjectKey::new("net", "fabric")];
        assert_eq!(fabric.iter().collect::<Vec<_>>(), vec!["leaf1", "leaf2"]);
        assert!(groups.contains_key(&ObjectKey::new("default", "edge")));
    }

    #[test]
    fn sync_keeps_status_and_skips_unchanged() {
        let store = StateStore::open_in_memory().unwrap();
        let mut inv = inventory();
        assert_eq!(sync_devices(&store, &inv).unwrap(), 3);

        let key = ObjectKey::new("net", "leaf1");
        store
            .update_device(&key, |d| d.status.checksum = "abc".into())
            .unwrap();
        assert_eq!(sync_devices(&store, &inv).unwrap(), 0);

        inv.devices[0].port = 6030;
        assert_eq!(sync_devices(&store, &inv).unwrap(), 1);
        let device = store.get_device(&key).unwrap().unwrap();
        assert_eq!(device.spec.port, 6030);
        assert_eq!(device.status.checksum, "abc");
    }
}

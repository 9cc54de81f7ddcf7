//! StateStore: redb-backed persistence for DeviceRollout and Device
//! objects.
//!
//! Objects are JSON-encoded into `&[u8]` value columns under
//! `{namespace}/{name}` keys. Every committed write that changes an
//! object bumps its `resource_version` and publishes an [`Event`] to
//! subscribers. Writes that leave an object unchanged are dropped
//! without an event.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::{DEVICES, ROLLOUTS};
use crate::types::{Device, DeviceRollout, Event, ObjectKey, ObjectKind, ObjectMeta};

macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const EVENT_CAPACITY: usize = 1024;

/// An object kind the store knows how to persist.
pub trait StoredObject: Serialize + DeserializeOwned + Clone + PartialEq {
    const KIND: ObjectKind;
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]>;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

impl StoredObject for DeviceRollout {
    const KIND: ObjectKind = ObjectKind::Rollout;
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = ROLLOUTS;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl StoredObject for Device {
    const KIND: ObjectKind = ObjectKind::Device;
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = DEVICES;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Thread-safe object store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    events: broadcast::Sender<Event>,
}

impl StateStore {
    /// Open (or create) a persistent store at `path`.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_database(db)?;
        debug!(path = %path.display(), "object store opened");
        Ok(store)
    }

    /// An ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(map_err!(Open))?;
        let store = Self::with_database(db)?;
        debug!("in-memory object store opened");
        Ok(store)
    }

    fn with_database(db: Database) -> StateResult<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            db: Arc::new(db),
            events,
        };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.open_table(DEVICES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Receive an [`Event`] for every change committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    // ── Rollouts ───────────────────────────────────────────────────

    /// Create or replace a rollout. See [`StateStore::put`].
    pub fn put_rollout(&self, rollout: &DeviceRollout) -> StateResult<DeviceRollout> {
        self.put(rollout)
    }

    pub fn get_rollout(&self, key: &ObjectKey) -> StateResult<Option<DeviceRollout>> {
        self.get(key)
    }

    pub fn list_rollouts(&self) -> StateResult<Vec<DeviceRollout>> {
        self.list()
    }

    pub fn delete_rollout(&self, key: &ObjectKey) -> StateResult<bool> {
        self.delete::<DeviceRollout>(key)
    }

    /// Mutate a stored rollout in one transaction.
    pub fn update_rollout<F>(&self, key: &ObjectKey, f: F) -> StateResult<DeviceRollout>
    where
        F: FnOnce(&mut DeviceRollout),
    {
        self.update(key, f)
    }

    // ── Devices ────────────────────────────────────────────────────

    /// Create or replace a device. See [`StateStore::put`].
    pub fn put_device(&self, device: &Device) -> StateResult<Device> {
        self.put(device)
    }

    pub fn get_device(&self, key: &ObjectKey) -> StateResult<Option<Device>> {
        self.get(key)
    }

    pub fn list_devices(&self) -> StateResult<Vec<Device>> {
        self.list()
    }

    pub fn delete_device(&self, key: &ObjectKey) -> StateResult<bool> {
        self.delete::<Device>(key)
    }

    /// Mutate a stored device in one transaction.
    pub fn update_device<F>(&self, key: &ObjectKey, f: F) -> StateResult<Device>
    where
        F: FnOnce(&mut Device),
    {
        self.update(key, f)
    }

    /// Mutate a device and its rollout in a single transaction. Both must
    /// exist; either both changes land or neither does.
    pub fn patch_device_and_rollout<F>(
        &self,
        device_key: &ObjectKey,
        rollout_key: &ObjectKey,
        f: F,
    ) -> StateResult<(Device, DeviceRollout)>
    where
        F: FnOnce(&mut Device, &mut DeviceRollout),
    {
        self.write(|txn| {
            let mut devices = txn.open_table(DEVICES).map_err(map_err!(Table))?;
            let mut rollouts = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            let device: Device = fetch(&devices, device_key)?
                .ok_or_else(|| StateError::NotFound(ObjectKind::Device, device_key.clone()))?;
            let rollout: DeviceRollout = fetch(&rollouts, rollout_key)?
                .ok_or_else(|| StateError::NotFound(ObjectKind::Rollout, rollout_key.clone()))?;

            let (mut next_device, mut next_rollout) = (device.clone(), rollout.clone());
            f(&mut next_device, &mut next_rollout);

            let mut events = Vec::new();
            if store(&mut devices, Some(&device), &mut next_device)? {
                events.push(event::<Device>(device_key));
            }
            if store(&mut rollouts, Some(&rollout), &mut next_rollout)? {
                events.push(event::<DeviceRollout>(rollout_key));
            }
            Ok(((next_device, next_rollout), events))
        })
    }

    // ── Generic operations ─────────────────────────────────────────

    /// Create or replace an object. A non-zero `resource_version` on the
    /// input must match the stored version, otherwise the write fails
    /// with [`StateError::Conflict`]. Zero writes unconditionally.
    pub fn put<T: StoredObject>(&self, obj: &T) -> StateResult<T> {
        let key = obj.meta().key();
        self.write(|txn| {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            let current: Option<T> = fetch(&table, &key)?;
            let found = current.as_ref().map_or(0, |c| c.meta().resource_version);
            let expected = obj.meta().resource_version;
            if expected != 0 && expected != found {
                return Err(StateError::Conflict {
                    kind: T::KIND,
                    key: key.clone(),
                    expected,
                    found,
                });
            }
            let mut next = obj.clone();
            let changed = store(&mut table, current.as_ref(), &mut next)?;
            Ok((next, changed.then(|| event::<T>(&key)).into_iter().collect()))
        })
    }

    pub fn get<T: StoredObject>(&self, key: &ObjectKey) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
        fetch(&table, key)
    }

    /// All objects of one kind, ordered by key.
    pub fn list<T: StoredObject>(&self) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (key, value) = entry.map_err(map_err!(Storage))?;
            out.push(decode::<T>(key.value(), value.value())?);
        }
        Ok(out)
    }

    /// Remove an object. Returns whether it existed.
    pub fn delete<T: StoredObject>(&self, key: &ObjectKey) -> StateResult<bool> {
        let existed = self.write(|txn| {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            let existed = table
                .remove(key.table_key().as_str())
                .map_err(map_err!(Storage))?
                .is_some();
            Ok((existed, existed.then(|| event::<T>(key)).into_iter().collect()))
        })?;
        debug!(kind = %T::KIND, %key, existed, "object deleted");
        Ok(existed)
    }

    /// Read, mutate and write back one object atomically.
    pub fn update<T, F>(&self, key: &ObjectKey, f: F) -> StateResult<T>
    where
        T: StoredObject,
        F: FnOnce(&mut T),
    {
        self.write(|txn| {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            let current: T =
                fetch(&table, key)?.ok_or_else(|| StateError::NotFound(T::KIND, key.clone()))?;
            let mut next = current.clone();
            f(&mut next);
            let changed = store(&mut table, Some(&current), &mut next)?;
            Ok((next, changed.then(|| event::<T>(key)).into_iter().collect()))
        })
    }

    /// Run `f` in a write transaction; commit and publish its events on
    /// success, abort on error.
    fn write<R, F>(&self, f: F) -> StateResult<R>
    where
        F: FnOnce(&WriteTransaction) -> StateResult<(R, Vec<Event>)>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (out, events) = match f(&txn) {
            Ok(result) => result,
            Err(e) => {
                let _ = txn.abort();
                return Err(e);
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        for event in events {
            debug!(kind = %event.kind, key = %event.key, "object changed");
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        Ok(out)
    }
}

fn event<T: StoredObject>(key: &ObjectKey) -> Event {
    Event {
        kind: T::KIND,
        key: key.clone(),
    }
}

fn fetch<T, R>(table: &R, key: &ObjectKey) -> StateResult<Option<T>>
where
    T: StoredObject,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let table_key = key.table_key();
    match table.get(table_key.as_str()).map_err(map_err!(Storage))? {
        Some(guard) => Ok(Some(decode(&table_key, guard.value())?)),
        None => Ok(None),
    }
}

/// Write `next` over `current`, carrying the version forward. Returns
/// false, writing nothing, when the content is unchanged.
fn store<T: StoredObject>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    current: Option<&T>,
    next: &mut T,
) -> StateResult<bool> {
    let version = current.map_or(0, |c| c.meta().resource_version);
    next.meta_mut().resource_version = version;
    if current == Some(&*next) {
        return Ok(false);
    }
    next.meta_mut().resource_version = version + 1;

    let key = next.meta().key().table_key();
    let bytes = serde_json::to_vec(&*next).map_err(|e| StateError::Encode {
        kind: T::KIND,
        key: key.clone(),
        message: e.to_string(),
    })?;
    table
        .insert(key.as_str(), bytes.as_slice())
        .map_err(map_err!(Storage))?;
    Ok(true)
}

fn decode<T: StoredObject>(key: &str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Decode {
        kind: T::KIND,
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceConfig, DeviceSpec, DeviceStatus};

    fn store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn device(name: &str) -> Device {
        Device::new(
            "net",
            name,
            DeviceSpec {
                address: "10.0.0.1".into(),
                port: 9339,
                rollout_ref: "fabric".into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn put_get_list_delete() {
        let store = store();
        let stored = store.put_device(&device("leaf1")).unwrap();
        assert_eq!(stored.metadata.resource_version, 1);
        store.put_device(&device("leaf0")).unwrap();

        let got = store.get_device(&ObjectKey::new("net", "leaf1")).unwrap().unwrap();
        assert_eq!(got, stored);

        let names: Vec<_> = store
            .list_devices()
            .unwrap()
            .into_iter()
            .map(|d| d.metadata.name)
            .collect();
        assert_eq!(names, vec!["leaf0", "leaf1"]);

        assert!(store.delete_device(&ObjectKey::new("net", "leaf1")).unwrap());
        assert!(!store.delete_device(&ObjectKey::new("net", "leaf1")).unwrap());
        assert!(store.get_device(&ObjectKey::new("net", "leaf1")).unwrap().is_none());
    }

    #[test]
    fn unchanged_put_keeps_version() {
        let store = store();
        store.put_device(&device("leaf1")).unwrap();
        let again = store.put_device(&device("leaf1")).unwrap();
        assert_eq!(again.metadata.resource_version, 1);
    }

    #[test]
    fn stale_version_conflicts() {
        let store = store();
        let v1 = store.put_device(&device("leaf1")).unwrap();
        let mut changed = v1.clone();
        changed.spec.port = 57400;
        store.put_device(&changed).unwrap();

        let mut stale = v1;
        stale.spec.port = 6030;
        let err = store.put_device(&stale).unwrap_err();
        assert!(matches!(err, StateError::Conflict { expected: 1, found: 2, .. }));
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = store();
        let err = store
            .update_device(&ObjectKey::new("net", "nope"), |_| {})
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(ObjectKind::Device, _)));
    }

    #[test]
    fn patch_updates_both_objects() {
        let store = store();
        store.put_device(&device("leaf1")).unwrap();
        store.put_rollout(&DeviceRollout::new("net", "fabric")).unwrap();

        let (dev, rollout) = store
            .patch_device_and_rollout(
                &ObjectKey::new("net", "leaf1"),
                &ObjectKey::new("net", "fabric"),
                |dev, rollout| {
                    dev.status.checksum = "abc".into();
                    rollout
                        .status
                        .device_status_map
                        .insert("leaf1".into(), DeviceStatus::Completed);
                },
            )
            .unwrap();
        assert_eq!(dev.metadata.resource_version, 2);
        assert_eq!(rollout.metadata.resource_version, 2);
        assert_eq!(
            store
                .get_rollout(&ObjectKey::new("net", "fabric"))
                .unwrap()
                .unwrap()
                .status
                .device_status_map["leaf1"],
            DeviceStatus::Completed
        );
    }

    #[test]
    fn patch_with_missing_rollout_writes_nothing() {
        let store = store();
        store.put_device(&device("leaf1")).unwrap();
        let err = store
            .patch_device_and_rollout(
                &ObjectKey::new("net", "leaf1"),
                &ObjectKey::new("net", "fabric"),
                |dev, _| dev.status.checksum = "abc".into(),
            )
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(ObjectKind::Rollout, _)));
        let dev = store.get_device(&ObjectKey::new("net", "leaf1")).unwrap().unwrap();
        assert!(dev.status.checksum.is_empty());
    }

    #[test]
    fn events_only_for_changes() {
        let store = store();
        let mut rx = store.subscribe();
        let mut rollout = DeviceRollout::new("net", "fabric");
        rollout
            .spec
            .device_config_map
            .insert("leaf1".into(), DeviceConfig::new("cs", "rev"));
        store.put_rollout(&rollout).unwrap();
        store.put_rollout(&rollout).unwrap();
        store.delete_rollout(&rollout.key()).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, ObjectKind::Rollout);
        assert_eq!(first.key, rollout.key());
        let second = rx.try_recv().unwrap();
        assert_eq!(second.key, rollout.key());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reopens_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        {
            let store = StateStore::open(&path).unwrap();
            store.put_device(&device("leaf1")).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.list_devices().unwrap().len(), 1);
    }
}

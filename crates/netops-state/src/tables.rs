//! redb table definitions.
//!
//! Both tables use `{namespace}/{name}` keys and JSON-encoded values.

use redb::TableDefinition;

/// DeviceRollout objects.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Device objects.
pub const DEVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("devices");

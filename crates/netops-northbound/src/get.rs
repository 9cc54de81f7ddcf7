//! Get: read a service input from the config worktree or a device's
//! actual config from the status worktree, as JSON.

use std::path::Path as FsPath;

use netops_core::ServicePath;
use netops_proto::{Notification, Path, TypedValue, Update};
use netops_value::Value;

use crate::error::{NorthboundError, NorthboundResult};
use crate::module::ServiceModule;
use crate::path::{PathReq, service_path};

/// Which worktree a read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Config,
    Status,
}

/// Read one path and return it as an update carrying JSON.
pub fn read(
    config_root: &FsPath,
    status_root: &FsPath,
    prefix: Option<&Path>,
    path: &Path,
) -> NorthboundResult<(Source, Update)> {
    let (source, rel, value) = match PathReq::parse(&Path::joined(prefix, Some(path)))? {
        PathReq::Service { kind, keys } => {
            let module = ServiceModule::load(config_root, &kind)?;
            let service = service_path(&kind, &keys, module.keys())?;
            let rel = service.input_file();
            let value = read_value(config_root, &rel, &service.to_string())?;
            validate(&module, &service, &value)?;
            (Source::Config, rel, value)
        }
        PathReq::Device(device) => {
            let rel = device.actual_config_file();
            let value = read_value(status_root, &rel, &device.to_string())?;
            (Source::Status, rel, value)
        }
    };

    let json = value
        .to_json()
        .map_err(|e| NorthboundError::value(&rel, e))?;
    let bytes = serde_json::to_vec(&json)
        .map_err(|e| NorthboundError::io(&rel, std::io::Error::other(e)))?;
    Ok((
        source,
        Update {
            path: Some(path.clone()),
            val: Some(TypedValue::json(bytes)),
            duplicates: 0,
        },
    ))
}

fn read_value(root: &FsPath, rel: &str, name: &str) -> NorthboundResult<Value> {
    let src = match std::fs::read_to_string(root.join(rel)) {
        Ok(src) => src,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(NorthboundError::NotFound(name.to_string()));
        }
        Err(e) => return Err(NorthboundError::io(rel, e)),
    };
    netops_value::parse(&src).map_err(|e| NorthboundError::value(rel, e))
}

// A stored input that no longer fits the schema is a server-side fault.
fn validate(module: &ServiceModule, service: &ServicePath, value: &Value) -> NorthboundResult<()> {
    module.validate(service, value).map_err(|e| match e {
        NorthboundError::InvalidArgument(msg) => NorthboundError::Corrupt(msg),
        other => other,
    })
}

/// A notification holding `updates`, stamped with `timestamp`.
pub fn notification(timestamp: i64, prefix: Option<Path>, updates: Vec<Update>) -> Notification {
    Notification {
        timestamp,
        prefix,
        update: updates,
        delete: Vec::new(),
    }
}

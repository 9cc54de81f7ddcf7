//! gNMI-style paths to repository paths.
//!
//! ```text
//! services / service[kind=<K>, <key-1>=<V1>, …]
//! devices  / device[name=<N>]
//! ```

use std::collections::BTreeMap;

use netops_core::{DevicePath, ServicePath};
use netops_proto::PathElem;

use crate::error::{NorthboundError, NorthboundResult};

const KIND_KEY: &str = "kind";
const NAME_KEY: &str = "name";

/// A parsed northbound path, before service keys are ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathReq {
    Service {
        kind: String,
        keys: BTreeMap<String, String>,
    },
    Device(DevicePath),
}

impl PathReq {
    /// Parse the concatenated prefix and path elements.
    pub fn parse(elems: &[PathElem]) -> NorthboundResult<Self> {
        let [root, elem] = elems else {
            return Err(NorthboundError::invalid(format!(
                "expected two path elements, got {}",
                elems.len()
            )));
        };
        match (root.name.as_str(), elem.name.as_str()) {
            ("services", "service") => {
                let mut keys = elem.key.clone();
                let kind = keys
                    .remove(KIND_KEY)
                    .ok_or_else(|| NorthboundError::invalid("service element has no kind key"))?;
                check_segment(KIND_KEY, &kind)?;
                Ok(Self::Service { kind, keys })
            }
            ("devices", "device") => {
                let name = elem
                    .key
                    .get(NAME_KEY)
                    .ok_or_else(|| NorthboundError::invalid("device element has no name key"))?;
                check_segment(NAME_KEY, name)?;
                Ok(Self::Device(DevicePath::new(name.clone())))
            }
            (root, elem) => Err(NorthboundError::invalid(format!(
                "unsupported path /{root}/{elem}"
            ))),
        }
    }

    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Service { kind, .. } => Some(kind),
            Self::Device(_) => None,
        }
    }
}

/// Order `keys` by the service's declared key list. Every declared key
/// must be present and no undeclared key may appear.
pub fn service_path(
    kind: &str,
    keys: &BTreeMap<String, String>,
    declared: &[String],
) -> NorthboundResult<ServicePath> {
    if let Some(extra) = keys.keys().find(|k| !declared.contains(k)) {
        return Err(NorthboundError::invalid(format!(
            "service {kind} has no key {extra:?}"
        )));
    }
    let ordered = declared
        .iter()
        .map(|key| {
            let value = keys.get(key).ok_or_else(|| {
                NorthboundError::invalid(format!("missing key {key:?} for service {kind}"))
            })?;
            check_segment(key, value)?;
            Ok(value.clone())
        })
        .collect::<NorthboundResult<Vec<_>>>()?;
    Ok(ServicePath::new(kind, ordered))
}

/// Key values become directory names.
fn check_segment(key: &str, value: &str) -> NorthboundResult<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(NorthboundError::invalid(format!(
            "invalid value {value:?} for key {key}"
        )));
    }
    Ok(())
}

//! netops-proto — gNMI-style messages and the `gnmi.Gnmi` service stubs.
//!
//! Messages are hand-written `prost` derives mirroring the gNMI field
//! numbers. Client and server stubs are generated at build time:
//!
//! - [`gnmi_server::GnmiServer`] / [`gnmi_server::Gnmi`]
//! - [`gnmi_client::GnmiClient`]

use std::collections::BTreeMap;

include!(concat!(env!("OUT_DIR"), "/gnmi.Gnmi.rs"));

/// Protocol version reported by `Capabilities`.
pub const GNMI_VERSION: &str = "0.7.0";

// ── Paths ──────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Path {
    #[prost(string, tag = "2")]
    pub origin: String,
    #[prost(message, repeated, tag = "3")]
    pub elem: Vec<PathElem>,
    #[prost(string, tag = "4")]
    pub target: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PathElem {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(btree_map = "string, string", tag = "2")]
    pub key: BTreeMap<String, String>,
}

impl Path {
    pub fn new(elem: Vec<PathElem>) -> Self {
        Self {
            elem,
            ..Default::default()
        }
    }

    /// Elements of `prefix` followed by those of `path`.
    pub fn joined(prefix: Option<&Path>, path: Option<&Path>) -> Vec<PathElem> {
        prefix
            .into_iter()
            .chain(path)
            .flat_map(|p| p.elem.iter().cloned())
            .collect()
    }
}

impl PathElem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: BTreeMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.key.insert(key.into(), value.into());
        self
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for elem in &self.elem {
            write!(f, "/{}", elem.name)?;
            for (k, v) in &elem.key {
                write!(f, "[{k}={v}]")?;
            }
        }
        Ok(())
    }
}

// ── Values ─────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TypedValue {
    #[prost(oneof = "typed_value::Value", tags = "1, 2, 3, 4, 5, 10, 11, 12, 14")]
    pub value: Option<typed_value::Value>,
}

pub mod typed_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(string, tag = "1")]
        StringVal(String),
        #[prost(int64, tag = "2")]
        IntVal(i64),
        #[prost(uint64, tag = "3")]
        UintVal(u64),
        #[prost(bool, tag = "4")]
        BoolVal(bool),
        #[prost(bytes = "vec", tag = "5")]
        BytesVal(Vec<u8>),
        #[prost(bytes = "vec", tag = "10")]
        JsonVal(Vec<u8>),
        #[prost(bytes = "vec", tag = "11")]
        JsonIetfVal(Vec<u8>),
        #[prost(string, tag = "12")]
        AsciiVal(String),
        #[prost(double, tag = "14")]
        DoubleVal(f64),
    }
}

impl TypedValue {
    pub fn json(bytes: Vec<u8>) -> Self {
        Self {
            value: Some(typed_value::Value::JsonVal(bytes)),
        }
    }

    /// The JSON payload, from either `json_val` or `json_ietf_val`.
    pub fn json_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            Some(typed_value::Value::JsonVal(b) | typed_value::Value::JsonIetfVal(b)) => Some(b),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Update {
    #[prost(message, optional, tag = "1")]
    pub path: Option<Path>,
    #[prost(message, optional, tag = "3")]
    pub val: Option<TypedValue>,
    #[prost(uint32, tag = "4")]
    pub duplicates: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Notification {
    /// Nanoseconds since the epoch.
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(message, optional, tag = "2")]
    pub prefix: Option<Path>,
    #[prost(message, repeated, tag = "4")]
    pub update: Vec<Update>,
    #[prost(message, repeated, tag = "5")]
    pub delete: Vec<Path>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Encoding {
    Json = 0,
    Bytes = 1,
    Proto = 2,
    Ascii = 3,
    JsonIetf = 4,
}

// ── Capabilities ───────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CapabilityRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CapabilityResponse {
    #[prost(message, repeated, tag = "1")]
    pub supported_models: Vec<ModelData>,
    #[prost(enumeration = "Encoding", repeated, tag = "2")]
    pub supported_encodings: Vec<i32>,
    #[prost(string, tag = "3")]
    pub gnmi_version: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelData {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub organization: String,
    #[prost(string, tag = "3")]
    pub version: String,
}

// ── Get ────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRequest {
    #[prost(message, optional, tag = "1")]
    pub prefix: Option<Path>,
    #[prost(message, repeated, tag = "2")]
    pub path: Vec<Path>,
    #[prost(enumeration = "get_request::DataType", tag = "3")]
    pub r#type: i32,
    #[prost(enumeration = "Encoding", tag = "5")]
    pub encoding: i32,
}

pub mod get_request {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum DataType {
        All = 0,
        Config = 1,
        State = 2,
        Operational = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetResponse {
    #[prost(message, repeated, tag = "1")]
    pub notification: Vec<Notification>,
}

// ── Set ────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetRequest {
    #[prost(message, optional, tag = "1")]
    pub prefix: Option<Path>,
    #[prost(message, repeated, tag = "2")]
    pub delete: Vec<Path>,
    #[prost(message, repeated, tag = "3")]
    pub replace: Vec<Update>,
    #[prost(message, repeated, tag = "4")]
    pub update: Vec<Update>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetResponse {
    #[prost(message, optional, tag = "1")]
    pub prefix: Option<Path>,
    #[prost(message, repeated, tag = "2")]
    pub response: Vec<UpdateResult>,
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateResult {
    #[prost(message, optional, tag = "2")]
    pub path: Option<Path>,
    #[prost(enumeration = "update_result::Operation", tag = "4")]
    pub op: i32,
}

pub mod update_result {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Operation {
        Invalid = 0,
        Delete = 1,
        Replace = 2,
        Update = 3,
    }
}

impl UpdateResult {
    pub fn new(path: Path, op: update_result::Operation) -> Self {
        Self {
            path: Some(path),
            op: op as i32,
        }
    }
}

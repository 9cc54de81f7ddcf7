//! Device drivers: how the reconciler and subscribers talk to a device.
//!
//! [`GnmiDriver`] speaks the gNMI-style gRPC service from `netops-proto`.
//! Credentials travel as `username` / `password` request metadata.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netops_proto::gnmi_client::GnmiClient;
use netops_proto::{
    Encoding, GetRequest, Path, PathElem, SetRequest, SetResponse, TypedValue, Update,
};
use netops_state::Device;
use netops_value::{Diff, ValueResult};
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request};
use tracing::debug;

use crate::error::{DeviceError, DeviceResult};

/// Timeout for a single device Set.
pub const DEVICE_SET_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// The device's full running config as a JSON document.
    async fn get_config(&self) -> DeviceResult<Vec<u8>>;

    async fn set(&self, request: SetRequest) -> DeviceResult<SetResponse>;
}

/// Builds a driver for a device.
pub trait DriverFactory: Send + Sync {
    fn driver(&self, device: &Device) -> Arc<dyn DeviceDriver>;
}

/// Turn a config diff into a single Set: one delete per removed subtree,
/// one JSON update per changed leaf.
pub fn set_request(diff: &Diff) -> ValueResult<SetRequest> {
    let mut update = Vec::with_capacity(diff.updates.len());
    for (path, value) in &diff.updates {
        let json = value.to_json()?;
        update.push(Update {
            path: Some(proto_path(path)),
            val: Some(TypedValue::json(json.to_string().into_bytes())),
            duplicates: 0,
        });
    }
    Ok(SetRequest {
        prefix: None,
        delete: diff.deletes.iter().map(|p| proto_path(p)).collect(),
        replace: Vec::new(),
        update,
    })
}

fn proto_path(parts: &[String]) -> Path {
    Path::new(parts.iter().map(PathElem::new).collect())
}

// ── gNMI ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GnmiDriver {
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl GnmiDriver {
    pub fn new(device: &Device, timeout: Duration) -> Self {
        Self {
            endpoint: device.endpoint(),
            username: device.spec.username.clone(),
            password: device.spec.password.clone(),
            timeout,
        }
    }

    async fn client(&self) -> DeviceResult<GnmiClient<Channel>> {
        let channel = Endpoint::from_shared(format!("http://{}", self.endpoint))
            .map_err(|e| self.connection_error(e))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .connect()
            .await
            .map_err(|e| self.connection_error(e))?;
        Ok(GnmiClient::new(channel))
    }

    fn request<T>(&self, message: T) -> DeviceResult<Request<T>> {
        let mut request = Request::new(message);
        for (key, value) in [("username", &self.username), ("password", &self.password)] {
            if let Some(value) = value {
                let value = MetadataValue::try_from(value.as_str()).map_err(|e| {
                    DeviceError::Rejected {
                        endpoint: self.endpoint.clone(),
                        message: format!("invalid {key}: {e}"),
                    }
                })?;
                request.metadata_mut().insert(key, value);
            }
        }
        Ok(request)
    }

    fn connection_error(&self, e: impl std::fmt::Display) -> DeviceError {
        DeviceError::Connection {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        }
    }

    fn status_error(&self, status: tonic::Status) -> DeviceError {
        match status.code() {
            Code::Unavailable | Code::DeadlineExceeded => self.connection_error(status.message()),
            _ => DeviceError::Rejected {
                endpoint: self.endpoint.clone(),
                message: format!("{:?}: {}", status.code(), status.message()),
            },
        }
    }
}

#[async_trait]
impl DeviceDriver for GnmiDriver {
    async fn get_config(&self) -> DeviceResult<Vec<u8>> {
        let mut client = self.client().await?;
        let request = self.request(GetRequest {
            prefix: None,
            path: vec![Path::default()],
            r#type: 0,
            encoding: Encoding::Json as i32,
        })?;
        let response = client
            .get(request)
            .await
            .map_err(|s| self.status_error(s))?
            .into_inner();
        response
            .notification
            .iter()
            .flat_map(|n| n.update.iter())
            .find_map(|u| u.val.as_ref().and_then(|v| v.json_bytes()))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| DeviceError::Rejected {
                endpoint: self.endpoint.clone(),
                message: "get returned no JSON value".to_string(),
            })
    }

    async fn set(&self, request: SetRequest) -> DeviceResult<SetResponse> {
        debug!(
            endpoint = %self.endpoint,
            updates = request.update.len(),
            deletes = request.delete.len(),
            "sending set"
        );
        let mut client = self.client().await?;
        let request = self.request(request)?;
        let response = client
            .set(request)
            .await
            .map_err(|s| self.status_error(s))?;
        Ok(response.into_inner())
    }
}

/// Builds a [`GnmiDriver`] per device.
#[derive(Debug, Clone)]
pub struct GnmiDriverFactory {
    pub timeout: Duration,
}

impl Default for GnmiDriverFactory {
    fn default() -> Self {
        Self {
            timeout: DEVICE_SET_TIMEOUT,
        }
    }
}

impl DriverFactory for GnmiDriverFactory {
    fn driver(&self, device: &Device) -> Arc<dyn DeviceDriver> {
        Arc::new(GnmiDriver::new(device, self.timeout))
    }
}

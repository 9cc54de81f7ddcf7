//! Per-device subscriber workloads.
//!
//! A subscriber polls its device for the running config and posts every
//! change to the aggregator's `/commit` endpoint, which records it in the
//! status repository. [`TaskWorkloadManager`] runs subscribers as tasks
//! in this process; [`SubscriberSpec::env`] describes the same workload
//! for managers that start it elsewhere.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use netops_aggregator::SaveConfigRequest;
use netops_state::{Device, ObjectKey};
use netops_value::{FormatOptions, build_expr, format};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::driver::{DeviceDriver, DriverFactory};
use crate::error::{DeviceError, DeviceResult};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// What a subscriber for one device needs to run.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberSpec {
    pub key: ObjectKey,
    /// Device `host:port`.
    pub address: String,
    /// Base URL of the aggregator, e.g. `http://aggregator:8080`.
    pub aggregator_url: String,
    pub poll_interval: Duration,
}

impl SubscriberSpec {
    pub fn for_device(device: &Device, aggregator_url: &str, poll_interval: Duration) -> Self {
        Self {
            key: device.key(),
            address: device.endpoint(),
            aggregator_url: aggregator_url.trim_end_matches('/').to_string(),
            poll_interval,
        }
    }

    /// Environment for running the subscriber as a separate process.
    pub fn env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("DEVICE".to_string(), self.key.name.clone()),
            ("NAMESPACE".to_string(), self.key.namespace.clone()),
            ("ADDR".to_string(), self.address.clone()),
            ("AGGREGATOR_URL".to_string(), self.aggregator_url.clone()),
            (
                "POLL_INTERVAL_SECS".to_string(),
                self.poll_interval.as_secs().to_string(),
            ),
        ])
    }

    pub fn commit_url(&self) -> String {
        format!("{}/commit", self.aggregator_url)
    }
}

#[async_trait]
pub trait WorkloadManager: Send + Sync {
    /// Start the subscriber for `device` unless it is already running.
    /// Returns whether one was started.
    async fn ensure(&self, device: &Device) -> DeviceResult<bool>;

    /// Stop the subscriber for `key`. Returns whether one was running.
    async fn remove(&self, key: &ObjectKey) -> DeviceResult<bool>;
}

// ── In-process subscribers ─────────────────────────────────────

pub struct TaskWorkloadManager {
    drivers: Arc<dyn DriverFactory>,
    client: reqwest::Client,
    aggregator_url: String,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
    tasks: Mutex<HashMap<ObjectKey, JoinHandle<()>>>,
}

impl TaskWorkloadManager {
    pub fn new(
        drivers: Arc<dyn DriverFactory>,
        aggregator_url: impl Into<String>,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            drivers,
            client: reqwest::Client::new(),
            aggregator_url: aggregator_url.into(),
            poll_interval,
            shutdown,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live subscribers.
    pub fn running(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.values().filter(|h| !h.is_finished()).count()
    }
}

#[async_trait]
impl WorkloadManager for TaskWorkloadManager {
    async fn ensure(&self, device: &Device) -> DeviceResult<bool> {
        let key = device.key();
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        if tasks.get(&key).is_some_and(|h| !h.is_finished()) {
            return Ok(false);
        }
        let spec = SubscriberSpec::for_device(device, &self.aggregator_url, self.poll_interval);
        debug!(device = %key, env = ?spec.env(), "starting subscriber");
        let subscriber = Subscriber {
            driver: self.drivers.driver(device),
            client: self.client.clone(),
            spec,
            last_sent: None,
        };
        tasks.insert(key, tokio::spawn(subscriber.run(self.shutdown.clone())));
        Ok(true)
    }

    async fn remove(&self, key: &ObjectKey) -> DeviceResult<bool> {
        let handle = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            tasks.remove(key)
        };
        match handle {
            Some(handle) => {
                handle.abort();
                info!(device = %key, "subscriber stopped");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

pub struct Subscriber {
    driver: Arc<dyn DeviceDriver>,
    client: reqwest::Client,
    spec: SubscriberSpec,
    last_sent: Option<String>,
}

impl Subscriber {
    pub fn new(driver: Arc<dyn DeviceDriver>, spec: SubscriberSpec) -> Self {
        Self {
            driver,
            client: reqwest::Client::new(),
            spec,
            last_sent: None,
        }
    }

    /// Poll the device once; post the config when it changed since the
    /// last successful post. Returns whether a post was made.
    pub async fn poll_once(&mut self) -> DeviceResult<bool> {
        let device = &self.spec.key.name;
        let bytes = self.driver.get_config().await?;
        let json: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| DeviceError::Rejected {
                endpoint: self.spec.address.clone(),
                message: format!("malformed config JSON: {e}"),
            })?;
        let value = build_expr(&json).map_err(|e| DeviceError::value(device.clone(), e))?;
        let config = format(&value, FormatOptions::default())
            .map_err(|e| DeviceError::value(device.clone(), e))?;
        if self.last_sent.as_deref() == Some(config.as_str()) {
            return Ok(false);
        }

        let body = SaveConfigRequest {
            device: device.clone(),
            config: config.clone(),
        };
        self.client
            .post(self.spec.commit_url())
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DeviceError::Aggregator(e.to_string()))?;
        debug!(device = %device, bytes = config.len(), "actual config posted");
        self.last_sent = Some(config);
        Ok(true)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(device = %self.spec.key, address = %self.spec.address, "subscriber started");
        loop {
            if let Err(e) = self.poll_once().await {
                warn!(device = %self.spec.key, error = %e, "subscriber poll failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.spec.poll_interval) => {}
                _ = shutdown.changed() => {
                    info!(device = %self.spec.key, "subscriber shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netops_state::DeviceSpec;

    #[test]
    fn subscriber_env() {
        let device = Device::new(
            "net",
            "leaf1",
            DeviceSpec {
                address: "10.0.0.1".into(),
                port: 57400,
                ..Default::default()
            },
        );
        let spec = SubscriberSpec::for_device(&device, "http://agg:8080/", Duration::from_secs(15));
        assert_eq!(spec.commit_url(), "http://agg:8080/commit");
        let env = spec.env();
        assert_eq!(env["DEVICE"], "leaf1");
        assert_eq!(env["NAMESPACE"], "net");
        assert_eq!(env["ADDR"], "10.0.0.1:57400");
        assert_eq!(env["AGGREGATOR_URL"], "http://agg:8080");
        assert_eq!(env["POLL_INTERVAL_SECS"], "15");
    }
}

//! Artifact source URLs.
//!
//! Artifact servers are addressed by a base URL such as
//! `http://source-controller.gitops.svc/netops`. Setting `SOURCE_HOST`
//! (e.g. `localhost:9090`) swaps the host part, which is how fetches are
//! redirected through a port-forward during development.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that overrides the artifact host.
pub const SOURCE_HOST_ENV: &str = "SOURCE_HOST";

#[derive(Debug, Error, PartialEq)]
pub enum SourceError {
    #[error("unsupported source scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid source URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUrl {
    pub scheme: String,
    pub host: String,
    /// Path prefix without leading or trailing `/`.
    pub prefix: String,
}

impl SourceUrl {
    pub fn parse(url: &str) -> Result<Self, SourceError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| SourceError::InvalidUrl(url.to_string()))?;
        if scheme != "http" && scheme != "https" {
            return Err(SourceError::UnsupportedScheme(scheme.to_string()));
        }
        let (host, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if host.is_empty() {
            return Err(SourceError::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }

    /// Replace the host with `host` when one is given.
    pub fn with_source_host(mut self, host: Option<&str>) -> Self {
        if let Some(host) = host.filter(|h| !h.is_empty()) {
            self.host = host.to_string();
        }
        self
    }

    /// Apply the `SOURCE_HOST` environment override.
    pub fn with_env_override(self) -> Self {
        let host = std::env::var(SOURCE_HOST_ENV).ok();
        self.with_source_host(host.as_deref())
    }

    /// URL of `path` inside the artifact for `revision`.
    pub fn artifact_url(&self, revision: &str, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if self.prefix.is_empty() {
            format!("{}://{}/{revision}/{path}", self.scheme, self.host)
        } else {
            format!(
                "{}://{}/{}/{revision}/{path}",
                self.scheme, self.host, self.prefix
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_build() {
        let url = SourceUrl::parse("http://source.svc/netops/").unwrap();
        assert_eq!(url.host, "source.svc");
        assert_eq!(
            url.artifact_url("abc", "devices/d1/config.cue"),
            "http://source.svc/netops/abc/devices/d1/config.cue"
        );
    }

    #[test]
    fn source_host_redirect() {
        let url = SourceUrl::parse("https://source.svc")
            .unwrap()
            .with_source_host(Some("localhost:9090"));
        assert_eq!(url.artifact_url("r1", "x"), "https://localhost:9090/r1/x");

        let unchanged = SourceUrl::parse("https://source.svc")
            .unwrap()
            .with_source_host(Some(""));
        assert_eq!(unchanged.host, "source.svc");
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(
            SourceUrl::parse("s3://bucket/key"),
            Err(SourceError::UnsupportedScheme("s3".to_string()))
        );
        assert!(SourceUrl::parse("nonsense").is_err());
    }
}

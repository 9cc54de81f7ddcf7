//! Listener TLS from [`TlsMode`].

use std::path::Path;

use netops_core::TlsMode;
use tonic::transport::{Certificate, Identity, ServerTlsConfig};
use tracing::info;

use crate::error::{NorthboundError, NorthboundResult};

fn read_pem(path: &Path) -> NorthboundResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| NorthboundError::io(path.display().to_string(), e))
}

/// Build the server TLS config, or `None` when TLS is disabled.
pub fn server_tls_config(mode: &TlsMode) -> NorthboundResult<Option<ServerTlsConfig>> {
    match mode {
        TlsMode::Disabled => Ok(None),
        TlsMode::ServerOnly { cert, key } => {
            let identity = Identity::from_pem(read_pem(cert)?, read_pem(key)?);
            info!(cert = %cert.display(), "TLS enabled");
            Ok(Some(ServerTlsConfig::new().identity(identity)))
        }
        TlsMode::Mutual {
            cert,
            key,
            ca,
            client_auth_optional,
        } => {
            let identity = Identity::from_pem(read_pem(cert)?, read_pem(key)?);
            let ca_root = Certificate::from_pem(read_pem(ca)?);
            info!(
                cert = %cert.display(),
                client_auth_optional,
                "mutual TLS enabled"
            );
            Ok(Some(
                ServerTlsConfig::new()
                    .identity(identity)
                    .client_ca_root(ca_root)
                    .client_auth_optional(*client_auth_optional),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};

    fn write_pair(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let cert_path = dir.join("tls.crt");
        let key_path = dir.join("tls.key");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[test]
    fn disabled_mode_has_no_config() {
        assert!(server_tls_config(&TlsMode::Disabled).unwrap().is_none());
    }

    #[test]
    fn server_and_mutual_modes_load_pem_files() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path());

        let server = TlsMode::ServerOnly {
            cert: cert.clone(),
            key: key.clone(),
        };
        assert!(server_tls_config(&server).unwrap().is_some());

        let mutual = TlsMode::Mutual {
            cert: cert.clone(),
            key,
            ca: cert,
            client_auth_optional: true,
        };
        assert!(server_tls_config(&mutual).unwrap().is_some());
    }

    #[test]
    fn missing_key_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mode = TlsMode::ServerOnly {
            cert: dir.path().join("missing.crt"),
            key: dir.path().join("missing.key"),
        };
        assert!(matches!(
            server_tls_config(&mode),
            Err(NorthboundError::Io { .. })
        ));
    }
}

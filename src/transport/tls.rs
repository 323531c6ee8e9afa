use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;

use crate::types::{Error, Result, TlsConfig};

/// Build the server-side TLS config, or `None` when TLS is not configured.
///
/// TLS 1.2 is the floor and the server's cipher suite order wins.
pub fn load_server_config(tls: &TlsConfig) -> Result<Option<Arc<ServerConfig>>> {
    let (Some(cert_path), Some(key_path)) = (&tls.cert, &tls.key) else {
        if tls.cert.is_some() || tls.key.is_some() {
            return Err(Error::internal(
                "TLS needs both a certificate and a private key",
            ));
        }
        return Ok(None);
    };

    let certs = parse_certificates(&read_pem(cert_path)?)?;
    if certs.is_empty() {
        return Err(Error::internal(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }
    let key = parse_private_key(&read_pem(key_path)?)?;
    server_config(certs, key).map(Some)
}

pub fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.ignore_client_order = true;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::internal(format!("could not read {}: {}", path.display(), e)))
}

/// Parse PEM-encoded certificates.
pub fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::internal(format!("failed to parse certificates: {e}")))
}

/// Parse a PEM-encoded private key.
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_slice(pem)
        .map_err(|e| Error::internal(format!("failed to parse private key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_disabled_without_material() {
        assert!(load_server_config(&TlsConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_half_configured_is_an_error() {
        let tls = TlsConfig {
            cert: Some(PathBuf::from("/nonexistent/cert.pem")),
            key: None,
        };
        assert!(load_server_config(&tls).is_err());
    }

    #[test]
    fn test_loads_generated_certificate() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, certified.cert.pem()).unwrap();
        std::fs::write(&key, certified.key_pair.serialize_pem()).unwrap();

        let config = load_server_config(&TlsConfig {
            cert: Some(cert),
            key: Some(key),
        })
        .unwrap()
        .unwrap();
        assert!(config.ignore_client_order);
        assert_eq!(config.alpn_protocols[0], b"h2".to_vec());
    }

    #[test]
    fn test_garbage_key_rejected() {
        assert!(parse_private_key(b"not a key").is_err());
        assert!(parse_certificates(b"").unwrap().is_empty());
    }
}

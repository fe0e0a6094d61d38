//! TLS configuration and certificate loading.

use std::path::Path;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::{ProxyError, Result};

/// Build a TLS acceptor from PEM certificate and key files.
///
/// Only `http/1.1` is offered over ALPN since connections are served with the
/// HTTP/1.1 stack.
pub async fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    for (what, path) in [("Certificate", cert_path), ("Private key", key_path)] {
        if !path.exists() {
            return Err(ProxyError::Tls {
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{what} file not found: {}", path.display()),
                ),
            });
        }
    }

    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|source| ProxyError::Tls { source })?;

    let mut server_config = (*config.get_inner()).clone();
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

//! Builds a `TlsAcceptor` from a listener's certificate/key paths. The
//! accept loop itself belongs to a protocol front-end (out of scope
//! here); this is only the construction point it would need, grounded on
//! the teacher's own `rustls::ServerConfig` setup for its IMAP listener.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls_pemfile::{certs, private_key};
use tokio_rustls::TlsAcceptor;

use crate::config::ListenerConfig;

pub fn build_acceptor(listener: &ListenerConfig) -> anyhow::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (&listener.tls_cert_path, &listener.tls_key_path) {
        (Some(cert), Some(key)) => (cert, key),
        _ => return Ok(None),
    };

    let loaded_certs = certs(&mut BufReader::new(File::open(cert_path)?)).collect::<Result<Vec<_>, _>>()?;
    let loaded_key = private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;

    let tls_config = rustls::ServerConfig::builder().with_no_client_auth().with_single_cert(loaded_certs, loaded_key)?;
    Ok(Some(TlsAcceptor::from(Arc::new(tls_config))))
}

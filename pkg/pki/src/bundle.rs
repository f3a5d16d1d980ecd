use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("certificate bundle is empty")]
    Empty,
    #[error("malformed PEM: {0}")]
    Malformed(String),
    #[error("no private key found in PEM")]
    MissingKey,
}

/// Parse every certificate in a PEM bundle. A bundle without a single
/// certificate is rejected, as is one containing an unparseable block.
pub fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, BundleError> {
    if pem.iter().all(u8::is_ascii_whitespace) {
        return Err(BundleError::Empty);
    }
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BundleError::Malformed(e.to_string()))?;
    if certs.is_empty() {
        return Err(BundleError::Malformed(
            "no CERTIFICATE blocks found".to_string(),
        ));
    }
    Ok(certs)
}

/// Build a trust store from a PEM bundle; every certificate must be a usable anchor.
pub fn root_store(pem: &[u8]) -> Result<RootCertStore, BundleError> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(pem)? {
        roots
            .add(cert)
            .map_err(|e| BundleError::Malformed(e.to_string()))?;
    }
    Ok(roots)
}

pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, BundleError> {
    let mut reader = pem;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| BundleError::Malformed(e.to_string()))?
        .ok_or(BundleError::MissingKey)
}

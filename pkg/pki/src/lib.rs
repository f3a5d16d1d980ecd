//! Certificates and trust material for hub-to-agent mutual TLS.

pub mod bundle;
pub mod ca;
pub mod identity;
pub mod serving;

use rustls::crypto::CryptoProvider;
use std::sync::Arc;

/// The crypto provider every TLS config in the project is built with.
/// Passed explicitly so no process-wide default has to be installed.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

use parking_lot::RwLock;
use pkg_pki::bundle::{BundleError, parse_certificates, parse_private_key, root_store};
use pkg_pki::ca::CertPair;
use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("client CA bundle is empty")]
    EmptyCa,
    #[error("malformed client CA bundle: {0}")]
    MalformedCa(String),
    #[error("tls configuration error: {0}")]
    Tls(String),
}

impl From<BundleError> for TrustError {
    fn from(e: BundleError) -> Self {
        match e {
            BundleError::Empty => TrustError::EmptyCa,
            BundleError::Malformed(msg) => TrustError::MalformedCa(msg),
            BundleError::MissingKey => TrustError::Tls(e.to_string()),
        }
    }
}

impl From<rustls::Error> for TrustError {
    fn from(e: rustls::Error) -> Self {
        TrustError::Tls(e.to_string())
    }
}

/// The server config handed to handshakes, with the client CA it was built
/// from. Swapped as one unit.
#[derive(Clone)]
pub struct ActiveTls {
    pub generation: u64,
    pub ca: Arc<Vec<u8>>,
    pub config: Arc<ServerConfig>,
}

/// Serving TLS whose client-CA pool can be replaced while connections are
/// open. Each handshake takes a snapshot under the read lock; a rotation
/// builds the new config outside the lock and swaps it in under the write
/// lock. Established connections keep the config they were accepted with.
pub struct DynamicTls {
    provider: Arc<CryptoProvider>,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    active: RwLock<ActiveTls>,
}

impl DynamicTls {
    /// Start without client authentication. Callers install a CA before
    /// serving unless running insecure.
    pub fn new(serving: &CertPair) -> Result<Self, TrustError> {
        let provider = pkg_pki::crypto_provider();
        let chain = parse_certificates(serving.cert_pem.as_bytes())
            .map_err(|e| TrustError::Tls(format!("serving certificate: {}", e)))?;
        let key = parse_private_key(serving.key_pem.as_bytes())
            .map_err(|e| TrustError::Tls(format!("serving key: {}", e)))?;
        let config = build_config(&provider, &chain, &key, None)?;
        Ok(Self {
            provider,
            chain,
            key,
            active: RwLock::new(ActiveTls {
                generation: 0,
                ca: Arc::new(Vec::new()),
                config,
            }),
        })
    }

    /// Replace the client-CA pool. Returns `Ok(false)` when `ca` is
    /// byte-identical to the active bundle. An empty or unparseable bundle
    /// leaves the active config in place.
    pub fn install(&self, ca: &[u8]) -> Result<bool, TrustError> {
        if ca.iter().all(u8::is_ascii_whitespace) {
            return Err(TrustError::EmptyCa);
        }
        if self.active.read().ca.as_slice() == ca {
            return Ok(false);
        }
        let config = build_config(&self.provider, &self.chain, &self.key, Some(ca))?;
        let mut active = self.active.write();
        active.generation += 1;
        active.ca = Arc::new(ca.to_vec());
        active.config = config;
        info!("Client CA installed (generation {})", active.generation);
        Ok(true)
    }

    pub fn snapshot(&self) -> ActiveTls {
        self.active.read().clone()
    }

    pub fn current(&self) -> Arc<ServerConfig> {
        self.active.read().config.clone()
    }

    pub fn requires_client_cert(&self) -> bool {
        !self.active.read().ca.is_empty()
    }
}

fn build_config(
    provider: &Arc<CryptoProvider>,
    chain: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
    client_ca: Option<&[u8]>,
) -> Result<Arc<ServerConfig>, TrustError> {
    let builder = ServerConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;
    let builder = match client_ca {
        Some(ca) => {
            let roots = Arc::new(root_store(ca)?);
            let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider.clone())
                .build()
                .map_err(|e| TrustError::MalformedCa(e.to_string()))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };
    let mut config = builder.with_single_cert(chain.to_vec(), key.clone_key())?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

use pkg_types::clusterinfo::ClusterInfo;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tls::{DynamicTls, TrustError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustPhase {
    Booting,
    Serving,
    Refreshing,
    Terminated,
}

/// Owns the lifecycle of the client-CA trust anchor.
///
/// The receiver of `ClusterInfo` updates is the only path that writes the
/// TLS config: `bootstrap` consumes it until the first usable CA, then
/// `run_rotation` consumes the rest.
pub struct TrustState {
    tls: Arc<DynamicTls>,
    phase: watch::Sender<TrustPhase>,
}

impl TrustState {
    pub fn new(tls: Arc<DynamicTls>) -> Self {
        let (phase, _) = watch::channel(TrustPhase::Booting);
        Self { tls, phase }
    }

    pub fn tls(&self) -> Arc<DynamicTls> {
        self.tls.clone()
    }

    pub fn phase(&self) -> TrustPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrustPhase> {
        self.phase.subscribe()
    }

    /// Bring the trust anchor up far enough to serve.
    ///
    /// Insecure agents serve without client authentication. A client-CA file
    /// is installed directly and must parse. Otherwise the first `ClusterInfo`
    /// whose `loggingCA` parses becomes the pool; empty or malformed payloads
    /// are logged and skipped. Returns `Ok(false)` if shut down first.
    pub async fn bootstrap(
        &self,
        client_ca: Option<&[u8]>,
        insecure: bool,
        updates: &mut mpsc::Receiver<ClusterInfo>,
        cancel: &CancellationToken,
    ) -> Result<bool, TrustError> {
        if insecure {
            warn!("Serving without client certificate authentication (insecure)");
            self.phase.send_replace(TrustPhase::Serving);
            return Ok(true);
        }
        if let Some(ca) = client_ca {
            self.tls.install(ca)?;
            info!("Client CA loaded from file");
            self.phase.send_replace(TrustPhase::Serving);
            return Ok(true);
        }

        info!("Waiting for the hub to publish a logging CA");
        loop {
            let info = tokio::select! {
                _ = cancel.cancelled() => None,
                info = updates.recv() => info,
            };
            let Some(info) = info else {
                self.phase.send_replace(TrustPhase::Terminated);
                return Ok(false);
            };
            match self.tls.install(&info.spec.logging_ca) {
                Ok(_) => {
                    info!("Client CA received from ClusterInfo {}", info.metadata.name);
                    self.phase.send_replace(TrustPhase::Serving);
                    return Ok(true);
                }
                Err(e) => warn!("Ignoring ClusterInfo {}: {}", info.metadata.name, e),
            }
        }
    }

    /// Apply one observed CA bundle. Byte-identical bundles are a no-op; a
    /// rejected bundle leaves the active config in place.
    pub fn refresh(&self, ca: &[u8]) -> Result<bool, TrustError> {
        if self.tls.snapshot().ca.as_slice() == ca {
            return Ok(false);
        }
        self.phase.send_replace(TrustPhase::Refreshing);
        let result = self.tls.install(ca);
        self.phase.send_replace(TrustPhase::Serving);
        result
    }

    /// Consume `ClusterInfo` updates until shutdown.
    pub async fn run_rotation(&self, mut updates: mpsc::Receiver<ClusterInfo>, cancel: CancellationToken) {
        loop {
            let info = tokio::select! {
                _ = cancel.cancelled() => break,
                info = updates.recv() => info,
            };
            let Some(info) = info else { break };
            match self.refresh(&info.spec.logging_ca) {
                Ok(true) => info!("Client CA rotated from ClusterInfo {}", info.metadata.name),
                Ok(false) => debug!("Client CA unchanged"),
                Err(e) => warn!("Rejected CA rotation, keeping previous config: {}", e),
            }
        }
        self.phase.send_replace(TrustPhase::Terminated);
        info!("CA rotation stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_pki::ca::ClusterCA;
    use pkg_pki::serving::self_signed_serving_cert;

    fn state() -> TrustState {
        let pair = self_signed_serving_cert(&["localhost".to_string()]).unwrap();
        TrustState::new(Arc::new(DynamicTls::new(&pair).unwrap()))
    }

    fn info_with(ca: &[u8]) -> ClusterInfo {
        let mut info = ClusterInfo::new("cluster1");
        info.spec.logging_ca = ca.to_vec();
        info
    }

    #[tokio::test]
    async fn bootstrap_waits_for_a_usable_ca() {
        let trust = state();
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let ca = ClusterCA::new("hub").unwrap();

        tx.send(info_with(b"")).await.unwrap();
        tx.send(info_with(b"not a certificate")).await.unwrap();
        tx.send(info_with(ca.ca_cert_pem().as_bytes())).await.unwrap();

        assert_eq!(trust.phase(), TrustPhase::Booting);
        assert!(trust.bootstrap(None, false, &mut rx, &cancel).await.unwrap());
        assert_eq!(trust.phase(), TrustPhase::Serving);
        assert_eq!(trust.tls().snapshot().ca.as_slice(), ca.ca_cert_pem().as_bytes());
    }

    #[tokio::test]
    async fn bootstrap_honors_shutdown() {
        let trust = state();
        let (_tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!trust.bootstrap(None, false, &mut rx, &cancel).await.unwrap());
        assert_eq!(trust.phase(), TrustPhase::Terminated);
    }

    #[tokio::test]
    async fn bootstrap_shortcuts() {
        let (_tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let insecure = state();
        assert!(insecure.bootstrap(None, true, &mut rx, &cancel).await.unwrap());
        assert!(!insecure.tls().requires_client_cert());

        let from_file = state();
        let ca = ClusterCA::new("hub").unwrap();
        assert!(from_file
            .bootstrap(Some(ca.ca_cert_pem().as_bytes()), false, &mut rx, &cancel)
            .await
            .unwrap());
        assert!(from_file.tls().requires_client_cert());

        let bad_file = state();
        assert!(bad_file.bootstrap(Some(b"junk"), false, &mut rx, &cancel).await.is_err());
    }

    #[tokio::test]
    async fn rotation_skips_bad_and_equal_bundles() {
        let trust = Arc::new(state());
        let p1 = ClusterCA::new("p1").unwrap();
        let p2 = ClusterCA::new("p2").unwrap();
        assert!(trust.refresh(p1.ca_cert_pem().as_bytes()).unwrap());

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = {
            let trust = trust.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { trust.run_rotation(rx, cancel).await })
        };

        tx.send(info_with(p1.ca_cert_pem().as_bytes())).await.unwrap();
        tx.send(info_with(b"garbage")).await.unwrap();
        tx.send(info_with(p2.ca_cert_pem().as_bytes())).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let snap = trust.tls().snapshot();
        assert_eq!(snap.ca.as_slice(), p2.ca_cert_pem().as_bytes());
        assert_eq!(snap.generation, 2);
        assert_eq!(trust.phase(), TrustPhase::Terminated);
    }
}

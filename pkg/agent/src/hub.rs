use chrono::Utc;
use pkg_client::http::HttpClusterClient;
use pkg_client::{ApiResource, ClusterClient, Credential};
use pkg_types::Resource;
use pkg_types::clusterinfo::ClusterInfo;
use pkg_types::config::KubeconfigFile;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::trust::TrustPhase;

/// Build an API client from a kubeconfig. A CA file is required unless
/// verification is explicitly skipped.
pub fn client_from_kubeconfig(
    kubeconfig: &KubeconfigFile,
    timeout: Duration,
) -> anyhow::Result<Arc<dyn ClusterClient>> {
    let ca = match (&kubeconfig.ca_file, kubeconfig.insecure_skip_tls_verify) {
        (_, true) => Vec::new(),
        (Some(path), false) => std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read CA file {}: {}", path, e))?,
        (None, false) => anyhow::bail!(
            "kubeconfig for {} needs ca-file or insecure-skip-tls-verify",
            kubeconfig.server
        ),
    };
    let credential = Credential {
        token: kubeconfig.token.clone(),
        impersonate: None,
    };
    let client = HttpClusterClient::new(&kubeconfig.server, &ca, &credential, timeout)?;
    Ok(Arc::new(client))
}

/// The agent's view of its own `ClusterInfo` on the hub.
pub struct HubClient {
    client: Arc<dyn ClusterClient>,
    cluster: String,
    api: ApiResource,
}

impl HubClient {
    pub fn new(client: Arc<dyn ClusterClient>, cluster: &str) -> Self {
        Self {
            client,
            cluster: cluster.to_string(),
            api: ApiResource::new(
                ClusterInfo::GROUP,
                ClusterInfo::VERSION,
                ClusterInfo::PLURAL,
                ClusterInfo::KIND,
                ClusterInfo::NAMESPACED,
            ),
        }
    }

    pub async fn get_cluster_info(&self) -> anyhow::Result<ClusterInfo> {
        let value = self
            .client
            .get(&self.api, Some(&self.cluster), &self.cluster)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Publish where the log server can be reached.
    pub async fn report_endpoint(&self, mut info: ClusterInfo, endpoint: &str) -> anyhow::Result<ClusterInfo> {
        info.status.logging_endpoint = endpoint.to_string();
        info.status.last_report_time = Some(Utc::now());
        let value = self
            .client
            .replace_status(&self.api, Some(&self.cluster), &self.cluster, &serde_json::to_value(&info)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Poll the hub every `every`, forwarding each observed `ClusterInfo` to
    /// the trust state when there is one. Once the server is serving, the
    /// logging endpoint is reported whenever the hub's copy differs.
    pub async fn run_poller(
        self: Arc<Self>,
        every: Duration,
        endpoint: String,
        updates: Option<mpsc::Sender<ClusterInfo>>,
        phase: watch::Receiver<TrustPhase>,
        cancel: CancellationToken,
    ) {
        info!("Polling hub for ClusterInfo {} every {:?}", self.cluster, every);
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let info = match self.get_cluster_info().await {
                Ok(info) => info,
                Err(e) => {
                    warn!("Failed to fetch ClusterInfo {}: {}", self.cluster, e);
                    continue;
                }
            };

            let serving = matches!(*phase.borrow(), TrustPhase::Serving | TrustPhase::Refreshing);
            let stale = info.status.logging_endpoint != endpoint;
            if let Some(updates) = &updates {
                if updates.send(info.clone()).await.is_err() {
                    debug!("CA rotation stopped, stopping hub poller");
                    break;
                }
            }
            if serving && stale {
                match self.report_endpoint(info, &endpoint).await {
                    Ok(_) => info!("Reported logging endpoint {}", endpoint),
                    Err(e) => warn!("Failed to report logging endpoint: {}", e),
                }
            }
        }
    }
}

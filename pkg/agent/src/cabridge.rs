use pkg_client::{ApiResource, ClusterClient, ClusterError};
use pkg_constants::api::{ANNOTATION_INJECT_CABUNDLE, SERVICE_CA_KEY};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The current service CA and a client that trusts it.
#[derive(Clone, Debug)]
pub struct ServiceCa {
    pub bundle: Vec<u8>,
    pub client: reqwest::Client,
}

/// Asks the spoke's service-CA injector for its bundle through an annotated
/// ConfigMap, and builds clients that trust it for scraping in-cluster
/// endpoints.
pub struct ServiceCaBridge {
    spoke: Arc<dyn ClusterClient>,
    namespace: String,
    name: String,
    api: ApiResource,
}

impl ServiceCaBridge {
    pub fn new(spoke: Arc<dyn ClusterClient>, namespace: &str, name: &str) -> Self {
        Self {
            spoke,
            namespace: namespace.to_string(),
            name: name.to_string(),
            api: ApiResource::new("", "v1", "configmaps", "ConfigMap", true),
        }
    }

    /// Create the annotated ConfigMap unless it already exists.
    pub async fn ensure_configmap(&self) -> Result<(), ClusterError> {
        let body = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
                "annotations": {ANNOTATION_INJECT_CABUNDLE: "true"},
            },
        });
        match self.spoke.create(&self.api, Some(&self.namespace), &body).await {
            Ok(_) => {
                info!("Requested service CA via ConfigMap {}/{}", self.namespace, self.name);
                Ok(())
            }
            Err(ClusterError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// The injected bundle, if the injector has filled it in yet.
    pub async fn current_ca(&self) -> Result<Option<Vec<u8>>, ClusterError> {
        let cm = self.spoke.get(&self.api, Some(&self.namespace), &self.name).await?;
        Ok(injected_ca(&cm))
    }

    /// Keep `publish` in step with the injected bundle until `cancel` fires.
    /// Every change of the bundle publishes a fresh client; an unusable
    /// bundle keeps the previous one.
    pub async fn run(
        self,
        every: Duration,
        timeout: Duration,
        publish: watch::Sender<Option<ServiceCa>>,
        cancel: CancellationToken,
    ) {
        let mut requested = false;
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            if !requested {
                match self.ensure_configmap().await {
                    Ok(()) => requested = true,
                    Err(e) => {
                        warn!("Failed to request service CA: {}", e);
                        continue;
                    }
                }
            }
            let bundle = match self.current_ca().await {
                Ok(Some(bundle)) => bundle,
                Ok(None) => {
                    debug!("Service CA not injected into {}/{} yet", self.namespace, self.name);
                    continue;
                }
                Err(e) => {
                    debug!("Failed to read ConfigMap {}/{}: {}", self.namespace, self.name, e);
                    continue;
                }
            };
            let unchanged = publish
                .borrow()
                .as_ref()
                .is_some_and(|current| current.bundle == bundle);
            if unchanged {
                continue;
            }
            match scrape_client(&bundle, timeout) {
                Ok(client) => {
                    info!("Service CA from {}/{} loaded", self.namespace, self.name);
                    publish.send_replace(Some(ServiceCa { bundle, client }));
                }
                Err(e) => warn!("Unusable service CA in {}/{}: {}", self.namespace, self.name, e),
            }
        }
    }
}

fn injected_ca(cm: &Value) -> Option<Vec<u8>> {
    cm.pointer(&format!("/data/{}", SERVICE_CA_KEY))
        .and_then(Value::as_str)
        .filter(|ca| !ca.trim().is_empty())
        .map(|ca| ca.as_bytes().to_vec())
}

/// An HTTPS client that trusts only `ca`.
pub fn scrape_client(ca: &[u8], timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let certs = reqwest::Certificate::from_pem_bundle(ca)?;
    if certs.is_empty() {
        anyhow::bail!("service CA bundle holds no certificates");
    }
    let mut builder = reqwest::Client::builder().timeout(timeout);
    for cert in certs {
        builder = builder.add_root_certificate(cert);
    }
    Ok(builder.build()?)
}

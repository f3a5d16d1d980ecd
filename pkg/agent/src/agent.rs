use anyhow::Context;
use pkg_constants::api::CONTAINER_LOGS_PATH;
use pkg_constants::paths::{COLLECT_INTERVAL_SECS, SERVICE_ACCOUNT_TOKEN_FILE, SERVICE_CA_POLL_SECS};
use pkg_pki::serving::load_or_generate;
use pkg_types::config::load_kubeconfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::{Authorizer, ChainAuthorizer, ReviewAuthorizer, StaticAuthorizer};
use crate::cabridge::ServiceCaBridge;
use crate::collector::ResourceCollector;
use crate::handlers::{AgentState, create_agent_router};
use crate::hub::{HubClient, client_from_kubeconfig};
use crate::server;
use crate::tls::DynamicTls;
use crate::trust::TrustState;

/// ConfigMap the service-CA injector fills in.
const SERVICE_CA_CONFIGMAP: &str = "mcf-agent-service-ca";

/// Pending `ClusterInfo` observations between the poller and the trust state.
const CLUSTER_INFO_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Address the server binds to.
    pub address: String,
    /// Address the hub dials; defaults to `address`.
    pub agent_address: Option<String>,
    pub port: u16,
    pub cert_directory: PathBuf,
    pub tls_cert_file: Option<String>,
    pub tls_private_key_file: Option<String>,
    pub client_ca_file: Option<String>,
    pub insecure: bool,
    pub cluster_name: String,
    pub hub_kubeconfig: Option<String>,
    pub spoke_kubeconfig: Option<String>,
    pub hub_poll: Duration,
    pub request_timeout: Duration,
    pub service_ca_namespace: Option<String>,
    /// Prometheus queried for capacity once the service CA is known.
    pub prometheus_url: String,
}

impl AgentOptions {
    /// URL the hub uses to reach the log server.
    pub fn endpoint(&self) -> String {
        let host = self.agent_address.as_deref().unwrap_or(&self.address);
        format!("https://{}:{}", host, self.port)
    }

    fn serving_hosts(&self) -> Vec<String> {
        let mut hosts = vec![self.address.clone()];
        hosts.extend(self.agent_address.iter().filter(|a| **a != self.address).cloned());
        hosts
    }
}

/// Run the agent until `cancel` fires or the listener fails.
pub async fn run(options: AgentOptions, cancel: CancellationToken) -> anyhow::Result<()> {
    let serving = load_or_generate(
        options.tls_cert_file.as_deref(),
        options.tls_private_key_file.as_deref(),
        &options.cert_directory,
        &options.serving_hosts(),
    )?;
    let tls = Arc::new(DynamicTls::new(&serving)?);
    let trust = Arc::new(TrustState::new(tls.clone()));

    let spoke_path = options
        .spoke_kubeconfig
        .as_deref()
        .context("--spoke-kubeconfig is required to serve container logs")?;
    let spoke = client_from_kubeconfig(&load_kubeconfig(spoke_path)?, options.request_timeout)?;

    let client_ca = match &options.client_ca_file {
        Some(path) => Some(std::fs::read(path).with_context(|| format!("Failed to read client CA {}", path))?),
        None => None,
    };
    if options.hub_kubeconfig.is_none() && client_ca.is_none() && !options.insecure {
        anyhow::bail!("without --hub-kubeconfig either --client-ca-file or --insecure is required");
    }

    let hub = match &options.hub_kubeconfig {
        Some(path) => Some(client_from_kubeconfig(&load_kubeconfig(path)?, options.request_timeout)?),
        None => None,
    };

    let mut tasks = Vec::new();
    let (tx, mut rx) = mpsc::channel(CLUSTER_INFO_BUFFER);
    if let Some(hub) = &hub {
        let poller = Arc::new(HubClient::new(hub.clone(), &options.cluster_name));
        // insecure agents never rotate, so nothing consumes updates
        let updates = (!options.insecure).then(|| tx.clone());
        tasks.push(tokio::spawn(poller.run_poller(
            options.hub_poll,
            options.endpoint(),
            updates,
            trust.subscribe(),
            cancel.clone(),
        )));
    }
    drop(tx);

    if let Some(namespace) = options.service_ca_namespace.clone() {
        let (ca_tx, ca_rx) = watch::channel(None);
        let bridge = ServiceCaBridge::new(spoke.clone(), &namespace, SERVICE_CA_CONFIGMAP);
        tasks.push(tokio::spawn(bridge.run(
            Duration::from_secs(SERVICE_CA_POLL_SECS),
            options.request_timeout,
            ca_tx,
            cancel.clone(),
        )));
        if let Some(hub) = &hub {
            let token = std::fs::read_to_string(SERVICE_ACCOUNT_TOKEN_FILE)
                .ok()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());
            let collector = ResourceCollector::new(
                spoke.clone(),
                hub.clone(),
                &options.cluster_name,
                &options.prometheus_url,
                token,
                ca_rx,
            );
            tasks.push(tokio::spawn(
                collector.run(Duration::from_secs(COLLECT_INTERVAL_SECS), cancel.clone()),
            ));
        }
    }

    if !trust
        .bootstrap(client_ca.as_deref(), options.insecure, &mut rx, &cancel)
        .await?
    {
        info!("Shut down before a client CA arrived");
        return Ok(());
    }
    if !options.insecure {
        let trust = trust.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { trust.run_rotation(rx, cancel).await }));
    }

    let authorizer: Option<Arc<dyn Authorizer>> = if options.insecure {
        None
    } else {
        Some(Arc::new(ChainAuthorizer::new(vec![
            Arc::new(StaticAuthorizer::default()),
            Arc::new(ReviewAuthorizer::new(spoke.clone())),
        ])))
    };
    let router = create_agent_router(AgentState {
        logs: spoke,
        authorizer,
    });

    let addr = format!("{}:{}", options.address, options.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Serving {} on https://{}", CONTAINER_LOGS_PATH, addr);

    let result = server::serve(listener, tls, router, cancel.clone()).await;
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    result
}

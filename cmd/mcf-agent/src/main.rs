use clap::Parser;
use pkg_agent::{AgentOptions, run};
use pkg_constants::controller::DEFAULT_REQUEST_TIMEOUT_SECS;
use pkg_constants::paths::{
    DEFAULT_AGENT_CERT_DIR, DEFAULT_AGENT_CONFIG, DEFAULT_AGENT_PORT, DEFAULT_HUB_POLL_SECS, DEFAULT_PROMETHEUS_URL,
};
use pkg_types::config::{AgentConfigFile, load_config_file};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mcf-agent", about = "mcf agent: serves container logs to the hub over mutual TLS")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_AGENT_CONFIG)]
    config: String,

    /// IP address to serve on (0.0.0.0 for all interfaces)
    #[arg(long)]
    address: Option<String>,

    /// Address the hub uses to reach this agent
    #[arg(long)]
    agent_address: Option<String>,

    /// Port to serve on
    #[arg(long)]
    port: Option<u16>,

    /// Directory for the generated self-signed serving certificate
    #[arg(long)]
    cert_directory: Option<String>,

    /// Serving certificate (with intermediates); generated when unset
    #[arg(long)]
    tls_cert_file: Option<String>,

    /// Private key matching --tls-cert-file
    #[arg(long)]
    tls_private_key_file: Option<String>,

    /// Client CA bundle trusted until the hub delivers one
    #[arg(long)]
    client_ca_file: Option<String>,

    /// Serve without client certificates or authorization
    #[arg(long)]
    insecure: bool,

    /// Name of the managed cluster this agent runs for
    #[arg(long)]
    cluster_name: Option<String>,

    /// Kubeconfig for the hub API
    #[arg(long)]
    hub_kubeconfig: Option<String>,

    /// Kubeconfig for the managed cluster's API server
    #[arg(long)]
    spoke_kubeconfig: Option<String>,

    /// Seconds between two reads of this cluster's ClusterInfo
    #[arg(long)]
    hub_poll_seconds: Option<u64>,

    /// Namespace in which to request the spoke's service CA
    #[arg(long)]
    service_ca_namespace: Option<String>,

    /// Prometheus queried for node capacity, trusted through the service CA
    #[arg(long)]
    prometheus_url: Option<String>,

    /// Log output: plain or json
    #[arg(long)]
    log_format: Option<String>,
}

fn init_tracing(format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        "plain" => tracing_subscriber::fmt().with_env_filter(filter).init(),
        "json" => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        other => anyhow::bail!("unknown log format {:?} (expected plain or json)", other),
    }
    Ok(())
}

/// Merge: CLI args > config file > defaults
fn options(cli: Cli, file: AgentConfigFile) -> anyhow::Result<AgentOptions> {
    let cluster_name = cli
        .cluster_name
        .or(file.cluster_name)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| anyhow::anyhow!("--cluster-name is required"))?;
    Ok(AgentOptions {
        address: cli.address.or(file.address).unwrap_or_else(|| "0.0.0.0".to_string()),
        agent_address: cli.agent_address.or(file.agent_address),
        port: cli.port.or(file.port).unwrap_or(DEFAULT_AGENT_PORT),
        cert_directory: PathBuf::from(
            cli.cert_directory
                .or(file.cert_directory)
                .unwrap_or_else(|| DEFAULT_AGENT_CERT_DIR.to_string()),
        ),
        tls_cert_file: cli.tls_cert_file.or(file.tls_cert_file),
        tls_private_key_file: cli.tls_private_key_file.or(file.tls_private_key_file),
        client_ca_file: cli.client_ca_file.or(file.client_ca_file),
        insecure: cli.insecure || file.insecure.unwrap_or(false),
        cluster_name,
        hub_kubeconfig: cli.hub_kubeconfig.or(file.hub_kubeconfig),
        spoke_kubeconfig: cli.spoke_kubeconfig.or(file.spoke_kubeconfig),
        hub_poll: Duration::from_secs(
            cli.hub_poll_seconds
                .or(file.hub_poll_seconds)
                .unwrap_or(DEFAULT_HUB_POLL_SECS),
        ),
        request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        service_ca_namespace: cli.service_ca_namespace.or(file.service_ca_namespace),
        prometheus_url: cli
            .prometheus_url
            .or(file.prometheus_url)
            .unwrap_or_else(|| DEFAULT_PROMETHEUS_URL.to_string()),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file_cfg: AgentConfigFile = load_config_file(&cli.config)?;
    init_tracing(cli.log_format.as_deref().or(file_cfg.log_format.as_deref()).unwrap_or("plain"))?;
    info!("Config file: {}", cli.config);

    let options = options(cli, file_cfg)?;
    info!("Starting mcf-agent for cluster: {}", options.cluster_name);
    info!("  Listen:   {}:{}", options.address, options.port);
    info!("  Endpoint: {}", options.endpoint());
    if options.insecure {
        warn!("Running in insecure mode: no client certificates, no authorization");
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down agent");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
        }
    });

    if let Err(e) = run(options, cancel).await {
        error!("Agent failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

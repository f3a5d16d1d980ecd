use clap::Parser;
use pkg_api::server::{ServerConfig, start_server};
use pkg_constants::controller::{DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_VIEW_INTERVAL_SECS, DEFAULT_WORKERS};
use pkg_constants::paths::{DEFAULT_HUB_CONFIG, DEFAULT_HUB_DATA_DIR, DEFAULT_HUB_PORT};
use pkg_types::config::{HubConfigFile, load_config_file};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mcf-hub", about = "mcf hub: cluster API, work dispatcher and permission aggregator")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_HUB_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory for SlateDB state storage and the hub CA
    #[arg(long)]
    data_dir: Option<String>,

    /// Workers reconciling ClusterActions
    #[arg(long)]
    action_workers: Option<usize>,

    /// Workers reconciling ManagedClusterViews
    #[arg(long)]
    view_workers: Option<usize>,

    /// Default seconds between two view refreshes
    #[arg(long)]
    view_resync_seconds: Option<u64>,

    /// Timeout of requests to managed clusters
    #[arg(long)]
    request_timeout_seconds: Option<u64>,

    /// Forward the requesting user of actions to managed clusters
    #[arg(long)]
    enable_impersonation: bool,

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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: HubConfigFile = load_config_file(&cli.config)?;
    init_tracing(cli.log_format.as_deref().or(file_cfg.log_format.as_deref()).unwrap_or("plain"))?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let port = cli.port.or(file_cfg.port).unwrap_or(DEFAULT_HUB_PORT);
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_HUB_DATA_DIR.to_string());
    let action_workers = cli.action_workers.or(file_cfg.action_workers).unwrap_or(DEFAULT_WORKERS);
    let view_workers = cli.view_workers.or(file_cfg.view_workers).unwrap_or(DEFAULT_WORKERS);
    let view_resync = cli
        .view_resync_seconds
        .or(file_cfg.view_resync_seconds)
        .unwrap_or(DEFAULT_VIEW_INTERVAL_SECS);
    let request_timeout = cli
        .request_timeout_seconds
        .or(file_cfg.request_timeout_seconds)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    let enable_impersonation = cli.enable_impersonation || file_cfg.enable_impersonation.unwrap_or(false);

    info!("Starting mcf-hub");
    info!("  Port:           {}", port);
    info!("  Data dir:       {}", data_dir);
    info!("  Tokens:         {}", file_cfg.tokens.len());
    info!("  Cluster tokens: {}", file_cfg.cluster_tokens.len());
    info!("  Workers:        actions={} views={}", action_workers, view_workers);
    info!("  Impersonation:  {}", enable_impersonation);

    let config = ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], port)),
        data_dir,
        tokens: file_cfg.tokens,
        cluster_tokens: file_cfg.cluster_tokens,
        action_workers,
        view_workers,
        view_resync: Duration::from_secs(view_resync),
        request_timeout: Duration::from_secs(request_timeout),
        enable_impersonation,
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down hub");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
        }
    });

    if let Err(e) = start_server(config, cancel).await {
        error!("Hub failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

//! Filesystem path constants.

// ─── Hub ──────────────────────────────────────────────────────────────────

/// Default config file path for the hub.
pub const DEFAULT_HUB_CONFIG: &str = "/etc/mcf/hub.yaml";

/// Default data directory for the hub state store.
pub const DEFAULT_HUB_DATA_DIR: &str = "/tmp/mcf-data";

/// Directory under the data dir where the hub CA is kept.
pub const HUB_PKI_SUBDIR: &str = "pki";

/// Default hub API port.
pub const DEFAULT_HUB_PORT: u16 = 6443;

// ─── Agent ────────────────────────────────────────────────────────────────

/// Default config file path for the agent.
pub const DEFAULT_AGENT_CONFIG: &str = "/etc/mcf/agent.yaml";

/// Directory where a generated serving certificate is written.
pub const DEFAULT_AGENT_CERT_DIR: &str = "/tmp/mcf/cert";

/// Default port of the agent HTTPS server.
pub const DEFAULT_AGENT_PORT: u16 = 443;

/// File names of the generated serving pair inside the cert directory.
pub const AGENT_CERT_FILE: &str = "apiserver.crt";
pub const AGENT_KEY_FILE: &str = "apiserver.key";

/// Seconds between two reads of the cluster's `ClusterInfo` on the hub.
pub const DEFAULT_HUB_POLL_SECS: u64 = 10;

/// In-cluster Prometheus queried for node capacity.
pub const DEFAULT_PROMETHEUS_URL: &str = "https://prometheus-k8s.openshift-monitoring.svc:9091";

/// Bearer token presented to Prometheus, when mounted.
pub const SERVICE_ACCOUNT_TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Seconds between two capacity collections.
pub const COLLECT_INTERVAL_SECS: u64 = 30;

/// Seconds between two reads of the service-CA ConfigMap.
pub const SERVICE_CA_POLL_SECS: u64 = 5;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hub configuration file (YAML).
///
/// Example `hub.yaml`:
/// ```yaml
/// port: 6443
/// data-dir: /var/lib/mcf/data
/// tokens:
///   - token: s3cr3t
///     user: alice
///     groups: [devs]
/// cluster-tokens:
///   cluster1: eyJhbGciOi...
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    /// Static bearer tokens and the identity each one authenticates as.
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
    /// Credential the hub presents to each managed cluster's API server.
    #[serde(default, alias = "cluster-tokens")]
    pub cluster_tokens: BTreeMap<String, String>,
    #[serde(default, alias = "action-workers")]
    pub action_workers: Option<usize>,
    #[serde(default, alias = "view-workers")]
    pub view_workers: Option<usize>,
    #[serde(default, alias = "view-resync-seconds")]
    pub view_resync_seconds: Option<u64>,
    #[serde(default, alias = "request-timeout-seconds")]
    pub request_timeout_seconds: Option<u64>,
    #[serde(default, alias = "enable-impersonation")]
    pub enable_impersonation: Option<bool>,
    #[serde(default, alias = "log-format")]
    pub log_format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub user: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Agent configuration file (YAML). Keys mirror the agent's flags.
///
/// Example `agent.yaml`:
/// ```yaml
/// cluster-name: cluster1
/// port: 8443
/// hub-kubeconfig: /etc/mcf/hub.kubeconfig
/// spoke-kubeconfig: /etc/mcf/spoke.kubeconfig
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfigFile {
    #[serde(default)]
    pub address: Option<String>,
    /// Address reported to the hub when it differs from the bind address.
    #[serde(default, alias = "agent-address")]
    pub agent_address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "cert-directory")]
    pub cert_directory: Option<String>,
    #[serde(default, alias = "tls-cert-file")]
    pub tls_cert_file: Option<String>,
    #[serde(default, alias = "tls-private-key-file")]
    pub tls_private_key_file: Option<String>,
    #[serde(default, alias = "client-ca-file")]
    pub client_ca_file: Option<String>,
    #[serde(default)]
    pub insecure: Option<bool>,
    #[serde(default, alias = "cluster-name")]
    pub cluster_name: Option<String>,
    #[serde(default, alias = "hub-kubeconfig")]
    pub hub_kubeconfig: Option<String>,
    #[serde(default, alias = "spoke-kubeconfig")]
    pub spoke_kubeconfig: Option<String>,
    #[serde(default, alias = "hub-poll-seconds")]
    pub hub_poll_seconds: Option<u64>,
    /// Namespace of the ConfigMap requesting the spoke's service CA.
    #[serde(default, alias = "service-ca-namespace")]
    pub service_ca_namespace: Option<String>,
    #[serde(default, alias = "prometheus-url")]
    pub prometheus_url: Option<String>,
    #[serde(default, alias = "log-format")]
    pub log_format: Option<String>,
}

/// Minimal client configuration for reaching an API server.
///
/// Example:
/// ```yaml
/// server: https://hub.example.com:6443
/// token: s3cr3t
/// ca-file: /etc/mcf/hub-ca.crt
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KubeconfigFile {
    pub server: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, alias = "ca-file")]
    pub ca_file: Option<String>,
    #[serde(default, alias = "insecure-skip-tls-verify")]
    pub insecure_skip_tls_verify: bool,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Load a kubeconfig; unlike [`load_config_file`] a missing file is an error.
pub fn load_kubeconfig(path: &str) -> anyhow::Result<KubeconfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read kubeconfig {}: {}", path, e))?;
    let config: KubeconfigFile = serde_yaml::from_str(&content)?;
    if config.server.is_empty() {
        anyhow::bail!("kubeconfig {} has no server", path);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_config_accepts_dashed_keys() {
        let yaml = r#"
port: 7443
data-dir: /var/lib/mcf
tokens:
  - token: abc
    user: alice
    groups: [devs]
cluster-tokens:
  cluster1: t1
enable-impersonation: true
"#;
        let cfg: HubConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.port, Some(7443));
        assert_eq!(cfg.data_dir.as_deref(), Some("/var/lib/mcf"));
        assert_eq!(cfg.tokens[0].groups, vec!["devs"]);
        assert_eq!(cfg.cluster_tokens["cluster1"], "t1");
        assert_eq!(cfg.enable_impersonation, Some(true));
    }

    #[test]
    fn missing_config_file_is_default() {
        let cfg: AgentConfigFile = load_config_file("/nonexistent/mcf/agent.yaml").unwrap();
        assert!(cfg.cluster_name.is_none());
    }
}

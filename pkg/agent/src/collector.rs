use anyhow::Context;
use pkg_client::{ApiResource, ClusterClient};
use pkg_constants::api::{
    CAPACITY_CORE, CAPACITY_CORE_WORKER, CAPACITY_SOCKET, CAPACITY_SOCKET_WORKER, LABEL_WORKER_ROLE,
};
use pkg_types::Resource;
use pkg_types::cluster::ManagedCluster;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cabridge::ServiceCa;

/// Metrics summed into the cluster's capacity, with the keys they land under.
const METRICS: &[(&str, &str, &str)] = &[
    ("machine_cpu_cores", CAPACITY_CORE, CAPACITY_CORE_WORKER),
    ("machine_cpu_sockets", CAPACITY_SOCKET, CAPACITY_SOCKET_WORKER),
];

/// Reports node capacity from the spoke's Prometheus into the hub's
/// `ManagedCluster` status, trusting whatever service CA is current.
pub struct ResourceCollector {
    spoke: Arc<dyn ClusterClient>,
    hub: Arc<dyn ClusterClient>,
    cluster: String,
    prometheus: String,
    token: Option<String>,
    service_ca: watch::Receiver<Option<ServiceCa>>,
    nodes: ApiResource,
    clusters: ApiResource,
}

impl ResourceCollector {
    pub fn new(
        spoke: Arc<dyn ClusterClient>,
        hub: Arc<dyn ClusterClient>,
        cluster: &str,
        prometheus: &str,
        token: Option<String>,
        service_ca: watch::Receiver<Option<ServiceCa>>,
    ) -> Self {
        Self {
            spoke,
            hub,
            cluster: cluster.to_string(),
            prometheus: prometheus.trim_end_matches('/').to_string(),
            token,
            service_ca,
            nodes: ApiResource::new("", "v1", "nodes", "Node", false),
            clusters: ApiResource::new(
                ManagedCluster::GROUP,
                ManagedCluster::VERSION,
                ManagedCluster::PLURAL,
                ManagedCluster::KIND,
                ManagedCluster::NAMESPACED,
            ),
        }
    }

    /// One collection. Returns whether the hub's capacity was rewritten;
    /// nothing happens before a service CA is available.
    pub async fn collect_once(&self) -> anyhow::Result<bool> {
        let Some(client) = self.service_ca.borrow().as_ref().map(|ca| ca.client.clone()) else {
            debug!("No service CA yet, skipping capacity collection");
            return Ok(false);
        };

        let value = self.hub.get(&self.clusters, None, &self.cluster).await?;
        let mut cluster: ManagedCluster = serde_json::from_value(value)?;
        let mut capacity = cluster.status.capacity.clone();
        for (metric, total_key, worker_key) in METRICS {
            match self.query(&client, metric).await {
                Ok(Some((total, worker))) => {
                    capacity.insert(total_key.to_string(), total.to_string());
                    capacity.insert(worker_key.to_string(), worker.to_string());
                }
                Ok(None) => debug!("Prometheus has no samples for {}", metric),
                Err(e) => warn!("Failed to query {}: {:#}", metric, e),
            }
        }
        if capacity == cluster.status.capacity {
            return Ok(false);
        }

        cluster.status.capacity = capacity;
        self.hub
            .replace_status(&self.clusters, None, &self.cluster, &serde_json::to_value(&cluster)?)
            .await?;
        info!("Updated capacity of cluster {}", self.cluster);
        Ok(true)
    }

    /// Sum an instant-vector metric over all nodes and over worker nodes.
    /// `None` when the sum is zero.
    async fn query(&self, client: &reqwest::Client, metric: &str) -> anyhow::Result<Option<(u64, u64)>> {
        let mut request = client
            .get(format!("{}/api/v1/query", self.prometheus))
            .query(&[("query", metric)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let body: Value = request.send().await?.error_for_status()?.json().await?;
        if body["status"] != "success" {
            anyhow::bail!("query failed: {}", body["error"]);
        }
        if body["data"]["resultType"] != "vector" {
            anyhow::bail!("unexpected result type {}", body["data"]["resultType"]);
        }

        let (mut total, mut worker) = (0.0, 0.0);
        for sample in body["data"]["result"].as_array().into_iter().flatten() {
            let value: f64 = sample["value"][1]
                .as_str()
                .context("sample without a value")?
                .parse()?;
            let node = sample["metric"]["node"].as_str().unwrap_or_default();
            match self.is_worker(node).await {
                Ok(is_worker) => {
                    total += value;
                    if is_worker {
                        worker += value;
                    }
                }
                Err(e) => warn!("Failed to read node {:?}: {}", node, e),
            }
        }
        if total == 0.0 {
            return Ok(None);
        }
        Ok(Some((total as u64, worker as u64)))
    }

    async fn is_worker(&self, node: &str) -> anyhow::Result<bool> {
        let node = self.spoke.get(&self.nodes, None, node).await?;
        Ok(node
            .pointer("/metadata/labels")
            .and_then(Value::as_object)
            .is_some_and(|labels| labels.contains_key(LABEL_WORKER_ROLE)))
    }

    pub async fn run(self, every: Duration, cancel: CancellationToken) {
        info!("Collecting capacity of cluster {} every {:?}", self.cluster, every);
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.collect_once().await {
                warn!("Capacity collection failed: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use pkg_client::memory::{MemoryCluster, Op};
    use pkg_pki::ca::ClusterCA;
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    async fn prometheus() -> String {
        let app = Router::new().route(
            "/api/v1/query",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let result = match q.get("query").map(String::as_str) {
                    Some("machine_cpu_cores") => json!([
                        {"metric": {"node": "n1"}, "value": [1.0, "8"]},
                        {"metric": {"node": "n2"}, "value": [1.0, "4"]},
                    ]),
                    Some("machine_cpu_sockets") => json!([
                        {"metric": {"node": "n1"}, "value": [1.0, "1"]},
                        {"metric": {"node": "n2"}, "value": [1.0, "1"]},
                    ]),
                    _ => json!([]),
                };
                Json(json!({"status": "success", "data": {"resultType": "vector", "result": result}}))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    fn clusters() -> (Arc<MemoryCluster>, Arc<MemoryCluster>) {
        let spoke = Arc::new(MemoryCluster::new());
        spoke.put_object(
            "nodes",
            None,
            json!({"metadata": {"name": "n1", "labels": {LABEL_WORKER_ROLE: ""}}}),
        );
        spoke.put_object("nodes", None, json!({"metadata": {"name": "n2"}}));
        let hub = Arc::new(MemoryCluster::new());
        hub.put_object(
            ManagedCluster::PLURAL,
            None,
            serde_json::to_value(ManagedCluster::new("cluster1")).unwrap(),
        );
        (spoke, hub)
    }

    #[tokio::test]
    async fn waits_for_a_service_ca() {
        let (spoke, hub) = clusters();
        let (_tx, rx) = watch::channel(None);
        let collector = ResourceCollector::new(spoke, hub.clone(), "cluster1", "http://unused", None, rx);
        assert!(!collector.collect_once().await.unwrap());
        assert!(hub.calls().is_empty());
    }

    #[tokio::test]
    async fn reports_capacity_through_the_current_client() {
        let (spoke, hub) = clusters();
        let url = prometheus().await;
        let (tx, rx) = watch::channel(None);
        let collector = ResourceCollector::new(spoke, hub.clone(), "cluster1", &url, Some("t".into()), rx);

        let ca = ClusterCA::new("service-ca").unwrap();
        let bundle = ca.ca_cert_pem().as_bytes().to_vec();
        let client = crate::cabridge::scrape_client(&bundle, Duration::from_secs(5)).unwrap();
        tx.send_replace(Some(ServiceCa { bundle, client }));

        assert!(collector.collect_once().await.unwrap());
        let cluster: ManagedCluster =
            serde_json::from_value(hub.object(ManagedCluster::PLURAL, None, "cluster1").unwrap()).unwrap();
        assert_eq!(cluster.status.capacity[CAPACITY_CORE], "12");
        assert_eq!(cluster.status.capacity[CAPACITY_CORE_WORKER], "8");
        assert_eq!(cluster.status.capacity[CAPACITY_SOCKET], "2");
        assert_eq!(cluster.status.capacity[CAPACITY_SOCKET_WORKER], "1");

        // unchanged capacity is not written again
        assert!(!collector.collect_once().await.unwrap());
        assert_eq!(hub.count(Op::ReplaceStatus), 1);
    }
}

use axum::{
    Extension,
    body::Body,
    extract::{Path, RawQuery, State},
    http::header,
    response::Response,
};
use pkg_constants::api::CONTAINER_LOGS_PATH;
use pkg_constants::rbac::{HUB_GROUP, HUB_LOG_PROXY_USER};
use pkg_pki::ca::ClusterCA;
use pkg_types::clusterinfo::ClusterInfo;
use pkg_types::identity::UserInfo;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info};

use crate::AppState;
use crate::error::{ApiError, ApiResult};

/// HTTPS client the hub uses to reach agents. It presents a certificate
/// issued by the hub CA, the bundle every agent is told to trust.
pub struct LogProxy {
    client: reqwest::Client,
}

impl LogProxy {
    pub fn new(ca: &ClusterCA, connect_timeout: Duration) -> anyhow::Result<Self> {
        let pair = ca.issue_client_cert(HUB_LOG_PROXY_USER, Some(HUB_GROUP))?;
        let identity = reqwest::Identity::from_pem(format!("{}{}", pair.cert_pem, pair.key_pem).as_bytes())?;
        let client = reqwest::Client::builder()
            .identity(identity)
            // agents serve self-signed certificates
            .danger_accept_invalid_certs(true)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Forward a log read to the agent at `endpoint`, streaming its answer
    /// back with the agent's status code.
    pub async fn forward(
        &self,
        endpoint: &str,
        namespace: &str,
        pod: &str,
        container: &str,
        query: Option<&str>,
    ) -> ApiResult<Response> {
        let url = agent_url(endpoint, namespace, pod, container, query)?;
        debug!("Proxying logs from {}", url);

        let upstream = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::BadGateway(format!("agent at {} unreachable: {}", endpoint, e)))?;

        let mut response = Response::builder()
            .status(upstream.status())
            .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
            .header(header::CACHE_CONTROL, "no-store");
        if let Some(content_type) = upstream.headers().get(header::CONTENT_TYPE) {
            response = response.header(header::CONTENT_TYPE, content_type.clone());
        }
        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| ApiError::BadGateway(e.to_string()))
    }
}

/// `{endpoint}/containerLogs/{namespace}/{pod}/{container}?{query}`, with
/// every segment percent-encoded.
fn agent_url(
    endpoint: &str,
    namespace: &str,
    pod: &str,
    container: &str,
    query: Option<&str>,
) -> ApiResult<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| ApiError::BadGateway(format!("invalid agent endpoint {}: {}", endpoint, e)))?;
    url.path_segments_mut()
        .map_err(|_| ApiError::BadGateway(format!("agent endpoint {} cannot carry a path", endpoint)))?
        .pop_if_empty()
        .push(CONTAINER_LOGS_PATH.trim_start_matches('/'))
        .extend([namespace, pod, container]);
    url.set_query(query.filter(|q| !q.is_empty()));
    Ok(url)
}

/// GET /api/v1/clusters/{cluster}/logs/{ns}/{pod}/{container}
///
/// Callers need a `managedcluster:admin` or `managedcluster:view` grant on
/// the cluster. Query parameters are passed through to the agent.
pub async fn proxy_logs(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
    Path((cluster, namespace, pod, container)): Path<(String, String, String, String)>,
    RawQuery(query): RawQuery,
) -> ApiResult<Response> {
    if state.permissions.cluster_grant(&user, &cluster)?.is_none() {
        return Err(ApiError::Forbidden(format!(
            "user {} cannot read logs on cluster {}",
            user.name, cluster
        )));
    }

    let cluster_info = state.store.get::<ClusterInfo>(Some(&cluster), &cluster).await?;
    let endpoint = cluster_info.status.logging_endpoint;
    if endpoint.is_empty() {
        return Err(ApiError::Unavailable(format!(
            "cluster {} has not reported a logging endpoint",
            cluster
        )));
    }

    info!("Proxying logs of {}/{}/{} on cluster {} for {}", namespace, pod, container, cluster, user.name);
    state
        .logs
        .forward(&endpoint, &namespace, &pod, &container, query.as_deref())
        .await
}

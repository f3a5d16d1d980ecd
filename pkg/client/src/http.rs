use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Certificate, Client, Method, RequestBuilder, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use pkg_types::cluster::ManagedCluster;
use pkg_types::identity::UserInfo;

use crate::client::{ApiResource, ByteStream, ClusterClient, LogOptions};
use crate::error::ClusterError;
use crate::pool::{ClientFactory, Credential};

/// `ClusterClient` speaking the Kubernetes REST dialect over HTTPS.
pub struct HttpClusterClient {
    http: Client,
    base: String,
    token: Option<String>,
    impersonate: Option<UserInfo>,
    timeout: Duration,
}

impl HttpClusterClient {
    pub fn new(
        base_url: &str,
        ca_bundle: &[u8],
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Self, ClusterError> {
        let mut builder = Client::builder().connect_timeout(timeout);
        if ca_bundle.is_empty() {
            builder = builder.danger_accept_invalid_certs(true);
        } else {
            let certs = Certificate::from_pem_bundle(ca_bundle)
                .map_err(|e| ClusterError::Invalid(format!("bad CA bundle: {}", e)))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
            token: credential.token.clone(),
            impersonate: credential.impersonate.clone(),
            timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.http.request(method, format!("{}{}", self.base, path));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(user) = &self.impersonate {
            req = req.header("Impersonate-User", &user.name);
            for group in &user.groups {
                req = req.header("Impersonate-Group", group);
            }
        }
        req
    }

    async fn json(&self, req: RequestBuilder) -> Result<Value, ClusterError> {
        let resp = check(req.timeout(self.timeout).send().await?).await?;
        Ok(resp.json::<Value>().await?)
    }
}

async fn check(resp: Response) -> Result<Response, ClusterError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClusterError::from_response(status.as_u16(), &body))
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn get(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError> {
        let path = api.path(namespace, Some(name));
        debug!("GET {}{}", self.base, path);
        self.json(self.request(Method::GET, &path)).await
    }

    async fn create(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        body: &Value,
    ) -> Result<Value, ClusterError> {
        let path = api.path(namespace, None);
        debug!("POST {}{}", self.base, path);
        self.json(self.request(Method::POST, &path).json(body)).await
    }

    async fn replace(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> Result<Value, ClusterError> {
        let path = api.path(namespace, Some(name));
        debug!("PUT {}{}", self.base, path);
        self.json(self.request(Method::PUT, &path).json(body)).await
    }

    async fn replace_status(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> Result<Value, ClusterError> {
        let path = format!("{}/status", api.path(namespace, Some(name)));
        debug!("PUT {}{}", self.base, path);
        self.json(self.request(Method::PUT, &path).json(body)).await
    }

    async fn delete(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError> {
        let path = api.path(namespace, Some(name));
        debug!("DELETE {}{}", self.base, path);
        self.json(self.request(Method::DELETE, &path)).await
    }

    async fn logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        options: &LogOptions,
    ) -> Result<ByteStream, ClusterError> {
        let path = format!("/api/v1/namespaces/{}/pods/{}/log", namespace, pod);
        let mut query: Vec<(&str, String)> = vec![("container", container.to_string())];
        if let Some(n) = options.tail_lines {
            query.push(("tailLines", n.to_string()));
        }
        if let Some(s) = options.since_seconds {
            query.push(("sinceSeconds", s.to_string()));
        }
        for (key, on) in [
            ("follow", options.follow),
            ("previous", options.previous),
            ("timestamps", options.timestamps),
        ] {
            if on {
                query.push((key, "true".to_string()));
            }
        }
        // Followed logs are open-ended; only the connect is bounded.
        let resp = check(self.request(Method::GET, &path).query(&query).send().await?).await?;
        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClusterError::from))
            .boxed())
    }
}

/// Builds `HttpClusterClient`s from a cluster's first client config.
pub struct HttpClientFactory {
    timeout: Duration,
}

impl HttpClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ClientFactory for HttpClientFactory {
    fn build(
        &self,
        cluster: &ManagedCluster,
        credential: &Credential,
    ) -> Result<Arc<dyn ClusterClient>, ClusterError> {
        let config = cluster.spec.client_configs.first().ok_or_else(|| {
            ClusterError::Invalid(format!(
                "cluster {} has no client config",
                cluster.metadata.name
            ))
        })?;
        let client = HttpClusterClient::new(&config.url, &config.ca_bundle, credential, self.timeout)?;
        Ok(Arc::new(client))
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClusterError;

/// A resolved API resource on a managed cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiResource {
    pub group: String,
    pub version: String,
    /// Lowercase plural used in URLs, e.g. `deployments`.
    pub resource: String,
    pub kind: String,
    pub namespaced: bool,
}

impl ApiResource {
    pub fn new(group: &str, version: &str, resource: &str, kind: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
            kind: kind.to_string(),
            namespaced,
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// REST path of the collection or, with `name`, of one object.
    pub fn path(&self, namespace: Option<&str>, name: Option<&str>) -> String {
        let mut path = if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        };
        if self.namespaced {
            if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
                path.push_str("/namespaces/");
                path.push_str(ns);
            }
        }
        path.push('/');
        path.push_str(&self.resource);
        if let Some(name) = name {
            path.push('/');
            path.push_str(name);
        }
        path
    }
}

/// Query options of a container log request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail_lines: Option<i64>,
    #[serde(default)]
    pub follow: bool,
    #[serde(default)]
    pub previous: bool,
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_seconds: Option<i64>,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, ClusterError>>;

/// Thread-safe access to one managed cluster's API under one credential.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError>;

    async fn create(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        body: &Value,
    ) -> Result<Value, ClusterError>;

    /// Full replace; `body.metadata.resourceVersion` guards against lost updates.
    async fn replace(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> Result<Value, ClusterError>;

    /// Replace only the `status` of an object through its status subresource.
    async fn replace_status(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> Result<Value, ClusterError>;

    async fn delete(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError>;

    async fn logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        options: &LogOptions,
    ) -> Result<ByteStream, ClusterError>;
}

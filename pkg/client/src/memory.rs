//! In-memory cluster used by tests of the dispatcher and the agent.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pkg_types::cluster::ManagedCluster;

use crate::client::{ApiResource, ByteStream, ClusterClient, LogOptions};
use crate::error::ClusterError;
use crate::pool::{ClientFactory, Credential};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Replace,
    ReplaceStatus,
    Delete,
    Logs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: Op,
    pub resource: String,
    pub namespace: Option<String>,
    pub name: String,
}

type ObjKey = (String, Option<String>, String);
type LogKey = (String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjKey, Value>,
    logs: HashMap<LogKey, Vec<Bytes>>,
    failures: HashMap<Op, VecDeque<ClusterError>>,
    calls: Vec<Call>,
    rv: u64,
    latency: Duration,
}

#[derive(Default)]
pub struct MemoryCluster {
    inner: Mutex<Inner>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error returned by the next call of `op`.
    pub fn fail_next(&self, op: Op, err: ClusterError) {
        self.inner.lock().failures.entry(op).or_default().push_back(err);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = latency;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.inner.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Highest number of calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn object(&self, resource: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
        let key = (resource.to_string(), namespace.map(String::from), name.to_string());
        self.inner.lock().objects.get(&key).cloned()
    }

    /// Store an object as if another writer created or changed it.
    pub fn put_object(&self, resource: &str, namespace: Option<&str>, mut value: Value) {
        let name = value
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut inner = self.inner.lock();
        stamp(&mut inner, &mut value, None);
        let key = (resource.to_string(), namespace.map(String::from), name);
        inner.objects.insert(key, value);
    }

    pub fn remove_object(&self, resource: &str, namespace: Option<&str>, name: &str) {
        let key = (resource.to_string(), namespace.map(String::from), name.to_string());
        self.inner.lock().objects.remove(&key);
    }

    pub fn set_logs(&self, namespace: &str, pod: &str, container: &str, chunks: Vec<Bytes>) {
        let key = (namespace.to_string(), pod.to_string(), container.to_string());
        self.inner.lock().logs.insert(key, chunks);
    }

    async fn enter(
        &self,
        op: Op,
        api: Option<&ApiResource>,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<InFlight<'_>, ClusterError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        let (latency, failure) = {
            let mut inner = self.inner.lock();
            inner.calls.push(Call {
                op,
                resource: api.map(|a| a.resource.clone()).unwrap_or_default(),
                namespace: namespace.map(String::from),
                name: name.to_string(),
            });
            let failure = inner.failures.get_mut(&op).and_then(VecDeque::pop_front);
            (inner.latency, failure)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(guard),
        }
    }
}

fn scoped<'a>(api: &ApiResource, namespace: Option<&'a str>) -> Option<&'a str> {
    if api.namespaced { namespace } else { None }
}

fn stamp(inner: &mut Inner, value: &mut Value, previous: Option<&Value>) {
    inner.rv += 1;
    let rv = inner.rv.to_string();
    if !value.get("metadata").is_some_and(Value::is_object) {
        value["metadata"] = json!({});
    }
    let meta = &mut value["metadata"];
    meta["resourceVersion"] = Value::String(rv);
    for field in ["uid", "creationTimestamp"] {
        let kept = previous.and_then(|p| p.pointer(&format!("/metadata/{}", field)));
        if let Some(kept) = kept {
            meta[field] = kept.clone();
        } else if meta.get(field).is_none() {
            meta[field] = match field {
                "uid" => Value::String(uuid::Uuid::new_v4().to_string()),
                _ => Value::String(chrono::Utc::now().to_rfc3339()),
            };
        }
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError> {
        let ns = scoped(api, namespace);
        let _guard = self.enter(Op::Get, Some(api), ns, name).await?;
        self.object(&api.resource, ns, name)
            .ok_or_else(|| ClusterError::NotFound(format!("{} \"{}\" not found", api.resource, name)))
    }

    async fn create(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        body: &Value,
    ) -> Result<Value, ClusterError> {
        let ns = scoped(api, namespace);
        let name = body
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ClusterError::Invalid("metadata.name is required".to_string()))?
            .to_string();
        let _guard = self.enter(Op::Create, Some(api), ns, &name).await?;
        let key = (api.resource.clone(), ns.map(String::from), name.clone());
        let mut inner = self.inner.lock();
        if inner.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!(
                "{} \"{}\" already exists",
                api.resource, name
            )));
        }
        let mut value = body.clone();
        if let Some(ns) = ns {
            value["metadata"]["namespace"] = Value::String(ns.to_string());
        }
        stamp(&mut inner, &mut value, None);
        inner.objects.insert(key, value.clone());
        Ok(value)
    }

    async fn replace(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> Result<Value, ClusterError> {
        let ns = scoped(api, namespace);
        let _guard = self.enter(Op::Replace, Some(api), ns, name).await?;
        let key = (api.resource.clone(), ns.map(String::from), name.to_string());
        let mut inner = self.inner.lock();
        let current = inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("{} \"{}\" not found", api.resource, name)))?;
        let wanted = body.pointer("/metadata/resourceVersion").and_then(Value::as_str);
        let have = current.pointer("/metadata/resourceVersion").and_then(Value::as_str);
        if let Some(wanted) = wanted.filter(|rv| !rv.is_empty()) {
            if Some(wanted) != have {
                return Err(ClusterError::Conflict(format!(
                    "the object {} \"{}\" has been modified",
                    api.resource, name
                )));
            }
        }
        let mut value = body.clone();
        stamp(&mut inner, &mut value, Some(&current));
        inner.objects.insert(key, value.clone());
        Ok(value)
    }

    async fn replace_status(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> Result<Value, ClusterError> {
        let ns = scoped(api, namespace);
        let _guard = self.enter(Op::ReplaceStatus, Some(api), ns, name).await?;
        let key = (api.resource.clone(), ns.map(String::from), name.to_string());
        let mut inner = self.inner.lock();
        let current = inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("{} \"{}\" not found", api.resource, name)))?;
        let mut value = current.clone();
        value["status"] = body.get("status").cloned().unwrap_or(Value::Null);
        stamp(&mut inner, &mut value, Some(&current));
        inner.objects.insert(key, value.clone());
        Ok(value)
    }

    async fn delete(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError> {
        let ns = scoped(api, namespace);
        let _guard = self.enter(Op::Delete, Some(api), ns, name).await?;
        let key = (api.resource.clone(), ns.map(String::from), name.to_string());
        self.inner
            .lock()
            .objects
            .remove(&key)
            .ok_or_else(|| ClusterError::NotFound(format!("{} \"{}\" not found", api.resource, name)))
    }

    async fn logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        _options: &LogOptions,
    ) -> Result<ByteStream, ClusterError> {
        let _guard = self.enter(Op::Logs, None, Some(namespace), pod).await?;
        let key = (namespace.to_string(), pod.to_string(), container.to_string());
        let chunks = self.inner.lock().logs.get(&key).cloned().ok_or_else(|| {
            ClusterError::NotFound(format!("container {} in pod {}/{} not found", container, namespace, pod))
        })?;
        Ok(futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

/// Hands out registered `MemoryCluster`s by cluster name and records the
/// credentials it was asked to build with.
#[derive(Default)]
pub struct MemoryClientFactory {
    clusters: Mutex<HashMap<String, Arc<MemoryCluster>>>,
    built: Mutex<Vec<(String, Credential)>>,
}

impl MemoryClientFactory {
    pub fn insert(&self, name: &str, cluster: Arc<MemoryCluster>) {
        self.clusters.lock().insert(name.to_string(), cluster);
    }

    pub fn credentials(&self) -> Vec<(String, Credential)> {
        self.built.lock().clone()
    }
}

impl ClientFactory for MemoryClientFactory {
    fn build(
        &self,
        cluster: &ManagedCluster,
        credential: &Credential,
    ) -> Result<Arc<dyn ClusterClient>, ClusterError> {
        let name = &cluster.metadata.name;
        let found = self.clusters.lock().get(name).cloned();
        let found = found.ok_or_else(|| ClusterError::Transport(format!("no route to cluster {}", name)))?;
        self.built.lock().push((name.clone(), credential.clone()));
        Ok(found)
    }
}

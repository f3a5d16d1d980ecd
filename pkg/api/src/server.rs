use axum::{Router, middleware, routing::get};
use pkg_client::ClientPool;
use pkg_client::http::HttpClientFactory;
use pkg_constants::api::{CLUSTERVIEW_GROUP, PROJECT_VERSION, USERPERMISSION_VERSION};
use pkg_constants::paths::HUB_PKI_SUBDIR;
use pkg_controllers::{ActionReconciler, ClusterInfoReconciler, Context, Controller, ViewReconciler};
use pkg_permission::PermissionAggregator;
use pkg_pki::ca::ClusterCA;
use pkg_state::ObjectStore;
use pkg_state::client::StateStore;
use pkg_types::action::ClusterAction;
use pkg_types::cluster::ManagedCluster;
use pkg_types::clusterinfo::ClusterInfo;
use pkg_types::config::TokenEntry;
use pkg_types::namespace::Namespace;
use pkg_types::permission::ClusterPermission;
use pkg_types::rbac::{ClusterRole, ClusterRoleBinding, RoleBinding};
use pkg_types::view::ManagedClusterView;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::AppState;
use crate::auth::{TokenAuthenticator, auth_middleware};
use crate::handlers::logs::{LogProxy, proxy_logs};
use crate::handlers::permission::{get_user_permission, list_projects, list_user_permissions};
use crate::handlers::resources::resource_routes;
use crate::handlers::healthz;
use crate::request_id::request_id_middleware;

/// Common name of the CA that signs the hub's proxy certificates.
const HUB_CA_NAME: &str = "mcf-hub-ca";

/// The ClusterInfo reconciler only touches one object per cluster.
const CLUSTER_INFO_WORKERS: usize = 2;

/// Server configuration passed from the binary's CLI.
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_dir: String,
    pub tokens: Vec<TokenEntry>,
    pub cluster_tokens: BTreeMap<String, String>,
    pub action_workers: usize,
    pub view_workers: usize,
    pub view_resync: Duration,
    pub request_timeout: Duration,
    pub enable_impersonation: bool,
}

/// All hub routes. Everything except `/healthz` requires a bearer token.
pub fn build_router(state: AppState) -> Router {
    let mut api = Router::new();
    api = resource_routes::<ManagedCluster>(api);
    api = resource_routes::<Namespace>(api);
    api = resource_routes::<ClusterInfo>(api);
    api = resource_routes::<ClusterAction>(api);
    api = resource_routes::<ManagedClusterView>(api);
    api = resource_routes::<ClusterPermission>(api);
    api = resource_routes::<ClusterRole>(api);
    api = resource_routes::<ClusterRoleBinding>(api);
    api = resource_routes::<RoleBinding>(api);

    let api = api
        .route(
            &format!("/apis/{}/{}/projects", CLUSTERVIEW_GROUP, PROJECT_VERSION),
            get(list_projects),
        )
        .route(
            &format!("/apis/{}/{}/userpermissions", CLUSTERVIEW_GROUP, USERPERMISSION_VERSION),
            get(list_user_permissions),
        )
        .route(
            &format!("/apis/{}/{}/userpermissions/{{name}}", CLUSTERVIEW_GROUP, USERPERMISSION_VERSION),
            get(get_user_permission),
        )
        .route(
            "/api/v1/clusters/{cluster}/logs/{ns}/{pod}/{container}",
            get(proxy_logs),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(api)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Open the store, start the dispatcher and the permission aggregator, and
/// serve the API until `cancel` fires.
pub async fn start_server(config: ServerConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let store = ObjectStore::open(StateStore::new(&config.data_dir).await?).await?;
    let ca = ClusterCA::load_or_create(&Path::new(&config.data_dir).join(HUB_PKI_SUBDIR), HUB_CA_NAME)?;

    if config.tokens.is_empty() {
        warn!("No bearer tokens configured; every API request will be rejected");
    }

    let pool = Arc::new(ClientPool::new(
        Arc::new(HttpClientFactory::new(config.request_timeout)),
        config.cluster_tokens,
    ));
    let ctx = Context::new(store.clone(), pool)
        .with_impersonation(config.enable_impersonation)
        .with_view_interval(config.view_resync);

    let mut tasks = vec![
        Controller::new(store.clone(), Arc::new(ActionReconciler::new(ctx.clone())), config.action_workers)
            .start(cancel.clone()),
        Controller::new(store.clone(), Arc::new(ViewReconciler::new(ctx.clone())), config.view_workers)
            .start(cancel.clone()),
        Controller::new(
            store.clone(),
            Arc::new(ClusterInfoReconciler::new(ctx, ca.ca_cert_pem().as_bytes().to_vec())),
            CLUSTER_INFO_WORKERS,
        )
        .start(cancel.clone()),
    ];

    let permissions = Arc::new(PermissionAggregator::new(store.clone()));
    tasks.extend(permissions.start(cancel.clone()));

    let state = AppState {
        store,
        permissions,
        authenticator: Arc::new(TokenAuthenticator::new(&config.tokens)),
        logs: Arc::new(LogProxy::new(&ca, config.request_timeout)?),
    };
    let app = build_router(state);

    info!("Starting API server on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await;

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    info!("API server stopped");
    Ok(served?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use bytes::Bytes;
    use futures_util::StreamExt;
    use pkg_agent::auth::{Authorizer, StaticAuthorizer};
    use pkg_agent::handlers::{AgentState, create_agent_router};
    use pkg_agent::server::serve;
    use pkg_agent::tls::DynamicTls;
    use pkg_client::memory::MemoryCluster;
    use pkg_constants::api::{ACTION_GROUP, REQUEST_ID_HEADER, VIEW_GROUP};
    use pkg_constants::rbac::{ACTION_RESOURCE, VIEW_RESOURCE};
    use pkg_pki::serving::self_signed_serving_cert;
    use pkg_types::rbac::{PolicyRule, Subject};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct Hub {
        app: Router,
        store: ObjectStore,
        ca: ClusterCA,
        cancel: CancellationToken,
    }

    async fn hub() -> Hub {
        let store = ObjectStore::in_memory().await.unwrap();
        let ca = ClusterCA::new("test-hub-ca").unwrap();
        let permissions = Arc::new(PermissionAggregator::new(store.clone()));
        let cancel = CancellationToken::new();
        permissions.start(cancel.clone());
        permissions.wait_synced().await;

        let tokens = vec![TokenEntry {
            token: "alice-token".to_string(),
            user: "alice".to_string(),
            groups: vec!["devs".to_string()],
        }];
        let state = AppState {
            store: store.clone(),
            permissions,
            authenticator: Arc::new(TokenAuthenticator::new(&tokens)),
            logs: Arc::new(LogProxy::new(&ca, Duration::from_secs(5)).unwrap()),
        };
        Hub {
            app: build_router(state),
            store,
            ca,
            cancel,
        }
    }

    impl Hub {
        async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let (status, bytes) = self.raw(method, uri, body.map(|b| b.to_string())).await;
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }

        async fn raw(&self, method: Method, uri: &str, body: Option<String>) -> (StatusCode, Bytes) {
            let resp = self.response(method, uri, body).await;
            let status = resp.status();
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            (status, bytes)
        }

        async fn response(&self, method: Method, uri: &str, body: Option<String>) -> axum::response::Response {
            let mut req = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, "Bearer alice-token");
            if body.is_some() {
                req = req.header(header::CONTENT_TYPE, "application/json");
            }
            let req = req.body(body.map(Body::from).unwrap_or_else(Body::empty)).unwrap();
            self.app.clone().oneshot(req).await.unwrap()
        }

        /// Hub RBAC making alice an admin of `cluster`.
        async fn grant_admin(&self, cluster: &str) {
            self.store.create(ManagedCluster::new(cluster)).await.unwrap();
            self.store
                .create(ClusterRole::new(
                    "fleet-operator",
                    vec![
                        PolicyRule::new(&[ACTION_GROUP], &[ACTION_RESOURCE], &["create"]),
                        PolicyRule::new(&[VIEW_GROUP], &[VIEW_RESOURCE], &["create"]),
                    ],
                ))
                .await
                .unwrap();
            self.store
                .create(RoleBinding::new(cluster, "ops", "fleet-operator", vec![Subject::user("alice")]))
                .await
                .unwrap();
        }
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    const PERMISSIONS: &str = "/apis/rbac.mcf.io/v1alpha1/namespaces/c1/clusterpermissions";

    fn permission_body(name: &str) -> Value {
        json!({
            "metadata": {"name": name, "labels": {"team": "virt"}},
            "spec": {
                "roleBindings": [{
                    "subject": {"kind": "User", "name": "alice"},
                    "roleRef": {"name": "kubevirt.io:view"},
                    "namespace": "proj-a"
                }]
            }
        })
    }

    #[tokio::test]
    async fn healthz_is_public_and_tagged() {
        let hub = hub().await;
        let resp = hub
            .app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn api_requires_a_known_token() {
        let hub = hub().await;
        for auth in [None, Some("Bearer wrong")] {
            let mut req = Request::get("/apis/cluster.mcf.io/v1/managedclusters");
            if let Some(auth) = auth {
                req = req.header(header::AUTHORIZATION, auth);
            }
            let resp = hub.app.clone().oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let status: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(status["kind"], "Status");
            assert_eq!(status["code"], 401);
        }
    }

    #[tokio::test]
    async fn namespaced_crud_round() {
        let hub = hub().await;

        let (code, created) = hub.call(Method::POST, PERMISSIONS, Some(permission_body("vm"))).await;
        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(created["metadata"]["namespace"], "c1");
        assert_eq!(created["kind"], "ClusterPermission");
        let rv = created["metadata"]["resourceVersion"].as_str().unwrap().to_string();

        let (code, dup) = hub.call(Method::POST, PERMISSIONS, Some(permission_body("vm"))).await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert_eq!(dup["reason"], "AlreadyExists");

        let (code, got) = hub.call(Method::GET, &format!("{}/vm", PERMISSIONS), None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(got["spec"]["roleBindings"][0]["namespace"], "proj-a");

        let mut replacement = got.clone();
        replacement["spec"]["roleBindings"][0]["namespace"] = json!("proj-b");
        let (code, updated) = hub
            .call(Method::PUT, &format!("{}/vm", PERMISSIONS), Some(replacement.clone()))
            .await;
        assert_eq!(code, StatusCode::OK);
        assert_ne!(updated["metadata"]["resourceVersion"].as_str().unwrap(), rv);

        // the same body again carries a stale resourceVersion
        let (code, stale) = hub
            .call(Method::PUT, &format!("{}/vm", PERMISSIONS), Some(replacement))
            .await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert_eq!(stale["reason"], "Conflict");

        let (code, list) = hub
            .call(Method::GET, &format!("{}?labelSelector=team%3Dvirt", PERMISSIONS), None)
            .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(list["kind"], "ClusterPermissionList");
        assert_eq!(list["items"].as_array().unwrap().len(), 1);
        let (_, none) = hub
            .call(Method::GET, &format!("{}?labelSelector=team%3Dother", PERMISSIONS), None)
            .await;
        assert!(none["items"].as_array().unwrap().is_empty());

        let (_, everywhere) = hub.call(Method::GET, "/apis/rbac.mcf.io/v1alpha1/clusterpermissions", None).await;
        assert_eq!(everywhere["items"].as_array().unwrap().len(), 1);

        let (code, _) = hub.call(Method::DELETE, &format!("{}/vm", PERMISSIONS), None).await;
        assert_eq!(code, StatusCode::OK);
        let (code, gone) = hub.call(Method::GET, &format!("{}/vm", PERMISSIONS), None).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(gone["reason"], "NotFound");
    }

    #[tokio::test]
    async fn bad_requests_are_rejected_before_the_store() {
        let hub = hub().await;

        let (code, _) = hub.raw(Method::POST, PERMISSIONS, Some("{not json".to_string())).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let mut foreign = permission_body("vm");
        foreign["metadata"]["namespace"] = json!("c2");
        let (code, _) = hub.call(Method::POST, PERMISSIONS, Some(foreign)).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, invalid) = hub.call(Method::POST, PERMISSIONS, Some(permission_body("Not_A_Name"))).await;
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(invalid["reason"], "Invalid");

        hub.call(Method::POST, PERMISSIONS, Some(permission_body("vm"))).await;
        let (code, _) = hub
            .call(Method::PUT, &format!("{}/other", PERMISSIONS), Some(permission_body("vm")))
            .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, _) = hub
            .call(Method::GET, &format!("{}?watch=true&resourceVersion=abc", PERMISSIONS), None)
            .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_subresource_leaves_spec_alone() {
        let hub = hub().await;
        let info = hub.store.create(ClusterInfo::new("c1")).await.unwrap();
        let mut body = serde_json::to_value(&info).unwrap();
        body["spec"]["masterEndpoint"] = json!("https://ignored:6443");
        body["status"]["loggingEndpoint"] = json!("https://10.0.0.5:443");

        let uri = "/apis/internal.mcf.io/v1beta1/namespaces/c1/clusterinfos/c1/status";
        let (code, updated) = hub.call(Method::PUT, uri, Some(body)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(updated["status"]["loggingEndpoint"], "https://10.0.0.5:443");

        let stored: ClusterInfo = hub.store.get(Some("c1"), "c1").await.unwrap();
        assert_eq!(stored.status.logging_endpoint, "https://10.0.0.5:443");
        assert!(stored.spec.master_endpoint.is_empty());
    }

    #[tokio::test]
    async fn list_watch_streams_events() {
        let hub = hub().await;
        hub.call(Method::POST, PERMISSIONS, Some(permission_body("vm"))).await;

        let req = Request::get(format!("{}?watch=true", PERMISSIONS))
            .header(header::AUTHORIZATION, "Bearer alice-token")
            .body(Body::empty())
            .unwrap();
        let resp = hub.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");

        let mut frames = resp.into_body().into_data_stream();
        let first = frames.next().await.unwrap().unwrap();
        let text = String::from_utf8_lossy(&first);
        assert!(text.contains("\"type\":\"ADDED\""), "{}", text);
        assert!(text.contains("\"name\":\"vm\""), "{}", text);
    }

    #[tokio::test]
    async fn virtual_resources_follow_permissions() {
        let hub = hub().await;
        let (code, list) = hub.call(Method::GET, "/apis/clusterview.mcf.io/v1/projects", None).await;
        assert_eq!(code, StatusCode::OK);
        assert!(list["items"].as_array().unwrap().is_empty());

        hub.call(Method::POST, PERMISSIONS, Some(permission_body("vm"))).await;
        let h = &hub;
        eventually(|| async move {
            let (_, list) = h.call(Method::GET, "/apis/clusterview.mcf.io/v1/projects", None).await;
            list["items"].as_array().is_some_and(|items| items.len() == 1)
        })
        .await;
        let (_, list) = hub
            .call(Method::GET, "/apis/clusterview.mcf.io/v1/projects?labelSelector=cluster%3Dc1", None)
            .await;
        assert_eq!(list["items"][0]["metadata"]["name"], "proj-a");
        let (_, other) = hub
            .call(Method::GET, "/apis/clusterview.mcf.io/v1/projects?labelSelector=cluster%3Dc9", None)
            .await;
        assert!(other["items"].as_array().unwrap().is_empty());

        let (code, missing) = hub
            .call(Method::GET, "/apis/clusterview.mcf.io/v1beta1/userpermissions/nope", None)
            .await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(missing["kind"], "Status");
    }

    #[tokio::test]
    async fn log_proxy_checks_grant_and_endpoint() {
        let hub = hub().await;
        let logs = "/api/v1/clusters/c1/logs/default/web-0/nginx";

        let (code, _) = hub.call(Method::GET, logs, None).await;
        assert_eq!(code, StatusCode::FORBIDDEN);

        hub.grant_admin("c1").await;
        let h = &hub;
        eventually(|| async move { h.call(Method::GET, logs, None).await.0 != StatusCode::FORBIDDEN }).await;
        let (code, _) = hub.call(Method::GET, logs, None).await;
        assert_eq!(code, StatusCode::NOT_FOUND);

        let mut info = hub.store.create(ClusterInfo::new("c1")).await.unwrap();
        let (code, _) = hub.call(Method::GET, logs, None).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

        info.status.logging_endpoint = "https://127.0.0.1:1".to_string();
        hub.store.update_status(info).await.unwrap();
        let (code, status) = hub.call(Method::GET, logs, None).await;
        assert_eq!(code, StatusCode::BAD_GATEWAY);
        assert_eq!(status["reason"], "BadGateway");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn log_proxy_reaches_an_agent_trusting_the_hub_ca() {
        let hub = hub().await;
        hub.grant_admin("c1").await;

        // an agent whose client-CA pool is the hub CA
        let serving = self_signed_serving_cert(&["localhost".to_string()]).unwrap();
        let tls = Arc::new(DynamicTls::new(&serving).unwrap());
        tls.install(hub.ca.ca_cert_pem().as_bytes()).unwrap();
        let spoke = MemoryCluster::new();
        spoke.set_logs("default", "web-0", "nginx", vec![Bytes::from_static(b"line 1\n"), Bytes::from_static(b"line 2\n")]);
        let authorizer: Arc<dyn Authorizer> = Arc::new(StaticAuthorizer::default());
        let router = create_agent_router(AgentState {
            logs: Arc::new(spoke),
            authorizer: Some(authorizer),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let agent_cancel = CancellationToken::new();
        let agent = tokio::spawn(serve(listener, tls, router, agent_cancel.clone()));

        let mut info = hub.store.create(ClusterInfo::new("c1")).await.unwrap();
        info.status.logging_endpoint = format!("https://{}", addr);
        hub.store.update_status(info).await.unwrap();

        let logs = "/api/v1/clusters/c1/logs/default/web-0/nginx";
        let h = &hub;
        eventually(|| async move { h.call(Method::GET, logs, None).await.0 != StatusCode::FORBIDDEN }).await;
        let resp = hub.response(Method::GET, logs, None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"line 1\nline 2\n");

        let (code, _) = hub.raw(Method::GET, "/api/v1/clusters/c1/logs/default/web-1/nginx", None).await;
        assert_eq!(code, StatusCode::NOT_FOUND);

        agent_cancel.cancel();
        agent.await.unwrap().unwrap();
        hub.cancel.cancel();
    }
}

use async_trait::async_trait;
use pkg_client::{ApiResource, ClusterClient};
use pkg_constants::rbac::{HUB_GROUP, HUB_LOG_PROXY_USER};
use pkg_types::identity::UserInfo;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What a log request asks to do, in the terms an authorizer understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub user: UserInfo,
    pub verb: &'static str,
    pub resource: &'static str,
    pub subresource: &'static str,
    pub namespace: String,
    pub name: String,
}

impl Attributes {
    pub fn pod_log(user: UserInfo, namespace: &str, pod: &str) -> Self {
        Self {
            user,
            verb: "get",
            resource: "pods",
            subresource: "log",
            namespace: namespace.to_string(),
            name: pod.to_string(),
        }
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user={}, verb={}, resource={}, subresource={}",
            self.user.name, self.verb, self.resource, self.subresource
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, attrs: &Attributes) -> anyhow::Result<Decision>;
}

/// Allows a fixed set of users and groups, by default the hub's log proxy
/// identity.
pub struct StaticAuthorizer {
    users: Vec<String>,
    groups: Vec<String>,
}

impl StaticAuthorizer {
    pub fn new(users: &[&str], groups: &[&str]) -> Self {
        Self {
            users: users.iter().map(|u| u.to_string()).collect(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }
}

impl Default for StaticAuthorizer {
    fn default() -> Self {
        Self::new(&[HUB_LOG_PROXY_USER], &[HUB_GROUP])
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self, attrs: &Attributes) -> anyhow::Result<Decision> {
        let user = &attrs.user;
        if self.users.contains(&user.name) || self.groups.iter().any(|g| user.in_group(g)) {
            return Ok(Decision::Allow);
        }
        Ok(Decision::Deny(format!("{} is not a hub identity", user.name)))
    }
}

/// Delegates the decision to the spoke's API server with a
/// SubjectAccessReview.
pub struct ReviewAuthorizer {
    client: Arc<dyn ClusterClient>,
    api: ApiResource,
}

impl ReviewAuthorizer {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            api: ApiResource::new(
                "authorization.k8s.io",
                "v1",
                "subjectaccessreviews",
                "SubjectAccessReview",
                false,
            ),
        }
    }
}

fn review_of(attrs: &Attributes) -> Value {
    json!({
        "apiVersion": "authorization.k8s.io/v1",
        "kind": "SubjectAccessReview",
        "metadata": {"name": format!("mcf-agent-{}", uuid::Uuid::new_v4())},
        "spec": {
            "user": attrs.user.name,
            "groups": attrs.user.groups,
            "resourceAttributes": {
                "namespace": attrs.namespace,
                "verb": attrs.verb,
                "resource": attrs.resource,
                "subresource": attrs.subresource,
                "name": attrs.name,
            }
        }
    })
}

fn decision_of(review: &Value) -> Decision {
    let status = &review["status"];
    if status["allowed"].as_bool() == Some(true) {
        return Decision::Allow;
    }
    Decision::Deny(status["reason"].as_str().unwrap_or_default().to_string())
}

#[async_trait]
impl Authorizer for ReviewAuthorizer {
    async fn authorize(&self, attrs: &Attributes) -> anyhow::Result<Decision> {
        let review = self.client.create(&self.api, None, &review_of(attrs)).await?;
        let decision = decision_of(&review);
        debug!("SubjectAccessReview for {}: {:?}", attrs, decision);
        Ok(decision)
    }
}

/// Tries authorizers in order; the first allow wins and the first error
/// aborts.
pub struct ChainAuthorizer {
    links: Vec<Arc<dyn Authorizer>>,
}

impl ChainAuthorizer {
    pub fn new(links: Vec<Arc<dyn Authorizer>>) -> Self {
        Self { links }
    }
}

#[async_trait]
impl Authorizer for ChainAuthorizer {
    async fn authorize(&self, attrs: &Attributes) -> anyhow::Result<Decision> {
        let mut last = Decision::Deny("no authorizer configured".to_string());
        for link in &self.links {
            match link.authorize(attrs).await? {
                Decision::Allow => return Ok(Decision::Allow),
                deny => last = deny,
            }
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_client::ClusterError;
    use pkg_client::memory::{MemoryCluster, Op};

    fn attrs(user: UserInfo) -> Attributes {
        Attributes::pod_log(user, "default", "web-0")
    }

    #[tokio::test]
    async fn static_authorizer_admits_hub_identities() {
        let authz = StaticAuthorizer::default();
        let proxy = UserInfo::new(HUB_LOG_PROXY_USER, &[]);
        let member = UserInfo::new("someone", &[HUB_GROUP]);
        let stranger = UserInfo::new("mallory", &["devs"]);

        assert_eq!(authz.authorize(&attrs(proxy)).await.unwrap(), Decision::Allow);
        assert_eq!(authz.authorize(&attrs(member)).await.unwrap(), Decision::Allow);
        assert!(matches!(
            authz.authorize(&attrs(stranger)).await.unwrap(),
            Decision::Deny(_)
        ));
    }

    #[test]
    fn review_body_and_verdict() {
        let body = review_of(&attrs(UserInfo::new("alice", &["g1"])));
        assert_eq!(body["spec"]["user"], "alice");
        assert_eq!(body["spec"]["resourceAttributes"]["subresource"], "log");
        assert_eq!(body["spec"]["resourceAttributes"]["name"], "web-0");

        assert_eq!(decision_of(&json!({"status": {"allowed": true}})), Decision::Allow);
        assert_eq!(
            decision_of(&json!({"status": {"allowed": false, "reason": "no"}})),
            Decision::Deny("no".to_string())
        );
    }

    #[tokio::test]
    async fn review_errors_surface() {
        let cluster = Arc::new(MemoryCluster::new());
        let authz = ReviewAuthorizer::new(cluster.clone());

        // the in-memory cluster echoes the review without a verdict
        let decision = authz.authorize(&attrs(UserInfo::new("alice", &[]))).await.unwrap();
        assert!(matches!(decision, Decision::Deny(_)));

        cluster.fail_next(Op::Create, ClusterError::Transport("down".to_string()));
        assert!(authz.authorize(&attrs(UserInfo::new("alice", &[]))).await.is_err());
    }

    #[tokio::test]
    async fn chain_falls_through_to_review() {
        let cluster = Arc::new(MemoryCluster::new());
        let chain = ChainAuthorizer::new(vec![
            Arc::new(StaticAuthorizer::default()),
            Arc::new(ReviewAuthorizer::new(cluster.clone())),
        ]);

        let hub = attrs(UserInfo::new(HUB_LOG_PROXY_USER, &[]));
        assert_eq!(chain.authorize(&hub).await.unwrap(), Decision::Allow);
        assert_eq!(cluster.count(Op::Create), 0);

        let other = attrs(UserInfo::new("alice", &[]));
        assert!(matches!(chain.authorize(&other).await.unwrap(), Decision::Deny(_)));
        assert_eq!(cluster.count(Op::Create), 1);

        assert!(matches!(
            ChainAuthorizer::new(vec![]).authorize(&other).await.unwrap(),
            Decision::Deny(_)
        ));
    }

    #[test]
    fn attributes_render_for_error_messages() {
        let a = attrs(UserInfo::new("bob", &[]));
        assert_eq!(a.to_string(), "user=bob, verb=get, resource=pods, subresource=log");
    }
}

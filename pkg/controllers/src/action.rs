use async_trait::async_trait;
use pkg_client::{ApiResource, ClusterClient, ClusterError};
use pkg_constants::api::{CONDITION_COMPLETED, CONDITION_FAILED};
use pkg_constants::controller::{AUTH_FAILURE_RETRIES, UPDATE_CONFLICT_RETRIES};
use pkg_types::{ObjectKey, Resource};
use pkg_types::action::{ActionStatus, ActionType, ClusterAction, KubeWorkSpec};
use pkg_types::cluster::ManagedCluster;
use pkg_types::condition::{Condition, ConditionStatus, is_condition_true, remove_condition, set_condition};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{ErrorClass, ReconcileError, reason};
use crate::runtime::{Reconciler, Requeue};

/// Executes `ClusterAction`s against their target cluster exactly once.
pub struct ActionReconciler {
    ctx: Context,
}

enum Outcome {
    Completed(Value),
    Failed { reason: &'static str, message: String },
    Pending { reason: &'static str, message: String },
}

/// Completed and Failed are both final for a point-in-time action.
pub fn is_terminal(status: &ActionStatus) -> bool {
    is_condition_true(&status.conditions, CONDITION_COMPLETED)
        || is_condition_true(&status.conditions, CONDITION_FAILED)
}

impl ActionReconciler {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn execute(
        &self,
        cluster: &ManagedCluster,
        action: &ClusterAction,
    ) -> Result<Value, ReconcileError> {
        let action_type = action.spec.action_type;
        if action_type == ActionType::Unknown {
            return Err(invalid_action_type());
        }
        let kube = action
            .spec
            .kube
            .as_ref()
            .ok_or_else(|| ReconcileError::invalid("spec.kube is required"))?;
        let template = kube.template.as_ref().filter(|t| t.is_object());
        let hint = template
            .and_then(|t| t.get("apiVersion"))
            .and_then(Value::as_str);
        let api = self
            .ctx
            .mapper
            .resolve(&kube.resource, hint)
            .map_err(|e| ReconcileError::invalid(e.to_string()))?;
        let namespace = target_namespace(&api, kube, template)?;
        let ns = namespace.as_deref();
        let client = self.ctx.client(cluster, &action.metadata)?;

        match action_type {
            ActionType::Create => {
                let template = template
                    .ok_or_else(|| ReconcileError::invalid("spec.kube.template is required for Create"))?;
                let mut body = template.clone();
                if let Some(ns) = ns {
                    let metadata = body
                        .get_mut("metadata")
                        .and_then(Value::as_object_mut)
                        .ok_or_else(|| ReconcileError::invalid("spec.kube.template.metadata must be an object"))?;
                    metadata.insert("namespace".into(), Value::String(ns.to_string()));
                }
                client
                    .create(&api, ns, &body)
                    .await
                    .map_err(|e| ReconcileError::from_cluster(&e, reason::CREATE_FAILED))
            }
            ActionType::Update => {
                let template = template
                    .ok_or_else(|| ReconcileError::invalid("spec.kube.template is required for Update"))?;
                let name = target_name(kube, Some(template))?;
                update(client.as_ref(), &api, ns, &name, template).await
            }
            ActionType::Delete => {
                let name = target_name(kube, template)?;
                client
                    .delete(&api, ns, &name)
                    .await
                    .map_err(|e| ReconcileError::from_cluster(&e, reason::DELETE_FAILED))
            }
            ActionType::Unknown => Err(invalid_action_type()),
        }
    }

    async fn finish(&self, action: ClusterAction, outcome: Outcome) -> Result<(), ReconcileError> {
        self.ctx
            .write_status(action, |a: &mut ClusterAction| apply_outcome(&mut a.status, &outcome))
            .await?;
        Ok(())
    }

    async fn fail(
        &self,
        action: ClusterAction,
        err: ReconcileError,
        attempt: u32,
    ) -> Result<Requeue, ReconcileError> {
        let key = action.key();
        match err.class {
            ErrorClass::Validation | ErrorClass::NotFound | ErrorClass::Conflict => {
                warn!(action = %key, "ClusterAction failed: {}", err);
                self.finish(action, Outcome::Failed { reason: err.reason, message: err.message })
                    .await?;
                Ok(Requeue::Done)
            }
            ErrorClass::Auth if attempt + 1 >= AUTH_FAILURE_RETRIES => {
                warn!(action = %key, "ClusterAction giving up after {} auth failures: {}", attempt + 1, err);
                self.finish(action, Outcome::Failed { reason: reason::AUTH_FAILURE, message: err.message })
                    .await?;
                Ok(Requeue::Done)
            }
            ErrorClass::Auth | ErrorClass::Transport => {
                self.finish(
                    action,
                    Outcome::Pending {
                        reason: err.reason,
                        message: err.message.clone(),
                    },
                )
                .await?;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Reconciler for ActionReconciler {
    type Object = ClusterAction;

    fn name(&self) -> &'static str {
        "ClusterActionController"
    }

    async fn reconcile(&self, key: &ObjectKey, attempt: u32) -> Result<Requeue, ReconcileError> {
        let ns = key.namespace().unwrap_or_default();
        let action = match self.ctx.store.get::<ClusterAction>(Some(ns), &key.name).await {
            Ok(action) => action,
            Err(e) if e.is_not_found() => return Ok(Requeue::Done),
            Err(e) => return Err(e.into()),
        };
        if is_terminal(&action.status) {
            return Ok(Requeue::Done);
        }

        let Some(cluster) = self.ctx.cluster(ns).await? else {
            warn!(action = %key, "ClusterAction targets unknown cluster {}", ns);
            let message = format!("managed cluster {} does not exist", ns);
            self.finish(action, Outcome::Failed { reason: reason::NO_SUCH_CLUSTER, message })
                .await?;
            return Ok(Requeue::Done);
        };

        match self.execute(&cluster, &action).await {
            Ok(result) => {
                info!(action = %key, cluster = %ns, "ClusterAction {} completed", action.spec.action_type);
                self.finish(action, Outcome::Completed(result)).await?;
                Ok(Requeue::Done)
            }
            Err(e) => self.fail(action, e, attempt).await,
        }
    }
}

fn invalid_action_type() -> ReconcileError {
    ReconcileError::new(
        ErrorClass::Validation,
        reason::ACTION_TYPE_INVALID,
        "actionType must be one of Create, Update, Delete",
    )
}

fn apply_outcome(status: &mut ActionStatus, outcome: &Outcome) {
    match outcome {
        Outcome::Completed(result) => {
            set_condition(
                &mut status.conditions,
                Condition::new(CONDITION_COMPLETED, ConditionStatus::True, reason::DONE, ""),
            );
            remove_condition(&mut status.conditions, CONDITION_FAILED);
            status.result = Some(result.clone());
        }
        Outcome::Failed { reason, message } => {
            set_condition(
                &mut status.conditions,
                Condition::new(CONDITION_FAILED, ConditionStatus::True, *reason, message.clone()),
            );
            set_condition(
                &mut status.conditions,
                Condition::new(CONDITION_COMPLETED, ConditionStatus::False, *reason, message.clone()),
            );
            status.result = Some(json!({ "reason": reason, "message": message }));
        }
        Outcome::Pending { reason, message } => {
            set_condition(
                &mut status.conditions,
                Condition::new(CONDITION_COMPLETED, ConditionStatus::False, *reason, message.clone()),
            );
        }
    }
}

fn target_namespace(
    api: &ApiResource,
    kube: &KubeWorkSpec,
    template: Option<&Value>,
) -> Result<Option<String>, ReconcileError> {
    if !api.namespaced {
        return Ok(None);
    }
    let from_template = template
        .and_then(|t| t.pointer("/metadata/namespace"))
        .and_then(Value::as_str);
    let ns = if kube.namespace.is_empty() {
        from_template.unwrap_or_default()
    } else {
        kube.namespace.as_str()
    };
    if ns.is_empty() {
        return Err(ReconcileError::invalid(format!(
            "a namespace is required for {}",
            api.resource
        )));
    }
    Ok(Some(ns.to_string()))
}

fn target_name(kube: &KubeWorkSpec, template: Option<&Value>) -> Result<String, ReconcileError> {
    let from_template = template
        .and_then(|t| t.pointer("/metadata/name"))
        .and_then(Value::as_str);
    let name = if kube.name.is_empty() {
        from_template.unwrap_or_default()
    } else {
        kube.name.as_str()
    };
    if name.is_empty() {
        return Err(ReconcileError::invalid("spec.kube.name is required"));
    }
    Ok(name.to_string())
}

/// Full replace of the target with `template`, carrying over the fields the
/// target's server owns. Re-reads and retries when the target moves.
async fn update(
    client: &dyn ClusterClient,
    api: &ApiResource,
    namespace: Option<&str>,
    name: &str,
    template: &Value,
) -> Result<Value, ReconcileError> {
    for attempt in 1..=UPDATE_CONFLICT_RETRIES {
        let current = client
            .get(api, namespace, name)
            .await
            .map_err(|e| ReconcileError::from_cluster(&e, reason::UPDATE_FAILED))?;
        let desired = replacement(template, &current, namespace, name);
        if without_server_fields(&desired) == without_server_fields(&current) {
            debug!("{} {} already matches its template", api.resource, name);
            return Ok(current);
        }
        match client.replace(api, namespace, name, &desired).await {
            Ok(updated) => return Ok(updated),
            Err(ClusterError::Conflict(msg)) => {
                debug!("{} {} changed during update (attempt {}): {}", api.resource, name, attempt, msg);
            }
            Err(e) => return Err(ReconcileError::from_cluster(&e, reason::UPDATE_FAILED)),
        }
    }
    Err(ReconcileError::conflict(format!(
        "{} {} kept changing on the target; gave up after {} attempts",
        api.resource, name, UPDATE_CONFLICT_RETRIES
    )))
}

fn replacement(template: &Value, current: &Value, namespace: Option<&str>, name: &str) -> Value {
    let mut desired = template.clone();
    if !desired.get("metadata").is_some_and(Value::is_object) {
        desired["metadata"] = json!({});
    }
    desired["metadata"]["name"] = Value::String(name.to_string());
    if let Some(ns) = namespace {
        desired["metadata"]["namespace"] = Value::String(ns.to_string());
    }
    for field in ["resourceVersion", "uid", "creationTimestamp"] {
        if let Some(v) = current.get("metadata").and_then(|m| m.get(field)) {
            desired["metadata"][field] = v.clone();
        }
    }
    desired
}

/// `object` minus the fields its server owns, for comparing a replacement
/// with what is live.
fn without_server_fields(object: &Value) -> Value {
    let mut object = object.clone();
    if let Some(fields) = object.as_object_mut() {
        fields.remove("status");
    }
    if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in SERVER_METADATA {
            metadata.remove(*field);
        }
    }
    object
}

const SERVER_METADATA: &[&str] = &[
    "resourceVersion",
    "uid",
    "creationTimestamp",
    "managedFields",
    "generation",
    "selfLink",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{CLUSTER, deployment, setup};
    use pkg_client::memory::Op;
    use pkg_constants::api::{ANNOTATION_USER_GROUP, ANNOTATION_USER_IDENTITY};
    use pkg_types::bytes::encode_str;
    use pkg_types::condition::find_condition;

    fn create_action(name: &str) -> ClusterAction {
        ClusterAction::new(
            CLUSTER,
            name,
            ActionType::Create,
            KubeWorkSpec {
                resource: "deployment".into(),
                namespace: "default".into(),
                template: Some(deployment("nginx-deployment-action", "nginx:1.7.9")),
                ..Default::default()
            },
        )
    }

    async fn run(ctx: &Context, action: ClusterAction, attempt: u32) -> (Result<Requeue, ReconcileError>, ClusterAction) {
        let key = action.key();
        let r = ActionReconciler::new(ctx.clone());
        let result = r.reconcile(&key, attempt).await;
        let stored = ctx
            .store
            .get::<ClusterAction>(key.namespace(), &key.name)
            .await
            .unwrap();
        (result, stored)
    }

    #[tokio::test]
    async fn create_happy_path() {
        let (ctx, target, _) = setup().await;
        let action = ctx.store.create(create_action("mk-dep")).await.unwrap();
        let (result, stored) = run(&ctx, action, 0).await;
        assert_eq!(result.unwrap(), Requeue::Done);

        let created = target
            .object("deployments", Some("default"), "nginx-deployment-action")
            .expect("deployment created on the target");
        assert_eq!(created["spec"]["replicas"], 2);
        assert!(is_condition_true(&stored.status.conditions, CONDITION_COMPLETED));
        assert_eq!(
            stored.status.result.unwrap()["metadata"]["name"],
            "nginx-deployment-action"
        );
    }

    #[tokio::test]
    async fn missing_cluster_fails_without_side_effects() {
        let (ctx, target, _) = setup().await;
        let mut action = create_action("rm");
        action.metadata.namespace = Some("zzz".into());
        action.spec.action_type = ActionType::Delete;
        let action = ctx.store.create(action).await.unwrap();

        let (result, stored) = run(&ctx, action, 0).await;
        assert_eq!(result.unwrap(), Requeue::Done);
        let failed = find_condition(&stored.status.conditions, CONDITION_FAILED).unwrap();
        assert!(failed.is_true());
        assert_eq!(failed.reason, reason::NO_SUCH_CLUSTER);
        assert!(target.calls().is_empty());
    }

    #[tokio::test]
    async fn terminal_actions_never_run_again() {
        let (ctx, target, _) = setup().await;
        let action = ctx.store.create(create_action("once")).await.unwrap();
        let (_, done) = run(&ctx, action, 0).await;
        let terminal_status = done.status.clone();

        // A spec change after completion must not trigger a second create.
        let mut edited = done.clone();
        edited.spec.kube.as_mut().unwrap().namespace = "other".into();
        let edited = ctx.store.update(edited).await.unwrap();
        let (result, again) = run(&ctx, edited, 0).await;
        assert_eq!(result.unwrap(), Requeue::Done);
        assert_eq!(again.status, terminal_status);
        assert_eq!(target.count(Op::Create), 1);

        // Reconciling the same terminal object repeatedly keeps its timestamps.
        let (_, third) = run(&ctx, again.clone(), 0).await;
        assert_eq!(third.status, terminal_status);
        assert_eq!(third.metadata.resource_version, again.metadata.resource_version);
    }

    #[tokio::test]
    async fn duplicate_create_is_terminal() {
        let (ctx, target, _) = setup().await;
        target.put_object("deployments", Some("default"), deployment("nginx-deployment-action", "nginx:1"));
        let action = ctx.store.create(create_action("dup")).await.unwrap();
        let (_, stored) = run(&ctx, action, 0).await;
        let failed = find_condition(&stored.status.conditions, CONDITION_FAILED).unwrap();
        assert_eq!(failed.reason, reason::CREATE_FAILED);
    }

    #[tokio::test]
    async fn update_replaces_and_keeps_server_fields() {
        let (ctx, target, _) = setup().await;
        target.put_object("deployments", Some("default"), deployment("web", "nginx:1"));
        let before = target.object("deployments", Some("default"), "web").unwrap();

        let mut action = create_action("upd");
        action.spec.action_type = ActionType::Update;
        action.spec.kube.as_mut().unwrap().template = Some(deployment("web", "nginx:2"));
        let action = ctx.store.create(action).await.unwrap();

        // One lost race on the target is absorbed by re-reading.
        target.fail_next(Op::Replace, ClusterError::Conflict("moved".into()));
        let (result, stored) = run(&ctx, action, 0).await;
        assert_eq!(result.unwrap(), Requeue::Done);
        assert!(is_condition_true(&stored.status.conditions, CONDITION_COMPLETED));

        let after = target.object("deployments", Some("default"), "web").unwrap();
        assert_eq!(after["spec"]["template"]["spec"]["containers"][0]["image"], "nginx:2");
        assert_eq!(after["metadata"]["uid"], before["metadata"]["uid"]);
        assert_eq!(target.count(Op::Replace), 2);
    }

    #[tokio::test]
    async fn update_gives_up_after_repeated_conflicts() {
        let (ctx, target, _) = setup().await;
        target.put_object("deployments", Some("default"), deployment("web", "nginx:1"));
        for _ in 0..UPDATE_CONFLICT_RETRIES {
            target.fail_next(Op::Replace, ClusterError::Conflict("moved".into()));
        }
        let mut action = create_action("upd");
        action.spec.action_type = ActionType::Update;
        action.spec.kube.as_mut().unwrap().template = Some(deployment("web", "nginx:2"));
        let action = ctx.store.create(action).await.unwrap();

        let (_, stored) = run(&ctx, action, 0).await;
        let failed = find_condition(&stored.status.conditions, CONDITION_FAILED).unwrap();
        assert_eq!(failed.reason, reason::CONFLICT);
    }

    #[tokio::test]
    async fn unchanged_update_writes_nothing() {
        let (ctx, target, _) = setup().await;
        target.put_object("deployments", Some("default"), deployment("web", "nginx:1"));
        let mut action = create_action("noop");
        action.spec.action_type = ActionType::Update;
        action.spec.kube.as_mut().unwrap().template = Some(deployment("web", "nginx:1"));
        let action = ctx.store.create(action).await.unwrap();

        let (_, stored) = run(&ctx, action, 0).await;
        assert!(is_condition_true(&stored.status.conditions, CONDITION_COMPLETED));
        assert_eq!(target.count(Op::Replace), 0);
    }

    #[tokio::test]
    async fn delete_removes_target() {
        let (ctx, target, _) = setup().await;
        target.put_object("deployments", Some("default"), deployment("web", "nginx:1"));
        let action = ClusterAction::new(
            CLUSTER,
            "del",
            ActionType::Delete,
            KubeWorkSpec {
                resource: "deployments.apps".into(),
                namespace: "default".into(),
                name: "web".into(),
                template: None,
            },
        );
        let action = ctx.store.create(action).await.unwrap();
        let (_, stored) = run(&ctx, action, 0).await;
        assert!(is_condition_true(&stored.status.conditions, CONDITION_COMPLETED));
        assert!(target.object("deployments", Some("default"), "web").is_none());

        // The target vanished before a second delete could run.
        let again = ClusterAction::new(
            CLUSTER,
            "del-again",
            ActionType::Delete,
            stored.spec.kube.clone().unwrap(),
        );
        let again = ctx.store.create(again).await.unwrap();
        let (_, stored) = run(&ctx, again, 0).await;
        let failed = find_condition(&stored.status.conditions, CONDITION_FAILED).unwrap();
        assert_eq!(failed.reason, reason::TARGET_MISSING);
    }

    #[tokio::test]
    async fn malformed_specs_are_terminal() {
        let (ctx, target, _) = setup().await;
        let mut unknown = create_action("weird");
        unknown.spec.action_type = ActionType::Unknown;
        let unknown = ctx.store.create(unknown).await.unwrap();
        let (result, stored) = run(&ctx, unknown, 0).await;
        assert_eq!(result.unwrap(), Requeue::Done);
        assert_eq!(
            find_condition(&stored.status.conditions, CONDITION_FAILED).unwrap().reason,
            reason::ACTION_TYPE_INVALID
        );

        let mut no_template = create_action("empty");
        no_template.spec.kube.as_mut().unwrap().template = None;
        let no_template = ctx.store.create(no_template).await.unwrap();
        let (_, stored) = run(&ctx, no_template, 0).await;
        assert_eq!(
            find_condition(&stored.status.conditions, CONDITION_FAILED).unwrap().reason,
            reason::INVALID
        );
        assert!(target.calls().is_empty());
    }

    #[tokio::test]
    async fn transport_errors_retry_without_terminal_status() {
        let (ctx, target, _) = setup().await;
        target.fail_next(Op::Create, ClusterError::Transport("connection reset".into()));
        let action = ctx.store.create(create_action("flaky")).await.unwrap();

        let (result, stored) = run(&ctx, action, 0).await;
        let err = result.unwrap_err();
        assert_eq!(err.class, ErrorClass::Transport);
        assert!(!is_terminal(&stored.status));
        let completed = find_condition(&stored.status.conditions, CONDITION_COMPLETED).unwrap();
        assert_eq!(completed.status, ConditionStatus::False);

        let (result, stored) = run(&ctx, stored, 1).await;
        assert_eq!(result.unwrap(), Requeue::Done);
        assert!(is_condition_true(&stored.status.conditions, CONDITION_COMPLETED));
    }

    #[tokio::test]
    async fn auth_failures_become_terminal_after_retries() {
        let (ctx, target, _) = setup().await;
        for _ in 0..AUTH_FAILURE_RETRIES {
            target.fail_next(Op::Create, ClusterError::Unauthorized("token expired".into()));
        }
        let mut action = ctx.store.create(create_action("auth")).await.unwrap();
        for attempt in 0..AUTH_FAILURE_RETRIES - 1 {
            let (result, stored) = run(&ctx, action, attempt).await;
            assert_eq!(result.unwrap_err().class, ErrorClass::Auth);
            assert!(!is_terminal(&stored.status));
            action = stored;
        }
        let (result, stored) = run(&ctx, action, AUTH_FAILURE_RETRIES - 1).await;
        assert_eq!(result.unwrap(), Requeue::Done);
        assert_eq!(
            find_condition(&stored.status.conditions, CONDITION_FAILED).unwrap().reason,
            reason::AUTH_FAILURE
        );
    }

    #[tokio::test]
    async fn forwards_requesting_user_when_enabled() {
        let (ctx, _, factory) = setup().await;
        let ctx = ctx.with_impersonation(true);
        let mut action = create_action("as-alice");
        action
            .metadata
            .annotations
            .insert(ANNOTATION_USER_IDENTITY.into(), encode_str("alice"));
        action
            .metadata
            .annotations
            .insert(ANNOTATION_USER_GROUP.into(), encode_str("dev"));
        let action = ctx.store.create(action).await.unwrap();
        run(&ctx, action, 0).await.0.unwrap();

        let (_, credential) = factory.credentials().pop().unwrap();
        let user = credential.impersonate.unwrap();
        assert_eq!(user.name, "alice");
        assert_eq!(user.groups, vec!["dev".to_string()]);
    }

    #[tokio::test]
    async fn controller_drives_actions_to_completion() {
        let (ctx, target, _) = setup().await;
        let reconciler = std::sync::Arc::new(ActionReconciler::new(ctx.clone()));
        let controller = crate::runtime::Controller::new(ctx.store.clone(), reconciler, 2);
        let cancel = tokio_util::sync::CancellationToken::new();
        let handle = controller.start(cancel.clone());

        ctx.store.create(create_action("mk-dep")).await.unwrap();
        let mut completed = false;
        for _ in 0..200 {
            let action = ctx.store.get::<ClusterAction>(Some(CLUSTER), "mk-dep").await.unwrap();
            if is_condition_true(&action.status.conditions, CONDITION_COMPLETED) {
                completed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert!(completed);
        assert!(target.object("deployments", Some("default"), "nginx-deployment-action").is_some());
        assert_eq!(target.count(Op::Create), 1);
    }

    #[test]
    fn server_fields_are_ignored_when_comparing() {
        let live = json!({
            "metadata": {"name": "web", "uid": "u1", "resourceVersion": "7", "generation": 3},
            "spec": {"replicas": 1},
            "status": {"ready": 1}
        });
        let wanted = json!({"metadata": {"name": "web"}, "spec": {"replicas": 1}});
        assert_eq!(without_server_fields(&live), without_server_fields(&wanted));
        let extra = json!({"metadata": {"name": "web"}, "spec": {"replicas": 1, "paused": true}});
        assert_ne!(without_server_fields(&live), without_server_fields(&extra));
    }

    #[tokio::test]
    async fn update_drops_fields_missing_from_template() {
        let (ctx, target, _) = setup().await;
        let mut live = deployment("web", "nginx:1");
        live["metadata"]["labels"]["extra"] = json!("yes");
        target.put_object("deployments", Some("default"), live);

        let mut action = create_action("trim");
        action.spec.action_type = ActionType::Update;
        action.spec.kube.as_mut().unwrap().template = Some(deployment("web", "nginx:1"));
        let action = ctx.store.create(action).await.unwrap();

        let (_, stored) = run(&ctx, action, 0).await;
        assert!(is_condition_true(&stored.status.conditions, CONDITION_COMPLETED));
        assert_eq!(target.count(Op::Replace), 1);
        let after = target.object("deployments", Some("default"), "web").unwrap();
        assert!(after["metadata"]["labels"].get("extra").is_none());
        assert_eq!(after["metadata"]["labels"]["app"], "nginx");
    }

    #[tokio::test]
    async fn create_rejects_non_object_metadata() {
        let (ctx, target, _) = setup().await;
        let mut action = create_action("bad-meta");
        let mut template = deployment("web", "nginx:1");
        template["metadata"] = json!("oops");
        action.spec.kube.as_mut().unwrap().template = Some(template);
        let action = ctx.store.create(action).await.unwrap();

        let (result, stored) = run(&ctx, action, 0).await;
        assert_eq!(result.unwrap(), Requeue::Done);
        assert_eq!(
            find_condition(&stored.status.conditions, CONDITION_FAILED).unwrap().reason,
            reason::INVALID
        );
        assert_eq!(target.count(Op::Create), 0);
    }

    #[tokio::test]
    async fn missing_action_type_is_invalid() {
        let (ctx, target, _) = setup().await;
        let action: ClusterAction = serde_json::from_value(json!({
            "apiVersion": "action.mcf.io/v1beta1",
            "kind": "ClusterAction",
            "metadata": {"name": "untyped", "namespace": CLUSTER},
            "spec": {"kube": {"resource": "deployment", "namespace": "default"}}
        }))
        .unwrap();
        let action = ctx.store.create(action).await.unwrap();
        assert_eq!(action.spec.action_type, ActionType::Unknown);

        let (result, stored) = run(&ctx, action, 0).await;
        assert_eq!(result.unwrap(), Requeue::Done);
        assert_eq!(
            find_condition(&stored.status.conditions, CONDITION_FAILED).unwrap().reason,
            reason::ACTION_TYPE_INVALID
        );
        assert!(target.calls().is_empty());
    }
}

use async_trait::async_trait;
use chrono::Utc;
use pkg_client::ApiResource;
use pkg_constants::api::{CONDITION_COMPLETED, CONDITION_FAILED};
use pkg_constants::controller::AUTH_FAILURE_RETRIES;
use pkg_types::ObjectKey;
use pkg_types::condition::{Condition, ConditionStatus, remove_condition, set_condition};
use pkg_types::view::{ManagedClusterView, ViewScope, ViewStatus};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{ErrorClass, ReconcileError, reason};
use crate::runtime::{Reconciler, Requeue};

/// Keeps each `ManagedClusterView`'s `status.result` a snapshot of its
/// target object, polling at the view's update interval.
pub struct ViewReconciler {
    ctx: Context,
}

impl ViewReconciler {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    fn interval(&self, view: &ManagedClusterView) -> Duration {
        view.spec
            .scope
            .update_interval_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.ctx.view_interval)
    }

    fn resolve(&self, scope: &ViewScope) -> Result<ApiResource, ReconcileError> {
        let type_invalid = |message: String| {
            ReconcileError::new(ErrorClass::Validation, reason::RESOURCE_TYPE_INVALID, message)
        };
        if !scope.resource.is_empty() {
            let hint = match (scope.api_group.as_str(), scope.version.as_str()) {
                (_, "") => None,
                ("", v) => Some(v.to_string()),
                (g, v) => Some(format!("{}/{}", g, v)),
            };
            self.ctx
                .mapper
                .resolve(&scope.resource, hint.as_deref())
                .map_err(|e| type_invalid(e.to_string()))
        } else if !scope.kind.is_empty() {
            self.ctx
                .mapper
                .resolve_kind(&scope.api_group, &scope.version, &scope.kind)
                .map_err(|e| type_invalid(e.to_string()))
        } else {
            Err(type_invalid("scope needs a resource or a kind".to_string()))
        }
    }

    async fn fetch(&self, view: &ManagedClusterView) -> Result<Value, ReconcileError> {
        let scope = &view.spec.scope;
        if scope.name.is_empty() {
            return Err(ReconcileError::new(
                ErrorClass::Validation,
                reason::RESOURCE_NAME_INVALID,
                "scope.name is required",
            ));
        }
        let api = self.resolve(scope)?;
        let namespace = if api.namespaced {
            Some(if scope.namespace.is_empty() { "default" } else { scope.namespace.as_str() })
        } else {
            None
        };
        let ns = view.metadata.namespace.as_deref().unwrap_or_default();
        let cluster = self.ctx.cluster(ns).await?.ok_or_else(|| {
            ReconcileError::new(
                ErrorClass::NotFound,
                reason::NO_SUCH_CLUSTER,
                format!("managed cluster {} does not exist", ns),
            )
        })?;
        let client = self.ctx.client(&cluster, &view.metadata)?;
        client
            .get(&api, namespace, &scope.name)
            .await
            .map_err(|e| ReconcileError::from_cluster(&e, reason::GET_FAILED))
    }
}

#[async_trait]
impl Reconciler for ViewReconciler {
    type Object = ManagedClusterView;

    fn name(&self) -> &'static str {
        "ManagedClusterViewController"
    }

    async fn reconcile(&self, key: &ObjectKey, attempt: u32) -> Result<Requeue, ReconcileError> {
        let view = match self
            .ctx
            .store
            .get::<ManagedClusterView>(key.namespace(), &key.name)
            .await
        {
            Ok(view) => view,
            Err(e) if e.is_not_found() => return Ok(Requeue::Done),
            Err(e) => return Err(e.into()),
        };
        let interval = self.interval(&view);

        match self.fetch(&view).await {
            Ok(object) => {
                self.ctx
                    .write_status(view, |v: &mut ManagedClusterView| record_result(&mut v.status, &object))
                    .await?;
                debug!(view = %key, "ManagedClusterView refreshed; next in {:?}", interval);
                Ok(Requeue::After(interval))
            }
            Err(err) => {
                let next = match err.class {
                    ErrorClass::Validation => Next::AwaitSpecChange,
                    ErrorClass::NotFound if err.reason == reason::NO_SUCH_CLUSTER => Next::Poll,
                    ErrorClass::Auth if attempt + 1 >= AUTH_FAILURE_RETRIES => Next::Poll,
                    _ => Next::Retry,
                };
                let failed = next != Next::Retry;
                if failed {
                    warn!(view = %key, "ManagedClusterView failed: {}", err);
                }
                self.ctx
                    .write_status(view, |v: &mut ManagedClusterView| record_failure(&mut v.status, &err, failed))
                    .await?;
                match next {
                    Next::AwaitSpecChange => Ok(Requeue::Done),
                    Next::Poll => Ok(Requeue::After(interval)),
                    Next::Retry => Err(err),
                }
            }
        }
    }
}

#[derive(PartialEq, Eq)]
enum Next {
    AwaitSpecChange,
    /// Come back at the normal interval.
    Poll,
    /// Back off through the queue's rate limiter.
    Retry,
}

/// Store `object` as the snapshot. The result and its timestamp only move
/// when the object differs; the timestamp never goes backwards.
fn record_result(status: &mut ViewStatus, object: &Value) {
    if status.result.as_ref() != Some(object) {
        let now = Utc::now();
        status.result = Some(object.clone());
        status.last_update_time = Some(status.last_update_time.map_or(now, |prev| prev.max(now)));
    }
    set_condition(
        &mut status.conditions,
        Condition::new(CONDITION_COMPLETED, ConditionStatus::True, reason::DONE, ""),
    );
    remove_condition(&mut status.conditions, CONDITION_FAILED);
}

/// `failed` marks errors that need a spec or cluster change; the rest are
/// reported on `Completed` while being retried.
fn record_failure(status: &mut ViewStatus, err: &ReconcileError, failed: bool) {
    set_condition(
        &mut status.conditions,
        Condition::new(CONDITION_COMPLETED, ConditionStatus::False, err.reason, err.message.clone()),
    );
    if failed {
        set_condition(
            &mut status.conditions,
            Condition::new(CONDITION_FAILED, ConditionStatus::True, err.reason, err.message.clone()),
        );
    }
}

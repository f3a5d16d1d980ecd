use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    response::{IntoResponse, Response},
};
use pkg_permission::PermissionError;
use pkg_types::identity::UserInfo;
use pkg_types::project::PartialObjectMetadataList;
use pkg_types::userpermission::{UserPermission, UserPermissionList};
use tokio_stream::StreamExt;
use tracing::debug;

use crate::AppState;
use crate::error::ApiResult;
use crate::handlers::resources::ListQuery;
use crate::handlers::watch::events;

/// GET /apis/clusterview.mcf.io/v1/projects
///
/// The caller's projects across the fleet. `labelSelector=cluster=<name>`
/// narrows to one cluster; `watch=true` streams additions and removals.
pub async fn list_projects(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    let selector = query.selector()?;

    if query.watch {
        if !state.permissions.has_synced() {
            return Err(PermissionError::NotReady.into());
        }
        debug!("Project watch for {}", user.name);
        let stream = state
            .permissions
            .watch_projects(user)
            .filter(move |e| selector.as_ref().is_none_or(|s| s.matches(&e.object.metadata.labels)));
        return Ok(events(stream).into_response());
    }

    let mut list = PartialObjectMetadataList::from_projects(&state.permissions.list_projects(&user)?);
    if let Some(selector) = selector {
        list.items.retain(|p| selector.matches(&p.metadata.labels));
    }
    Ok(Json(list).into_response())
}

/// GET /apis/clusterview.mcf.io/v1beta1/userpermissions
pub async fn list_user_permissions(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
) -> ApiResult<Json<UserPermissionList>> {
    Ok(Json(state.permissions.list_user_permissions(&user)?))
}

/// GET /apis/clusterview.mcf.io/v1beta1/userpermissions/{name}
pub async fn get_user_permission(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
    Path(name): Path<String>,
) -> ApiResult<Json<UserPermission>> {
    Ok(Json(state.permissions.get_user_permission(&user, &name)?))
}

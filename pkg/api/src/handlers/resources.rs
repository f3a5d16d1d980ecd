use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use pkg_state::LabelSelector;
use pkg_types::{ObjectList, Resource};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::handlers::watch::store_events;

type PathParams = HashMap<String, String>;

/// Query parameters accepted by list endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub label_selector: Option<String>,
    #[serde(default)]
    pub watch: bool,
    #[serde(default)]
    pub resource_version: Option<String>,
}

impl ListQuery {
    pub fn selector(&self) -> ApiResult<Option<LabelSelector>> {
        match self.label_selector.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => LabelSelector::parse(raw)
                .map(Some)
                .map_err(|e| ApiError::BadRequest(e.to_string())),
        }
    }

    /// Where a watch resumes; 0 means "send everything as ADDED first".
    pub fn since(&self) -> ApiResult<u64> {
        match self.resource_version.as_deref() {
            None | Some("") => Ok(0),
            Some(rv) => rv
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("invalid resourceVersion {:?}", rv))),
        }
    }
}

/// URL prefix of a kind's API group: `/api/v1` or `/apis/<group>/<version>`.
pub fn group_prefix<K: Resource>() -> String {
    if K::GROUP.is_empty() {
        format!("/api/{}", K::VERSION)
    } else {
        format!("/apis/{}/{}", K::GROUP, K::VERSION)
    }
}

/// Register list/create, get/replace/delete and, for kinds with one, the
/// status subresource of `K`. Namespaced kinds are also listable across all
/// namespaces.
pub fn resource_routes<K: Resource>(router: Router<AppState>) -> Router<AppState> {
    let prefix = group_prefix::<K>();
    let collection = if K::NAMESPACED {
        format!("{}/namespaces/{{ns}}/{}", prefix, K::PLURAL)
    } else {
        format!("{}/{}", prefix, K::PLURAL)
    };
    let item = format!("{}/{{name}}", collection);

    let mut router = router
        .route(&collection, get(list::<K>).post(create::<K>))
        .route(
            &item,
            get(get_object::<K>).put(replace::<K>).delete(delete_object::<K>),
        );
    if K::NAMESPACED {
        router = router.route(&format!("{}/{}", prefix, K::PLURAL), get(list::<K>));
    }
    if K::HAS_STATUS {
        router = router.route(&format!("{}/status", item), put(replace_status::<K>));
    }
    router
}

fn namespace_of<K: Resource>(params: &PathParams) -> Option<&str> {
    if K::NAMESPACED {
        params.get("ns").map(String::as_str)
    } else {
        None
    }
}

fn name_of(params: &PathParams) -> ApiResult<&str> {
    params
        .get("name")
        .map(String::as_str)
        .ok_or_else(|| ApiError::BadRequest("missing object name".to_string()))
}

/// Reconcile the body's namespace and name with the URL they were sent to.
fn scope_body<K: Resource>(obj: &mut K, namespace: Option<&str>, name: Option<&str>) -> ApiResult<()> {
    let meta = obj.meta_mut();
    match (namespace, meta.namespace.as_deref()) {
        (Some(url), Some(body)) if url != body => {
            return Err(ApiError::BadRequest(format!(
                "namespace {:?} in body does not match {:?} in URL",
                body, url
            )));
        }
        (None, Some(body)) if !K::NAMESPACED => {
            return Err(ApiError::BadRequest(format!(
                "{} is cluster-scoped but body names namespace {:?}",
                K::KIND,
                body
            )));
        }
        (Some(url), _) => meta.namespace = Some(url.to_string()),
        _ => {}
    }
    if let Some(url) = name {
        if meta.name.is_empty() {
            meta.name = url.to_string();
        } else if meta.name != url {
            return Err(ApiError::BadRequest(format!(
                "name {:?} in body does not match {:?} in URL",
                meta.name, url
            )));
        }
    }
    Ok(())
}

/// GET collection: a list, or an SSE watch with `?watch=true`.
pub async fn list<K: Resource>(
    State(state): State<AppState>,
    Path(params): Path<PathParams>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    let namespace = namespace_of::<K>(&params);
    let selector = query.selector()?;

    if query.watch {
        let since = query.since()?;
        info!("Watch {} in {:?} from rv {}", K::PLURAL, namespace, since);
        let stream = state.store.watch::<K>(namespace, selector, since).await?;
        return Ok(store_events(stream).into_response());
    }

    let (items, rv) = state.store.list::<K>(namespace, selector.as_ref()).await?;
    Ok(Json(ObjectList::new(items, rv)).into_response())
}

pub async fn get_object<K: Resource>(
    State(state): State<AppState>,
    Path(params): Path<PathParams>,
) -> ApiResult<Json<K>> {
    let obj = state
        .store
        .get::<K>(namespace_of::<K>(&params), name_of(&params)?)
        .await?;
    Ok(Json(obj))
}

pub async fn create<K: Resource>(
    State(state): State<AppState>,
    Path(params): Path<PathParams>,
    payload: Result<Json<K>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<K>)> {
    let Json(mut obj) = payload?;
    scope_body(&mut obj, namespace_of::<K>(&params), None)?;
    let created = state.store.create(obj).await?;
    info!("Created {} {}", K::KIND, created.key());
    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT item: full replace guarded by the body's resourceVersion.
pub async fn replace<K: Resource>(
    State(state): State<AppState>,
    Path(params): Path<PathParams>,
    payload: Result<Json<K>, JsonRejection>,
) -> ApiResult<Json<K>> {
    let Json(mut obj) = payload?;
    scope_body(&mut obj, namespace_of::<K>(&params), Some(name_of(&params)?))?;
    let updated = state.store.update(obj).await?;
    Ok(Json(updated))
}

pub async fn replace_status<K: Resource>(
    State(state): State<AppState>,
    Path(params): Path<PathParams>,
    payload: Result<Json<K>, JsonRejection>,
) -> ApiResult<Json<K>> {
    let Json(mut obj) = payload?;
    scope_body(&mut obj, namespace_of::<K>(&params), Some(name_of(&params)?))?;
    let updated = state.store.update_status(obj).await?;
    Ok(Json(updated))
}

pub async fn delete_object<K: Resource>(
    State(state): State<AppState>,
    Path(params): Path<PathParams>,
) -> ApiResult<Json<K>> {
    let deleted = state
        .store
        .delete::<K>(namespace_of::<K>(&params), name_of(&params)?, None)
        .await?;
    info!("Deleted {} {}", K::KIND, deleted.key());
    Ok(Json(deleted))
}

use axum::{
    Extension, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use pkg_client::{ClusterClient, ClusterError, LogOptions};
use pkg_types::identity::UserInfo;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::{Attributes, Authorizer, Decision};

#[derive(Clone)]
pub struct AgentState {
    /// The spoke cluster serving container logs.
    pub logs: Arc<dyn ClusterClient>,
    /// `None` only for insecure agents, which skip authentication.
    pub authorizer: Option<Arc<dyn Authorizer>>,
}

pub fn create_agent_router(state: AgentState) -> Router {
    Router::new()
        .route("/containerLogs/{*rest}", get(container_logs))
        .layer(middleware::map_response(no_sniff))
        .with_state(state)
}

async fn no_sniff(mut res: Response) -> Response {
    let headers = res.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    res
}

type HandlerError = (StatusCode, String);

/// `namespace/pod/container`, every segment non-empty.
fn split_log_path(rest: &str) -> Option<(&str, &str, &str)> {
    let mut parts = rest.split('/');
    let (ns, pod, container) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || ns.is_empty() || pod.is_empty() || container.is_empty() {
        return None;
    }
    Some((ns, pod, container))
}

async fn container_logs(
    State(state): State<AgentState>,
    Path(rest): Path<String>,
    Query(options): Query<LogOptions>,
    identity: Option<Extension<UserInfo>>,
) -> Result<Response, HandlerError> {
    let user = match (&state.authorizer, identity) {
        (None, identity) => identity.map(|Extension(u)| u),
        (Some(_), Some(Extension(u))) => Some(u),
        (Some(_), None) => {
            return Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string()));
        }
    };

    let Some((ns, pod, container)) = split_log_path(&rest) else {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Expected /containerLogs/<namespace>/<pod>/<container>, got /containerLogs/{}", rest),
        ));
    };

    if let (Some(authorizer), Some(user)) = (&state.authorizer, user.clone()) {
        let attrs = Attributes::pod_log(user, ns, pod);
        match authorizer.authorize(&attrs).await {
            Ok(Decision::Allow) => {}
            Ok(Decision::Deny(reason)) => {
                info!("Denied log request ({}): {}", attrs, reason);
                return Err((StatusCode::FORBIDDEN, format!("Forbidden ({})", attrs)));
            }
            Err(e) => {
                warn!("Authorization failed ({}): {}", attrs, e);
                return Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Authorization error ({})", attrs),
                ));
            }
        }
    }

    debug!(
        "Streaming logs {}/{}/{} for {}",
        ns,
        pod,
        container,
        user.as_ref().map(|u| u.name.as_str()).unwrap_or("anonymous")
    );
    let stream = state
        .logs
        .logs(ns, pod, container, &options)
        .await
        .map_err(backend_error)?;

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    )
        .into_response())
}

fn backend_error(e: ClusterError) -> HandlerError {
    let code = match &e {
        ClusterError::NotFound(_) => StatusCode::NOT_FOUND,
        ClusterError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    (code, e.to_string())
}

pub mod logs;
pub mod permission;
pub mod resources;
pub mod watch;

use axum::http::StatusCode;

/// GET /healthz
pub async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

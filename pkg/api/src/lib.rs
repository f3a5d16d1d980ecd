//! Hub HTTP API: typed CRUD and watch over the object store, the virtual
//! Project and UserPermission resources, and the log proxy to agents.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod request_id;
pub mod server;

use std::sync::Arc;

use pkg_permission::PermissionAggregator;
use pkg_state::ObjectStore;

use crate::auth::TokenAuthenticator;
use crate::handlers::logs::LogProxy;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: ObjectStore,
    pub permissions: Arc<PermissionAggregator>,
    pub authenticator: Arc<TokenAuthenticator>,
    pub logs: Arc<LogProxy>,
}

pub use error::{ApiError, ApiResult};
pub use server::{ServerConfig, build_router, start_server};

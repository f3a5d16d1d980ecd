//! Agent log server: serves container logs to the hub over mutual TLS whose
//! client-CA pool follows the hub's `ClusterInfo` without a restart.

pub mod agent;
pub mod auth;
pub mod cabridge;
pub mod collector;
pub mod handlers;
pub mod hub;
pub mod server;
pub mod tls;
pub mod trust;

pub use agent::{AgentOptions, run};
pub use tls::{DynamicTls, TrustError};
pub use trust::{TrustPhase, TrustState};

//! Clients for managed clusters' API servers.

pub mod client;
pub mod error;
pub mod http;
pub mod mapper;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod pool;

pub use client::{ApiResource, ByteStream, ClusterClient, LogOptions};
pub use error::ClusterError;
pub use mapper::ResourceMapper;
pub use pool::{ClientFactory, ClientPool, Credential};

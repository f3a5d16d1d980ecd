//! Permission aggregator: indexes `ClusterPermission` bindings by subject
//! and answers the virtual `Project` and `UserPermission` reads for a caller.

pub mod aggregator;
pub mod cache;
pub mod error;
pub mod fields;
pub mod index;
pub mod project;
pub mod roles;
pub mod synthetic;
pub mod userpermission;

pub use aggregator::PermissionAggregator;
pub use error::PermissionError;

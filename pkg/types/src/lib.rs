//! Declarative data model shared by the hub, the agent and their controllers.

pub mod action;
pub mod bytes;
pub mod cluster;
pub mod clusterinfo;
pub mod condition;
pub mod config;
pub mod identity;
pub mod meta;
pub mod namespace;
pub mod permission;
pub mod project;
pub mod rbac;
pub mod status;
pub mod userpermission;
pub mod validate;
pub mod view;

pub use meta::{ListMeta, ObjectKey, ObjectList, ObjectMeta, Resource, TypeMeta};

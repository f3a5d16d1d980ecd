//! Centralized constants for the mcf project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod api;
pub mod controller;
pub mod paths;
pub mod rbac;
pub mod state;

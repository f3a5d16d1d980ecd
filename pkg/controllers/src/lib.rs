//! Work dispatcher: a keyed work queue and controller runtime, plus the
//! reconcilers that carry hub-side declarations out on managed clusters.

pub mod action;
pub mod cluster;
pub mod context;
pub mod error;
pub mod gc;
pub mod queue;
pub mod runtime;
pub mod view;

pub use action::ActionReconciler;
pub use cluster::ClusterInfoReconciler;
pub use context::Context;
pub use error::{ErrorClass, ReconcileError};
pub use queue::WorkQueue;
pub use runtime::{Controller, Reconciler, Requeue};
pub use view::ViewReconciler;

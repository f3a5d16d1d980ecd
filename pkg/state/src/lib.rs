//! Object store adapter: strongly-consistent keyed access to declarative
//! objects plus ordered, resumable watch streams.

pub mod backoff;
pub mod client;
pub mod error;
pub mod reflector;
pub mod selector;
pub mod store;
pub mod watch;

pub use error::StoreError;
pub use reflector::{Cache, EventHandler, Reflector};
pub use selector::LabelSelector;
pub use store::{ObjectStore, Preconditions, WatchStream};
pub use watch::{EventType, WatchEvent};

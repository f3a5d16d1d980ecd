//! State store constants.

/// Root prefix under which every declarative object is stored.
pub const REGISTRY_PREFIX: &str = "/registry/";

/// Number of recent events kept for watch resumption.
pub const EVENT_LOG_CAPACITY: usize = 4096;

/// Capacity of the live event broadcast channel.
pub const EVENT_BROADCAST_CAPACITY: usize = 1024;

/// Buffered events per watch stream.
pub const WATCH_CHANNEL_CAPACITY: usize = 256;

/// Reflector relist backoff bounds.
pub const RELIST_BACKOFF_BASE_MILLIS: u64 = 200;
pub const RELIST_BACKOFF_MAX_SECS: u64 = 30;

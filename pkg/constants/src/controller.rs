//! Reconciler tunables.

/// Workers per reconciled kind when not configured.
pub const DEFAULT_WORKERS: usize = 5;

/// Resync interval of a `ManagedClusterView` without `updateIntervalSeconds`.
pub const DEFAULT_VIEW_INTERVAL_SECS: u64 = 30;

/// Per-call deadline for target-cluster API requests.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Delay before retrying a status write that lost an optimistic-concurrency race.
pub const CONFLICT_REQUEUE_MILLIS: u64 = 250;

/// First retry delay of the per-key rate limiter.
pub const BACKOFF_BASE_MILLIS: u64 = 5;

/// Ceiling of the per-key rate limiter.
pub const BACKOFF_MAX_SECS: u64 = 300;

/// Re-read/retry bound for `Update` actions racing a change on the target.
pub const UPDATE_CONFLICT_RETRIES: u32 = 3;

/// Attempts before an authentication failure against a target becomes terminal.
pub const AUTH_FAILURE_RETRIES: u32 = 3;

/// Status write conflicts tolerated before an action records `Conflict`.
pub const STATUS_CONFLICT_RETRIES: u32 = 5;

/// How long a shutting-down controller waits for in-flight keys.
pub const DRAIN_TIMEOUT_SECS: u64 = 10;

/// Pending change notifications kept for permission watchers.
pub const PERMISSION_CHANGE_CAPACITY: usize = 64;

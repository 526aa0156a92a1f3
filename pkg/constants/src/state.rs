//! State store key layout and event log constants.

/// Cluster-scoped namespaces: `/registry/namespaces/<name>`.
pub const NAMESPACES_PREFIX: &str = "/registry/namespaces/";

/// Cluster-scoped pools: `/registry/resourcepools/<name>`.
pub const RESOURCE_POOLS_PREFIX: &str = "/registry/resourcepools/";

/// Namespaced claims: `/registry/resourcepoolclaims/<namespace>/<name>`.
pub const RESOURCE_POOL_CLAIMS_PREFIX: &str = "/registry/resourcepoolclaims/";

/// Namespaced native quotas: `/registry/resourcequotas/<namespace>/<name>`.
pub const RESOURCE_QUOTAS_PREFIX: &str = "/registry/resourcequotas/";

/// Number of recent watch events kept for `?seq=` replays.
pub const EVENT_LOG_CAPACITY: usize = 4096;

/// Capacity of the live watch broadcast channel.
pub const EVENT_BROADCAST_CAPACITY: usize = 1024;

/// Attempts made by read-modify-write loops before giving up on conflicts.
pub const DEFAULT_STATUS_RETRIES: u32 = 5;

//! Resource pool labels, finalizers and condition vocabulary.

/// Label placed on every projected ResourceQuota, value = pool name.
pub const POOL_LABEL: &str = "quotapool.io/pool";

/// Finalizer held by a pool while at least one claim is bound to it.
pub const POOL_FINALIZER: &str = "quotapool.io/finalizer";

/// Annotation that releases a claim from its pool. Honoured when the value
/// is `RELEASE_ANNOTATION_TRIGGER`; removed once the claim is unbound.
pub const RELEASE_ANNOTATION: &str = "quotapool.io/release";
pub const RELEASE_ANNOTATION_TRIGGER: &str = "true";

/// Projected ResourceQuota name = `QUOTA_NAME_PREFIX + pool name`.
pub const QUOTA_NAME_PREFIX: &str = "quotapool-";

/// Kind strings used in owner references.
pub const RESOURCE_POOL_KIND: &str = "ResourcePool";
pub const RESOURCE_POOL_CLAIM_KIND: &str = "ResourcePoolClaim";

// ─── Condition types ──────────────────────────────────────────────────────

pub const READY_CONDITION: &str = "Ready";
pub const ASSIGNED_CONDITION: &str = "Assigned";
pub const BOUND_CONDITION: &str = "Bound";
pub const EXHAUSTED_CONDITION: &str = "Exhausted";

// ─── Condition reasons ────────────────────────────────────────────────────

pub const SUCCEEDED_REASON: &str = "Succeeded";
pub const FAILED_REASON: &str = "Failed";
pub const IN_USE_REASON: &str = "InUse";
pub const UNUSED_REASON: &str = "Unused";
pub const UNASSIGNED_REASON: &str = "Unassigned";
pub const POOL_EXHAUSTED_REASON: &str = "PoolExhausted";
pub const QUEUE_EXHAUSTED_REASON: &str = "QueueExhausted";
pub const RELEASED_REASON: &str = "Released";

//! Controller tuning defaults.

/// Full re-enqueue interval for every controller, in seconds.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30;

/// Worker tasks per controller.
pub const DEFAULT_WORKERS: usize = 4;

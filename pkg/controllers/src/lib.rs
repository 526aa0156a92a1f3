//! Event-driven reconcilers for resource pools and their claims.

pub mod claim;
pub mod pool;
pub mod projection;
pub mod queue;

use pkg_constants::controller::{DEFAULT_RESYNC_INTERVAL_SECS, DEFAULT_WORKERS};
use pkg_constants::state::DEFAULT_STATUS_RETRIES;
use std::time::Duration;

pub use claim::ClaimController;
pub use pool::PoolController;

/// Tuning shared by both controllers.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Full re-enqueue period.
    pub resync_interval: Duration,
    pub workers: usize,
    /// Attempts for each compare-and-put write.
    pub status_retries: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
            workers: DEFAULT_WORKERS,
            status_retries: DEFAULT_STATUS_RETRIES,
        }
    }
}

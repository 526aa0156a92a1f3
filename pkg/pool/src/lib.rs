//! Pool allocation engine: membership, ledger, binder, projection and
//! status rendering. Pure functions over in-memory objects; all I/O lives
//! in `pkg-controllers`.

pub mod binder;
pub mod ledger;
pub mod membership;
pub mod projector;
pub mod status;

pub use binder::{BindingPlan, ClaimDecision, Outcome, bind};
pub use ledger::Ledger;

pub mod client;
pub mod error;
pub mod watch;

pub use client::{DeleteOutcome, StateStore};
pub use error::StoreError;
pub use watch::{EventLog, EventType, WatchEvent};

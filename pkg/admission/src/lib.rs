//! Admission guards run inline by the API server before a write is
//! persisted. They read the last persisted state and never touch the ledger.

pub mod claim;
pub mod error;
pub mod pool;

pub use error::{AdmissionError, AdmissionResult};

//! Lease-coordinated scheduling for recurring ingestion jobs.
//!
//! Multiple instances of the same service each run their own local scheduler;
//! an external store with an atomic conditional upsert arbitrates which
//! instance actually performs a given job. The store's clock is the only
//! trusted time source for lease expiry.

pub mod config;
pub mod error;
pub mod lock;
pub mod runner;
pub mod shutdown;
pub mod store;

pub use error::{IngestdError, Result};

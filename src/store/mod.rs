//! Lease store adapter boundary.
//!
//! This module defines the protocol the coordination layer speaks against an
//! external atomic-upsert-capable store, and nothing else: no business logic,
//! no retries. The store's own clock is authoritative for lease expiry;
//! callers never compare their local clocks against another instance's.
//!
//! # Components
//!
//! - [`LeaseStore`]: the three lock operations (try-acquire, renew, release)
//! - [`JobStateStore`]: last-success / last-error bookkeeping per job
//! - [`MemoryLeaseStore`](memory::MemoryLeaseStore): in-process implementation
//!   enforcing the same conditional-upsert rule, used by tests and
//!   single-instance deployments

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::{ManualClock, MemoryJobStateStore, MemoryLeaseStore, SystemClock};

/// One row per named lock. Identity is the lock name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub name: String,
    /// Opaque identity of the current holder, globally unique per instance.
    pub owner_id: String,
    /// Absolute expiry, measured on the store's clock.
    pub lease_expires_at: DateTime<Utc>,
    /// Last renewal timestamp. Diagnostic only, never consulted for expiry.
    pub heartbeat_at: DateTime<Utc>,
}

/// Per-job completion state, overwritten by whichever instance held the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Clock used for all lease-expiry comparisons. Implementations other than
/// the real store use this to stand in for the store's trusted clock.
pub trait StoreClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The three lock operations, each a single atomic conditional write.
///
/// Every method distinguishes three outcomes: `Ok(true)` (the write matched),
/// `Ok(false)` (the row is legitimately held or absent), and
/// [`StoreUnavailable`](crate::IngestdError::StoreUnavailable) (could not
/// check at all).
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Atomically upsert the lock row. Succeeds only when the row is absent,
    /// its lease has expired on the store clock, or the existing owner equals
    /// the requester (idempotent re-acquire). A read-then-write race is
    /// unacceptable: the condition and the write must be one operation.
    async fn try_acquire(&self, name: &str, owner: &str, ttl_seconds: u32) -> Result<bool>;

    /// Extend `lease_expires_at` and stamp `heartbeat_at` for a row matching
    /// both `name` and `owner`. Returns whether a row was matched; false
    /// means the lease was lost and must never be resurrected.
    async fn renew(&self, name: &str, owner: &str, ttl_seconds: u32) -> Result<bool>;

    /// Delete the row matching `name` and `owner`. Releasing a lock you do
    /// not own is a no-op returning false, not an error.
    async fn release(&self, name: &str, owner: &str) -> Result<bool>;
}

/// Persistence for per-job outcome records, keyed by job name.
#[async_trait]
pub trait JobStateStore: Send + Sync {
    /// Upsert the state row for `job`. Success runs pass a timestamp and no
    /// error; failed runs pass `None` and a descriptive message.
    async fn set_status(
        &self,
        job: &str,
        last_success_at: Option<DateTime<Utc>>,
        last_error: Option<String>,
    ) -> Result<()>;

    async fn status(&self, job: &str) -> Result<Option<JobState>>;
}

//! In-process lease store enforcing the conditional-upsert rule.
//!
//! The map is guarded by a single mutex, so each operation is atomic in the
//! same sense the external store's upsert is: the expiry check and the write
//! cannot interleave with another caller's.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::{IngestdError, Result};
use crate::store::{JobState, JobStateStore, LeaseStore, LockRecord, StoreClock};

/// Real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl StoreClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests that need to move the store's notion of
/// time past a lease expiry without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = to;
    }
}

impl StoreClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

/// Mutex-guarded lock table with the same acquire/renew/release semantics the
/// external store's procedures implement.
///
/// Carries a fault-injection switch ([`set_offline`](Self::set_offline)) that
/// makes every operation fail with `StoreUnavailable`, and per-operation call
/// counters for test assertions.
pub struct MemoryLeaseStore {
    clock: Arc<dyn StoreClock>,
    rows: Mutex<HashMap<String, LockRecord>>,
    offline: AtomicBool,
    acquire_calls: AtomicU64,
    renew_calls: AtomicU64,
    release_calls: AtomicU64,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn StoreClock>) -> Self {
        Self {
            clock,
            rows: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            acquire_calls: AtomicU64::new(0),
            renew_calls: AtomicU64::new(0),
            release_calls: AtomicU64::new(0),
        }
    }

    /// Simulate the store being unreachable. While offline, every operation
    /// returns `StoreUnavailable` without touching the lock table.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Snapshot of the row for `name`, if present.
    pub fn record(&self, name: &str) -> Option<LockRecord> {
        self.rows
            .lock()
            .expect("store mutex poisoned")
            .get(name)
            .cloned()
    }

    pub fn acquire_calls(&self) -> u64 {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    pub fn renew_calls(&self) -> u64 {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> u64 {
        self.release_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(IngestdError::StoreUnavailable(
                "lease store offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire(&self, name: &str, owner: &str, ttl_seconds: u32) -> Result<bool> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let now = self.clock.now();
        let fresh = LockRecord {
            name: name.to_string(),
            owner_id: owner.to_string(),
            lease_expires_at: now + Duration::seconds(i64::from(ttl_seconds)),
            heartbeat_at: now,
        };

        let mut rows = self.rows.lock().expect("store mutex poisoned");
        match rows.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(true)
            }
            Entry::Occupied(mut slot) => {
                let row = slot.get();
                // Overwrite only an expired lease or our own row. An
                // unconditional overwrite here would break mutual exclusion.
                if row.lease_expires_at < now || row.owner_id == owner {
                    slot.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn renew(&self, name: &str, owner: &str, ttl_seconds: u32) -> Result<bool> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let now = self.clock.now();
        let mut rows = self.rows.lock().expect("store mutex poisoned");
        match rows.get_mut(name) {
            Some(row) if row.owner_id == owner => {
                row.lease_expires_at = now + Duration::seconds(i64::from(ttl_seconds));
                row.heartbeat_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, owner: &str) -> Result<bool> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let mut rows = self.rows.lock().expect("store mutex poisoned");
        match rows.get(name) {
            Some(row) if row.owner_id == owner => {
                rows.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-process job-state table, keyed by job name.
#[derive(Default)]
pub struct MemoryJobStateStore {
    rows: Mutex<HashMap<String, JobState>>,
}

impl MemoryJobStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStateStore for MemoryJobStateStore {
    async fn set_status(
        &self,
        job: &str,
        last_success_at: Option<DateTime<Utc>>,
        last_error: Option<String>,
    ) -> Result<()> {
        let mut rows = self.rows.lock().expect("state mutex poisoned");
        rows.insert(
            job.to_string(),
            JobState {
                last_success_at,
                last_error,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn status(&self, job: &str) -> Result<Option<JobState>> {
        let rows = self.rows.lock().expect("state mutex poisoned");
        Ok(rows.get(job).cloned())
    }
}

//! Distributed lock built on the lease store adapter.
//!
//! Ownership is proven purely by `(name, owner)` matching at the store, never
//! by client-side timers, so clock drift between instances cannot make two of
//! them both believe they hold the lock.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::store::LeaseStore;

/// Proof of a successful acquire. Carries everything the heartbeat and the
/// release need; holding a handle does not by itself keep the lease alive.
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub name: String,
    pub owner_id: String,
    pub lease_seconds: u32,
}

/// Acquire/renew/release against a named lock, on behalf of one instance.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn LeaseStore>,
    owner_id: String,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LeaseStore>, owner_id: String) -> Self {
        Self { store, owner_id }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Attempt to take the lock. `None` means another instance holds a live
    /// lease; retry policy belongs to the caller, not here.
    ///
    /// Calling this again while our own lease is still valid is an idempotent
    /// refresh, not an error.
    pub async fn acquire(&self, name: &str, lease_seconds: u32) -> Result<Option<LockHandle>> {
        let acquired = self
            .store
            .try_acquire(name, &self.owner_id, lease_seconds)
            .await?;
        if acquired {
            Ok(Some(LockHandle {
                name: name.to_string(),
                owner_id: self.owner_id.clone(),
                lease_seconds,
            }))
        } else {
            Ok(None)
        }
    }

    /// Extend the lease. A false result means the lease was lost: the store
    /// let it expire and possibly reassigned it, and all further work under
    /// this handle is unsafe.
    pub async fn renew(&self, handle: &LockHandle) -> Result<bool> {
        self.store
            .renew(&handle.name, &handle.owner_id, handle.lease_seconds)
            .await
    }

    /// Drop the lock. Idempotent: releasing an already-expired or reassigned
    /// lease returns false without erroring.
    pub async fn release(&self, handle: &LockHandle) -> Result<bool> {
        self.store.release(&handle.name, &handle.owner_id).await
    }
}

/// Build this process's stable owner identity.
///
/// An explicit instance id wins; otherwise combine hostname, pid, and a random
/// suffix so that two processes on one host, or two restarts of one process,
/// never collide.
pub fn build_owner_id(instance_id: Option<&str>) -> String {
    if let Some(id) = instance_id {
        if !id.is_empty() {
            return id.to_string();
        }
    }
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", host, std::process::id(), &suffix[..8])
}

//! In-process lock with lease expiry

use crate::error::Result;
use crate::lock::{DistributedLock, Lease, LockKey};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryLock {
    leases: Mutex<HashMap<LockKey, Lease>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The unexpired lease on `key`, if any.
    pub async fn holder(&self, key: &LockKey) -> Option<Lease> {
        let leases = self.leases.lock().await;
        leases
            .get(key)
            .filter(|lease| lease.expires_at > Utc::now())
            .cloned()
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn lock(&self, key: &LockKey, ttl: Duration) -> Result<Option<Lease>> {
        let mut leases = self.leases.lock().await;
        if let Some(current) = leases.get(key) {
            if current.expires_at > Utc::now() {
                return Ok(None);
            }
        }
        let lease = Lease::new(key.clone(), ttl);
        leases.insert(key.clone(), lease.clone());
        Ok(Some(lease))
    }

    async fn release(&self, lease: &Lease) -> Result<bool> {
        let mut leases = self.leases.lock().await;
        match leases.get(&lease.key) {
            Some(current) if current.holder == lease.holder => {
                leases.remove(&lease.key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unlock(&self, key: &LockKey) -> Result<()> {
        self.leases.lock().await.remove(key);
        Ok(())
    }
}

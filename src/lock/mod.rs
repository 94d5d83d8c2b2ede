//! Cache-backed mutual exclusion with lease semantics

pub mod memory;
pub mod redis;

pub use self::memory::MemoryLock;
pub use self::redis::RedisLock;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Key of the form `<namespace>:<blockchain>:<network>:<address>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(namespace: &str, blockchain: &str, network: &str, address: &str) -> Self {
        Self(format!(
            "{}:{}:{}:{}",
            namespace,
            blockchain,
            network,
            address.to_lowercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LockKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An active hold on a key. `holder` is a random token unique to this lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: LockKey,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(key: LockKey, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::MAX);
        Self {
            key,
            holder: uuid::Uuid::new_v4().to_string(),
            expires_at: Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try once to take `key` for `ttl`. `None` means someone else holds it.
    async fn lock(&self, key: &LockKey, ttl: Duration) -> Result<Option<Lease>>;

    /// Release `lease` only if it is still the current holder.
    async fn release(&self, lease: &Lease) -> Result<bool>;

    /// Drop whatever lease is on `key`. Used when the releasing task is not
    /// the one that acquired it.
    async fn unlock(&self, key: &LockKey) -> Result<()>;
}

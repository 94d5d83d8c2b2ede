//! Redis lock: `SET NX PX` to acquire, holder-checked script to release

use crate::error::Result;
use crate::lock::{DistributedLock, Lease, LockKey};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tracing::debug;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisLock {
    conn: ConnectionManager,
    release_script: Script,
}

impl RedisLock {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn lock(&self, key: &LockKey, ttl: Duration) -> Result<Option<Lease>> {
        let lease = Lease::new(key.clone(), ttl);
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key.as_str())
            .arg(&lease.holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;

        if reply.is_some() {
            debug!(key = %key, "Lock acquired: {}", key);
            Ok(Some(lease))
        } else {
            debug!(key = %key, "Lock busy: {}", key);
            Ok(None)
        }
    }

    async fn release(&self, lease: &Lease) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(lease.key.as_str())
            .arg(&lease.holder)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn unlock(&self, key: &LockKey) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await?;
        debug!(key = %key, "Lock released: {}", key);
        Ok(())
    }
}

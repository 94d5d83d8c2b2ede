//! Topic-routed message bus carrying task references
//!
//! The bus never carries task state, only `TaskReference`s. Workers resolve
//! the reference against the task store and claim it there.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryBus;
pub use self::redis::RedisBus;

use crate::error::Result;
use crate::models::TaskReference;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Deliver `reference` to its topic queue now.
    async fn publish(&self, reference: TaskReference) -> Result<()>;

    /// Deliver `reference` to its topic queue no earlier than `at`.
    async fn publish_at(&self, reference: TaskReference, at: DateTime<Utc>) -> Result<()>;

    /// Names of the topic queues this bus can deliver to.
    fn topics(&self) -> Vec<String>;

    fn has_topic(&self, topic: &str) -> bool {
        self.topics().iter().any(|t| t == topic)
    }
}

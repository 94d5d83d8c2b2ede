//! Redis message bus on apalis storages, one storage per topic queue

use crate::bus::MessageBus;
use crate::config::TopicQueue;
use crate::error::{Error, Result};
use crate::models::TaskReference;
use apalis::prelude::*;
use apalis_redis::RedisStorage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

pub const NAMESPACE_PREFIX: &str = "vaultq";

pub fn topic_namespace(topic: &str) -> String {
    format!("{}:{}", NAMESPACE_PREFIX, topic)
}

/// Whole-second score for a delayed job. Rounded up: apalis promotes a job
/// once `now >= score`, so truncating would deliver it before `at`.
pub fn schedule_score(at: DateTime<Utc>) -> i64 {
    at.timestamp() + i64::from(at.timestamp_subsec_nanos() > 0)
}

#[derive(Clone)]
pub struct RedisBus {
    storages: HashMap<String, RedisStorage<TaskReference>>,
}

impl RedisBus {
    pub async fn connect(redis_url: &str, queues: &[TopicQueue]) -> Result<Self> {
        let conn = apalis_redis::connect(redis_url.to_string())
            .await
            .map_err(|e| Error::Bus(format!("failed to connect message bus: {}", e)))?;

        let storages = queues
            .iter()
            .map(|queue| {
                let config =
                    apalis_redis::Config::default().set_namespace(&topic_namespace(&queue.name));
                (
                    queue.name.clone(),
                    RedisStorage::new_with_config(conn.clone(), config),
                )
            })
            .collect();

        Ok(Self { storages })
    }

    /// Storage behind `topic`, for building a worker on it.
    pub fn storage(&self, topic: &str) -> Result<RedisStorage<TaskReference>> {
        self.storages
            .get(topic)
            .cloned()
            .ok_or_else(|| Error::UnknownTopic(topic.to_string()))
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, reference: TaskReference) -> Result<()> {
        let mut storage = self.storage(&reference.topic)?;
        let task_id = reference.id.clone();
        storage
            .push(reference)
            .await
            .map_err(|e| Error::Bus(format!("failed to publish task {}: {}", task_id, e)))?;
        debug!(task_id = %task_id, "Published task reference {}", task_id);
        Ok(())
    }

    async fn publish_at(&self, reference: TaskReference, at: DateTime<Utc>) -> Result<()> {
        if at <= Utc::now() {
            return self.publish(reference).await;
        }
        let mut storage = self.storage(&reference.topic)?;
        let task_id = reference.id.clone();
        storage
            .schedule(reference, schedule_score(at))
            .await
            .map_err(|e| Error::Bus(format!("failed to schedule task {}: {}", task_id, e)))?;
        debug!(task_id = %task_id, at = %at, "Scheduled task reference {} at {}", task_id, at);
        Ok(())
    }

    fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.storages.keys().cloned().collect();
        topics.sort();
        topics
    }
}

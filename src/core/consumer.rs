//! Apalis worker setup for topic queues

use crate::bus::RedisBus;
use crate::config::TopicQueue;
use crate::models::TaskReference;
use crate::queue::QueueService;
use apalis::layers::WorkerBuilderExt;
use apalis::prelude::*;
use apalis_redis::RedisStorage;
use std::sync::Arc;
use tracing::{debug, info};

/// Job handler for one message: resolve the reference, claim, run, persist.
///
/// Returns `Ok` for lost claims and stale references so the message is
/// acknowledged; only store failures surface as job errors.
pub async fn handle_task_reference(
    reference: TaskReference,
    queue: Data<Arc<QueueService>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let processed = queue.handle_reference(&reference).await.map_err(|e| {
        Box::new(std::io::Error::other(format!(
            "Failed to handle task {}: {}",
            reference.id, e
        ))) as Box<dyn std::error::Error + Send + Sync>
    })?;

    debug!(
        task_id = %reference.id,
        topic = %reference.topic,
        processed = processed,
        "TopicConsumer: message for task {} acknowledged",
        reference.id
    );
    Ok(())
}

/// Consumes one topic queue with at most `prefetch` messages in flight.
pub struct TopicConsumer {
    queue: TopicQueue,
    storage: RedisStorage<TaskReference>,
    service: Arc<QueueService>,
}

impl TopicConsumer {
    pub fn new(queue: TopicQueue, bus: &RedisBus, service: Arc<QueueService>) -> crate::Result<Self> {
        let storage = bus.storage(&queue.name)?;
        Ok(Self {
            queue,
            storage,
            service,
        })
    }

    pub fn worker_name(&self) -> String {
        format!("{}-consumer", self.queue.name)
    }

    /// Start the worker and return its handle for shutdown.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let name = self.worker_name();
        let prefetch = self.queue.prefetch;

        info!(
            topic = %self.queue.name,
            prefetch = prefetch,
            "TopicConsumer: starting {} with prefetch {}",
            name,
            prefetch
        );

        tokio::spawn(async move {
            let worker = WorkerBuilder::new(name.as_str())
                .concurrency(prefetch)
                .data(self.service.clone())
                .backend(self.storage)
                .build_fn(handle_task_reference);

            info!(worker = %name, "TopicConsumer: worker {} started", name);
            worker.run().await;
        })
    }
}

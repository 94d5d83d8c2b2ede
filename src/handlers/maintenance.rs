//! Queue maintenance handlers
//!
//! Both run against the bound queue, so they can be listed as schedule
//! subscribers, e.g. `{"every-10-minutes": ["queue.deferred"]}`.

use crate::error::HandlerError;
use crate::handlers::QueueBinding;
use crate::queue::{HandlerRegistry, Process};
use serde::Deserialize;
use tracing::warn;

pub const DEFERRED: &str = "queue.deferred";
pub const STUCK: &str = "queue.stuck";

const DEFAULT_DEFERRED_LIMIT: usize = 1000;
const DEFAULT_STUCK_AFTER_SECS: i64 = 3600;
const DEFAULT_STUCK_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
struct DeferredParams {
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct StuckParams {
    older_than_secs: Option<i64>,
    limit: Option<usize>,
}

pub fn register(registry: HandlerRegistry, binding: &QueueBinding) -> HandlerRegistry {
    let deferred_binding = binding.clone();
    let stuck_binding = binding.clone();
    registry
        .register(DEFERRED, move |process: Process| {
            deferred(process, deferred_binding.clone())
        })
        .register(STUCK, move |process: Process| stuck(process, stuck_binding.clone()))
}

/// Republish eligible Pending tasks. Needs a queue with a message bus.
async fn deferred(process: Process, binding: QueueBinding) -> Result<Process, HandlerError> {
    let queue = binding.require()?;
    let params: DeferredParams = process.params_as()?;
    let limit = params.limit.unwrap_or(DEFAULT_DEFERRED_LIMIT);

    let published = queue.deferred(limit).await?;
    Ok(process
        .info(format!("republished {} of at most {}", published, limit))
        .done())
}

/// Report `Process` tasks that stopped making progress. Requeueing them stays
/// a manual `reset_and_restart`.
async fn stuck(process: Process, binding: QueueBinding) -> Result<Process, HandlerError> {
    let queue = binding.require()?;
    let params: StuckParams = process.params_as()?;
    let older_than =
        chrono::Duration::seconds(params.older_than_secs.unwrap_or(DEFAULT_STUCK_AFTER_SECS));

    let stuck = queue
        .stuck(older_than, params.limit.unwrap_or(DEFAULT_STUCK_LIMIT))
        .await?;
    let mut process = process.info(format!("{} stuck tasks", stuck.len()));
    for task in &stuck {
        warn!(
            task_id = %task.id,
            handler = %task.handler,
            updated_at = %task.updated_at,
            "Task {} stuck in process since {}",
            task.id,
            task.updated_at
        );
        process = process.info(format!("{} ({}) since {}", task.id, task.handler, task.updated_at));
    }
    Ok(process.done())
}

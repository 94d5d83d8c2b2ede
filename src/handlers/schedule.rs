//! Schedule fan-out handlers
//!
//! A period's fan-out task pushes one task per subscribed handler. The
//! handlers need the queue they run on, which only exists after the registry
//! is built, so they hold a late-bound weak reference.

use crate::config::ScheduleConfig;
use crate::core::scheduler::SchedulePeriod;
use crate::error::{HandlerError, Result};
use crate::models::{Params, PushOptions, TaskStatus};
use crate::queue::{HandlerRegistry, Process, QueueService};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{info, warn};

/// Late-bound queue handle shared by every fan-out handler.
#[derive(Clone, Default)]
pub struct QueueBinding {
    queue: Arc<OnceLock<Weak<QueueService>>>,
}

impl QueueBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind once. Later calls are ignored.
    pub fn bind(&self, queue: &Arc<QueueService>) {
        let _ = self.queue.set(Arc::downgrade(queue));
    }

    pub fn get(&self) -> Option<Arc<QueueService>> {
        self.queue.get().and_then(Weak::upgrade)
    }

    /// The bound queue, as a handler error when there is none.
    pub fn require(&self) -> std::result::Result<Arc<QueueService>, HandlerError> {
        self.get().ok_or_else(|| {
            Box::new(std::io::Error::other("handlers are not bound to a queue")) as HandlerError
        })
    }
}

/// Register the fan-out handler of every period.
pub fn register(
    registry: HandlerRegistry,
    config: &ScheduleConfig,
    binding: &QueueBinding,
) -> HandlerRegistry {
    SchedulePeriod::ALL
        .into_iter()
        .fold(registry, |registry, period| {
            let subscribers: Arc<Vec<String>> =
                Arc::new(config.subscribers(period.name()).to_vec());
            let binding = binding.clone();
            registry.register(&period.handler(), move |process: Process| {
                fan_out(process, period, subscribers.clone(), binding.clone())
            })
        })
}

/// Fail when a configured subscriber has no handler in `registry`.
pub fn ensure_subscribers(registry: &HandlerRegistry, config: &ScheduleConfig) -> Result<()> {
    registry.ensure_registered(config.all_subscribers())
}

async fn fan_out(
    process: Process,
    period: SchedulePeriod,
    subscribers: Arc<Vec<String>>,
    binding: QueueBinding,
) -> std::result::Result<Process, HandlerError> {
    let queue = binding.require()?;

    let mut process = process;
    let mut pushed = 0usize;
    for handler in subscribers.iter() {
        let options = PushOptions::default()
            .collision_sign(format!("{}:{}", period.collision_sign(), handler));
        match queue.push(handler, Params::new(), options).await {
            Ok(task) if task.status == TaskStatus::Collision => {
                process = process.info(format!("{}: still live, skipped", handler));
            }
            Ok(task) => {
                pushed += 1;
                process = process.info(format!("{}: pushed {}", handler, task.id));
            }
            Err(e) => {
                warn!(
                    period = %period,
                    handler = %handler,
                    error = %e,
                    "Schedule: failed to push subscriber {} of {}",
                    handler,
                    period
                );
                return Err(e.into());
            }
        }
    }

    info!(
        period = %period,
        pushed = pushed,
        subscribers = subscribers.len(),
        "Schedule: {} pushed {} of {} subscribers",
        period,
        pushed,
        subscribers.len()
    );
    Ok(process.done())
}

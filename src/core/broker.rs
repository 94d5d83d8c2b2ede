//! Cooperative single-concurrency poller
//!
//! Loops on `QueueService::handle`: straight into the next iteration after a
//! task ran, sleeping `idle` after an empty poll or a store error. One task
//! at a time per broker; scale out by running more brokers.

use crate::models::TaskFilter;
use crate::queue::QueueService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info};

/// Stops a running broker. Cloneable, can be handed to a signal handler.
#[derive(Clone, Default)]
pub struct BrokerHandle {
    stopped: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl BrokerHandle {
    /// Ask the broker to exit. A running handler is not interrupted; the
    /// broker exits at the top of its next iteration.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

pub struct Broker {
    queue: Arc<QueueService>,
    filter: TaskFilter,
    idle: Duration,
    handle: BrokerHandle,
}

impl Broker {
    pub fn new(queue: Arc<QueueService>, idle: Duration) -> Self {
        Self {
            queue,
            filter: TaskFilter::default(),
            idle,
            handle: BrokerHandle::default(),
        }
    }

    pub fn with_filter(mut self, filter: TaskFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn handle(&self) -> BrokerHandle {
        self.handle.clone()
    }

    /// Run until stopped. Returns the number of tasks processed.
    pub async fn run(&self) -> u64 {
        info!(
            idle_ms = self.idle.as_millis() as u64,
            "Broker: started, polling every {}ms when idle",
            self.idle.as_millis()
        );
        let mut processed = 0u64;

        while !self.handle.is_stopped() {
            match self.queue.handle(&self.filter).await {
                Ok(true) => {
                    processed += 1;
                    // Keep other futures on this runtime moving between tasks.
                    tokio::task::yield_now().await;
                }
                Ok(false) => {
                    if let Some(metrics) = self.queue.metrics() {
                        metrics.broker_idle_polls_total.inc();
                    }
                    self.sleep_idle().await;
                }
                Err(e) => {
                    error!(error = %e, "Broker: failed to handle task");
                    self.sleep_idle().await;
                }
            }
        }

        info!(processed = processed, "Broker: stopped after {} tasks", processed);
        processed
    }

    async fn sleep_idle(&self) {
        let notified = self.handle.wake.notified();
        if self.handle.is_stopped() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.idle) => {}
            _ = notified => {}
        }
    }
}

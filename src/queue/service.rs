//! Queue service
//!
//! Orchestrates the task lifecycle on top of a `TaskStore`:
//! - `push` creates a task, or a `Collision` record when a live duplicate exists
//! - `handle` / `handle_reference` claim one task with a CAS, run its handler
//!   and persist the resulting snapshot
//! - `reset_and_restart`, `deferred` and `stuck` cover recovery and the
//!   bridge to the message bus

use crate::bus::MessageBus;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::models::{Params, PushOptions, Task, TaskFilter, TaskId, TaskReference, TaskStatus};
use crate::queue::process::Process;
use crate::queue::registry::HandlerRegistry;
use crate::store::TaskStore;
use chrono::Utc;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Candidates tried per `handle` call before giving up on lost claims.
const MAX_CLAIM_RACES: usize = 16;

/// Insert attempts when a concurrent push keeps winning the collision sign.
const MAX_PUSH_ATTEMPTS: usize = 3;

pub struct QueueService {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    bus: Option<Arc<dyn MessageBus>>,
    metrics: Option<Arc<Metrics>>,
}

impl QueueService {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            registry,
            bus: None,
            metrics: None,
        }
    }

    /// Publish task references on `bus` whenever a task becomes Pending.
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_deref()
    }

    pub fn bus(&self) -> Option<&Arc<dyn MessageBus>> {
        self.bus.as_ref()
    }

    fn record<F: FnOnce(&Metrics)>(&self, f: F) {
        if let Some(ref metrics) = self.metrics {
            f(metrics);
        }
    }

    /// Enqueue a task for `handler`.
    ///
    /// When `collision_sign` is held by a live task the returned task is
    /// already in `Collision` and its `error` names the live task.
    pub async fn push(&self, handler: &str, params: Params, options: PushOptions) -> Result<Task> {
        if !self.registry.contains(handler) {
            return Err(Error::UnknownHandler(handler.to_string()));
        }

        let task = Task::new(handler, params, options, Utc::now());
        if let Some(ref bus) = self.bus {
            if !bus.has_topic(&task.topic) {
                return Err(Error::UnknownTopic(task.topic));
            }
        }

        for _ in 0..MAX_PUSH_ATTEMPTS {
            if let Some(sign) = task.collision_sign.as_deref() {
                if let Some(live) = self.store.find_live_by_sign(sign).await? {
                    return self.insert_collision(task, &live).await;
                }
            }

            match self.store.insert(&task).await {
                Ok(()) => {
                    self.record(|m| {
                        m.tasks_pushed_total
                            .with_label_values(&[TaskStatus::Pending.as_str()])
                            .inc()
                    });
                    debug!(
                        task_id = %task.id,
                        handler = %task.handler,
                        topic = %task.topic,
                        start_at = %task.start_at,
                        "Pushed task {} for handler {}",
                        task.id,
                        task.handler
                    );
                    self.announce(&task).await;
                    return Ok(task);
                }
                // A concurrent push took the sign between the lookup and the insert.
                Err(Error::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(Error::Conflict(task.collision_sign.unwrap_or_default()))
    }

    async fn insert_collision(&self, mut task: Task, live: &Task) -> Result<Task> {
        task.status = TaskStatus::Collision;
        task.error = Some(format!(
            "collision sign '{}' is held by live task {}",
            task.collision_sign.as_deref().unwrap_or_default(),
            live.id
        ));
        self.store.insert(&task).await?;
        self.record(|m| {
            m.tasks_pushed_total
                .with_label_values(&[TaskStatus::Collision.as_str()])
                .inc()
        });
        info!(
            task_id = %task.id,
            handler = %task.handler,
            live_task_id = %live.id,
            "Task {} collided with live task {}",
            task.id,
            live.id
        );
        Ok(task)
    }

    /// Publish a Pending task on the bus, delayed until `start_at`. A failed
    /// publish is only logged: the task is durable and `deferred` catches up.
    async fn announce(&self, task: &Task) {
        let Some(ref bus) = self.bus else {
            return;
        };
        if task.status != TaskStatus::Pending {
            return;
        }
        let result = if task.start_at <= Utc::now() {
            bus.publish(task.reference()).await
        } else {
            bus.publish_at(task.reference(), task.start_at).await
        };
        if let Err(e) = result {
            warn!(
                task_id = %task.id,
                topic = %task.topic,
                error = %e,
                "Failed to publish task {}, deferred bridge will republish it",
                task.id
            );
        }
    }

    /// Claim and run one eligible task. Returns false when nothing was claimed.
    pub async fn handle(&self, filter: &TaskFilter) -> Result<bool> {
        let mut lost: Vec<TaskId> = Vec::new();

        while lost.len() < MAX_CLAIM_RACES {
            let candidate = self
                .store
                .select_candidate(filter, Utc::now(), &lost)
                .await?;
            let Some(candidate) = candidate else {
                return Ok(false);
            };

            match self.claim(&candidate.id).await? {
                Some(task) => {
                    self.execute(task).await?;
                    return Ok(true);
                }
                None => lost.push(candidate.id),
            }
        }

        debug!(races = lost.len(), "Gave up after losing {} claims", lost.len());
        Ok(false)
    }

    /// Resolve a reference delivered by the bus and run it if it can be
    /// claimed. A reference arriving before `start_at` is published again,
    /// delayed. Anything else is acknowledged without side effects.
    pub async fn handle_reference(&self, reference: &TaskReference) -> Result<bool> {
        let Some(task) = self.store.get(&reference.id).await? else {
            warn!(task_id = %reference.id, "Task {} referenced on the bus does not exist", reference.id);
            return Ok(false);
        };

        if task.status != TaskStatus::Pending {
            debug!(
                task_id = %task.id,
                status = %task.status,
                "Skipping task {} in status {}",
                task.id,
                task.status
            );
            return Ok(false);
        }
        if task.start_at > Utc::now() {
            debug!(
                task_id = %task.id,
                start_at = %task.start_at,
                "Task {} delivered before {}, rescheduling its reference",
                task.id,
                task.start_at
            );
            self.announce(&task).await;
            return Ok(false);
        }

        match self.claim(&task.id).await? {
            Some(task) => {
                self.execute(task).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pending -> Process. `None` when another worker won the race.
    async fn claim(&self, id: &TaskId) -> Result<Option<Task>> {
        let won = self
            .store
            .compare_and_swap_status(id, TaskStatus::Pending, TaskStatus::Process)
            .await?;
        if !won {
            self.record(|m| m.claim_races_total.inc());
            debug!(task_id = %id, "Lost claim on task {}", id);
            return Ok(None);
        }
        let task = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
        Ok(Some(task))
    }

    /// Run the handler of a claimed task and persist the outcome. This
    /// worker owns the row, so the write is unconditional.
    async fn execute(&self, task: Task) -> Result<Task> {
        let started = Instant::now();
        self.record(|m| m.tasks_in_flight.inc());
        let process = self.run_handler(&task).await;
        self.record(|m| m.tasks_in_flight.dec());

        let elapsed = started.elapsed();
        let persisted = process.into_task(Utc::now(), Some(elapsed.as_millis() as i64));
        self.store.update(&persisted).await?;

        self.record(|m| {
            m.tasks_processed_total
                .with_label_values(&[persisted.handler.as_str(), persisted.status.as_str()])
                .inc();
            m.task_execution_seconds
                .with_label_values(&[persisted.handler.as_str()])
                .observe(elapsed.as_secs_f64());
        });

        match persisted.status {
            TaskStatus::Error => error!(
                task_id = %persisted.id,
                handler = %persisted.handler,
                attempt = persisted.attempt,
                error = persisted.error.as_deref().unwrap_or_default(),
                "Task {} failed",
                persisted.id
            ),
            TaskStatus::Pending => info!(
                task_id = %persisted.id,
                handler = %persisted.handler,
                attempt = persisted.attempt,
                start_at = %persisted.start_at,
                "Task {} rescheduled for {}",
                persisted.id,
                persisted.start_at
            ),
            _ => debug!(
                task_id = %persisted.id,
                handler = %persisted.handler,
                duration_ms = elapsed.as_millis() as u64,
                "Task {} done in {}ms",
                persisted.id,
                elapsed.as_millis()
            ),
        }

        self.announce(&persisted).await;
        Ok(persisted)
    }

    /// The handler's Process, or an `Error` Process built from the claimed
    /// snapshot when the handler fails, panics or is missing.
    async fn run_handler(&self, task: &Task) -> Process {
        let seed = Process::new(task.clone());
        let Some(handler) = self.registry.get(&task.handler) else {
            return seed.error(format!("handler is not registered: {}", task.handler));
        };

        match AssertUnwindSafe(handler(seed.clone())).catch_unwind().await {
            Ok(Ok(process)) if process.task().id == task.id => process,
            Ok(Ok(process)) => seed.error(format!(
                "handler returned a process for task {} instead of {}",
                process.task().id,
                task.id
            )),
            Ok(Err(e)) => seed.error(describe_error(&*e)),
            Err(panic) => seed.error(format!("handler panicked: {}", panic_message(&*panic))),
        }
    }

    /// Put a task back to `Pending` with a fresh `start_at`, keeping its id.
    ///
    /// Meant for callers holding a pointer to a task that must be redone, and
    /// for manual requeue of stuck `Process` tasks. `Collision` records are
    /// never restarted.
    pub async fn reset_and_restart(&self, task: &Task) -> Result<Task> {
        let current = self
            .store
            .get(&task.id)
            .await?
            .ok_or_else(|| Error::TaskNotFound(task.id.clone()))?;
        let now = Utc::now();

        if current.status == TaskStatus::Collision {
            return Err(Error::InvalidTransition {
                id: current.id,
                status: current.status,
            });
        }

        // One conditional write: a claim landing after the `get` makes it miss.
        let from = current.status;
        if !self.store.restart(&current.id, from, now).await? {
            return Err(Error::Storage(format!(
                "task {} changed status while restarting",
                current.id
            )));
        }

        let mut restarted = current;
        restarted.start_at = now;
        restarted.updated_at = now;
        if from != TaskStatus::Pending {
            restarted.status = TaskStatus::Pending;
            restarted.attempt = 0;
            restarted.error = None;
            info!(
                task_id = %restarted.id,
                handler = %restarted.handler,
                from = %from,
                "Restarted task {} from {}",
                restarted.id,
                from
            );
        }
        self.announce(&restarted).await;
        Ok(restarted)
    }

    /// Republish up to `limit` eligible Pending tasks on the bus. Returns how
    /// many references were published.
    pub async fn deferred(&self, limit: usize) -> Result<usize> {
        let bus = self
            .bus
            .as_ref()
            .ok_or_else(|| Error::Config("deferred publishing needs a message bus".to_string()))?;

        let tasks = self.store.select_eligible(Utc::now(), limit).await?;
        let mut published = 0;
        for task in &tasks {
            bus.publish(task.reference()).await?;
            published += 1;
        }

        self.record(|m| m.deferred_published_total.inc_by(published as u64));
        info!(published = published, limit = limit, "Republished {} eligible tasks", published);
        Ok(published)
    }

    /// `Process` tasks not updated for `older_than`. Detection only.
    pub async fn stuck(&self, older_than: chrono::Duration, limit: usize) -> Result<Vec<Task>> {
        self.store
            .select_stale(TaskStatus::Process, Utc::now() - older_than, limit)
            .await
    }
}

fn describe_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str("\ncaused by: ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

//! Durable task storage
//!
//! The store is the single source of truth for task state. Ownership of a
//! task is decided only by `compare_and_swap_status`, which every backend
//! must implement as one atomic conditional update.

pub mod memory;
pub mod postgres;

pub use memory::MemoryTaskStore;
pub use postgres::PostgresTaskStore;

use crate::error::Result;
use crate::models::{Task, TaskFilter, TaskId, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Fails with `Error::Conflict` when the task is live
    /// and another live task already holds its collision sign.
    async fn insert(&self, task: &Task) -> Result<()>;

    async fn get(&self, id: &TaskId) -> Result<Option<Task>>;

    /// The live (Pending or Process) task holding `sign`, if any.
    async fn find_live_by_sign(&self, sign: &str) -> Result<Option<Task>>;

    /// Atomically move `id` from `expected` to `new`. Returns false when the
    /// row was not in `expected` (another worker won). A swap into `Process`
    /// also increments `attempt` and refreshes `updated_at`.
    async fn compare_and_swap_status(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool>;

    /// Atomically put `id` back to Pending at `start_at`, provided it is
    /// still in `expected`. Leaving a non-Pending status also resets
    /// `attempt` to 0 and clears `error`. Returns false when the row moved on.
    async fn restart(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        start_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Unconditionally overwrite the mutable fields of an existing task.
    async fn update(&self, task: &Task) -> Result<()>;

    /// Earliest eligible Pending task matching `filter`, ordered by
    /// `start_at` then `priority`, skipping ids in `skip`.
    async fn select_candidate(
        &self,
        filter: &TaskFilter,
        now: DateTime<Utc>,
        skip: &[TaskId],
    ) -> Result<Option<Task>>;

    /// Up to `limit` eligible Pending tasks, same ordering as `select_candidate`.
    async fn select_eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>>;

    /// Tasks in `status` whose `updated_at` is older than `older_than`.
    async fn select_stale(
        &self,
        status: TaskStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>>;
}

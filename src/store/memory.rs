//! In-process task store

use crate::error::{Error, Result};
use crate::models::{Task, TaskFilter, TaskId, TaskStatus};
use crate::store::TaskStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Task store backed by a map behind a single lock. Every operation takes the
/// write lock for its whole read-check-write, which makes CAS and the
/// collision-sign check atomic.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }
}

/// Another live task (not `id`) already holding `sign`.
fn sign_taken(tasks: &HashMap<TaskId, Task>, id: &TaskId, sign: Option<&str>) -> bool {
    match sign {
        Some(sign) => tasks.values().any(|t| {
            &t.id != id && t.status.is_live() && t.collision_sign.as_deref() == Some(sign)
        }),
        None => false,
    }
}

fn sorted_eligible<'a>(
    tasks: impl Iterator<Item = &'a Task>,
    now: DateTime<Utc>,
) -> Vec<&'a Task> {
    let mut eligible: Vec<&Task> = tasks.filter(|t| t.is_eligible(now)).collect();
    eligible.sort_by(|a, b| {
        a.start_at
            .cmp(&b.start_at)
            .then(a.priority.cmp(&b.priority))
            .then(a.created_at.cmp(&b.created_at))
    });
    eligible
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(Error::Storage(format!("task {} already exists", task.id)));
        }
        if task.status.is_live() && sign_taken(&tasks, &task.id, task.collision_sign.as_deref()) {
            return Err(Error::Conflict(
                task.collision_sign.clone().unwrap_or_default(),
            ));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn find_live_by_sign(&self, sign: &str) -> Result<Option<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .find(|t| t.status.is_live() && t.collision_sign.as_deref() == Some(sign))
            .cloned())
    }

    async fn compare_and_swap_status(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        let sign = match tasks.get(id) {
            Some(task) if task.status == expected => task.collision_sign.clone(),
            _ => return Ok(false),
        };
        if new.is_live() && !expected.is_live() && sign_taken(&tasks, id, sign.as_deref()) {
            return Err(Error::Conflict(sign.unwrap_or_default()));
        }
        match tasks.get_mut(id) {
            Some(task) => {
                task.status = new;
                task.updated_at = Utc::now();
                if new == TaskStatus::Process {
                    task.attempt += 1;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restart(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        start_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        let sign = match tasks.get(id) {
            Some(task) if task.status == expected => task.collision_sign.clone(),
            _ => return Ok(false),
        };
        if !expected.is_live() && sign_taken(&tasks, id, sign.as_deref()) {
            return Err(Error::Conflict(sign.unwrap_or_default()));
        }
        match tasks.get_mut(id) {
            Some(task) => {
                if expected != TaskStatus::Pending {
                    task.status = TaskStatus::Pending;
                    task.attempt = 0;
                    task.error = None;
                }
                task.start_at = start_at;
                task.updated_at = start_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if task.status.is_live() && sign_taken(&tasks, &task.id, task.collision_sign.as_deref()) {
            return Err(Error::Conflict(
                task.collision_sign.clone().unwrap_or_default(),
            ));
        }
        match tasks.get_mut(&task.id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(())
            }
            None => Err(Error::TaskNotFound(task.id.clone())),
        }
    }

    async fn select_candidate(
        &self,
        filter: &TaskFilter,
        now: DateTime<Utc>,
        skip: &[TaskId],
    ) -> Result<Option<Task>> {
        let tasks = self.tasks.read().await;
        let candidate = sorted_eligible(tasks.values(), now)
            .into_iter()
            .find(|t| filter.matches(&t.handler) && !skip.contains(&t.id))
            .cloned();
        Ok(candidate)
    }

    async fn select_eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        Ok(sorted_eligible(tasks.values(), now)
            .into_iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn select_stale(
        &self,
        status: TaskStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut stale: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == status && t.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        stale.truncate(limit);
        Ok(stale)
    }
}

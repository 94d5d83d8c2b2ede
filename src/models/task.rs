//! Task records persisted by the task store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Handler-specific payload.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Priority used when the caller does not pick one. Lower is served first.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Topic queue a task is routed to when none is given.
pub const DEFAULT_TOPIC: &str = "default";

/// Opaque task identifier, assigned once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for `start_at`.
    Pending,
    /// Claimed by a worker, handler running.
    Process,
    Done,
    Error,
    /// Rejected at push time: a live task already holds the collision sign.
    Collision,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Process => "process",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
            TaskStatus::Collision => "collision",
        }
    }

    /// Pending and Process tasks hold their collision sign.
    pub fn is_live(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Process)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Error | TaskStatus::Collision
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "process" => Ok(TaskStatus::Process),
            "done" => Ok(TaskStatus::Done),
            "error" => Ok(TaskStatus::Error),
            "collision" => Ok(TaskStatus::Collision),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// One unit of schedulable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub handler: String,
    pub params: Params,
    pub start_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub priority: i32,
    pub topic: String,
    pub collision_sign: Option<String>,
    /// Number of claims so far. Incremented by the store, read by handlers.
    pub attempt: i32,
    pub info: String,
    pub error: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Build a fresh `Pending` task from push options.
    pub fn new(handler: &str, params: Params, options: PushOptions, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            handler: handler.to_string(),
            params,
            start_at: options.start_at.unwrap_or(now),
            status: TaskStatus::Pending,
            priority: options.priority.unwrap_or(DEFAULT_PRIORITY),
            topic: options.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            collision_sign: options.collision_sign,
            attempt: 0,
            info: String::new(),
            error: None,
            execution_time_ms: None,
            updated_at: now,
            created_at: now,
        }
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.start_at <= now
    }

    pub fn reference(&self) -> TaskReference {
        TaskReference {
            id: self.id.clone(),
            topic: self.topic.clone(),
        }
    }
}

/// Optional settings accepted by `QueueService::push`.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub start_at: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub topic: Option<String>,
    pub collision_sign: Option<String>,
}

impl PushOptions {
    pub fn start_at(mut self, at: DateTime<Utc>) -> Self {
        self.start_at = Some(at);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn collision_sign(mut self, sign: impl Into<String>) -> Self {
        self.collision_sign = Some(sign.into());
        self
    }
}

/// Restricts which handlers a poller will claim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub include_handlers: Option<Vec<String>>,
    pub exclude_handlers: Option<Vec<String>>,
}

impl TaskFilter {
    pub fn matches(&self, handler: &str) -> bool {
        if let Some(ref include) = self.include_handlers {
            if !include.iter().any(|h| h == handler) {
                return false;
            }
        }
        if let Some(ref exclude) = self.exclude_handlers {
            if exclude.iter().any(|h| h == handler) {
                return false;
            }
        }
        true
    }
}

/// Lightweight pointer carried over the message bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReference {
    pub id: TaskId,
    pub topic: String,
}

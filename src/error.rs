//! Error types shared by the queue core

use crate::models::{Network, TaskId, TaskStatus};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by handlers. Anything boxed here lands in `Task.error`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("task store error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("cache error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("message bus error: {0}")]
    Bus(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("handler is not registered: {0}")]
    UnknownHandler(String),

    #[error("topic queue is not configured: {0}")]
    UnknownTopic(String),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("a live task already holds collision sign {0}")]
    Conflict(String),

    #[error("task {id} cannot be restarted from status {status}")]
    InvalidTransition { id: TaskId, status: TaskStatus },

    #[error("no free consumer for network {network}")]
    NoFreeConsumer { network: Network },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the caller should reschedule instead of failing the task.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NoFreeConsumer { .. } | Error::Redis(_) | Error::Bus(_)
        )
    }
}

//! Immutable transition builder handed to task handlers
//!
//! A handler receives a `Process` seeded from the claimed task and returns a
//! new one describing what should happen next. Nothing here performs I/O;
//! the queue service applies the result with `into_task`.

use crate::models::{Params, Task, TaskStatus};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, PartialEq)]
enum Transition {
    /// Handler returned without choosing an outcome.
    Unset,
    Done,
    Later(DateTime<Utc>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Process {
    task: Task,
    params: Params,
    info: Vec<String>,
    transition: Transition,
}

impl Process {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            params: Params::new(),
            info: Vec::new(),
            transition: Transition::Unset,
        }
    }

    /// The task snapshot as it was when claimed.
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Deserialize the task params into a handler-specific type.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(self.task.params.clone()))
    }

    /// Set (or overwrite) one param on the persisted task.
    pub fn param(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let mut next = self.clone();
        next.params.insert(key.into(), value.into());
        next
    }

    /// Append a diagnostic line to `Task.info`.
    pub fn info(&self, text: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.info.push(text.into());
        next
    }

    pub fn done(&self) -> Self {
        self.with_transition(Transition::Done)
    }

    /// Return the task to `Pending`, eligible again at `at`.
    pub fn later(&self, at: DateTime<Utc>) -> Self {
        self.with_transition(Transition::Later(at))
    }

    /// Return the task to `Pending`, eligible again after `delay` from now.
    pub fn later_in(&self, delay: Duration) -> Self {
        self.later(Utc::now() + delay)
    }

    pub fn error(&self, message: impl Into<String>) -> Self {
        self.with_transition(Transition::Error(message.into()))
    }

    pub fn is_done(&self) -> bool {
        matches!(self.transition, Transition::Done | Transition::Unset)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.transition, Transition::Error(_))
    }

    pub fn later_at(&self) -> Option<DateTime<Utc>> {
        match self.transition {
            Transition::Later(at) => Some(at),
            _ => None,
        }
    }

    fn with_transition(&self, transition: Transition) -> Self {
        let mut next = self.clone();
        next.transition = transition;
        next
    }

    /// Apply the pending transitions and produce the snapshot to persist.
    ///
    /// `attempt` is left untouched: the store counts claims, not handlers.
    pub fn into_task(self, now: DateTime<Utc>, execution_time_ms: Option<i64>) -> Task {
        let mut task = self.task;

        task.params.extend(self.params);
        for line in self.info {
            if !task.info.is_empty() {
                task.info.push('\n');
            }
            task.info.push_str(&line);
        }

        match self.transition {
            Transition::Unset | Transition::Done => {
                task.status = TaskStatus::Done;
            }
            Transition::Later(at) => {
                task.status = TaskStatus::Pending;
                task.start_at = at;
            }
            Transition::Error(message) => {
                task.status = TaskStatus::Error;
                task.error = Some(message);
            }
        }

        task.updated_at = now;
        if execution_time_ms.is_some() {
            task.execution_time_ms = execution_time_ms;
        }
        task
    }
}

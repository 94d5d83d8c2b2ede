//! Shared data models spanning the queue layers.

pub mod consumer;
pub mod task;

pub use consumer::{Consumer, Network};
pub use task::{
    Params, PushOptions, Task, TaskFilter, TaskId, TaskReference, TaskStatus, DEFAULT_PRIORITY,
    DEFAULT_TOPIC,
};

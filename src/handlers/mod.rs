//! Built-in task handlers

pub mod maintenance;
pub mod schedule;

pub use schedule::{ensure_subscribers, QueueBinding};

use crate::config::ScheduleConfig;
use crate::queue::HandlerRegistry;

/// Registry with every built-in handler. Application binaries add their own
/// handlers on top with `register` before handing it to `connect_queue`.
pub fn default_registry(schedule: &ScheduleConfig, binding: &QueueBinding) -> HandlerRegistry {
    let registry = schedule::register(HandlerRegistry::new(), schedule, binding);
    maintenance::register(registry, binding)
}

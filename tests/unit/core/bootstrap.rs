//! Unit tests for queue assembly

use crate::common::done;
use std::sync::Arc;
use vaultq::bus::{MemoryBus, MessageBus};
use vaultq::config::ScheduleConfig;
use vaultq::core::bootstrap::assemble_queue;
use vaultq::handlers::{default_registry, QueueBinding};
use vaultq::metrics::Metrics;
use vaultq::models::{Params, PushOptions, TaskFilter, TaskStatus};
use vaultq::store::{MemoryTaskStore, TaskStore};

#[tokio::test]
async fn store_only_queue_runs_without_a_bus() {
    let config = ScheduleConfig::default();
    let binding = QueueBinding::new();
    let store = Arc::new(MemoryTaskStore::new());
    let queue = assemble_queue(
        store.clone(),
        None,
        default_registry(&config, &binding).register("report", done),
        &config,
        &binding,
        Arc::new(Metrics::new().unwrap()),
    )
    .unwrap();

    assert!(queue.bus().is_none());
    assert!(binding.get().is_some());

    let task = queue.push("report", Params::new(), PushOptions::default()).await.unwrap();
    assert!(queue.handle(&TaskFilter::default()).await.unwrap());
    let stored = store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Done);
}

#[tokio::test]
async fn queue_with_bus_publishes_pushes() {
    let config = ScheduleConfig::default();
    let binding = QueueBinding::new();
    let bus = Arc::new(MemoryBus::new(["default"]));
    let queue = assemble_queue(
        Arc::new(MemoryTaskStore::new()),
        Some(bus.clone() as Arc<dyn MessageBus>),
        default_registry(&config, &binding).register("report", done),
        &config,
        &binding,
        Arc::new(Metrics::new().unwrap()),
    )
    .unwrap();

    let task = queue.push("report", Params::new(), PushOptions::default()).await.unwrap();
    let published = bus.drain();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].reference, task.reference());
}

//! Shared fixtures for unit tests

use std::sync::Arc;
use vaultq::error::HandlerError;
use vaultq::queue::{HandlerRegistry, Process, QueueService};
use vaultq::store::MemoryTaskStore;

/// Queue service over a fresh in-memory store.
pub fn queue(registry: HandlerRegistry) -> (Arc<QueueService>, Arc<MemoryTaskStore>) {
    let store = Arc::new(MemoryTaskStore::new());
    let queue = Arc::new(QueueService::new(store.clone(), Arc::new(registry)));
    (queue, store)
}

pub async fn done(process: Process) -> Result<Process, HandlerError> {
    Ok(process.done())
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}

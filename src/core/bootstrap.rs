//! Startup wiring shared by the binaries
//!
//! Connections to Postgres and Redis are retried with exponential backoff so
//! workers started alongside their dependencies don't crash-loop.

use crate::bus::{MessageBus, RedisBus};
use crate::config::{QueueConfig, ScheduleConfig, WalletConfig};
use crate::error::{Error, Result};
use crate::handlers::{ensure_subscribers, QueueBinding};
use crate::lock::RedisLock;
use crate::metrics::Metrics;
use crate::queue::{HandlerRegistry, QueueService};
use crate::store::{PostgresTaskStore, TaskStore};
use crate::wallet::{ConsumerAllocator, PostgresTransactionLedger};
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info, warn};

const CONNECT_ATTEMPTS: usize = 5;

fn backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(10))
        .with_max_times(CONNECT_ATTEMPTS)
}

async fn with_retry<T, F, Fut>(what: &'static str, connect: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let value = connect
        .retry(backoff())
        .when(|e: &Error| !matches!(e, Error::Config(_)))
        .notify(|e: &Error, delay: Duration| {
            warn!(
                target_service = what,
                error = %e,
                delay_ms = delay.as_millis() as u64,
                "Failed to connect to {}, retrying in {:?}",
                what,
                delay
            );
        })
        .await?;
    info!(target_service = what, "{} connected", what);
    Ok(value)
}

pub async fn connect_store(database_url: &str) -> Result<Arc<PostgresTaskStore>> {
    let store = with_retry("Postgres task store", || PostgresTaskStore::connect(database_url)).await?;
    Ok(Arc::new(store))
}

pub async fn connect_bus(redis_url: &str, config: &QueueConfig) -> Result<Arc<RedisBus>> {
    let bus = with_retry("Redis message bus", || {
        RedisBus::connect(redis_url, &config.topic_queues)
    })
    .await?;
    Ok(Arc::new(bus))
}

pub async fn connect_lock(redis_url: &str) -> Result<Arc<RedisLock>> {
    let lock = with_retry("Redis lock", || RedisLock::connect(redis_url)).await?;
    Ok(Arc::new(lock))
}

async fn connect_postgres(database_url: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "Postgres connection error");
        }
    });
    Ok(client)
}

/// Allocator over the configured consumer pool, backed by Redis locks and
/// the Postgres transaction ledger.
pub async fn connect_allocator(
    database_url: &str,
    redis_url: &str,
    config: &WalletConfig,
    metrics: Arc<Metrics>,
) -> Result<ConsumerAllocator> {
    let client = with_retry("Postgres ledger", || connect_postgres(database_url)).await?;
    let ledger = PostgresTransactionLedger::new(client).await?;
    let lock = connect_lock(redis_url).await?;
    Ok(ConsumerAllocator::new(config, Arc::new(ledger), lock).with_metrics(metrics))
}

/// Build the queue service around `registry` and bind the built-in handlers
/// to it. Fails before anything runs when a schedule subscriber has no
/// handler.
pub fn assemble_queue(
    store: Arc<dyn TaskStore>,
    bus: Option<Arc<dyn MessageBus>>,
    registry: HandlerRegistry,
    schedule: &ScheduleConfig,
    binding: &QueueBinding,
    metrics: Arc<Metrics>,
) -> Result<Arc<QueueService>> {
    ensure_subscribers(&registry, schedule)?;

    let mut queue = QueueService::new(store, Arc::new(registry)).with_metrics(metrics);
    if let Some(bus) = bus {
        queue = queue.with_bus(bus);
    }
    let queue = Arc::new(queue);
    binding.bind(&queue);

    info!(
        handlers = ?queue.registry().names(),
        topics = ?queue.bus().map(|bus| bus.topics()).unwrap_or_default(),
        "Queue service ready"
    );
    Ok(queue)
}

/// Queue service over Postgres and the Redis bus, for consumers and the
/// tools feeding them.
pub async fn connect_queue(
    database_url: &str,
    redis_url: &str,
    config: &QueueConfig,
    schedule: &ScheduleConfig,
    registry: HandlerRegistry,
    binding: &QueueBinding,
    metrics: Arc<Metrics>,
) -> Result<(Arc<QueueService>, Arc<RedisBus>)> {
    ensure_subscribers(&registry, schedule)?;
    let store = connect_store(database_url).await?;
    let bus = connect_bus(redis_url, config).await?;

    let queue = assemble_queue(
        store,
        Some(bus.clone() as Arc<dyn MessageBus>),
        registry,
        schedule,
        binding,
        metrics,
    )?;
    Ok((queue, bus))
}

/// Queue service over Postgres alone. Nothing is published, so a deployment
/// without consumers does not need Redis.
pub async fn connect_store_queue(
    database_url: &str,
    schedule: &ScheduleConfig,
    registry: HandlerRegistry,
    binding: &QueueBinding,
    metrics: Arc<Metrics>,
) -> Result<Arc<QueueService>> {
    ensure_subscribers(&registry, schedule)?;
    let store = connect_store(database_url).await?;
    assemble_queue(store, None, registry, schedule, binding, metrics)
}

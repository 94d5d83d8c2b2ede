//! Broker worker
//!
//! Polls the task store and runs one eligible task at a time. Run several
//! brokers to scale out; the store's claim keeps them from running a task twice.
//! Only Postgres is needed unless `--publish` (or `BROKER_PUBLISH`) also feeds
//! topic consumers through Redis.

use clap::Parser;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use vaultq::config::{get_database_url, get_environment, get_metrics_port, get_redis_url};
use vaultq::config::{QueueConfig, ScheduleConfig};
use vaultq::core::bootstrap::{connect_queue, connect_store_queue};
use vaultq::core::http::{spawn_server, AppState};
use vaultq::core::{Broker, PeriodScheduler, SchedulePeriod};
use vaultq::handlers::{default_registry, QueueBinding};
use vaultq::logging;
use vaultq::metrics::Metrics;

#[derive(Parser, Debug)]
#[command(name = "broker", about = "Cooperative task broker")]
struct Args {
    /// Also trigger every schedule period from an in-process cron loop
    #[arg(long)]
    with_schedule: bool,

    /// Also publish task references for topic consumers (needs Redis)
    #[arg(long)]
    publish: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logging::init_logging();
    let args = Args::parse();

    info!(environment = %get_environment(), "Starting broker");

    let queue_config = QueueConfig::from_env()?;
    let schedule_config = ScheduleConfig::from_env()?;
    let metrics = Arc::new(Metrics::new()?);

    let binding = QueueBinding::new();
    let registry = default_registry(&schedule_config, &binding);
    let queue = if args.publish || queue_config.broker_publish {
        let (queue, _bus) = connect_queue(
            &get_database_url(),
            &get_redis_url(),
            &queue_config,
            &schedule_config,
            registry,
            &binding,
            metrics.clone(),
        )
        .await?;
        queue
    } else {
        connect_store_queue(&get_database_url(), &schedule_config, registry, &binding, metrics.clone())
            .await?
    };

    let scheduler = if args.with_schedule {
        let scheduler = PeriodScheduler::new(queue.clone(), SchedulePeriod::ALL.to_vec())?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        None
    };

    let server = spawn_server(get_metrics_port(), AppState::new(metrics, "broker"));

    let broker = Broker::new(queue, queue_config.broker_idle)
        .with_filter(queue_config.broker_filter.clone());
    let stop = broker.handle();
    let running = tokio::spawn(async move { broker.run().await });

    signal::ctrl_c().await?;
    info!("Shutting down broker, waiting for the running task...");
    stop.stop();
    if let Some(ref scheduler) = scheduler {
        scheduler.stop().await;
    }

    match running.await {
        Ok(processed) => info!(processed = processed, "Broker stopped"),
        Err(e) => warn!(error = %e, "Broker task ended abnormally"),
    }
    if let Some(server) = server {
        server.abort();
    }
    Ok(())
}

//! Republish eligible pending tasks on the message bus.
//!
//! Meant to run periodically; catches tasks whose publication was lost.

use clap::Parser;
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::info;
use vaultq::config::{get_database_url, get_redis_url, QueueConfig, ScheduleConfig};
use vaultq::core::bootstrap::connect_queue;
use vaultq::handlers::{default_registry, QueueBinding};
use vaultq::logging;
use vaultq::metrics::Metrics;

#[derive(Parser, Debug)]
#[command(name = "deferred", about = "Republish eligible pending tasks")]
struct Args {
    /// Maximum number of tasks to republish
    #[arg(long, default_value_t = 1000)]
    limit: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logging::init_logging();
    let args = Args::parse();

    let queue_config = QueueConfig::from_env()?;
    let binding = QueueBinding::new();
    let schedule_config = ScheduleConfig::from_env()?;
    let registry = default_registry(&schedule_config, &binding);
    let (queue, _bus) = connect_queue(
        &get_database_url(),
        &get_redis_url(),
        &queue_config,
        &schedule_config,
        registry,
        &binding,
        Arc::new(Metrics::new()?),
    )
    .await?;

    let published = queue.deferred(args.limit).await?;
    info!(published = published, "Deferred run finished, {} tasks republished", published);
    Ok(())
}

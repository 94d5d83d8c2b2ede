//! Trigger one schedule period, typically from an external cron.

use clap::Parser;
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::info;
use vaultq::config::{get_database_url, get_redis_url, QueueConfig, ScheduleConfig};
use vaultq::core::bootstrap::connect_queue;
use vaultq::core::scheduler::{trigger, SchedulePeriod};
use vaultq::handlers::{default_registry, QueueBinding};
use vaultq::logging;
use vaultq::metrics::Metrics;

#[derive(Parser, Debug)]
#[command(name = "schedule", about = "Push the fan-out task of a schedule period")]
struct Args {
    #[arg(long, value_enum)]
    period: SchedulePeriod,
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

    let task = trigger(&queue, args.period).await?;
    info!(task_id = %task.id, status = %task.status, "Schedule {} triggered", args.period);
    Ok(())
}

//! Topic consumer worker
//!
//! Takes task references from one topic queue with the queue's prefetch and
//! runs them through the task store claim.

use clap::Parser;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use vaultq::config::{get_database_url, get_environment, get_metrics_port, get_redis_url};
use vaultq::config::{QueueConfig, ScheduleConfig};
use vaultq::core::bootstrap::connect_queue;
use vaultq::core::http::{spawn_server, AppState};
use vaultq::core::TopicConsumer;
use vaultq::handlers::{default_registry, QueueBinding};
use vaultq::logging;
use vaultq::metrics::Metrics;

#[derive(Parser, Debug)]
#[command(name = "consumer", about = "Distributed topic consumer")]
struct Args {
    /// Topic queue to consume, one of TOPIC_QUEUES
    #[arg(long)]
    queue: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logging::init_logging();
    let args = Args::parse();

    let queue_config = QueueConfig::from_env()?;
    let topic_queue = queue_config
        .topic_queue(&args.queue)
        .cloned()
        .ok_or_else(|| {
            let known: Vec<&str> = queue_config
                .topic_queues
                .iter()
                .map(|q| q.name.as_str())
                .collect();
            format!("unknown queue '{}', expected one of: {}", args.queue, known.join(", "))
        })?;

    info!(
        environment = %get_environment(),
        topic = %topic_queue.name,
        prefetch = topic_queue.prefetch,
        "Starting consumer for {}",
        topic_queue.name
    );

    let schedule_config = ScheduleConfig::from_env()?;
    let metrics = Arc::new(Metrics::new()?);
    let binding = QueueBinding::new();
    let registry = default_registry(&schedule_config, &binding);
    let (queue, bus) = connect_queue(
        &get_database_url(),
        &get_redis_url(),
        &queue_config,
        &schedule_config,
        registry,
        &binding,
        metrics.clone(),
    )
    .await?;

    let role = format!("consumer:{}", topic_queue.name);
    let server = spawn_server(get_metrics_port(), AppState::new(metrics, role));
    let worker = TopicConsumer::new(topic_queue, &bus, queue)?.start();

    signal::ctrl_c().await?;
    info!("Shutting down consumer...");
    worker.abort();
    if let Some(server) = server {
        server.abort();
    }
    info!("Consumer stopped");
    Ok(())
}

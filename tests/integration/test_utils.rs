//! Connection helpers shared by integration tests

use vaultq::bus::RedisBus;
use vaultq::config::{get_database_url, get_redis_url, TopicQueue};
use vaultq::lock::RedisLock;
use vaultq::store::PostgresTaskStore;

/// Unique suffix so concurrent test runs don't share rows or keys.
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

pub async fn postgres_store() -> Option<PostgresTaskStore> {
    match PostgresTaskStore::connect(&get_database_url()).await {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!("skipping: Postgres unavailable: {}", e);
            None
        }
    }
}

pub async fn postgres_client() -> Option<tokio_postgres::Client> {
    match tokio_postgres::connect(&get_database_url(), tokio_postgres::NoTls).await {
        Ok((client, connection)) => {
            tokio::spawn(connection);
            Some(client)
        }
        Err(e) => {
            eprintln!("skipping: Postgres unavailable: {}", e);
            None
        }
    }
}

pub async fn redis_lock() -> Option<RedisLock> {
    match RedisLock::connect(&get_redis_url()).await {
        Ok(lock) => Some(lock),
        Err(e) => {
            eprintln!("skipping: Redis unavailable: {}", e);
            None
        }
    }
}

pub async fn redis_bus(topics: &[&str]) -> Option<RedisBus> {
    let queues: Vec<TopicQueue> = topics
        .iter()
        .map(|name| TopicQueue {
            name: name.to_string(),
            prefetch: 2,
        })
        .collect();
    match RedisBus::connect(&get_redis_url(), &queues).await {
        Ok(bus) => Some(bus),
        Err(e) => {
            eprintln!("skipping: Redis unavailable: {}", e);
            None
        }
    }
}

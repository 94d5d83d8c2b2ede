//! Environment-driven configuration

use crate::error::{Error, Result};
use crate::models::{Consumer, TaskFilter};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

pub const DEFAULT_TOPIC_QUEUES: &str = "default:10,trigger:10,metric-history:2,metric-current:5";
pub const DEFAULT_BROKER_IDLE_MS: u64 = 1000;
pub const DEFAULT_LOCK_TTL_SECONDS: u64 = 3600;
pub const DEFAULT_LOCK_NAMESPACE: &str = "lock";

pub fn get_environment() -> String {
    env::var("ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string())
}

pub fn get_database_url() -> String {
    env::var("DATABASE_URL")
        .unwrap_or_else(|_| "host=localhost user=postgres dbname=vaultq".to_string())
}

pub fn get_redis_url() -> String {
    env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string())
}

pub fn get_metrics_port() -> Option<u16> {
    env::var("METRICS_PORT").ok().and_then(|p| p.parse().ok())
}

/// A message-bus queue and the number of in-flight messages a worker takes from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicQueue {
    pub name: String,
    pub prefetch: usize,
}

/// Parse `name:prefetch,name:prefetch`. A missing prefetch means 1.
pub fn parse_topic_queues(raw: &str) -> Result<Vec<TopicQueue>> {
    let mut queues = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, prefetch) = match entry.split_once(':') {
            Some((name, prefetch)) => {
                let prefetch = prefetch.trim().parse::<usize>().map_err(|e| {
                    Error::Config(format!("invalid prefetch in topic queue '{}': {}", entry, e))
                })?;
                (name.trim(), prefetch)
            }
            None => (entry, 1),
        };
        if prefetch == 0 {
            return Err(Error::Config(format!(
                "topic queue '{}' must have a prefetch > 0",
                name
            )));
        }
        queues.push(TopicQueue {
            name: name.to_string(),
            prefetch,
        });
    }
    if queues.is_empty() {
        return Err(Error::Config("no topic queues configured".to_string()));
    }
    Ok(queues)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub topic_queues: Vec<TopicQueue>,
    pub broker_idle: Duration,
    pub broker_filter: TaskFilter,
    /// Whether brokers also publish task references for topic consumers.
    pub broker_publish: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            topic_queues: parse_topic_queues(DEFAULT_TOPIC_QUEUES).unwrap_or_default(),
            broker_idle: Duration::from_millis(DEFAULT_BROKER_IDLE_MS),
            broker_filter: TaskFilter::default(),
            broker_publish: false,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self> {
        let topic_queues = parse_topic_queues(
            &env::var("TOPIC_QUEUES").unwrap_or_else(|_| DEFAULT_TOPIC_QUEUES.to_string()),
        )?;
        let broker_idle = env::var("BROKER_IDLE_MS")
            .ok()
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_BROKER_IDLE_MS));
        let broker_filter = TaskFilter {
            include_handlers: env::var("BROKER_INCLUDE_HANDLERS")
                .ok()
                .map(|v| parse_list(&v)),
            exclude_handlers: env::var("BROKER_EXCLUDE_HANDLERS")
                .ok()
                .map(|v| parse_list(&v)),
        };
        let broker_publish = env::var("BROKER_PUBLISH")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            topic_queues,
            broker_idle,
            broker_filter,
            broker_publish,
        })
    }

    pub fn topic_queue(&self, name: &str) -> Option<&TopicQueue> {
        self.topic_queues.iter().find(|q| q.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub consumers: Vec<Consumer>,
    pub lock_ttl: Duration,
    pub lock_namespace: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            consumers: Vec::new(),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECONDS),
            lock_namespace: DEFAULT_LOCK_NAMESPACE.to_string(),
        }
    }
}

impl WalletConfig {
    /// Reads `CONSUMERS` (inline JSON) or else `CONSUMERS_FILE`.
    pub fn from_env() -> Result<Self> {
        let consumers = match (env::var("CONSUMERS"), env::var("CONSUMERS_FILE")) {
            (Ok(inline), _) => serde_json::from_str(&inline)?,
            (Err(_), Ok(path)) => {
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("failed to read CONSUMERS_FILE '{}': {}", path, e))
                })?;
                serde_json::from_str(&raw)?
            }
            _ => Vec::new(),
        };
        let lock_ttl = env::var("CONSUMER_LOCK_TTL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_LOCK_TTL_SECONDS));
        let lock_namespace =
            env::var("LOCK_NAMESPACE").unwrap_or_else(|_| DEFAULT_LOCK_NAMESPACE.to_string());

        Ok(Self {
            consumers,
            lock_ttl,
            lock_namespace,
        })
    }
}

/// Handlers each schedule period fans out to, keyed by period name.
#[derive(Debug, Clone, Default)]
pub struct ScheduleConfig {
    pub subscribers: HashMap<String, Vec<String>>,
}

impl ScheduleConfig {
    pub fn from_env() -> Result<Self> {
        let subscribers = match env::var("SCHEDULE_SUBSCRIBERS") {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(_) => HashMap::new(),
        };
        Ok(Self { subscribers })
    }

    /// Every subscribed handler name, across all periods.
    pub fn all_subscribers(&self) -> impl Iterator<Item = &str> {
        self.subscribers.values().flatten().map(String::as_str)
    }

    pub fn subscribers(&self, period: &str) -> &[String] {
        self.subscribers
            .get(period)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

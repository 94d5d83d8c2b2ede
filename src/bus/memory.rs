//! Message bus that records publications instead of delivering them

use crate::bus::MessageBus;
use crate::error::{Error, Result};
use crate::models::TaskReference;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub reference: TaskReference,
    pub deliver_at: Option<DateTime<Utc>>,
}

pub struct MemoryBus {
    topics: Vec<String>,
    published: Mutex<Vec<Publication>>,
}

impl MemoryBus {
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn published(&self) -> Vec<Publication> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Remove and return everything published so far.
    pub fn drain(&self) -> Vec<Publication> {
        self.published
            .lock()
            .map(|mut p| std::mem::take(&mut *p))
            .unwrap_or_default()
    }

    fn record(&self, reference: TaskReference, deliver_at: Option<DateTime<Utc>>) -> Result<()> {
        if !self.has_topic(&reference.topic) {
            return Err(Error::UnknownTopic(reference.topic));
        }
        self.published
            .lock()
            .map_err(|e| Error::Bus(e.to_string()))?
            .push(Publication {
                reference,
                deliver_at,
            });
        Ok(())
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, reference: TaskReference) -> Result<()> {
        self.record(reference, None)
    }

    async fn publish_at(&self, reference: TaskReference, at: DateTime<Utc>) -> Result<()> {
        self.record(reference, Some(at))
    }

    fn topics(&self) -> Vec<String> {
        self.topics.clone()
    }
}

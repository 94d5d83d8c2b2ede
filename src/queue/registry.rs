//! Handler registry
//!
//! Maps handler names stored in `Task.handler` to async functions. The
//! registry is assembled once at startup and shared read-only behind an `Arc`,
//! so an unknown name is caught at push time or by `ensure_registered` before
//! any worker starts.

use crate::error::{Error, HandlerError, Result};
use crate::queue::process::Process;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub type HandlerFn =
    Arc<dyn Fn(Process) -> BoxFuture<'static, std::result::Result<Process, HandlerError>> + Send + Sync>;

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous entry.
    pub fn register<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Process) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Process, HandlerError>> + Send + 'static,
    {
        let handler_fn: HandlerFn = Arc::new(move |process: Process| Box::pin(handler(process)));
        self.handlers.insert(name.to_string(), handler_fn);
        debug!(handler = %name, "Registered task handler: {}", name);
        self
    }

    pub fn get(&self, name: &str) -> Option<HandlerFn> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fail on the first name that has no handler.
    pub fn ensure_registered<'a, I>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for name in names {
            if !self.contains(name) {
                return Err(Error::UnknownHandler(name.to_string()));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

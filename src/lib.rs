//! Durable task queue for portfolio automation workers
//!
//! Tasks live in a store with a compare-and-swap claim. They are run by
//! cooperative brokers polling the store, or by topic consumers fed task
//! references over a message bus. Signer wallets are handed out through a
//! distributed lock.

pub mod bus;
pub mod config;
pub mod core;
pub mod error;
pub mod handlers;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod store;
pub mod wallet;

pub use error::{Error, Result};

//! Exclusive leases over the per-network pool of signer accounts
//!
//! Two lease lifetimes are supported and must be chosen explicitly:
//! - `get_free_consumer` returns a lease that outlives the calling task. The
//!   submitting task releases it only if submission fails; otherwise the
//!   confirmation task calls `release_consumer` once the receipt is seen.
//! - `with_consumer` releases as soon as the closure returns, whatever the
//!   outcome. Only safe when nonces cannot collide after submission.

use crate::config::WalletConfig;
use crate::error::{Error, Result};
use crate::lock::{DistributedLock, Lease, LockKey};
use crate::metrics::Metrics;
use crate::models::{Consumer, Network};
use crate::wallet::ledger::TransactionLedger;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Statically configured signer accounts grouped by network, in config order.
#[derive(Debug, Clone, Default)]
pub struct ConsumerPool {
    consumers: HashMap<Network, Vec<Consumer>>,
}

impl ConsumerPool {
    pub fn new(consumers: Vec<Consumer>) -> Self {
        let mut grouped: HashMap<Network, Vec<Consumer>> = HashMap::new();
        for consumer in consumers {
            grouped
                .entry(consumer.network.clone())
                .or_default()
                .push(consumer);
        }
        Self { consumers: grouped }
    }

    pub fn get(&self, network: &Network) -> &[Consumer] {
        self.consumers
            .get(network)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn networks(&self) -> Vec<&Network> {
        self.consumers.keys().collect()
    }
}

/// A signer account held exclusively until released.
#[derive(Debug, Clone)]
pub struct ConsumerLease {
    pub consumer: Consumer,
    pub lease: Lease,
}

pub struct ConsumerAllocator {
    pool: ConsumerPool,
    ledger: Arc<dyn TransactionLedger>,
    lock: Arc<dyn DistributedLock>,
    lock_ttl: Duration,
    namespace: String,
    metrics: Option<Arc<Metrics>>,
}

impl ConsumerAllocator {
    pub fn new(
        config: &WalletConfig,
        ledger: Arc<dyn TransactionLedger>,
        lock: Arc<dyn DistributedLock>,
    ) -> Self {
        Self {
            pool: ConsumerPool::new(config.consumers.clone()),
            ledger,
            lock,
            lock_ttl: config.lock_ttl,
            namespace: config.lock_namespace.clone(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pool(&self) -> &ConsumerPool {
        &self.pool
    }

    pub fn lock_key(&self, network: &Network, address: &str) -> LockKey {
        LockKey::new(&self.namespace, &network.blockchain, &network.network, address)
    }

    /// Lease the first signer on `network` that has no unconfirmed
    /// transaction and whose lock is free.
    ///
    /// Fails with `Error::NoFreeConsumer` (retryable) when every signer is
    /// busy; no lock is left behind in that case.
    pub async fn get_free_consumer(&self, network: &Network) -> Result<ConsumerLease> {
        let busy = self.ledger.busy_addresses(network).await?;

        for consumer in self.pool.get(network) {
            if busy.contains(&consumer.address.to_lowercase()) {
                debug!(
                    network = %network,
                    address = %consumer.address,
                    "Consumer {} has an unconfirmed transaction",
                    consumer.address
                );
                continue;
            }

            let key = self.lock_key(network, &consumer.address);
            if let Some(lease) = self.lock.lock(&key, self.lock_ttl).await? {
                info!(
                    network = %network,
                    address = %consumer.address,
                    "Leased consumer {} on {}",
                    consumer.address,
                    network
                );
                return Ok(ConsumerLease {
                    consumer: consumer.clone(),
                    lease,
                });
            }
        }

        if let Some(ref metrics) = self.metrics {
            metrics.consumer_lock_failures_total.inc();
        }
        warn!(network = %network, "No free consumer on {}", network);
        Err(Error::NoFreeConsumer {
            network: network.clone(),
        })
    }

    /// Release a lease held by this caller. A lease that already expired and
    /// was taken by someone else is left alone.
    pub async fn release(&self, lease: &ConsumerLease) -> Result<()> {
        let released = self.lock.release(&lease.lease).await?;
        if !released {
            warn!(
                key = %lease.lease.key,
                "Consumer lease {} was no longer held",
                lease.lease.key
            );
        }
        Ok(())
    }

    /// Release a consumer by address, from a task other than the one that
    /// leased it (transaction confirmation).
    pub async fn release_consumer(&self, network: &Network, address: &str) -> Result<()> {
        let key = self.lock_key(network, address);
        self.lock.unlock(&key).await?;
        info!(
            network = %network,
            address = %address,
            "Released consumer {} on {}",
            address,
            network
        );
        Ok(())
    }

    /// Run `f` with a leased signer and release it when `f` finishes. A panic
    /// in `f` is resumed after the release.
    pub async fn with_consumer<F, Fut, T>(&self, network: &Network, f: F) -> Result<T>
    where
        F: FnOnce(Consumer) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lease = self.get_free_consumer(network).await?;
        let consumer = lease.consumer.clone();
        let outcome = AssertUnwindSafe(async move { f(consumer).await })
            .catch_unwind()
            .await;
        if let Err(e) = self.release(&lease).await {
            warn!(
                key = %lease.lease.key,
                error = %e,
                "Failed to release consumer lease {}",
                lease.lease.key
            );
        }
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

//! Ledger of submitted transactions, used to find busy signer addresses

use crate::error::Result;
use crate::models::Network;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tokio_postgres::Client;

#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Lowercased addresses with an unconfirmed transaction on `network`.
    async fn busy_addresses(&self, network: &Network) -> Result<HashSet<String>>;
}

/// Reads the `wallet_transactions` table kept by the transaction handlers.
pub struct PostgresTransactionLedger {
    client: Client,
}

impl PostgresTransactionLedger {
    pub async fn new(client: Client) -> Result<Self> {
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS wallet_transactions (
                    hash TEXT PRIMARY KEY,
                    blockchain TEXT NOT NULL,
                    network TEXT NOT NULL,
                    consumer TEXT NOT NULL,
                    confirmed BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE INDEX IF NOT EXISTS wallet_transactions_unconfirmed
                    ON wallet_transactions (blockchain, network)
                    WHERE confirmed = FALSE;",
            )
            .await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TransactionLedger for PostgresTransactionLedger {
    async fn busy_addresses(&self, network: &Network) -> Result<HashSet<String>> {
        let rows = self
            .client
            .query(
                "SELECT DISTINCT lower(consumer) FROM wallet_transactions
                 WHERE blockchain = $1 AND network = $2 AND confirmed = FALSE",
                &[&network.blockchain, &network.network],
            )
            .await?;
        let mut busy = HashSet::new();
        for row in rows {
            busy.insert(row.try_get::<_, String>(0)?);
        }
        Ok(busy)
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    pending: RwLock<HashMap<Network, HashSet<String>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an unconfirmed transaction sent from `address`.
    pub async fn submitted(&self, network: &Network, address: &str) {
        self.pending
            .write()
            .await
            .entry(network.clone())
            .or_default()
            .insert(address.to_lowercase());
    }

    pub async fn confirmed(&self, network: &Network, address: &str) {
        if let Some(addresses) = self.pending.write().await.get_mut(network) {
            addresses.remove(&address.to_lowercase());
        }
    }
}

#[async_trait]
impl TransactionLedger for MemoryLedger {
    async fn busy_addresses(&self, network: &Network) -> Result<HashSet<String>> {
        Ok(self
            .pending
            .read()
            .await
            .get(network)
            .cloned()
            .unwrap_or_default())
    }
}

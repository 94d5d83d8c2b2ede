//! Blockchain signer accounts ("consumers")

use serde::{Deserialize, Serialize};
use std::fmt;

/// A chain plus network identifier, e.g. `ethereum` / `1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Network {
    pub blockchain: String,
    pub network: String,
}

impl Network {
    pub fn new(blockchain: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            blockchain: blockchain.into(),
            network: network.into(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.blockchain, self.network)
    }
}

/// A statically configured signer account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumer {
    #[serde(flatten)]
    pub network: Network,
    pub address: String,
    pub credential: String,
}

impl Consumer {
    /// Addresses are compared case-insensitively (EVM checksum casing).
    pub fn has_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("network", &self.network)
            .field("address", &self.address)
            .field("credential", &"<redacted>")
            .finish()
    }
}

//! Consumer-wallet allocation on top of the distributed lock

pub mod allocator;
pub mod ledger;

pub use allocator::{ConsumerAllocator, ConsumerLease, ConsumerPool};
pub use ledger::{MemoryLedger, PostgresTransactionLedger, TransactionLedger};

//! Unit tests for the consumer-wallet allocator

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use vaultq::config::WalletConfig;
use vaultq::error::Error;
use vaultq::lock::{DistributedLock, MemoryLock};
use vaultq::models::{Consumer, Network};
use vaultq::wallet::{ConsumerAllocator, MemoryLedger};

fn network() -> Network {
    Network::new("ethereum", "1")
}

fn consumer(address: &str) -> Consumer {
    Consumer {
        network: network(),
        address: address.to_string(),
        credential: format!("secret-{}", address),
    }
}

struct Fixture {
    allocator: ConsumerAllocator,
    ledger: Arc<MemoryLedger>,
    lock: Arc<MemoryLock>,
}

fn fixture(addresses: &[&str]) -> Fixture {
    let config = WalletConfig {
        consumers: addresses.iter().map(|a| consumer(a)).collect(),
        ..WalletConfig::default()
    };
    let ledger = Arc::new(MemoryLedger::new());
    let lock = Arc::new(MemoryLock::new());
    let allocator = ConsumerAllocator::new(&config, ledger.clone(), lock.clone());
    Fixture {
        allocator,
        ledger,
        lock,
    }
}

#[tokio::test]
async fn leases_each_free_consumer_once() {
    let f = fixture(&["0xa", "0xb"]);

    let first = f.allocator.get_free_consumer(&network()).await.unwrap();
    let second = f.allocator.get_free_consumer(&network()).await.unwrap();
    assert_eq!(first.consumer.address, "0xa");
    assert_eq!(second.consumer.address, "0xb");

    let third = f.allocator.get_free_consumer(&network()).await;
    assert!(matches!(third, Err(Error::NoFreeConsumer { .. })));
}

#[tokio::test]
async fn busy_and_locked_pool_is_exhausted_without_side_effects() {
    let f = fixture(&["0xa", "0xb"]);
    f.ledger.submitted(&network(), "0xA").await;
    let key_a = f.allocator.lock_key(&network(), "0xa");
    let key_b = f.allocator.lock_key(&network(), "0xb");
    let foreign = f.lock.lock(&key_b, Duration::from_secs(60)).await.unwrap().unwrap();

    let result = f.allocator.get_free_consumer(&network()).await;
    match result {
        Err(e @ Error::NoFreeConsumer { .. }) => assert!(e.is_retryable()),
        other => panic!("expected NoFreeConsumer, got {:?}", other.map(|l| l.consumer)),
    }

    assert!(f.lock.holder(&key_a).await.is_none());
    assert_eq!(f.lock.holder(&key_b).await, Some(foreign));
}

#[tokio::test]
async fn confirmed_consumer_becomes_available() {
    let f = fixture(&["0xa"]);
    f.ledger.submitted(&network(), "0xa").await;
    assert!(f.allocator.get_free_consumer(&network()).await.is_err());

    f.ledger.confirmed(&network(), "0xA").await;
    assert!(f.allocator.get_free_consumer(&network()).await.is_ok());
}

#[tokio::test]
async fn release_after_failed_submission() {
    let f = fixture(&["0xa"]);
    let lease = f.allocator.get_free_consumer(&network()).await.unwrap();

    f.allocator.release(&lease).await.unwrap();
    let again = f.allocator.get_free_consumer(&network()).await.unwrap();
    assert_eq!(again.consumer.address, "0xa");
}

#[tokio::test]
async fn confirmation_releases_by_address() {
    let f = fixture(&["0xAbC"]);
    f.allocator.get_free_consumer(&network()).await.unwrap();
    assert!(f.allocator.get_free_consumer(&network()).await.is_err());

    f.allocator.release_consumer(&network(), "0xabc").await.unwrap();
    assert!(f.allocator.get_free_consumer(&network()).await.is_ok());
}

#[tokio::test]
async fn with_consumer_releases_on_error() {
    let f = fixture(&["0xa"]);

    let result: vaultq::Result<()> = f
        .allocator
        .with_consumer(&network(), |consumer| async move {
            assert_eq!(consumer.address, "0xa");
            Err::<(), _>(Error::Bus("rpc timeout".to_string()))
        })
        .await;
    assert!(result.is_err());

    let address = f
        .allocator
        .with_consumer(&network(), |consumer| async move { Ok::<_, Error>(consumer.address) })
        .await
        .unwrap();
    assert_eq!(address, "0xa");
    assert!(f
        .lock
        .holder(&f.allocator.lock_key(&network(), "0xa"))
        .await
        .is_none());
}

#[tokio::test]
async fn with_consumer_releases_when_closure_panics() {
    let f = fixture(&["0xa"]);

    let outcome = AssertUnwindSafe(f.allocator.with_consumer(&network(), |consumer| async move {
        assert_eq!(consumer.address, "0xb", "signer crashed");
        Ok::<(), Error>(())
    }))
    .catch_unwind()
    .await;
    assert!(outcome.is_err());

    assert!(f
        .lock
        .holder(&f.allocator.lock_key(&network(), "0xa"))
        .await
        .is_none());
    let lease = f.allocator.get_free_consumer(&network()).await.unwrap();
    assert_eq!(lease.consumer.address, "0xa");
}

#[tokio::test]
async fn other_networks_are_not_served() {
    let f = fixture(&["0xa"]);
    let polygon = Network::new("polygon", "137");

    assert!(f.allocator.pool().get(&polygon).is_empty());
    assert!(matches!(
        f.allocator.get_free_consumer(&polygon).await,
        Err(Error::NoFreeConsumer { network }) if network == polygon
    ));
}

#[test]
fn credential_is_redacted_in_debug() {
    let rendered = format!("{:?}", consumer("0xa"));
    assert!(rendered.contains("0xa"));
    assert!(!rendered.contains("secret-0xa"));
}

#[test]
fn consumer_address_comparison_ignores_case() {
    assert!(consumer("0xAbC").has_address("0xabc"));
    assert!(!consumer("0xAbC").has_address("0xabd"));
}

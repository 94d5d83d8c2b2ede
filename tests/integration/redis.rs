//! Integration tests for the Redis lock, message bus and topic consumer

use crate::test_utils::{redis_bus, redis_lock, unique};
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vaultq::bus::MessageBus;
use vaultq::config::TopicQueue;
use vaultq::core::TopicConsumer;
use vaultq::error::{Error, HandlerError};
use vaultq::lock::{DistributedLock, Lease, LockKey};
use vaultq::models::{Params, PushOptions, TaskStatus};
use vaultq::queue::{HandlerRegistry, Process, QueueService};
use vaultq::store::{MemoryTaskStore, TaskStore};

#[tokio::test]
async fn redis_lock_is_exclusive() {
    let Some(lock) = redis_lock().await else {
        return;
    };
    let key = LockKey::new(&unique("it-lock"), "ethereum", "1", "0xA");
    let ttl = std::time::Duration::from_secs(30);

    let lease = lock.lock(&key, ttl).await.unwrap().expect("first lock wins");
    assert!(lock.lock(&key, ttl).await.unwrap().is_none());

    let impostor = Lease::new(key.clone(), ttl);
    assert!(!lock.release(&impostor).await.unwrap());
    assert!(lock.lock(&key, ttl).await.unwrap().is_none());

    assert!(lock.release(&lease).await.unwrap());
    let again = lock.lock(&key, ttl).await.unwrap().expect("free after release");
    lock.unlock(&again.key).await.unwrap();
    assert!(lock.lock(&key, ttl).await.unwrap().is_some());
    lock.unlock(&key).await.unwrap();
}

#[tokio::test]
async fn redis_lock_expires() {
    let Some(lock) = redis_lock().await else {
        return;
    };
    let key = LockKey::new(&unique("it-lock"), "ethereum", "1", "0xa");

    lock.lock(&key, std::time::Duration::from_millis(50)).await.unwrap().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(120)).await;
    assert!(lock
        .lock(&key, std::time::Duration::from_secs(5))
        .await
        .unwrap()
        .is_some());
    lock.unlock(&key).await.unwrap();
}

#[tokio::test]
async fn redis_bus_knows_its_topics() {
    let topic = unique("it-topic");
    let Some(bus) = redis_bus(&[topic.as_str()]).await else {
        return;
    };

    assert!(bus.has_topic(&topic));
    assert!(matches!(bus.storage("missing"), Err(Error::UnknownTopic(_))));
}

#[tokio::test]
async fn consumer_runs_published_tasks() {
    let topic = unique("it-topic");
    let Some(bus) = redis_bus(&[topic.as_str()]).await else {
        return;
    };
    let bus = Arc::new(bus);
    let store = Arc::new(MemoryTaskStore::new());
    let registry = HandlerRegistry::new().register("it.echo", |process: Process| async move {
        Ok::<_, HandlerError>(process.info("consumed").done())
    });
    let queue = Arc::new(
        QueueService::new(store.clone(), Arc::new(registry)).with_bus(bus.clone()),
    );

    let now_task = queue
        .push("it.echo", Params::new(), PushOptions::default().topic(&topic))
        .await
        .unwrap();
    let delayed = queue
        .push(
            "it.echo",
            Params::new(),
            PushOptions::default()
                .topic(&topic)
                .start_at(Utc::now() + Duration::seconds(1)),
        )
        .await
        .unwrap();

    let queue_config = TopicQueue {
        name: topic.clone(),
        prefetch: 2,
    };
    let worker = TopicConsumer::new(queue_config, &bus, queue.clone())
        .unwrap()
        .start();

    let mut finished = false;
    for _ in 0..100 {
        let a = store.get(&now_task.id).await.unwrap().unwrap();
        let b = store.get(&delayed.id).await.unwrap().unwrap();
        if a.status == TaskStatus::Done && b.status == TaskStatus::Done {
            finished = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    worker.abort();

    assert!(finished, "consumer should run both tasks");
    let done = store.get(&now_task.id).await.unwrap().unwrap();
    assert_eq!(done.info, "consumed");
    assert_eq!(done.attempt, 1);
}

#[tokio::test]
async fn consumer_keeps_at_most_prefetch_tasks_in_flight() {
    let topic = unique("it-topic");
    let Some(bus) = redis_bus(&[topic.as_str()]).await else {
        return;
    };
    let bus = Arc::new(bus);
    let store = Arc::new(MemoryTaskStore::new());
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (running, highest) = (in_flight.clone(), peak.clone());
    let registry = HandlerRegistry::new().register("it.slow", move |process: Process| {
        let (running, highest) = (running.clone(), highest.clone());
        async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            highest.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, HandlerError>(process.done())
        }
    });
    let queue = Arc::new(
        QueueService::new(store.clone(), Arc::new(registry)).with_bus(bus.clone()),
    );

    let mut ids = Vec::new();
    for _ in 0..6 {
        let task = queue
            .push("it.slow", Params::new(), PushOptions::default().topic(&topic))
            .await
            .unwrap();
        ids.push(task.id);
    }

    let queue_config = TopicQueue {
        name: topic.clone(),
        prefetch: 2,
    };
    let worker = TopicConsumer::new(queue_config, &bus, queue.clone())
        .unwrap()
        .start();

    let mut finished = false;
    for _ in 0..100 {
        let mut all_done = true;
        for id in &ids {
            if store.get(id).await.unwrap().unwrap().status != TaskStatus::Done {
                all_done = false;
            }
        }
        if all_done {
            finished = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    worker.abort();

    assert!(finished, "consumer should run every task");
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= 2, "{} tasks ran at once with prefetch 2", peak);
}

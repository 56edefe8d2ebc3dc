//! Tests for the ZooKeeper distributed mutex.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::sim::SimZooKeeper;
use zk_lock_core::error::LockError;
use zk_lock_core::traits::{DistributedLock, LockHandle, LockProvider, LockProviderExt};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mutual_exclusion_under_contention() {
    let server = SimZooKeeper::new();
    let provider = Arc::new(common::provider(&server));
    let holders = Arc::new(AtomicUsize::new(0));
    let max_holders = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let provider = Arc::clone(&provider);
        let holders = Arc::clone(&holders);
        let max_holders = Arc::clone(&max_holders);
        tasks.push(tokio::spawn(async move {
            let lock = provider.create_lock("X");
            for _ in 0..25 {
                let handle = lock.acquire(None).await.unwrap();
                let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                max_holders.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                holders.fetch_sub(1, Ordering::SeqCst);
                handle.release().await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(max_holders.load(Ordering::SeqCst), 1, "lock was held concurrently");
}

#[tokio::test]
async fn zero_timeout_probe_returns_immediately() {
    let server = SimZooKeeper::new();
    let provider = common::provider(&server);
    let lock = provider.create_lock("A");
    let held = lock.acquire(None).await.unwrap();

    let contender = provider.create_lock("A");
    let start = Instant::now();
    let result = contender.try_acquire().await.unwrap();
    assert!(result.is_none());
    assert!(
        start.elapsed() < Duration::from_millis(50),
        "non-blocking probe took {:?}",
        start.elapsed()
    );

    held.release().await.unwrap();
    let result = contender.try_acquire().await.unwrap();
    assert!(result.is_some());
}

#[tokio::test]
async fn acquire_reports_timeout_error() {
    let server = SimZooKeeper::new();
    let provider = common::provider(&server);
    let lock = provider.create_lock("A");
    let _held = lock.acquire(None).await.unwrap();

    let contender = provider.create_lock("A");
    let result = contender.acquire(Some(Duration::from_millis(50))).await;
    assert!(matches!(result, Err(LockError::Timeout(_))), "got {result:?}");
}

#[tokio::test]
async fn cancellation_is_distinct_from_timeout() {
    let server = SimZooKeeper::new();
    let provider = Arc::new(common::provider(&server));
    let lock = provider.create_lock("A");
    let _held = lock.acquire(None).await.unwrap();

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = cancel_tx.send(true);
    });

    let contender = provider.create_lock("A");
    let start = Instant::now();
    let result = contender
        .acquire_with_cancel(Some(Duration::from_secs(10)), cancel_rx)
        .await;
    assert!(matches!(result, Err(LockError::Cancelled)), "got {result:?}");
    assert!(
        start.elapsed() < Duration::from_millis(200),
        "cancellation took {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn release_removes_node_and_owned_directory() {
    let server = SimZooKeeper::new();
    let provider = common::provider(&server);

    let lock = provider.create_lock("A");
    let handle = lock.acquire(None).await.unwrap();
    let node_path = handle.node_path().to_string();
    assert!(server.node_exists("/A"));
    assert!(server.node_exists(&node_path));

    handle.release().await.unwrap();
    assert!(!server.node_exists(&node_path), "node still present after release");
    assert!(
        !server.node_exists("/A"),
        "empty lock directory still present after release"
    );
}

#[tokio::test]
async fn released_lock_can_be_reacquired() {
    let server = SimZooKeeper::new();
    let provider = common::provider(&server);
    let lock = provider.create_lock("A");

    let handle = lock.acquire(None).await.unwrap();
    handle.release().await.unwrap();
    // A fresh acquisition works; the first release fully cleaned up.
    let handle = lock.acquire(Some(Duration::from_secs(1))).await.unwrap();
    handle.release().await.unwrap();
}

#[tokio::test]
async fn own_node_deleted_externally_is_a_hard_error() {
    let server = SimZooKeeper::new();
    let provider = Arc::new(common::provider(&server));
    let lock = provider.create_lock("A");
    let held = lock.acquire(None).await.unwrap();

    let contender = provider.clone();
    let waiter = tokio::spawn(async move {
        let lock = contender.create_lock("A");
        lock.acquire(Some(Duration::from_secs(10))).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Find the waiter's queued node and delete it out from under it, then
    // wake the waiter by releasing the lock.
    let waiting_node = server
        .children_of("/A")
        .into_iter()
        .find(|n| format!("/A/{n}") != held.node_path())
        .map(|n| format!("/A/{n}"))
        .unwrap();
    server.delete_node(&waiting_node);
    held.release().await.unwrap();

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(LockError::NodeLost(_))), "got {result:?}");
}

#[tokio::test]
async fn lost_token_fires_on_session_expiry() {
    let server = SimZooKeeper::new();
    let provider = common::provider(&server);
    let lock = provider.create_lock("A");
    let handle = lock.acquire(None).await.unwrap();

    let mut lost = handle.lost_token().clone();
    assert!(!*lost.borrow());

    server.expire_all_sessions();
    tokio::time::timeout(Duration::from_secs(1), lost.wait_for(|l| *l))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn lost_token_stays_quiet_after_clean_release() {
    let server = SimZooKeeper::new();
    let provider = common::provider(&server);
    let lock = provider.create_lock("A");
    let handle = lock.acquire(None).await.unwrap();

    let lost = handle.lost_token().clone();
    handle.release().await.unwrap();

    // Give the monitor time to observe the deleted node; a clean release
    // must not read as a lost lock.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!*lost.borrow());
}

#[tokio::test]
async fn handle_debug_includes_the_node_path() {
    let server = SimZooKeeper::new();
    let provider = common::provider(&server);
    let lock = provider.create_lock("A");

    let handle = lock.acquire(None).await.unwrap();
    let rendered = format!("{handle:?}");
    assert!(rendered.contains(handle.node_path()), "got {rendered}");
    handle.release().await.unwrap();
}

#[tokio::test]
async fn fifo_order_preserved_across_sequence_wrap() {
    let server = SimZooKeeper::new();
    // Seed the counter three steps before the signed wrap so the queue
    // spans it.
    server.create_dir("/W");
    server.seed_sequence("/W", i32::MAX - 1);

    let provider = Arc::new(common::provider(&server));
    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    let first = provider.create_lock("W");
    let held = first.acquire(None).await.unwrap();

    let mut waiters = Vec::new();
    for tag in ["second", "third", "fourth"] {
        let provider = Arc::clone(&provider);
        let order = Arc::clone(&order);
        waiters.push(tokio::spawn(async move {
            let lock = provider.create_lock("W");
            let handle = lock.acquire(Some(Duration::from_secs(10))).await.unwrap();
            order.lock().await.push(tag);
            handle.release().await.unwrap();
        }));
        // Queue in a deterministic order.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    order.lock().await.push("first");
    held.release().await.unwrap();
    for waiter in waiters {
        waiter.await.unwrap();
    }

    assert_eq!(
        *order.lock().await,
        vec!["first", "second", "third", "fourth"]
    );
}

#[tokio::test]
async fn provider_extension_methods() {
    let server = SimZooKeeper::new();
    let provider = common::provider(&server);

    let handle = provider
        .acquire_lock("ext", Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(provider.try_acquire_lock("ext").await.unwrap().is_none());
    handle.release().await.unwrap();
    assert!(provider.try_acquire_lock("ext").await.unwrap().is_some());
}

#[tokio::test]
async fn dropping_handle_releases_in_background() {
    let server = SimZooKeeper::new();
    let provider = common::provider(&server);
    let lock = provider.create_lock("A");

    {
        let _handle = lock.acquire(None).await.unwrap();
    }
    // Drop spawns cleanup; a second acquisition must eventually succeed.
    let handle = lock.acquire(Some(Duration::from_secs(2))).await.unwrap();
    handle.release().await.unwrap();
}

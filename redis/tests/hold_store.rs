//! Integration tests for `RedisHoldStore` using testcontainers.
//!
//! # Requirements
//!
//! Docker must be running. Run with `cargo test -p boxoffice-redis -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use boxoffice_core::{EventId, HoldGrant, HoldStore, PoolKey, TicketType};
use boxoffice_redis::RedisHoldStore;
use chrono::{Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;

async fn setup_store() -> (ContainerAsync<Redis>, RedisHoldStore) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get redis port");

    let url = format!("redis://127.0.0.1:{port}");
    let store = RedisHoldStore::new(&url)
        .await
        .expect("Failed to connect to redis");
    (container, store)
}

fn pool() -> PoolKey {
    PoolKey::new(EventId::new(), TicketType::parse("regular").unwrap())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_reserve_release_settle() {
    let (_container, store) = setup_store().await;
    let pool = pool();
    let now = Utc::now();
    store.provision(&pool, 5).await.unwrap();

    let HoldGrant::Granted(first) = store
        .try_reserve(&pool, 3, Duration::minutes(10), now)
        .await
        .unwrap()
    else {
        panic!("first hold should be granted");
    };
    assert_eq!(
        store
            .try_reserve(&pool, 3, Duration::minutes(10), now)
            .await
            .unwrap(),
        HoldGrant::Declined { available: 2 }
    );
    assert_eq!(store.get(&first.token, now).await.unwrap(), Some(first.clone()));

    let released = store.release(&first.token, now).await.unwrap();
    assert_eq!(released.map(|h| h.token), Some(first.token));
    assert_eq!(store.release(&first.token, now).await.unwrap(), None);
    assert_eq!(store.reserved(&pool, now).await.unwrap(), 0);

    let HoldGrant::Granted(second) = store
        .try_reserve(&pool, 2, Duration::minutes(10), now)
        .await
        .unwrap()
    else {
        panic!("second hold should be granted");
    };
    store.settle(&second.token, &pool, 2).await.unwrap();
    assert_eq!(store.reserved(&pool, now).await.unwrap(), 0);
    assert_eq!(
        store
            .try_reserve(&pool, 4, Duration::minutes(10), now)
            .await
            .unwrap(),
        HoldGrant::Declined { available: 3 }
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unprovisioned_pool_declines() {
    let (_container, store) = setup_store().await;
    let grant = store
        .try_reserve(&pool(), 1, Duration::minutes(10), Utc::now())
        .await
        .unwrap();
    assert_eq!(grant, HoldGrant::Declined { available: 0 });
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_lapsed_holds_return_their_units() {
    let (_container, store) = setup_store().await;
    let pool = pool();
    let now = Utc::now();
    store.provision(&pool, 2).await.unwrap();

    let grant = store
        .try_reserve(&pool, 2, Duration::seconds(30), now)
        .await
        .unwrap();
    let HoldGrant::Granted(hold) = grant else {
        panic!("hold should be granted");
    };

    let later = now + Duration::seconds(31);
    assert_eq!(store.reserved(&pool, later).await.unwrap(), 0);
    assert_eq!(store.get(&hold.token, later).await.unwrap(), None);
    assert!(matches!(
        store
            .try_reserve(&pool, 2, Duration::seconds(30), later)
            .await
            .unwrap(),
        HoldGrant::Granted(_)
    ));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_reserves_never_oversell() {
    let (_container, store) = setup_store().await;
    let store = Arc::new(store);
    let pool = pool();
    store.provision(&pool, 10).await.unwrap();

    let tasks = (0..40).map(|_| {
        let store = Arc::clone(&store);
        let pool = pool.clone();
        tokio::spawn(async move {
            store
                .try_reserve(&pool, 1, Duration::minutes(10), Utc::now())
                .await
                .unwrap()
        })
    });
    let granted = join_all(tasks)
        .await
        .into_iter()
        .filter(|g| matches!(g, Ok(HoldGrant::Granted(_))))
        .count();

    assert_eq!(granted, 10);
    assert_eq!(store.reserved(&pool, Utc::now()).await.unwrap(), 10);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_provision_keeps_reserved() {
    let (_container, store) = setup_store().await;
    let pool = pool();
    let now = Utc::now();
    store.provision(&pool, 3).await.unwrap();
    store
        .try_reserve(&pool, 2, Duration::minutes(10), now)
        .await
        .unwrap();

    store.provision(&pool, 2).await.unwrap();
    assert_eq!(store.reserved(&pool, now).await.unwrap(), 2);
    assert_eq!(
        store
            .try_reserve(&pool, 1, Duration::minutes(10), now)
            .await
            .unwrap(),
        HoldGrant::Declined { available: 0 }
    );
    store.ping().await.unwrap();
}

//! In-memory hold store.
//!
//! Each pool owns an `AtomicU32` reserved counter claimed with a
//! compare-and-swap loop, so concurrent reservations on one pool serialize on
//! that counter alone and different pools never touch each other. Hold
//! records live behind a per-pool mutex that is never held across the CAS.

use boxoffice_core::{
    BoxFuture, Hold, HoldGrant, HoldStore, HoldStoreError, PoolKey, ReservationToken,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Default)]
struct PoolState {
    capacity: AtomicU32,
    reserved: AtomicU32,
    holds: Mutex<HashMap<ReservationToken, Hold>>,
}

impl PoolState {
    fn lock_holds(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ReservationToken, Hold>>, HoldStoreError> {
        self.holds
            .lock()
            .map_err(|_| HoldStoreError::Backend("Mutex lock failed".to_string()))
    }

    fn give_back(&self, quantity: u32) {
        let _ = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(quantity))
            });
    }

    /// Drop lapsed holds and return their units. Returns the purged tokens.
    fn purge(&self, now: DateTime<Utc>) -> Result<Vec<ReservationToken>, HoldStoreError> {
        let mut holds = self.lock_holds()?;
        let lapsed: Vec<ReservationToken> = holds
            .values()
            .filter(|hold| hold.is_expired(now))
            .map(|hold| hold.token)
            .collect();
        for token in &lapsed {
            if let Some(hold) = holds.remove(token) {
                self.give_back(hold.quantity);
            }
        }
        Ok(lapsed)
    }

    /// The linchpin: increment `reserved` iff the result stays within capacity.
    fn claim(&self, quantity: u32) -> Result<(), u32> {
        loop {
            let current = self.reserved.load(Ordering::Acquire);
            let capacity = self.capacity.load(Ordering::Acquire);
            let Some(next) = current.checked_add(quantity).filter(|next| *next <= capacity) else {
                return Err(capacity.saturating_sub(current));
            };
            if self
                .reserved
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }
}

/// In-memory hold store.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHoldStore {
    pools: Arc<RwLock<HashMap<PoolKey, Arc<PoolState>>>>,
    index: Arc<RwLock<HashMap<ReservationToken, PoolKey>>>,
}

impl InMemoryHoldStore {
    /// Create an empty hold store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pool_state(&self, pool: &PoolKey) -> Result<Option<Arc<PoolState>>, HoldStoreError> {
        let pools = self
            .pools
            .read()
            .map_err(|_| HoldStoreError::Backend("RwLock read failed".to_string()))?;
        Ok(pools.get(pool).cloned())
    }

    fn pool_of(&self, token: &ReservationToken) -> Result<Option<PoolKey>, HoldStoreError> {
        let index = self
            .index
            .read()
            .map_err(|_| HoldStoreError::Backend("RwLock read failed".to_string()))?;
        Ok(index.get(token).cloned())
    }

    fn forget(&self, tokens: &[ReservationToken]) -> Result<(), HoldStoreError> {
        if tokens.is_empty() {
            return Ok(());
        }
        let mut index = self
            .index
            .write()
            .map_err(|_| HoldStoreError::Backend("RwLock write failed".to_string()))?;
        for token in tokens {
            index.remove(token);
        }
        Ok(())
    }

    fn purge(&self, state: &PoolState, now: DateTime<Utc>) -> Result<(), HoldStoreError> {
        let lapsed = state.purge(now)?;
        self.forget(&lapsed)
    }

    /// Capacity ceiling of a pool (for assertions in tests).
    ///
    /// # Errors
    ///
    /// Returns error if a lock is poisoned.
    pub fn capacity(&self, pool: &PoolKey) -> Result<Option<u32>, HoldStoreError> {
        Ok(self
            .pool_state(pool)?
            .map(|state| state.capacity.load(Ordering::Acquire)))
    }

    /// Number of hold records across all pools, lapsed ones included.
    ///
    /// # Errors
    ///
    /// Returns error if a lock is poisoned.
    pub fn hold_count(&self) -> Result<usize, HoldStoreError> {
        let index = self
            .index
            .read()
            .map_err(|_| HoldStoreError::Backend("RwLock read failed".to_string()))?;
        Ok(index.len())
    }
}

impl HoldStore for InMemoryHoldStore {
    fn provision<'a>(
        &'a self,
        pool: &'a PoolKey,
        capacity: u32,
    ) -> BoxFuture<'a, Result<(), HoldStoreError>> {
        Box::pin(async move {
            let mut pools = self
                .pools
                .write()
                .map_err(|_| HoldStoreError::Backend("RwLock write failed".to_string()))?;
            let state = pools.entry(pool.clone()).or_default();
            state.capacity.store(capacity, Ordering::Release);
            Ok(())
        })
    }

    fn try_reserve<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<HoldGrant, HoldStoreError>> {
        Box::pin(async move {
            let Some(state) = self.pool_state(pool)? else {
                return Ok(HoldGrant::Declined { available: 0 });
            };
            self.purge(&state, now)?;

            if let Err(available) = state.claim(quantity) {
                return Ok(HoldGrant::Declined { available });
            }

            let hold = Hold {
                token: ReservationToken::new(),
                pool: pool.clone(),
                quantity,
                created_at: now,
                expires_at: now + ttl,
            };

            // Index first so a concurrent release by token can always find it.
            match self.index.write() {
                Ok(mut index) => {
                    index.insert(hold.token, pool.clone());
                }
                Err(_) => {
                    state.give_back(quantity);
                    return Err(HoldStoreError::Backend("RwLock write failed".to_string()));
                }
            }
            match state.lock_holds() {
                Ok(mut holds) => {
                    holds.insert(hold.token, hold.clone());
                }
                Err(e) => {
                    state.give_back(quantity);
                    self.forget(&[hold.token])?;
                    return Err(e);
                }
            }

            Ok(HoldGrant::Granted(hold))
        })
    }

    fn release<'a>(
        &'a self,
        token: &'a ReservationToken,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<Hold>, HoldStoreError>> {
        Box::pin(async move {
            let Some(pool) = self.pool_of(token)? else {
                return Ok(None);
            };
            let Some(state) = self.pool_state(&pool)? else {
                return Ok(None);
            };
            let removed = state.lock_holds()?.remove(token);
            self.forget(&[*token])?;

            Ok(removed.and_then(|hold| {
                state.give_back(hold.quantity);
                (!hold.is_expired(now)).then_some(hold)
            }))
        })
    }

    fn settle<'a>(
        &'a self,
        token: &'a ReservationToken,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<(), HoldStoreError>> {
        Box::pin(async move {
            let Some(state) = self.pool_state(pool)? else {
                return Ok(());
            };
            // Shrink capacity before returning the hold's units so a racing
            // claim never sees room that was just sold.
            let _ = state
                .capacity
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |capacity| {
                    Some(capacity.saturating_sub(quantity))
                });
            let removed = state.lock_holds()?.remove(token);
            if let Some(hold) = removed {
                state.give_back(hold.quantity);
            }
            self.forget(&[*token])
        })
    }

    fn get<'a>(
        &'a self,
        token: &'a ReservationToken,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<Hold>, HoldStoreError>> {
        Box::pin(async move {
            let Some(pool) = self.pool_of(token)? else {
                return Ok(None);
            };
            let Some(state) = self.pool_state(&pool)? else {
                return Ok(None);
            };
            let holds = state.lock_holds()?;
            Ok(holds
                .get(token)
                .filter(|hold| !hold.is_expired(now))
                .cloned())
        })
    }

    fn reserved<'a>(
        &'a self,
        pool: &'a PoolKey,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u32, HoldStoreError>> {
        Box::pin(async move {
            let Some(state) = self.pool_state(pool)? else {
                return Ok(0);
            };
            self.purge(&state, now)?;
            Ok(state.reserved.load(Ordering::Acquire))
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), HoldStoreError>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::test_clock;
    use boxoffice_core::environment::Clock;
    use boxoffice_core::{EventId, TicketType};

    fn pool() -> PoolKey {
        PoolKey::new(EventId::new(), TicketType::parse("regular").unwrap())
    }

    #[tokio::test]
    async fn test_grant_and_decline() {
        let store = InMemoryHoldStore::new();
        let pool = pool();
        let now = test_clock().now();
        store.provision(&pool, 3).await.unwrap();

        let first = store
            .try_reserve(&pool, 2, Duration::minutes(5), now)
            .await
            .unwrap();
        assert!(matches!(first, HoldGrant::Granted(ref h) if h.quantity == 2));

        let second = store
            .try_reserve(&pool, 2, Duration::minutes(5), now)
            .await
            .unwrap();
        assert_eq!(second, HoldGrant::Declined { available: 1 });
        assert_eq!(store.reserved(&pool, now).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unprovisioned_pool_declines() {
        let store = InMemoryHoldStore::new();
        let grant = store
            .try_reserve(&pool(), 1, Duration::minutes(5), test_clock().now())
            .await
            .unwrap();
        assert_eq!(grant, HoldGrant::Declined { available: 0 });
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let store = InMemoryHoldStore::new();
        let pool = pool();
        let now = test_clock().now();
        store.provision(&pool, 1).await.unwrap();

        let HoldGrant::Granted(hold) = store
            .try_reserve(&pool, 1, Duration::minutes(5), now)
            .await
            .unwrap()
        else {
            panic!("expected grant");
        };

        assert_eq!(store.release(&hold.token, now).await.unwrap(), Some(hold.clone()));
        assert_eq!(store.release(&hold.token, now).await.unwrap(), None);
        assert_eq!(store.reserved(&pool, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lapsed_hold_frees_capacity_without_release() {
        let store = InMemoryHoldStore::new();
        let pool = pool();
        let now = test_clock().now();
        store.provision(&pool, 1).await.unwrap();

        store
            .try_reserve(&pool, 1, Duration::seconds(1), now)
            .await
            .unwrap();
        let later = now + Duration::seconds(2);

        let grant = store
            .try_reserve(&pool, 1, Duration::seconds(1), later)
            .await
            .unwrap();
        assert!(matches!(grant, HoldGrant::Granted(_)));
        assert_eq!(store.hold_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_settle_shrinks_capacity_once() {
        let store = InMemoryHoldStore::new();
        let pool = pool();
        let now = test_clock().now();
        store.provision(&pool, 5).await.unwrap();

        let HoldGrant::Granted(hold) = store
            .try_reserve(&pool, 2, Duration::minutes(5), now)
            .await
            .unwrap()
        else {
            panic!("expected grant");
        };

        store.settle(&hold.token, &pool, 2).await.unwrap();
        assert_eq!(store.capacity(&pool).unwrap(), Some(3));
        assert_eq!(store.reserved(&pool, now).await.unwrap(), 0);
        assert_eq!(store.get(&hold.token, now).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_exceed_capacity() {
        let store = InMemoryHoldStore::new();
        let pool = pool();
        let now = test_clock().now();
        store.provision(&pool, 10).await.unwrap();

        let attempts = (0..50).map(|_| {
            let store = store.clone();
            let pool = pool.clone();
            tokio::spawn(async move {
                store
                    .try_reserve(&pool, 1, Duration::minutes(5), now)
                    .await
                    .unwrap()
            })
        });
        let results = futures::future::join_all(attempts).await;
        let granted = results
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|grant| matches!(grant, HoldGrant::Granted(_)))
            .count();

        assert_eq!(granted, 10);
        assert_eq!(store.reserved(&pool, now).await.unwrap(), 10);
    }
}

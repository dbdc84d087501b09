//! Hold store trait.
//!
//! The hold store is the arbiter of "is there room right now". Each pool has
//! a capacity ceiling and a reserved counter; [`HoldStore::try_reserve`] is a
//! single atomic "increment reserved by N iff reserved + N <= capacity".
//!
//! Capacity is the number of units neither sold nor withheld by the ledger,
//! so it shrinks on [`HoldStore::settle`] and is re-synchronised from the
//! ledger by [`HoldStore::provision`] during reconciliation.

use crate::error::HoldStoreError;
use crate::types::{Hold, PoolKey, ReservationToken};
use crate::BoxFuture;
use chrono::{DateTime, Duration, Utc};

/// Result of an atomic reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldGrant {
    /// Units were claimed; the hold carries the new token.
    Granted(Hold),
    /// Not enough room; nothing was written.
    Declined {
        /// Units that could still be claimed at the time of the attempt
        available: u32,
    },
}

/// Hold store.
///
/// This trait abstracts over fast, TTL-capable hold storage (Redis).
///
/// # Implementation Notes
///
/// - Contention is per pool: unrelated pools never serialize each other.
/// - Expired holds must stop counting against the pool without anyone
///   calling [`HoldStore::release`]; purging lazily on the next access to the
///   pool is sufficient.
/// - `now` is passed in so expiry follows the caller's clock.
pub trait HoldStore: Send + Sync {
    /// Set the capacity ceiling of a pool.
    ///
    /// Idempotent overwrite. Live holds are kept.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unreachable.
    fn provision<'a>(
        &'a self,
        pool: &'a PoolKey,
        capacity: u32,
    ) -> BoxFuture<'a, Result<(), HoldStoreError>>;

    /// Atomically claim `quantity` units if the pool has room.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unreachable. Lack of capacity (or an
    /// unprovisioned pool) is `Ok(HoldGrant::Declined { .. })`.
    fn try_reserve<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<HoldGrant, HoldStoreError>>;

    /// Release a hold, returning its units to the pool.
    ///
    /// Idempotent: releasing an unknown, expired or already released token
    /// returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unreachable.
    fn release<'a>(
        &'a self,
        token: &'a ReservationToken,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<Hold>, HoldStoreError>>;

    /// Retire a hold whose units were sold.
    ///
    /// Removes the hold if still present and lowers the pool capacity by
    /// `quantity`. `pool` and `quantity` are supplied by the caller so the
    /// capacity is adjusted even when the hold already lapsed.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unreachable.
    fn settle<'a>(
        &'a self,
        token: &'a ReservationToken,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<(), HoldStoreError>>;

    /// Look up a live hold.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unreachable or the record is corrupt.
    fn get<'a>(
        &'a self,
        token: &'a ReservationToken,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<Hold>, HoldStoreError>>;

    /// Units currently held in a pool, after purging expired holds.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unreachable.
    fn reserved<'a>(
        &'a self,
        pool: &'a PoolKey,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u32, HoldStoreError>>;

    /// Cheap connectivity probe for readiness checks.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unreachable.
    fn ping(&self) -> BoxFuture<'_, Result<(), HoldStoreError>>;
}

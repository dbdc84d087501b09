//! Inventory ledger trait.
//!
//! The ledger is the durable source of truth for `total / sold / reserved`
//! and the only writer of sold state. Every write re-checks the invariant
//! `sold + reserved <= total` on the row it modifies, so it is a second guard
//! behind the hold store rather than a trusting follower of it.
//!
//! # Fatal path
//!
//! An observed `sold + reserved > total` is corruption. The implementation
//! must halt the event (all further writes fail with
//! [`LedgerError::Halted`]) and report [`LedgerError::InvariantViolation`]
//! until an operator calls [`InventoryLedger::resume`].

use crate::error::LedgerError;
use crate::types::{EventId, InventoryCounts, PoolKey};
use crate::BoxFuture;

/// Inventory ledger.
pub trait InventoryLedger: Send + Sync {
    /// Create or resize a pool.
    ///
    /// Creating is idempotent. Resizing an existing pool keeps `sold` and
    /// `reserved` and fails with [`LedgerError::TotalTooSmall`] if the new
    /// total is below `sold + reserved`.
    ///
    /// # Errors
    ///
    /// Returns error on database failure or an invalid resize.
    fn provision<'a>(
        &'a self,
        pool: &'a PoolKey,
        total: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>>;

    /// Increment `reserved` by `quantity` iff capacity allows.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InsufficientCapacity`] if the pool is full
    /// - [`LedgerError::UnknownPool`] if the pool does not exist
    /// - [`LedgerError::Halted`] if the event is halted
    /// - [`LedgerError::Database`] on database failure
    fn soft_reserve<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>>;

    /// Move `quantity` units from `reserved` to `sold`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InsufficientReserved`] if fewer units are reserved
    /// - [`LedgerError::UnknownPool`], [`LedgerError::Halted`],
    ///   [`LedgerError::Database`]
    fn commit_sold<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>>;

    /// Decrement `reserved` by `quantity` without touching `sold`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InsufficientReserved`] instead of going negative
    /// - [`LedgerError::UnknownPool`], [`LedgerError::Halted`],
    ///   [`LedgerError::Database`]
    fn release_reserved<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>>;

    /// Read the counts of a pool.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvariantViolation`] if the row is corrupt (the event
    ///   is halted as a side effect)
    /// - [`LedgerError::Database`] on database failure
    fn counts<'a>(
        &'a self,
        pool: &'a PoolKey,
    ) -> BoxFuture<'a, Result<Option<InventoryCounts>, LedgerError>>;

    /// All pools with their counts.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn pools(&self) -> BoxFuture<'_, Result<Vec<(PoolKey, InventoryCounts)>, LedgerError>>;

    /// Halt writes to an event.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn halt<'a>(&'a self, event_id: &'a EventId, reason: &'a str)
        -> BoxFuture<'a, Result<(), LedgerError>>;

    /// Lift a halt after manual reconciliation.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn resume<'a>(&'a self, event_id: &'a EventId) -> BoxFuture<'a, Result<bool, LedgerError>>;

    /// Whether writes to an event are halted.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn is_halted<'a>(&'a self, event_id: &'a EventId) -> BoxFuture<'a, Result<bool, LedgerError>>;
}

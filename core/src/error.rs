//! Error types for the storage and provider traits.

use crate::types::{EventId, InventoryCounts, PoolKey};
use thiserror::Error;

/// Errors from a [`HoldStore`](crate::hold_store::HoldStore).
///
/// Capacity exhaustion is not an error: it is reported as
/// [`HoldGrant::Declined`](crate::hold_store::HoldGrant::Declined).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HoldStoreError {
    /// The backing store could not be reached or rejected the command.
    #[error("Hold store backend error: {0}")]
    Backend(String),

    /// A hold record could not be encoded or decoded.
    #[error("Hold store serialization error: {0}")]
    Serialization(String),
}

/// Errors from an [`InventoryLedger`](crate::ledger::InventoryLedger).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No counts exist for the pool.
    #[error("No inventory provisioned for {0}")]
    UnknownPool(PoolKey),

    /// `sold + reserved + requested` would exceed `total`.
    #[error("Insufficient capacity for {pool}: requested {requested}, available {available}")]
    InsufficientCapacity {
        /// Pool that was asked
        pool: PoolKey,
        /// Units requested
        requested: u32,
        /// Units still available
        available: u32,
    },

    /// The caller tried to commit or release more than is soft-reserved.
    #[error("Insufficient reserved units for {pool}: requested {requested}, reserved {reserved}")]
    InsufficientReserved {
        /// Pool that was asked
        pool: PoolKey,
        /// Units requested
        requested: u32,
        /// Units currently reserved
        reserved: u32,
    },

    /// A new total would drop below what is already sold or reserved.
    #[error("Cannot shrink {pool} to {requested}: {committed} units already sold or reserved")]
    TotalTooSmall {
        /// Pool that was asked
        pool: PoolKey,
        /// Requested total
        requested: u32,
        /// `sold + reserved`
        committed: u32,
    },

    /// `sold + reserved > total` was observed. Fatal: the event is halted.
    #[error("Ledger invariant violated for {pool}: {counts:?}")]
    InvariantViolation {
        /// Pool whose counts are corrupt
        pool: PoolKey,
        /// Counts as read
        counts: InventoryCounts,
    },

    /// Writes to the event are halted pending manual reconciliation.
    #[error("Event {0} is halted pending reconciliation")]
    Halted(EventId),

    /// Database connection or query error.
    #[error("Ledger database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Whether retrying the same call later may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Errors from the reservation and payment repositories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Database connection or query error.
    #[error("Repository database error: {0}")]
    Database(String),

    /// A stored row could not be decoded.
    #[error("Repository serialization error: {0}")]
    Serialization(String),
}

/// Errors from a [`PaymentProvider`](crate::payment::PaymentProvider).
///
/// Timeouts and outages are inconclusive: the charge may or may not have
/// happened and the provider's callback stays the source of truth. A
/// rejection means nothing was charged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider did not answer in time.
    #[error("Payment provider timeout")]
    Timeout,

    /// The provider could not be reached.
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the submission.
    #[error("Payment provider rejected submission: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Whether the provider gave a final answer (nothing was charged)
    #[must_use]
    pub const fn is_definitive(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

//! # Boxoffice Core
//!
//! Domain types and storage traits for the boxoffice reservation core.
//!
//! The core sells a finite pool of tickets to many concurrent buyers. Every
//! sale passes through three stores, each behind a trait defined here:
//!
//! ```text
//!   reserve ──► HoldStore ─────► InventoryLedger ──► ReservationRepository
//!               (atomic grant)   (soft reserve)      (state-machine guard)
//!
//!   commit  ──► ReservationRepository (CAS active→confirmed)
//!               └► InventoryLedger (reserved → sold) └► HoldStore (settle)
//! ```
//!
//! - [`hold_store::HoldStore`]: fast TTL-bound holds with a per-pool atomic
//!   compare-and-increment. The arbiter of "is there room right now".
//! - [`ledger::InventoryLedger`]: durable `total / sold / reserved` counts.
//!   The single writer of sold state.
//! - [`repository::ReservationRepository`]: reservation records whose status
//!   field is the compare-and-set guard for every transition.
//! - [`payment::PaymentIntentStore`] and [`payment::PaymentProvider`]: the
//!   payment side of the request/callback boundary.
//!
//! # Implementations
//!
//! - `boxoffice-redis`: `RedisHoldStore`
//! - `boxoffice-postgres`: `PostgresLedger`, `PostgresReservationRepository`,
//!   `PostgresPaymentIntentStore`
//! - `boxoffice-testing`: in-memory versions of all of the above
//!
//! # Dyn Compatibility
//!
//! Store traits return [`BoxFuture`] instead of using `async fn` so the
//! coordinators can hold them as `Arc<dyn Trait>`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod hold_store;
pub mod ledger;
pub mod payment;
pub mod repository;
pub mod types;

pub use error::{HoldStoreError, LedgerError, ProviderError, RepositoryError};
pub use hold_store::{HoldGrant, HoldStore};
pub use ledger::InventoryLedger;
pub use payment::{CreateIntent, PaymentIntentStore, PaymentProvider, ProviderSubmission};
pub use repository::{CreateReservation, ReservationRepository, Transition};
pub use types::*;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Boxed, `Send` future returned by the store traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Environment module - injected dependencies that are not stores.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Every expiry decision in the core (hold TTLs, commit-after-expiry,
    /// the sweeper's cutoff) reads the time through this trait.
    ///
    /// # Examples
    ///
    /// ```
    /// use boxoffice_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

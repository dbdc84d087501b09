//! # Boxoffice Runtime
//!
//! Coordinators that turn the storage traits from `boxoffice-core` into the
//! reservation and settlement workflow.
//!
//! ## Core Components
//!
//! - **`ReservationCoordinator`**: reserve, commit, cancel and expire, with
//!   compensation when the hold store and the ledger disagree
//! - **`PaymentCoordinator`**: idempotent payment initiation and provider
//!   callback handling that settles the reservation exactly once
//! - **`ExpirySweeper`**: background task that expires lapsed reservations and
//!   rebuilds hold store capacity from the ledger
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_runtime::{ReservationCoordinator, ReservationConfig, ReserveRequest};
//!
//! let coordinator = ReservationCoordinator::new(
//!     hold_store,
//!     ledger,
//!     repository,
//!     clock,
//!     ReservationConfig::default(),
//! );
//!
//! let outcome = coordinator
//!     .reserve(ReserveRequest { pool, quantity: 2, session_id })
//!     .await?;
//! ```

#![forbid(unsafe_code)]

/// Tunables for holds and the sweeper
pub mod config;

/// Error type shared by the coordinators
pub mod error;

/// Prometheus metrics for observability
pub mod metrics;

/// Payment initiation and provider callbacks
pub mod payments;

/// Reservation lifecycle
pub mod reservations;

/// Retry logic with exponential backoff
pub mod retry;

/// Background expiry of lapsed reservations
pub mod sweeper;

pub use config::{ReservationConfig, ReservationConfigBuilder};
pub use error::ReservationError;
pub use payments::{CallbackAck, InitiateOutcome, InitiateRequest, PaymentCoordinator};
pub use reservations::{
    CancelOutcome, CommitOutcome, ExpireOutcome, ReservationCoordinator, ReserveOutcome,
    ReserveRequest,
};
pub use retry::RetryPolicy;
pub use sweeper::{ExpirySweeper, SweepReport};

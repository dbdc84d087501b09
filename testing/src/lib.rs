//! # Boxoffice Testing
//!
//! Testing utilities for the boxoffice reservation core.
//!
//! This crate provides:
//! - In-memory implementations of every store trait in `boxoffice-core`
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - A recording [`MockPaymentProvider`]
//! - Fault-injecting wrappers ([`FlakyLedger`], [`FlakyHoldStore`]) for
//!   exercising compensation paths
//!
//! The in-memory stores honour the same atomicity contracts as the durable
//! ones, so the server can also run on them (`STORAGE_BACKEND=memory`).
//!
//! ## Example
//!
//! ```
//! use boxoffice_core::{HoldGrant, HoldStore, PoolKey, EventId, TicketType};
//! use boxoffice_testing::{InMemoryHoldStore, test_clock};
//! use boxoffice_core::environment::Clock;
//! use chrono::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryHoldStore::new();
//! let pool = PoolKey::new(EventId::new(), TicketType::parse("regular")?);
//! store.provision(&pool, 2).await?;
//!
//! let grant = store.try_reserve(&pool, 2, Duration::minutes(5), test_clock().now()).await?;
//! assert!(matches!(grant, HoldGrant::Granted(_)));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod hold_store;
pub mod ledger;
pub mod payments;
pub mod reservations;

use boxoffice_core::environment::Clock;
use chrono::{DateTime, Utc};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use boxoffice_testing::mocks::FixedClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Used to walk reservations past their TTL without sleeping.
    ///
    /// ```
    /// use boxoffice_testing::mocks::ManualClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::Duration;
    ///
    /// let clock = ManualClock::starting_at(boxoffice_testing::test_clock().now());
    /// let start = clock.now();
    /// clock.advance(Duration::seconds(90));
    /// assert_eq!(clock.now() - start, Duration::seconds(90));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`
        #[must_use]
        pub const fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use faults::{FlakyHoldStore, FlakyLedger, HoldOp, LedgerOp};
pub use hold_store::InMemoryHoldStore;
pub use ledger::InMemoryLedger;
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use payments::{InMemoryPaymentIntentStore, MockPaymentProvider};
pub use reservations::InMemoryReservationRepository;

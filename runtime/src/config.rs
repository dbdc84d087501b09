//! Reservation core configuration.
//!
//! # Default Values
//!
//! - `hold_ttl`: 10 minutes
//! - `sweep_interval`: 30 seconds
//! - `sweep_batch_size`: 500
//! - `max_quantity`: 10

use std::time::Duration;

/// Tunables shared by the coordinators and the sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationConfig {
    /// How long a hold stays valid without payment
    pub hold_ttl: Duration,
    /// Time between sweeper passes
    pub sweep_interval: Duration,
    /// Maximum reservations expired per sweeper batch
    pub sweep_batch_size: usize,
    /// Upper bound on `quantity` for a single reservation
    pub max_quantity: u32,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(30),
            sweep_batch_size: 500,
            max_quantity: 10,
        }
    }
}

impl ReservationConfig {
    /// Create a new config builder.
    #[must_use]
    pub fn builder() -> ReservationConfigBuilder {
        ReservationConfigBuilder {
            config: Self::default(),
        }
    }

    /// Hold TTL as a `chrono` duration, for timestamp arithmetic.
    ///
    /// Saturates at the largest representable duration.
    #[must_use]
    pub fn hold_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.hold_ttl).unwrap_or(chrono::Duration::MAX)
    }
}

/// Builder for [`ReservationConfig`].
#[derive(Debug, Clone)]
pub struct ReservationConfigBuilder {
    config: ReservationConfig,
}

impl ReservationConfigBuilder {
    /// Set the hold TTL.
    #[must_use]
    pub const fn hold_ttl(mut self, ttl: Duration) -> Self {
        self.config.hold_ttl = ttl;
        self
    }

    /// Set the sweeper interval.
    #[must_use]
    pub const fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Set the sweeper batch size (at least 1).
    #[must_use]
    pub const fn sweep_batch_size(mut self, size: usize) -> Self {
        self.config.sweep_batch_size = if size == 0 { 1 } else { size };
        self
    }

    /// Set the per-reservation quantity limit (at least 1).
    #[must_use]
    pub const fn max_quantity(mut self, max: u32) -> Self {
        self.config.max_quantity = if max == 0 { 1 } else { max };
        self
    }

    /// Build the [`ReservationConfig`].
    #[must_use]
    pub fn build(self) -> ReservationConfig {
        self.config
    }
}

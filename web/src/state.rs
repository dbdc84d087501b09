//! Application state for Axum handlers.

use boxoffice_runtime::{PaymentCoordinator, ReservationCoordinator};

/// Application state shared across all HTTP handlers.
///
/// Both coordinators are cheap to clone; all state lives in their stores.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Reserve, commit, cancel and the operator surface
    pub reservations: ReservationCoordinator,
    /// Payment intents and provider callbacks
    pub payments: PaymentCoordinator,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(reservations: ReservationCoordinator, payments: PaymentCoordinator) -> Self {
        Self {
            reservations,
            payments,
        }
    }
}

//! Errors returned by the coordinators.

use boxoffice_core::{
    HoldStoreError, IdempotencyKey, LedgerError, PaymentId, RepositoryError, ReservationStatus,
    ReservationToken, SessionId,
};
use thiserror::Error;

/// Errors from [`ReservationCoordinator`](crate::ReservationCoordinator) and
/// [`PaymentCoordinator`](crate::PaymentCoordinator).
///
/// Running out of capacity is not an error: it is a normal
/// [`ReserveOutcome::Declined`](crate::ReserveOutcome::Declined).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// `quantity` was zero or above the configured maximum.
    #[error("Invalid quantity {requested}: must be between 1 and {max}")]
    InvalidQuantity {
        /// Quantity asked for
        requested: u32,
        /// Configured maximum
        max: u32,
    },

    /// A payment amount of zero.
    #[error("Payment amount must be positive")]
    InvalidAmount,

    /// The session id is already bound to a reservation with other parameters.
    #[error("Session {session_id} already holds reservation {existing} with different parameters")]
    SessionConflict {
        /// Session that was reused
        session_id: SessionId,
        /// Reservation the session is bound to
        existing: ReservationToken,
    },

    /// No reservation with this token.
    #[error("Reservation {0} not found")]
    ReservationNotFound(ReservationToken),

    /// The reservation cannot be paid for in its current status.
    #[error("Reservation {token} is {status} and cannot be paid for")]
    ReservationNotPayable {
        /// Reservation that was referenced
        token: ReservationToken,
        /// Its status (lapsed reservations are reported as expired)
        status: ReservationStatus,
    },

    /// Another live payment already covers the reservation.
    #[error("Reservation {token} already has payment {payment_id} in progress")]
    PaymentInProgress {
        /// Reservation that was referenced
        token: ReservationToken,
        /// Live intent covering it
        payment_id: PaymentId,
    },

    /// The idempotency key was first used for a different reservation.
    #[error("Idempotency key {key} was already used for another reservation")]
    IdempotencyKeyReused {
        /// Key that was reused
        key: IdempotencyKey,
        /// Intent created under the key
        payment_id: PaymentId,
    },

    /// Hold store failure.
    #[error(transparent)]
    HoldStore(#[from] HoldStoreError),

    /// Ledger failure, including halted events and invariant violations.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Reservation or payment repository failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ReservationError {
    /// Whether the same request may succeed if retried later.
    ///
    /// Halted events count as retryable: they resume once an operator has
    /// reconciled them.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::HoldStore(_) | Self::Repository(RepositoryError::Database(_)) => true,
            Self::Ledger(e) => e.is_transient() || matches!(e, LedgerError::Halted(_)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::EventId;

    #[test]
    fn test_retryable_classification() {
        assert!(ReservationError::from(HoldStoreError::Backend("down".into())).is_retryable());
        assert!(ReservationError::from(LedgerError::Database("down".into())).is_retryable());
        assert!(ReservationError::from(LedgerError::Halted(EventId::new())).is_retryable());
        assert!(
            !ReservationError::from(RepositoryError::Serialization("bad row".into()))
                .is_retryable()
        );
        assert!(!ReservationError::InvalidQuantity { requested: 0, max: 10 }.is_retryable());
        assert!(!ReservationError::ReservationNotFound(ReservationToken::new()).is_retryable());
    }
}

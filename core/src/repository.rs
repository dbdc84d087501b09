//! Reservation repository trait.
//!
//! The repository stores reservation records and provides the compare-and-set
//! that makes every reservation transition happen at most once. Coordinators
//! never read-then-write a status; they ask the repository to move a record
//! from an expected status to a new one and act only if that succeeded.

use crate::error::RepositoryError;
use crate::types::{Reservation, ReservationStatus, ReservationToken, SessionId};
use crate::BoxFuture;
use chrono::{DateTime, Utc};

/// Outcome of a create-if-absent keyed by session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateReservation {
    /// The record was stored.
    Created(Reservation),
    /// A reservation with the same session id already exists; nothing stored.
    Existing(Reservation),
}

/// Outcome of a compare-and-set on a record's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<T> {
    /// The record had the expected status and now has the new one.
    Applied(T),
    /// The record exists with a different status; nothing changed.
    Rejected(T),
    /// No such record.
    Missing,
}

impl<T> Transition<T> {
    /// Whether the transition was applied
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Reservation repository.
pub trait ReservationRepository: Send + Sync {
    /// Store a new reservation unless its session id is already taken.
    ///
    /// Atomic with respect to concurrent calls with the same session id.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn create(
        &self,
        reservation: Reservation,
    ) -> BoxFuture<'_, Result<CreateReservation, RepositoryError>>;

    /// Load a reservation by token.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn get<'a>(
        &'a self,
        token: &'a ReservationToken,
    ) -> BoxFuture<'a, Result<Option<Reservation>, RepositoryError>>;

    /// Load a reservation by session id.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn find_by_session<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Reservation>, RepositoryError>>;

    /// Move a reservation from `from` to `to`, atomically.
    ///
    /// `settled_at` is recorded when `to` is terminal and cleared otherwise.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn transition<'a>(
        &'a self,
        token: &'a ReservationToken,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Transition<Reservation>, RepositoryError>>;

    /// Active reservations whose `expires_at <= now`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn due_for_expiry(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Reservation>, RepositoryError>>;

    /// Cheap connectivity probe for readiness checks.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn ping(&self) -> BoxFuture<'_, Result<(), RepositoryError>>;
}

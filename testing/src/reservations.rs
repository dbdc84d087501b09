//! In-memory reservation repository.

use boxoffice_core::{
    BoxFuture, CreateReservation, RepositoryError, Reservation, ReservationRepository,
    ReservationStatus, ReservationToken, SessionId, Transition,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Records {
    by_token: HashMap<ReservationToken, Reservation>,
    by_session: HashMap<SessionId, ReservationToken>,
}

/// In-memory reservation repository.
///
/// A single lock covers both indexes, so create-if-absent and every status
/// compare-and-set are atomic.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReservationRepository {
    records: Arc<RwLock<Records>>,
}

impl InMemoryReservationRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored reservations
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn len(&self) -> Result<usize, RepositoryError> {
        let records = self
            .records
            .read()
            .map_err(|_| RepositoryError::Database("RwLock read failed".to_string()))?;
        Ok(records.by_token.len())
    }

    /// Whether the repository is empty
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len()? == 0)
    }
}

impl ReservationRepository for InMemoryReservationRepository {
    fn create(
        &self,
        reservation: Reservation,
    ) -> BoxFuture<'_, Result<CreateReservation, RepositoryError>> {
        Box::pin(async move {
            let mut records = self
                .records
                .write()
                .map_err(|_| RepositoryError::Database("RwLock write failed".to_string()))?;

            if let Some(existing) = records
                .by_session
                .get(&reservation.session_id)
                .and_then(|token| records.by_token.get(token))
            {
                return Ok(CreateReservation::Existing(existing.clone()));
            }

            records
                .by_session
                .insert(reservation.session_id.clone(), reservation.token);
            records
                .by_token
                .insert(reservation.token, reservation.clone());
            Ok(CreateReservation::Created(reservation))
        })
    }

    fn get<'a>(
        &'a self,
        token: &'a ReservationToken,
    ) -> BoxFuture<'a, Result<Option<Reservation>, RepositoryError>> {
        Box::pin(async move {
            let records = self
                .records
                .read()
                .map_err(|_| RepositoryError::Database("RwLock read failed".to_string()))?;
            Ok(records.by_token.get(token).cloned())
        })
    }

    fn find_by_session<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Reservation>, RepositoryError>> {
        Box::pin(async move {
            let records = self
                .records
                .read()
                .map_err(|_| RepositoryError::Database("RwLock read failed".to_string()))?;
            Ok(records
                .by_session
                .get(session_id)
                .and_then(|token| records.by_token.get(token))
                .cloned())
        })
    }

    fn transition<'a>(
        &'a self,
        token: &'a ReservationToken,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Transition<Reservation>, RepositoryError>> {
        Box::pin(async move {
            let mut records = self
                .records
                .write()
                .map_err(|_| RepositoryError::Database("RwLock write failed".to_string()))?;
            let Some(reservation) = records.by_token.get_mut(token) else {
                return Ok(Transition::Missing);
            };
            if reservation.status != from {
                return Ok(Transition::Rejected(reservation.clone()));
            }
            reservation.status = to;
            reservation.settled_at = to.is_terminal().then_some(at);
            Ok(Transition::Applied(reservation.clone()))
        })
    }

    fn due_for_expiry(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Reservation>, RepositoryError>> {
        Box::pin(async move {
            let records = self
                .records
                .read()
                .map_err(|_| RepositoryError::Database("RwLock read failed".to_string()))?;
            let mut due: Vec<Reservation> = records
                .by_token
                .values()
                .filter(|r| r.is_lapsed(now))
                .cloned()
                .collect();
            due.sort_by_key(|r| r.expires_at);
            due.truncate(limit);
            Ok(due)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async { Ok(()) })
    }
}

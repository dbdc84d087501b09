//! Reservation records over `PostgreSQL`.

use crate::{count, pool_key};
use boxoffice_core::{
    BoxFuture, CreateReservation, RepositoryError, Reservation, ReservationRepository,
    ReservationStatus, ReservationToken, SessionId, Transition,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const COLUMNS: &str =
    "token, event_id, ticket_type, quantity, session_id, status, created_at, expires_at, settled_at";

/// `PostgreSQL` reservation repository.
///
/// `session_id` is unique, so concurrent creates for one session race on the
/// index and exactly one of them inserts.
#[derive(Debug, Clone)]
pub struct PostgresReservationRepository {
    pool: PgPool,
}

fn db(e: &sqlx::Error) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

fn reservation_from_row(row: &PgRow) -> Result<Reservation, RepositoryError> {
    let column_err = |e: sqlx::Error| RepositoryError::Serialization(e.to_string());

    let token: uuid::Uuid = row.try_get("token").map_err(column_err)?;
    let event_id: uuid::Uuid = row.try_get("event_id").map_err(column_err)?;
    let ticket_type: String = row.try_get("ticket_type").map_err(column_err)?;
    let quantity: i64 = row.try_get("quantity").map_err(column_err)?;
    let session_id: String = row.try_get("session_id").map_err(column_err)?;
    let status: String = row.try_get("status").map_err(column_err)?;

    Ok(Reservation {
        token: ReservationToken::from_uuid(token),
        pool: pool_key(event_id, ticket_type).map_err(RepositoryError::Serialization)?,
        quantity: count(quantity, "quantity").map_err(RepositoryError::Serialization)?,
        session_id: SessionId::new(session_id),
        status: status
            .parse()
            .map_err(|e| RepositoryError::Serialization(format!("{e}")))?,
        created_at: row.try_get("created_at").map_err(column_err)?,
        expires_at: row.try_get("expires_at").map_err(column_err)?,
        settled_at: row.try_get("settled_at").map_err(column_err)?,
    })
}

impl PostgresReservationRepository {
    /// Create a repository over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, token: &ReservationToken) -> Result<Option<Reservation>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM reservations WHERE token = $1"))
            .bind(token.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db(&e))?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn load_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Reservation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM reservations WHERE session_id = $1"
        ))
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db(&e))?;
        row.as_ref().map(reservation_from_row).transpose()
    }
}

impl ReservationRepository for PostgresReservationRepository {
    fn create(
        &self,
        reservation: Reservation,
    ) -> BoxFuture<'_, Result<CreateReservation, RepositoryError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                r"
                INSERT INTO reservations ({COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (session_id) DO NOTHING
                RETURNING {COLUMNS}
                "
            ))
            .bind(reservation.token.as_uuid())
            .bind(reservation.pool.event_id.as_uuid())
            .bind(reservation.pool.ticket_type.as_str())
            .bind(i64::from(reservation.quantity))
            .bind(reservation.session_id.as_str())
            .bind(reservation.status.as_str())
            .bind(reservation.created_at)
            .bind(reservation.expires_at)
            .bind(reservation.settled_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db(&e))?;

            if let Some(row) = row {
                return Ok(CreateReservation::Created(reservation_from_row(&row)?));
            }

            self.load_by_session(&reservation.session_id)
                .await?
                .map(CreateReservation::Existing)
                .ok_or_else(|| {
                    RepositoryError::Database(format!(
                        "session {} conflicted but no reservation was found",
                        reservation.session_id
                    ))
                })
        })
    }

    fn get<'a>(
        &'a self,
        token: &'a ReservationToken,
    ) -> BoxFuture<'a, Result<Option<Reservation>, RepositoryError>> {
        Box::pin(self.load(token))
    }

    fn find_by_session<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Reservation>, RepositoryError>> {
        Box::pin(self.load_by_session(session_id))
    }

    fn transition<'a>(
        &'a self,
        token: &'a ReservationToken,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Transition<Reservation>, RepositoryError>> {
        Box::pin(async move {
            let settled_at = to.is_terminal().then_some(at);
            let row = sqlx::query(&format!(
                r"
                UPDATE reservations
                SET status = $3, settled_at = $4
                WHERE token = $1 AND status = $2
                RETURNING {COLUMNS}
                "
            ))
            .bind(token.as_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(settled_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db(&e))?;

            if let Some(row) = row {
                return Ok(Transition::Applied(reservation_from_row(&row)?));
            }
            Ok(match self.load(token).await? {
                Some(current) => Transition::Rejected(current),
                None => Transition::Missing,
            })
        })
    }

    fn due_for_expiry(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Reservation>, RepositoryError>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = sqlx::query(&format!(
                r"
                SELECT {COLUMNS}
                FROM reservations
                WHERE status = 'active' AND expires_at <= $1
                ORDER BY expires_at ASC
                LIMIT $2
                "
            ))
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db(&e))?;

            rows.iter().map(reservation_from_row).collect()
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| db(&e))?;
            Ok(())
        })
    }
}

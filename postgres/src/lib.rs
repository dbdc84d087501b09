//! `PostgreSQL` storage for boxoffice.
//!
//! Implements the durable traits from `boxoffice-core`:
//!
//! - [`PostgresLedger`]: `InventoryLedger` with guarded single-row updates
//! - [`PostgresReservationRepository`]: `ReservationRepository` with
//!   compare-and-set status transitions
//! - [`PostgresPaymentIntentStore`]: `PaymentIntentStore` backed by unique
//!   indexes on the idempotency key and on live intents per reservation
//!
//! # Example
//!
//! ```ignore
//! use boxoffice_postgres::{PostgresLedger, connect, migrate};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect("postgres://localhost/boxoffice", 10).await?;
//!     migrate(&pool).await?;
//!     let ledger = PostgresLedger::new(pool.clone());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod ledger;
mod payments;
mod reservations;

pub use ledger::PostgresLedger;
pub use payments::PostgresPaymentIntentStore;
pub use reservations::PostgresReservationRepository;

use boxoffice_core::{EventId, PoolKey, TicketType};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Open a connection pool.
///
/// # Errors
///
/// Returns error if the database cannot be reached.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Run the bundled migrations.
///
/// # Errors
///
/// Returns error if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Rebuild a pool key from its stored columns.
fn pool_key(event_id: uuid::Uuid, ticket_type: String) -> Result<PoolKey, String> {
    Ok(PoolKey::new(
        EventId::from_uuid(event_id),
        TicketType::parse(ticket_type)?,
    ))
}

/// Convert a stored count back to `u32`.
fn count(value: i64, column: &str) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("{column} out of range: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_rejects_out_of_range() {
        assert_eq!(count(7, "sold"), Ok(7));
        assert!(count(-1, "sold").is_err());
        assert!(count(i64::from(u32::MAX) + 1, "total").is_err());
    }

    #[test]
    fn test_pool_key_validates_ticket_type() {
        let id = uuid::Uuid::new_v4();
        assert!(pool_key(id, "vip".to_string()).is_ok());
        assert!(pool_key(id, "bad type".to_string()).is_err());
    }
}

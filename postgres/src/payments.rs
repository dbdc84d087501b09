//! Payment intents over `PostgreSQL`.

use boxoffice_core::{
    BoxFuture, CreateIntent, Customer, IdempotencyKey, Money, PaymentId, PaymentIntent,
    PaymentIntentStore, PaymentMethod, PaymentStatus, ProviderReference, RepositoryError,
    ReservationToken, Transition,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const COLUMNS: &str = "payment_id, idempotency_key, reservation_token, status, amount_cents, \
     payment_method, customer, provider_reference, created_at, settled_at";

/// `PostgreSQL` payment intent store.
///
/// The idempotency key and the partial index on live intents per
/// reservation are both unique, so `create_if_absent` is a single
/// `INSERT ... ON CONFLICT DO NOTHING` and the loser reads back the winner.
#[derive(Debug, Clone)]
pub struct PostgresPaymentIntentStore {
    pool: PgPool,
}

fn db(e: &sqlx::Error) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

fn serialization(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Serialization(e.to_string())
}

fn intent_from_row(row: &PgRow) -> Result<PaymentIntent, RepositoryError> {
    let payment_id: uuid::Uuid = row.try_get("payment_id").map_err(serialization)?;
    let idempotency_key: String = row.try_get("idempotency_key").map_err(serialization)?;
    let reservation_token: uuid::Uuid = row.try_get("reservation_token").map_err(serialization)?;
    let status: String = row.try_get("status").map_err(serialization)?;
    let amount_cents: i64 = row.try_get("amount_cents").map_err(serialization)?;
    let payment_method: serde_json::Value = row.try_get("payment_method").map_err(serialization)?;
    let customer: serde_json::Value = row.try_get("customer").map_err(serialization)?;
    let provider_reference: String = row.try_get("provider_reference").map_err(serialization)?;

    Ok(PaymentIntent {
        payment_id: PaymentId::from_uuid(payment_id),
        idempotency_key: IdempotencyKey::new(idempotency_key),
        reservation_token: ReservationToken::from_uuid(reservation_token),
        status: status.parse().map_err(serialization)?,
        amount: Money::from_cents(u64::try_from(amount_cents).map_err(serialization)?),
        payment_method: serde_json::from_value::<PaymentMethod>(payment_method)
            .map_err(serialization)?,
        customer: serde_json::from_value::<Customer>(customer).map_err(serialization)?,
        provider_reference: ProviderReference::new(provider_reference),
        created_at: row.try_get("created_at").map_err(serialization)?,
        settled_at: row.try_get("settled_at").map_err(serialization)?,
    })
}

impl PostgresPaymentIntentStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        predicate: &str,
        bind: BindValue<'_>,
    ) -> Result<Option<PaymentIntent>, RepositoryError> {
        let sql = format!("SELECT {COLUMNS} FROM payment_intents WHERE {predicate}");
        let query = sqlx::query(&sql);
        let query = match bind {
            BindValue::Uuid(id) => query.bind(id),
            BindValue::Text(text) => query.bind(text),
        };
        let row = query.fetch_optional(&self.pool).await.map_err(|e| db(&e))?;
        row.as_ref().map(intent_from_row).transpose()
    }

    async fn load(&self, payment_id: &PaymentId) -> Result<Option<PaymentIntent>, RepositoryError> {
        self.fetch_one_where("payment_id = $1", BindValue::Uuid(*payment_id.as_uuid()))
            .await
    }

    async fn load_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<PaymentIntent>, RepositoryError> {
        self.fetch_one_where("idempotency_key = $1", BindValue::Text(key.as_str()))
            .await
    }

    async fn load_live(
        &self,
        token: &ReservationToken,
    ) -> Result<Option<PaymentIntent>, RepositoryError> {
        self.fetch_one_where(
            "reservation_token = $1 AND status <> 'failed'",
            BindValue::Uuid(*token.as_uuid()),
        )
        .await
    }
}

/// Single bind parameter of a lookup query.
enum BindValue<'a> {
    Uuid(uuid::Uuid),
    Text(&'a str),
}

impl PaymentIntentStore for PostgresPaymentIntentStore {
    fn create_if_absent(
        &self,
        intent: PaymentIntent,
    ) -> BoxFuture<'_, Result<CreateIntent, RepositoryError>> {
        Box::pin(async move {
            let method = serde_json::to_value(&intent.payment_method).map_err(serialization)?;
            let customer = serde_json::to_value(&intent.customer).map_err(serialization)?;
            let amount = i64::try_from(intent.amount.cents()).map_err(serialization)?;

            let row = sqlx::query(&format!(
                r"
                INSERT INTO payment_intents ({COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT DO NOTHING
                RETURNING {COLUMNS}
                "
            ))
            .bind(intent.payment_id.as_uuid())
            .bind(intent.idempotency_key.as_str())
            .bind(intent.reservation_token.as_uuid())
            .bind(intent.status.as_str())
            .bind(amount)
            .bind(method)
            .bind(customer)
            .bind(intent.provider_reference.as_str())
            .bind(intent.created_at)
            .bind(intent.settled_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db(&e))?;

            if let Some(row) = row {
                metrics::counter!("boxoffice_payment_intents_created_total").increment(1);
                return Ok(CreateIntent::Created(intent_from_row(&row)?));
            }

            if let Some(existing) = self.load_by_key(&intent.idempotency_key).await? {
                return Ok(CreateIntent::Existing(existing));
            }
            if let Some(live) = self.load_live(&intent.reservation_token).await? {
                return Ok(CreateIntent::ReservationTaken(live));
            }

            // The conflicting row was gone by the time we looked; a failed
            // intent frees its reservation, so the caller may simply retry.
            Err(RepositoryError::Database(format!(
                "payment intent {} conflicted with a row that no longer matches",
                intent.payment_id
            )))
        })
    }

    fn get<'a>(
        &'a self,
        payment_id: &'a PaymentId,
    ) -> BoxFuture<'a, Result<Option<PaymentIntent>, RepositoryError>> {
        Box::pin(self.load(payment_id))
    }

    fn get_by_key<'a>(
        &'a self,
        key: &'a IdempotencyKey,
    ) -> BoxFuture<'a, Result<Option<PaymentIntent>, RepositoryError>> {
        Box::pin(self.load_by_key(key))
    }

    fn get_by_reference<'a>(
        &'a self,
        reference: &'a ProviderReference,
    ) -> BoxFuture<'a, Result<Option<PaymentIntent>, RepositoryError>> {
        Box::pin(self.fetch_one_where(
            "provider_reference = $1",
            BindValue::Text(reference.as_str()),
        ))
    }

    fn transition<'a>(
        &'a self,
        payment_id: &'a PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Transition<PaymentIntent>, RepositoryError>> {
        Box::pin(async move {
            let settled_at = to.is_terminal().then_some(at);
            let row = sqlx::query(&format!(
                r"
                UPDATE payment_intents
                SET status = $3, settled_at = $4
                WHERE payment_id = $1 AND status = $2
                RETURNING {COLUMNS}
                "
            ))
            .bind(payment_id.as_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(settled_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db(&e))?;

            if let Some(row) = row {
                return Ok(Transition::Applied(intent_from_row(&row)?));
            }
            Ok(match self.load(payment_id).await? {
                Some(current) => Transition::Rejected(current),
                None => Transition::Missing,
            })
        })
    }
}

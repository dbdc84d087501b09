//! Inventory ledger over `PostgreSQL`.
//!
//! Every write is one `UPDATE ... WHERE` that re-checks the invariant and the
//! halt flag on the row it modifies, so concurrent writers serialize on the
//! row lock and none of them can push `sold + reserved` past `total`. When an
//! update matches no row the current state is read back to explain why.

use crate::{count, pool_key};
use boxoffice_core::{BoxFuture, EventId, InventoryCounts, InventoryLedger, LedgerError, PoolKey};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Which guarded write failed to match, for diagnosis.
#[derive(Debug, Clone, Copy)]
enum Write {
    SoftReserve,
    CommitSold,
    ReleaseReserved,
}

impl Write {
    const fn as_str(self) -> &'static str {
        match self {
            Self::SoftReserve => "soft_reserve",
            Self::CommitSold => "commit_sold",
            Self::ReleaseReserved => "release_reserved",
        }
    }
}

/// `PostgreSQL` inventory ledger.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

fn db(e: &sqlx::Error) -> LedgerError {
    LedgerError::Database(e.to_string())
}

fn counts_from_row(row: &PgRow) -> Result<InventoryCounts, LedgerError> {
    let column = |name: &str| -> Result<u32, LedgerError> {
        let value: i64 = row.try_get(name).map_err(|e| db(&e))?;
        count(value, name).map_err(LedgerError::Database)
    };
    Ok(InventoryCounts {
        total: column("total")?,
        sold: column("sold")?,
        reserved: column("reserved")?,
    })
}

impl PostgresLedger {
    /// Create a ledger over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn guarded_write(
        &self,
        pool: &PoolKey,
        quantity: u32,
        write: Write,
    ) -> Result<InventoryCounts, LedgerError> {
        let sql = match write {
            Write::SoftReserve => {
                r"
                UPDATE inventory
                SET reserved = reserved + $3, updated_at = now()
                WHERE event_id = $1 AND ticket_type = $2
                  AND sold + reserved + $3 <= total
                  AND NOT EXISTS (SELECT 1 FROM halted_events WHERE event_id = $1)
                RETURNING total, sold, reserved
                "
            }
            Write::CommitSold => {
                r"
                UPDATE inventory
                SET reserved = reserved - $3, sold = sold + $3, updated_at = now()
                WHERE event_id = $1 AND ticket_type = $2
                  AND reserved >= $3
                  AND sold + reserved <= total
                  AND NOT EXISTS (SELECT 1 FROM halted_events WHERE event_id = $1)
                RETURNING total, sold, reserved
                "
            }
            Write::ReleaseReserved => {
                r"
                UPDATE inventory
                SET reserved = reserved - $3, updated_at = now()
                WHERE event_id = $1 AND ticket_type = $2
                  AND reserved >= $3
                  AND sold + reserved <= total
                  AND NOT EXISTS (SELECT 1 FROM halted_events WHERE event_id = $1)
                RETURNING total, sold, reserved
                "
            }
        };

        let row = sqlx::query(sql)
            .bind(pool.event_id.as_uuid())
            .bind(pool.ticket_type.as_str())
            .bind(i64::from(quantity))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db(&e))?;

        match row {
            Some(row) => counts_from_row(&row),
            None => Err(self.diagnose(pool, quantity, write).await),
        }
    }

    /// Explain why a guarded write matched no row.
    async fn diagnose(&self, pool: &PoolKey, quantity: u32, write: Write) -> LedgerError {
        metrics::counter!("boxoffice_ledger_guard_rejections_total", "write" => write.as_str())
            .increment(1);

        let halted = match self.is_halted_inner(&pool.event_id).await {
            Ok(halted) => halted,
            Err(e) => return e,
        };
        if halted {
            return LedgerError::Halted(pool.event_id);
        }

        let counts = match self.read_counts(pool).await {
            Ok(Some(counts)) => counts,
            Ok(None) => return LedgerError::UnknownPool(pool.clone()),
            Err(e) => return e,
        };
        if !counts.is_consistent() {
            return self.halt_corrupt(pool, counts).await;
        }

        match write {
            Write::SoftReserve => LedgerError::InsufficientCapacity {
                pool: pool.clone(),
                requested: quantity,
                available: counts.available(),
            },
            Write::CommitSold | Write::ReleaseReserved => LedgerError::InsufficientReserved {
                pool: pool.clone(),
                requested: quantity,
                reserved: counts.reserved,
            },
        }
    }

    async fn halt_corrupt(&self, pool: &PoolKey, counts: InventoryCounts) -> LedgerError {
        tracing::error!(
            %pool,
            total = counts.total,
            sold = counts.sold,
            reserved = counts.reserved,
            "Ledger row violates sold + reserved <= total; halting event"
        );
        if let Err(e) = self
            .halt_inner(&pool.event_id, "sold + reserved exceeds total")
            .await
        {
            return e;
        }
        LedgerError::InvariantViolation {
            pool: pool.clone(),
            counts,
        }
    }

    async fn read_counts(&self, pool: &PoolKey) -> Result<Option<InventoryCounts>, LedgerError> {
        let row = sqlx::query(
            r"
            SELECT total, sold, reserved
            FROM inventory
            WHERE event_id = $1 AND ticket_type = $2
            ",
        )
        .bind(pool.event_id.as_uuid())
        .bind(pool.ticket_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db(&e))?;

        row.as_ref().map(counts_from_row).transpose()
    }

    async fn is_halted_inner(&self, event_id: &EventId) -> Result<bool, LedgerError> {
        let (halted,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM halted_events WHERE event_id = $1)")
                .bind(event_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| db(&e))?;
        Ok(halted)
    }

    async fn halt_inner(&self, event_id: &EventId, reason: &str) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r"
            INSERT INTO halted_events (event_id, reason)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(event_id.as_uuid())
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| db(&e))?;

        if result.rows_affected() > 0 {
            metrics::counter!("boxoffice_ledger_halts_total").increment(1);
            tracing::error!(%event_id, reason, "Event halted");
        }
        Ok(())
    }
}

impl InventoryLedger for PostgresLedger {
    fn provision<'a>(
        &'a self,
        pool: &'a PoolKey,
        total: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                INSERT INTO inventory (event_id, ticket_type, total)
                VALUES ($1, $2, $3)
                ON CONFLICT (event_id, ticket_type) DO UPDATE
                SET total = EXCLUDED.total, updated_at = now()
                WHERE inventory.sold + inventory.reserved <= EXCLUDED.total
                RETURNING total, sold, reserved
                ",
            )
            .bind(pool.event_id.as_uuid())
            .bind(pool.ticket_type.as_str())
            .bind(i64::from(total))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db(&e))?;

            if let Some(row) = row {
                return counts_from_row(&row);
            }

            let current = self
                .read_counts(pool)
                .await?
                .ok_or_else(|| LedgerError::UnknownPool(pool.clone()))?;
            Err(LedgerError::TotalTooSmall {
                pool: pool.clone(),
                requested: total,
                committed: current.sold.saturating_add(current.reserved),
            })
        })
    }

    fn soft_reserve<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>> {
        Box::pin(self.guarded_write(pool, quantity, Write::SoftReserve))
    }

    fn commit_sold<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>> {
        Box::pin(self.guarded_write(pool, quantity, Write::CommitSold))
    }

    fn release_reserved<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>> {
        Box::pin(self.guarded_write(pool, quantity, Write::ReleaseReserved))
    }

    fn counts<'a>(
        &'a self,
        pool: &'a PoolKey,
    ) -> BoxFuture<'a, Result<Option<InventoryCounts>, LedgerError>> {
        Box::pin(async move {
            match self.read_counts(pool).await? {
                Some(counts) if !counts.is_consistent() => {
                    Err(self.halt_corrupt(pool, counts).await)
                }
                other => Ok(other),
            }
        })
    }

    fn pools(&self) -> BoxFuture<'_, Result<Vec<(PoolKey, InventoryCounts)>, LedgerError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT event_id, ticket_type, total, sold, reserved
                FROM inventory
                ORDER BY event_id, ticket_type
                ",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db(&e))?;

            rows.iter()
                .map(|row| {
                    let event_id = row.try_get("event_id").map_err(|e| db(&e))?;
                    let ticket_type = row.try_get("ticket_type").map_err(|e| db(&e))?;
                    let key = pool_key(event_id, ticket_type).map_err(LedgerError::Database)?;
                    Ok((key, counts_from_row(row)?))
                })
                .collect()
        })
    }

    fn halt<'a>(
        &'a self,
        event_id: &'a EventId,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        Box::pin(self.halt_inner(event_id, reason))
    }

    fn resume<'a>(&'a self, event_id: &'a EventId) -> BoxFuture<'a, Result<bool, LedgerError>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM halted_events WHERE event_id = $1")
                .bind(event_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| db(&e))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn is_halted<'a>(&'a self, event_id: &'a EventId) -> BoxFuture<'a, Result<bool, LedgerError>> {
        Box::pin(self.is_halted_inner(event_id))
    }
}

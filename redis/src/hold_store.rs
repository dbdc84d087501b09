//! `HoldStore` over Redis.

use crate::scripts::Scripts;
use boxoffice_core::{
    BoxFuture, Hold, HoldGrant, HoldStore, HoldStoreError, PoolKey, ReservationToken,
};
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

/// Redis-backed hold store.
///
/// Holds are also stored as JSON documents with a Redis TTL, so they vanish
/// without any sweeper even if the application never comes back for them.
///
/// Keys of one pool share a hash tag; the per-token hold documents do not,
/// so the scripts assume a single Redis primary.
#[derive(Clone)]
pub struct RedisHoldStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    scripts: Scripts,
    prefix: String,
}

impl std::fmt::Debug for RedisHoldStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisHoldStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Keys touched by a pool-level script.
struct PoolKeys {
    pool: String,
    expiry: String,
    qty: String,
}

impl RedisHoldStore {
    /// Connect to Redis with the default `boxoffice` key prefix.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, HoldStoreError> {
        Self::with_prefix(redis_url, "boxoffice").await
    }

    /// Connect to Redis, namespacing every key under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn with_prefix(redis_url: &str, prefix: &str) -> Result<Self, HoldStoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            HoldStoreError::Backend(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            HoldStoreError::Backend(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!(prefix, "Connected to Redis hold store");
        Ok(Self {
            conn_manager,
            scripts: Scripts::new(),
            prefix: prefix.to_string(),
        })
    }

    fn pool_keys(&self, pool: &PoolKey) -> PoolKeys {
        // Ticket types are restricted to [A-Za-z0-9_-], so the tag is unambiguous.
        let tag = format!("{}:{{{}:{}}}", self.prefix, pool.event_id, pool.ticket_type);
        PoolKeys {
            pool: format!("{tag}:pool"),
            expiry: format!("{tag}:expiry"),
            qty: format!("{tag}:qty"),
        }
    }

    fn hold_key(&self, token: &ReservationToken) -> String {
        format!("{}:hold:{token}", self.prefix)
    }

    async fn load_hold(&self, token: &ReservationToken) -> Result<Option<Hold>, HoldStoreError> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn
            .get(self.hold_key(token))
            .await
            .map_err(|e| backend("Failed to load hold", &e))?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                HoldStoreError::Serialization(format!("Failed to deserialize hold: {e}"))
            })
        })
        .transpose()
    }
}

fn backend(context: &str, e: &redis::RedisError) -> HoldStoreError {
    HoldStoreError::Backend(format!("{context}: {e}"))
}

/// Milliseconds since the epoch, clamped at zero.
fn epoch_ms(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp_millis()).unwrap_or(0)
}

fn ttl_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.num_milliseconds()).unwrap_or(0).max(1)
}

impl HoldStore for RedisHoldStore {
    fn provision<'a>(
        &'a self,
        pool: &'a PoolKey,
        capacity: u32,
    ) -> BoxFuture<'a, Result<(), HoldStoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let keys = self.pool_keys(pool);
            let _: i64 = self
                .scripts
                .provision
                .key(&keys.pool)
                .arg(capacity)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| backend("Failed to provision pool", &e))?;

            tracing::debug!(%pool, capacity, "Hold store capacity set");
            Ok(())
        })
    }

    fn try_reserve<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<HoldGrant, HoldStoreError>> {
        Box::pin(async move {
            let hold = Hold {
                token: ReservationToken::new(),
                pool: pool.clone(),
                quantity,
                created_at: now,
                expires_at: now + ttl,
            };
            let json = serde_json::to_string(&hold).map_err(|e| {
                HoldStoreError::Serialization(format!("Failed to serialize hold: {e}"))
            })?;

            let mut conn = self.conn_manager.clone();
            let keys = self.pool_keys(pool);
            let (granted, remaining): (i64, i64) = self
                .scripts
                .try_reserve
                .key(&keys.pool)
                .key(&keys.expiry)
                .key(&keys.qty)
                .key(self.hold_key(&hold.token))
                .arg(quantity)
                .arg(epoch_ms(now))
                .arg(epoch_ms(hold.expires_at))
                .arg(hold.token.to_string())
                .arg(json)
                .arg(ttl_ms(ttl))
                .invoke_async(&mut conn)
                .await
                .map_err(|e| backend("Failed to reserve", &e))?;

            let available = u32::try_from(remaining.max(0)).unwrap_or(u32::MAX);
            if granted == 1 {
                tracing::debug!(token = %hold.token, %pool, quantity, remaining = available, "Hold granted");
                Ok(HoldGrant::Granted(hold))
            } else {
                Ok(HoldGrant::Declined { available })
            }
        })
    }

    fn release<'a>(
        &'a self,
        token: &'a ReservationToken,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<Hold>, HoldStoreError>> {
        Box::pin(async move {
            // Without the document the pool is unknown; the hold's units are
            // then returned by the next purge of its pool.
            let Some(hold) = self.load_hold(token).await? else {
                return Ok(None);
            };

            let mut conn = self.conn_manager.clone();
            let keys = self.pool_keys(&hold.pool);
            let released: i64 = self
                .scripts
                .release
                .key(&keys.pool)
                .key(&keys.expiry)
                .key(&keys.qty)
                .key(self.hold_key(token))
                .arg(token.to_string())
                .arg(epoch_ms(now))
                .invoke_async(&mut conn)
                .await
                .map_err(|e| backend("Failed to release hold", &e))?;

            Ok((released == 1 && !hold.is_expired(now)).then_some(hold))
        })
    }

    fn settle<'a>(
        &'a self,
        token: &'a ReservationToken,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<(), HoldStoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let keys = self.pool_keys(pool);
            let _: i64 = self
                .scripts
                .settle
                .key(&keys.pool)
                .key(&keys.expiry)
                .key(&keys.qty)
                .key(self.hold_key(token))
                .arg(token.to_string())
                .arg(quantity)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| backend("Failed to settle hold", &e))?;
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        token: &'a ReservationToken,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<Hold>, HoldStoreError>> {
        Box::pin(async move {
            Ok(self
                .load_hold(token)
                .await?
                .filter(|hold| !hold.is_expired(now)))
        })
    }

    fn reserved<'a>(
        &'a self,
        pool: &'a PoolKey,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u32, HoldStoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let keys = self.pool_keys(pool);
            let reserved: i64 = self
                .scripts
                .reserved
                .key(&keys.pool)
                .key(&keys.expiry)
                .key(&keys.qty)
                .arg(epoch_ms(now))
                .invoke_async(&mut conn)
                .await
                .map_err(|e| backend("Failed to read reserved units", &e))?;
            Ok(u32::try_from(reserved.max(0)).unwrap_or(u32::MAX))
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), HoldStoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| backend("Redis ping failed", &e))?;
            Ok(())
        })
    }
}

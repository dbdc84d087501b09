//! In-memory inventory ledger.
//!
//! Each pool's counts sit behind their own mutex; every write takes the lock,
//! re-checks the invariant and applies the change, which gives the same
//! row-level atomicity as `UPDATE ... WHERE sold + reserved + $n <= total`.

use boxoffice_core::{BoxFuture, EventId, InventoryCounts, InventoryLedger, LedgerError, PoolKey};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

/// In-memory inventory ledger.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    pools: Arc<RwLock<BTreeMap<PoolKey, Arc<Mutex<InventoryCounts>>>>>,
    halted: Arc<RwLock<HashMap<EventId, String>>>,
}

impl InMemoryLedger {
    /// Create an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, pool: &PoolKey) -> Result<Arc<Mutex<InventoryCounts>>, LedgerError> {
        let pools = self
            .pools
            .read()
            .map_err(|_| LedgerError::Database("RwLock read failed".to_string()))?;
        pools
            .get(pool)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownPool(pool.clone()))
    }

    fn ensure_running(&self, event_id: &EventId) -> Result<(), LedgerError> {
        let halted = self
            .halted
            .read()
            .map_err(|_| LedgerError::Database("RwLock read failed".to_string()))?;
        if halted.contains_key(event_id) {
            return Err(LedgerError::Halted(*event_id));
        }
        Ok(())
    }

    fn mark_halted(&self, event_id: &EventId, reason: &str) -> Result<(), LedgerError> {
        let mut halted = self
            .halted
            .write()
            .map_err(|_| LedgerError::Database("RwLock write failed".to_string()))?;
        halted
            .entry(*event_id)
            .or_insert_with(|| reason.to_string());
        Ok(())
    }

    /// Run `apply` against the pool's counts under its lock.
    ///
    /// Corrupt counts halt the event before `apply` runs.
    fn write<F>(&self, pool: &PoolKey, apply: F) -> Result<InventoryCounts, LedgerError>
    where
        F: FnOnce(&mut InventoryCounts) -> Result<(), LedgerError>,
    {
        self.ensure_running(&pool.event_id)?;
        let row = self.row(pool)?;
        let mut counts = row
            .lock()
            .map_err(|_| LedgerError::Database("Mutex lock failed".to_string()))?;

        if !counts.is_consistent() {
            let observed = *counts;
            drop(counts);
            self.mark_halted(&pool.event_id, "sold + reserved exceeds total")?;
            return Err(LedgerError::InvariantViolation {
                pool: pool.clone(),
                counts: observed,
            });
        }

        apply(&mut counts)?;
        Ok(*counts)
    }

    /// Overwrite a pool's counts without any checks.
    ///
    /// Exists to simulate corruption in tests.
    ///
    /// # Errors
    ///
    /// Returns error if a lock is poisoned.
    pub fn force_counts(&self, pool: &PoolKey, counts: InventoryCounts) -> Result<(), LedgerError> {
        let mut pools = self
            .pools
            .write()
            .map_err(|_| LedgerError::Database("RwLock write failed".to_string()))?;
        pools.insert(pool.clone(), Arc::new(Mutex::new(counts)));
        Ok(())
    }

    /// Reason an event was halted with, if it is halted
    ///
    /// # Errors
    ///
    /// Returns error if a lock is poisoned.
    pub fn halt_reason(&self, event_id: &EventId) -> Result<Option<String>, LedgerError> {
        let halted = self
            .halted
            .read()
            .map_err(|_| LedgerError::Database("RwLock read failed".to_string()))?;
        Ok(halted.get(event_id).cloned())
    }
}

impl InventoryLedger for InMemoryLedger {
    fn provision<'a>(
        &'a self,
        pool: &'a PoolKey,
        total: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>> {
        Box::pin(async move {
            let existing = {
                let mut pools = self
                    .pools
                    .write()
                    .map_err(|_| LedgerError::Database("RwLock write failed".to_string()))?;
                match pools.get(pool) {
                    Some(row) => Arc::clone(row),
                    None => {
                        let counts = InventoryCounts::new(total);
                        pools.insert(pool.clone(), Arc::new(Mutex::new(counts)));
                        return Ok(counts);
                    }
                }
            };

            let mut counts = existing
                .lock()
                .map_err(|_| LedgerError::Database("Mutex lock failed".to_string()))?;
            let committed = counts.sold.saturating_add(counts.reserved);
            if total < committed {
                return Err(LedgerError::TotalTooSmall {
                    pool: pool.clone(),
                    requested: total,
                    committed,
                });
            }
            counts.total = total;
            Ok(*counts)
        })
    }

    fn soft_reserve<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>> {
        Box::pin(async move {
            self.write(pool, |counts| {
                if !counts.can_reserve(quantity) {
                    return Err(LedgerError::InsufficientCapacity {
                        pool: pool.clone(),
                        requested: quantity,
                        available: counts.available(),
                    });
                }
                counts.reserved += quantity;
                Ok(())
            })
        })
    }

    fn commit_sold<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>> {
        Box::pin(async move {
            self.write(pool, |counts| {
                if counts.reserved < quantity {
                    return Err(LedgerError::InsufficientReserved {
                        pool: pool.clone(),
                        requested: quantity,
                        reserved: counts.reserved,
                    });
                }
                counts.reserved -= quantity;
                counts.sold += quantity;
                Ok(())
            })
        })
    }

    fn release_reserved<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>> {
        Box::pin(async move {
            self.write(pool, |counts| {
                if counts.reserved < quantity {
                    return Err(LedgerError::InsufficientReserved {
                        pool: pool.clone(),
                        requested: quantity,
                        reserved: counts.reserved,
                    });
                }
                counts.reserved -= quantity;
                Ok(())
            })
        })
    }

    fn counts<'a>(
        &'a self,
        pool: &'a PoolKey,
    ) -> BoxFuture<'a, Result<Option<InventoryCounts>, LedgerError>> {
        Box::pin(async move {
            let row = match self.row(pool) {
                Ok(row) => row,
                Err(LedgerError::UnknownPool(_)) => return Ok(None),
                Err(e) => return Err(e),
            };
            let counts = *row
                .lock()
                .map_err(|_| LedgerError::Database("Mutex lock failed".to_string()))?;
            if !counts.is_consistent() {
                self.mark_halted(&pool.event_id, "sold + reserved exceeds total")?;
                return Err(LedgerError::InvariantViolation {
                    pool: pool.clone(),
                    counts,
                });
            }
            Ok(Some(counts))
        })
    }

    fn pools(&self) -> BoxFuture<'_, Result<Vec<(PoolKey, InventoryCounts)>, LedgerError>> {
        Box::pin(async move {
            let rows: Vec<(PoolKey, Arc<Mutex<InventoryCounts>>)> = {
                let pools = self
                    .pools
                    .read()
                    .map_err(|_| LedgerError::Database("RwLock read failed".to_string()))?;
                pools
                    .iter()
                    .map(|(pool, row)| (pool.clone(), Arc::clone(row)))
                    .collect()
            };
            rows.into_iter()
                .map(|(pool, row)| {
                    let counts = *row
                        .lock()
                        .map_err(|_| LedgerError::Database("Mutex lock failed".to_string()))?;
                    Ok((pool, counts))
                })
                .collect()
        })
    }

    fn halt<'a>(
        &'a self,
        event_id: &'a EventId,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        Box::pin(async move { self.mark_halted(event_id, reason) })
    }

    fn resume<'a>(&'a self, event_id: &'a EventId) -> BoxFuture<'a, Result<bool, LedgerError>> {
        Box::pin(async move {
            let mut halted = self
                .halted
                .write()
                .map_err(|_| LedgerError::Database("RwLock write failed".to_string()))?;
            Ok(halted.remove(event_id).is_some())
        })
    }

    fn is_halted<'a>(&'a self, event_id: &'a EventId) -> BoxFuture<'a, Result<bool, LedgerError>> {
        Box::pin(async move {
            let halted = self
                .halted
                .read()
                .map_err(|_| LedgerError::Database("RwLock read failed".to_string()))?;
            Ok(halted.contains_key(event_id))
        })
    }
}

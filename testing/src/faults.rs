//! Fault injection for exercising compensation paths.
//!
//! [`FlakyLedger`] and [`FlakyHoldStore`] wrap a real store and fail chosen
//! operations with a transient backend error until healed. Reads are never
//! failed so tests can still assert on the wrapped state.

use boxoffice_core::{
    BoxFuture, EventId, Hold, HoldGrant, HoldStore, HoldStoreError, InventoryCounts,
    InventoryLedger, LedgerError, PoolKey, ReservationToken,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Ledger operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    /// [`InventoryLedger::provision`]
    Provision,
    /// [`InventoryLedger::soft_reserve`]
    SoftReserve,
    /// [`InventoryLedger::commit_sold`]
    CommitSold,
    /// [`InventoryLedger::release_reserved`]
    ReleaseReserved,
}

/// Hold store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HoldOp {
    /// [`HoldStore::provision`]
    Provision,
    /// [`HoldStore::try_reserve`]
    TryReserve,
    /// [`HoldStore::release`]
    Release,
    /// [`HoldStore::settle`]
    Settle,
}

#[derive(Debug)]
struct Switches<Op> {
    failing: Mutex<HashSet<Op>>,
}

impl<Op> Default for Switches<Op> {
    fn default() -> Self {
        Self {
            failing: Mutex::new(HashSet::new()),
        }
    }
}

impl<Op: Copy + Eq + std::hash::Hash> Switches<Op> {
    fn set(&self, op: Op, failing: bool) {
        if let Ok(mut set) = self.failing.lock() {
            if failing {
                set.insert(op);
            } else {
                set.remove(&op);
            }
        }
    }

    fn clear(&self) {
        if let Ok(mut set) = self.failing.lock() {
            set.clear();
        }
    }

    fn is_failing(&self, op: Op) -> bool {
        self.failing.lock().is_ok_and(|set| set.contains(&op))
    }
}

/// Ledger wrapper that fails selected writes.
#[derive(Debug, Clone)]
pub struct FlakyLedger<L> {
    inner: L,
    switches: Arc<Switches<LedgerOp>>,
}

impl<L: InventoryLedger> FlakyLedger<L> {
    /// Wrap a ledger; nothing fails until [`FlakyLedger::fail`] is called
    #[must_use]
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            switches: Arc::default(),
        }
    }

    /// Fail every subsequent call of `op`
    pub fn fail(&self, op: LedgerOp) {
        self.switches.set(op, true);
    }

    /// Stop failing `op`
    pub fn recover(&self, op: LedgerOp) {
        self.switches.set(op, false);
    }

    /// Stop failing everything
    pub fn heal(&self) {
        self.switches.clear();
    }

    /// The wrapped ledger
    pub const fn inner(&self) -> &L {
        &self.inner
    }

    fn check(&self, op: LedgerOp) -> Result<(), LedgerError> {
        if self.switches.is_failing(op) {
            return Err(LedgerError::Database(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

impl<L: InventoryLedger> InventoryLedger for FlakyLedger<L> {
    fn provision<'a>(
        &'a self,
        pool: &'a PoolKey,
        total: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>> {
        Box::pin(async move {
            self.check(LedgerOp::Provision)?;
            self.inner.provision(pool, total).await
        })
    }

    fn soft_reserve<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>> {
        Box::pin(async move {
            self.check(LedgerOp::SoftReserve)?;
            self.inner.soft_reserve(pool, quantity).await
        })
    }

    fn commit_sold<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>> {
        Box::pin(async move {
            self.check(LedgerOp::CommitSold)?;
            self.inner.commit_sold(pool, quantity).await
        })
    }

    fn release_reserved<'a>(
        &'a self,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<InventoryCounts, LedgerError>> {
        Box::pin(async move {
            self.check(LedgerOp::ReleaseReserved)?;
            self.inner.release_reserved(pool, quantity).await
        })
    }

    fn counts<'a>(
        &'a self,
        pool: &'a PoolKey,
    ) -> BoxFuture<'a, Result<Option<InventoryCounts>, LedgerError>> {
        self.inner.counts(pool)
    }

    fn pools(&self) -> BoxFuture<'_, Result<Vec<(PoolKey, InventoryCounts)>, LedgerError>> {
        self.inner.pools()
    }

    fn halt<'a>(
        &'a self,
        event_id: &'a EventId,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        self.inner.halt(event_id, reason)
    }

    fn resume<'a>(&'a self, event_id: &'a EventId) -> BoxFuture<'a, Result<bool, LedgerError>> {
        self.inner.resume(event_id)
    }

    fn is_halted<'a>(&'a self, event_id: &'a EventId) -> BoxFuture<'a, Result<bool, LedgerError>> {
        self.inner.is_halted(event_id)
    }
}

/// Hold store wrapper that fails selected operations.
#[derive(Debug, Clone)]
pub struct FlakyHoldStore<H> {
    inner: H,
    switches: Arc<Switches<HoldOp>>,
}

impl<H: HoldStore> FlakyHoldStore<H> {
    /// Wrap a hold store; nothing fails until [`FlakyHoldStore::fail`] is called
    #[must_use]
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            switches: Arc::default(),
        }
    }

    /// Fail every subsequent call of `op`
    pub fn fail(&self, op: HoldOp) {
        self.switches.set(op, true);
    }

    /// Stop failing `op`
    pub fn recover(&self, op: HoldOp) {
        self.switches.set(op, false);
    }

    /// Stop failing everything
    pub fn heal(&self) {
        self.switches.clear();
    }

    /// The wrapped store
    pub const fn inner(&self) -> &H {
        &self.inner
    }

    fn check(&self, op: HoldOp) -> Result<(), HoldStoreError> {
        if self.switches.is_failing(op) {
            return Err(HoldStoreError::Backend(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

impl<H: HoldStore> HoldStore for FlakyHoldStore<H> {
    fn provision<'a>(
        &'a self,
        pool: &'a PoolKey,
        capacity: u32,
    ) -> BoxFuture<'a, Result<(), HoldStoreError>> {
        Box::pin(async move {
            self.check(HoldOp::Provision)?;
            self.inner.provision(pool, capacity).await
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
            self.check(HoldOp::TryReserve)?;
            self.inner.try_reserve(pool, quantity, ttl, now).await
        })
    }

    fn release<'a>(
        &'a self,
        token: &'a ReservationToken,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<Hold>, HoldStoreError>> {
        Box::pin(async move {
            self.check(HoldOp::Release)?;
            self.inner.release(token, now).await
        })
    }

    fn settle<'a>(
        &'a self,
        token: &'a ReservationToken,
        pool: &'a PoolKey,
        quantity: u32,
    ) -> BoxFuture<'a, Result<(), HoldStoreError>> {
        Box::pin(async move {
            self.check(HoldOp::Settle)?;
            self.inner.settle(token, pool, quantity).await
        })
    }

    fn get<'a>(
        &'a self,
        token: &'a ReservationToken,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<Hold>, HoldStoreError>> {
        self.inner.get(token, now)
    }

    fn reserved<'a>(
        &'a self,
        pool: &'a PoolKey,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u32, HoldStoreError>> {
        self.inner.reserved(pool, now)
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), HoldStoreError>> {
        self.inner.ping()
    }
}

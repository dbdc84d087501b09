//! Reservation coordinator.
//!
//! Orchestrates the hold store, the ledger and the reservation repository:
//!
//! ```text
//! reserve: hold.try_reserve ──► ledger.soft_reserve ──► repository.create
//!              │ declined          │ failed: release hold   │ failed: release both
//!              ▼                   ▼                        ▼
//!           Declined            Declined / Err            Err (or replay)
//!
//! commit:  repository CAS active→confirmed ──► ledger.commit_sold ──► hold.settle
//! cancel:  repository CAS active→cancelled ──► ledger.release_reserved ──► hold.release
//! expire:  repository CAS active→expired   ──► ledger.release_reserved ──► hold.release
//! ```
//!
//! The repository's compare-and-set is the state-machine guard: every
//! transition happens at most once, so the ledger step behind it runs at most
//! once per reservation. If the ledger step fails the transition is reverted
//! to `active` and the error is returned for the caller to retry. Hold store
//! failures after a successful ledger step are only logged; the hold lapses on
//! its own and reconciliation restores the pool's capacity.

use crate::config::ReservationConfig;
use crate::error::ReservationError;
use crate::metrics::ReservationMetrics;
use crate::retry::{RetryPolicy, retry_with_backoff, retry_with_predicate};
use boxoffice_core::environment::Clock;
use boxoffice_core::{
    CreateReservation, EventId, Hold, HoldGrant, HoldStore, InventoryCounts, InventoryLedger,
    LedgerError, PoolKey, RepositoryError, Reservation, ReservationRepository, ReservationStatus,
    ReservationToken, SessionId, Transition,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// A request to hold tickets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    /// Pool to reserve from
    pub pool: PoolKey,
    /// Units wanted
    pub quantity: u32,
    /// Client request identity; repeats replay the first reservation
    pub session_id: SessionId,
}

/// Result of [`ReservationCoordinator::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Units are held.
    Reserved {
        /// The reservation (for replays, in its current status)
        reservation: Reservation,
        /// Whether this repeats an earlier request with the same session id
        replayed: bool,
    },
    /// Not enough units left.
    Declined {
        /// Units that could still be reserved
        available: u32,
    },
}

/// Result of [`ReservationCoordinator::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// This call moved the reservation to sold.
    Committed(Reservation),
    /// An earlier call already did.
    AlreadyConfirmed(Reservation),
    /// The reservation was cancelled or expired first.
    Rejected {
        /// Status that prevented the commit
        status: ReservationStatus,
    },
}

/// Result of [`ReservationCoordinator::cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// This call released the reservation.
    Cancelled(Reservation),
    /// The reservation had already left `active`.
    AlreadySettled(Reservation),
}

/// Result of [`ReservationCoordinator::expire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// This call expired the reservation.
    Expired(Reservation),
    /// The reservation had already left `active`.
    AlreadySettled(Reservation),
    /// The reservation is active and its hold has not lapsed yet.
    NotDue(Reservation),
}

/// Outcome of a release-type transition (cancel or expire).
enum Released {
    Now(Reservation),
    Before(Reservation),
}

/// Coordinates reservations across the hold store, ledger and repository.
///
/// Cheap to clone; all state lives in the stores.
#[derive(Clone)]
pub struct ReservationCoordinator {
    hold_store: Arc<dyn HoldStore>,
    ledger: Arc<dyn InventoryLedger>,
    repository: Arc<dyn ReservationRepository>,
    clock: Arc<dyn Clock>,
    config: ReservationConfig,
    compensation: RetryPolicy,
}

impl std::fmt::Debug for ReservationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReservationCoordinator {
    /// Create a coordinator over the given stores.
    #[must_use]
    pub fn new(
        hold_store: Arc<dyn HoldStore>,
        ledger: Arc<dyn InventoryLedger>,
        repository: Arc<dyn ReservationRepository>,
        clock: Arc<dyn Clock>,
        config: ReservationConfig,
    ) -> Self {
        Self {
            hold_store,
            ledger,
            repository,
            clock,
            config,
            compensation: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy used for compensating steps.
    #[must_use]
    pub fn with_compensation_policy(mut self, policy: RetryPolicy) -> Self {
        self.compensation = policy;
        self
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &ReservationConfig {
        &self.config
    }

    /// Current time according to the injected clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ========================================================================
    // Reserve
    // ========================================================================

    /// Hold `quantity` units of a pool for the configured TTL.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::InvalidQuantity`] outside `1..=max_quantity`
    /// - [`ReservationError::SessionConflict`] if the session id is bound to a
    ///   reservation for another pool or quantity
    /// - dependency failures, after any granted hold has been released
    #[tracing::instrument(
        skip(self, request),
        fields(
            pool = %request.pool,
            quantity = request.quantity,
            session_id = %request.session_id,
        )
    )]
    pub async fn reserve(&self, request: ReserveRequest) -> Result<ReserveOutcome, ReservationError> {
        let started = Instant::now();
        let result = self.reserve_inner(request).await;

        let label = match &result {
            Ok(ReserveOutcome::Reserved { replayed: false, .. }) => "reserved",
            Ok(ReserveOutcome::Reserved { replayed: true, .. }) => "replayed",
            Ok(ReserveOutcome::Declined { .. }) => "sold_out",
            Err(e) if e.is_retryable() => "error",
            Err(_) => "rejected",
        };
        ReservationMetrics::record_reserve(label, started.elapsed());
        result
    }

    async fn reserve_inner(
        &self,
        request: ReserveRequest,
    ) -> Result<ReserveOutcome, ReservationError> {
        let ReserveRequest {
            pool,
            quantity,
            session_id,
        } = request;

        if quantity == 0 || quantity > self.config.max_quantity {
            return Err(ReservationError::InvalidQuantity {
                requested: quantity,
                max: self.config.max_quantity,
            });
        }

        if let Some(existing) = self.repository.find_by_session(&session_id).await? {
            let existing = self.settle_lapsed(existing).await?;
            return replay(existing, &pool, quantity);
        }

        let now = self.clock.now();
        let hold = match self
            .hold_store
            .try_reserve(&pool, quantity, self.config.hold_ttl_chrono(), now)
            .await?
        {
            HoldGrant::Granted(hold) => hold,
            HoldGrant::Declined { available: 0 } => {
                self.check_pool_open(&pool).await?;
                tracing::debug!("Hold store declined, pool sold out");
                return Ok(ReserveOutcome::Declined { available: 0 });
            }
            HoldGrant::Declined { available } => {
                tracing::debug!(available, "Hold store declined");
                return Ok(ReserveOutcome::Declined { available });
            }
        };

        match self.ledger.soft_reserve(&pool, quantity).await {
            Ok(counts) => {
                tracing::debug!(
                    token = %hold.token,
                    sold = counts.sold,
                    reserved = counts.reserved,
                    "Ledger soft reserve applied"
                );
            }
            Err(LedgerError::InsufficientCapacity { available, .. }) => {
                tracing::warn!(
                    token = %hold.token,
                    available,
                    "Ledger declined a granted hold; hold store capacity is ahead of the ledger"
                );
                self.release_hold(&hold).await;
                return Ok(ReserveOutcome::Declined { available });
            }
            Err(e) => {
                tracing::warn!(token = %hold.token, error = %e, "Ledger soft reserve failed");
                self.release_hold(&hold).await;
                return Err(e.into());
            }
        }

        let reservation = Reservation::from_hold(&hold, session_id);
        match self.repository.create(reservation).await {
            Ok(CreateReservation::Created(reservation)) => {
                tracing::info!(
                    token = %reservation.token,
                    expires_at = %reservation.expires_at,
                    "Reservation created"
                );
                Ok(ReserveOutcome::Reserved {
                    reservation,
                    replayed: false,
                })
            }
            Ok(CreateReservation::Existing(existing)) => {
                // A concurrent request with the same session id won the race.
                tracing::debug!(token = %existing.token, "Lost session race, replaying");
                self.release_soft_reserve(&hold.pool, hold.quantity).await;
                self.release_hold(&hold).await;
                replay(existing, &pool, quantity)
            }
            Err(e) => {
                tracing::warn!(token = %hold.token, error = %e, "Storing reservation failed");
                self.release_soft_reserve(&hold.pool, hold.quantity).await;
                self.release_hold(&hold).await;
                Err(e.into())
            }
        }
    }

    /// Tell a sold-out pool apart from one that is unknown or halted.
    ///
    /// The hold store reports all three as zero capacity.
    async fn check_pool_open(&self, pool: &PoolKey) -> Result<(), ReservationError> {
        if self.ledger.is_halted(&pool.event_id).await? {
            return Err(LedgerError::Halted(pool.event_id).into());
        }
        if self.ledger.counts(pool).await?.is_none() {
            return Err(LedgerError::UnknownPool(pool.clone()).into());
        }
        Ok(())
    }

    /// Expire a replayed reservation whose hold lapsed before the sweeper got
    /// to it, returning its current state.
    async fn settle_lapsed(&self, existing: Reservation) -> Result<Reservation, ReservationError> {
        if !existing.is_lapsed(self.clock.now()) {
            return Ok(existing);
        }
        tracing::info!(token = %existing.token, "Replayed reservation has lapsed");
        Ok(match self.release(&existing.token, ReservationStatus::Expired).await? {
            Released::Now(reservation) | Released::Before(reservation) => reservation,
        })
    }

    /// Return a hold's units after a later reserve step failed.
    async fn release_hold(&self, hold: &Hold) {
        ReservationMetrics::record_compensation("release_hold");
        let now = self.clock.now();
        let released = retry_with_backoff(&self.compensation, "release_hold", || {
            self.hold_store.release(&hold.token, now)
        })
        .await;

        if let Err(e) = released {
            // The hold still lapses at its TTL.
            ReservationMetrics::record_compensation_failure("release_hold");
            tracing::warn!(
                token = %hold.token,
                expires_at = %hold.expires_at,
                error = %e,
                "Could not release hold; it will lapse on its own"
            );
        }
    }

    /// Undo a soft reserve whose reservation record was never stored.
    async fn release_soft_reserve(&self, pool: &PoolKey, quantity: u32) {
        ReservationMetrics::record_compensation("release_soft_reserve");
        let released = retry_with_predicate(
            &self.compensation,
            "release_soft_reserve",
            || self.ledger.release_reserved(pool, quantity),
            LedgerError::is_transient,
        )
        .await;

        if let Err(e) = released {
            ReservationMetrics::record_compensation_failure("release_soft_reserve");
            tracing::error!(
                %pool,
                quantity,
                error = %e,
                "Could not undo soft reserve; ledger holds orphaned reserved units"
            );
        }
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Move a reservation's units to sold. At most once per token.
    ///
    /// An `active` reservation past its expiry is expired instead and the
    /// commit is rejected.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::ReservationNotFound`] for an unknown token
    /// - dependency failures; the reservation is left `active`
    #[tracing::instrument(skip(self, token), fields(token = %token))]
    pub async fn commit(&self, token: &ReservationToken) -> Result<CommitOutcome, ReservationError> {
        let current = self.require(token).await?;
        let now = self.clock.now();

        if current.is_lapsed(now) {
            tracing::info!(expires_at = %current.expires_at, "Commit after expiry");
            return match self.release(token, ReservationStatus::Expired).await? {
                Released::Now(_) => Ok(CommitOutcome::Rejected {
                    status: ReservationStatus::Expired,
                }),
                Released::Before(settled) => Ok(settled_commit_outcome(settled)),
            };
        }

        let confirmed = match self
            .repository
            .transition(token, ReservationStatus::Active, ReservationStatus::Confirmed, now)
            .await?
        {
            Transition::Applied(confirmed) => confirmed,
            Transition::Rejected(settled) => return Ok(settled_commit_outcome(settled)),
            Transition::Missing => return Err(ReservationError::ReservationNotFound(*token)),
        };

        if let Err(e) = self
            .ledger
            .commit_sold(&confirmed.pool, confirmed.quantity)
            .await
        {
            tracing::warn!(error = %e, "Ledger commit failed, reverting confirmation");
            self.revert(token, ReservationStatus::Confirmed).await;
            return Err(e.into());
        }

        if let Err(e) = self
            .hold_store
            .settle(token, &confirmed.pool, confirmed.quantity)
            .await
        {
            tracing::warn!(error = %e, "Settling hold failed; capacity will be reconciled");
        }

        ReservationMetrics::record_settled(ReservationStatus::Confirmed.as_str());
        ReservationMetrics::record_sold(confirmed.quantity);
        tracing::info!(pool = %confirmed.pool, quantity = confirmed.quantity, "Reservation confirmed");
        Ok(CommitOutcome::Committed(confirmed))
    }

    // ========================================================================
    // Cancel / Expire
    // ========================================================================

    /// Release a reservation at the client's request (or after a failed
    /// payment). Idempotent.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::ReservationNotFound`] for an unknown token
    /// - dependency failures; the reservation is left `active`
    #[tracing::instrument(skip(self, token), fields(token = %token))]
    pub async fn cancel(&self, token: &ReservationToken) -> Result<CancelOutcome, ReservationError> {
        Ok(match self.release(token, ReservationStatus::Cancelled).await? {
            Released::Now(reservation) => CancelOutcome::Cancelled(reservation),
            Released::Before(reservation) => CancelOutcome::AlreadySettled(reservation),
        })
    }

    /// Release a reservation whose hold has lapsed. Idempotent.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::ReservationNotFound`] for an unknown token
    /// - dependency failures; the reservation is left `active`
    #[tracing::instrument(skip(self, token), fields(token = %token))]
    pub async fn expire(&self, token: &ReservationToken) -> Result<ExpireOutcome, ReservationError> {
        let current = self.require(token).await?;
        if current.status.is_terminal() {
            return Ok(ExpireOutcome::AlreadySettled(current));
        }
        if !current.is_lapsed(self.clock.now()) {
            return Ok(ExpireOutcome::NotDue(current));
        }
        Ok(match self.release(token, ReservationStatus::Expired).await? {
            Released::Now(reservation) => ExpireOutcome::Expired(reservation),
            Released::Before(reservation) => ExpireOutcome::AlreadySettled(reservation),
        })
    }

    async fn release(
        &self,
        token: &ReservationToken,
        to: ReservationStatus,
    ) -> Result<Released, ReservationError> {
        let now = self.clock.now();
        let released = match self
            .repository
            .transition(token, ReservationStatus::Active, to, now)
            .await?
        {
            Transition::Applied(released) => released,
            Transition::Rejected(settled) => return Ok(Released::Before(settled)),
            Transition::Missing => return Err(ReservationError::ReservationNotFound(*token)),
        };

        if let Err(e) = self
            .ledger
            .release_reserved(&released.pool, released.quantity)
            .await
        {
            tracing::warn!(status = %to, error = %e, "Ledger release failed, reverting");
            self.revert(token, to).await;
            return Err(e.into());
        }

        if let Err(e) = self.hold_store.release(token, now).await {
            tracing::warn!(error = %e, "Releasing hold failed; it will lapse on its own");
        }

        ReservationMetrics::record_settled(to.as_str());
        tracing::info!(
            pool = %released.pool,
            quantity = released.quantity,
            status = %to,
            "Reservation released"
        );
        Ok(Released::Now(released))
    }

    /// Put a reservation back to `active` after the step following its
    /// transition failed.
    async fn revert(&self, token: &ReservationToken, from: ReservationStatus) {
        ReservationMetrics::record_compensation("revert_transition");
        let now = self.clock.now();
        let reverted = retry_with_predicate(
            &self.compensation,
            "revert_transition",
            || {
                self.repository
                    .transition(token, from, ReservationStatus::Active, now)
            },
            |e: &RepositoryError| matches!(e, RepositoryError::Database(_)),
        )
        .await;

        match reverted {
            Ok(Transition::Applied(_)) => {}
            Ok(other) => {
                tracing::error!(%token, ?other, "Revert found reservation in an unexpected state");
            }
            Err(e) => {
                ReservationMetrics::record_compensation_failure("revert_transition");
                tracing::error!(
                    %token,
                    status = %from,
                    error = %e,
                    "Could not revert transition; reservation needs manual reconciliation"
                );
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Load a reservation.
    ///
    /// # Errors
    ///
    /// Returns error on repository failure.
    pub async fn get(&self, token: &ReservationToken) -> Result<Option<Reservation>, ReservationError> {
        Ok(self.repository.get(token).await?)
    }

    async fn require(&self, token: &ReservationToken) -> Result<Reservation, ReservationError> {
        self.get(token)
            .await?
            .ok_or(ReservationError::ReservationNotFound(*token))
    }

    /// Active reservations past their expiry, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error on repository failure.
    pub async fn due_for_expiry(&self, limit: usize) -> Result<Vec<Reservation>, ReservationError> {
        Ok(self
            .repository
            .due_for_expiry(self.clock.now(), limit)
            .await?)
    }

    /// Ledger counts of a pool.
    ///
    /// # Errors
    ///
    /// Returns error on ledger failure, or
    /// [`LedgerError::InvariantViolation`] if the pool is corrupt (its event is
    /// halted as a side effect).
    pub async fn availability(&self, pool: &PoolKey) -> Result<Option<InventoryCounts>, ReservationError> {
        match self.ledger.counts(pool).await {
            Err(e @ LedgerError::InvariantViolation { .. }) => {
                ReservationMetrics::record_halt();
                tracing::error!(%pool, error = %e, "Inventory invariant violated; event halted");
                Err(e.into())
            }
            other => Ok(other?),
        }
    }

    /// Readiness of all three stores.
    ///
    /// # Errors
    ///
    /// Returns the first failing dependency.
    pub async fn ping(&self) -> Result<(), ReservationError> {
        self.hold_store.ping().await?;
        self.repository.ping().await?;
        self.ledger.pools().await?;
        Ok(())
    }

    // ========================================================================
    // Operator surface
    // ========================================================================

    /// Create or resize a pool and open it in the hold store.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TotalTooSmall`] when shrinking below what is
    /// already sold or reserved, or a dependency failure.
    #[tracing::instrument(skip(self, pool), fields(pool = %pool))]
    pub async fn provision(&self, pool: &PoolKey, total: u32) -> Result<InventoryCounts, ReservationError> {
        let counts = self.ledger.provision(pool, total).await?;
        let halted = self.ledger.is_halted(&pool.event_id).await?;
        self.reconcile_pool(pool, counts, halted).await?;
        tracing::info!(total, sold = counts.sold, reserved = counts.reserved, "Pool provisioned");
        Ok(counts)
    }

    /// Lift a halt after manual reconciliation and reopen the event's pools.
    ///
    /// Returns whether the event was halted.
    ///
    /// # Errors
    ///
    /// Returns error on ledger or hold store failure.
    #[tracing::instrument(skip(self, event_id), fields(event_id = %event_id))]
    pub async fn resume_event(&self, event_id: &EventId) -> Result<bool, ReservationError> {
        let was_halted = self.ledger.resume(event_id).await?;
        if was_halted {
            tracing::warn!("Event resumed by operator");
            for (pool, counts) in self.ledger.pools().await? {
                if pool.event_id == *event_id {
                    self.reconcile_pool(&pool, counts, false).await?;
                }
            }
        }
        Ok(was_halted)
    }

    /// Rebuild hold store capacity for every pool from the ledger.
    ///
    /// Run at startup (warm-up) and after every sweep. Returns the number of
    /// pools reconciled.
    ///
    /// # Errors
    ///
    /// Returns error if the ledger cannot list pools. Per-pool failures are
    /// logged and skipped.
    pub async fn reconcile(&self) -> Result<usize, ReservationError> {
        let pools = self.ledger.pools().await?;
        let mut halted: HashMap<EventId, bool> = HashMap::new();
        let mut reconciled = 0;

        for (pool, counts) in pools {
            let is_halted = match halted.get(&pool.event_id) {
                Some(known) => *known,
                None => {
                    let known = self.ledger.is_halted(&pool.event_id).await?;
                    halted.insert(pool.event_id, known);
                    known
                }
            };

            let is_halted = if !is_halted && !counts.is_consistent() {
                self.halt_corrupt(&pool, counts).await;
                halted.insert(pool.event_id, true);
                true
            } else {
                is_halted
            };

            match self.reconcile_pool(&pool, counts, is_halted).await {
                Ok(_) => reconciled += 1,
                Err(e) => tracing::warn!(%pool, error = %e, "Reconciling pool failed"),
            }
        }
        Ok(reconciled)
    }

    async fn halt_corrupt(&self, pool: &PoolKey, counts: InventoryCounts) {
        ReservationMetrics::record_halt();
        tracing::error!(
            %pool,
            total = counts.total,
            sold = counts.sold,
            reserved = counts.reserved,
            "Inventory invariant violated; halting event"
        );
        if let Err(e) = self
            .ledger
            .halt(&pool.event_id, "sold + reserved exceeds total")
            .await
        {
            tracing::error!(%pool, error = %e, "Could not halt event");
        }
    }

    /// Set a pool's hold store capacity from ledger counts.
    ///
    /// Capacity is `total - sold - untracked`, where untracked units are
    /// soft-reserved in the ledger without a live hold (lapsed holds whose
    /// reservations the sweeper has not expired yet). Halted events get zero
    /// capacity. Returns the capacity set.
    async fn reconcile_pool(
        &self,
        pool: &PoolKey,
        counts: InventoryCounts,
        halted: bool,
    ) -> Result<u32, ReservationError> {
        let capacity = if halted {
            0
        } else {
            let held = self.hold_store.reserved(pool, self.clock.now()).await?;
            let untracked = counts.reserved.saturating_sub(held);
            counts
                .total
                .saturating_sub(counts.sold)
                .saturating_sub(untracked)
        };
        self.hold_store.provision(pool, capacity).await?;
        tracing::debug!(%pool, capacity, halted, "Hold store capacity reconciled");
        Ok(capacity)
    }
}

/// Replay an earlier reservation for a repeated session id.
fn replay(
    existing: Reservation,
    pool: &PoolKey,
    quantity: u32,
) -> Result<ReserveOutcome, ReservationError> {
    if existing.matches_request(pool, quantity) {
        Ok(ReserveOutcome::Reserved {
            reservation: existing,
            replayed: true,
        })
    } else {
        Err(ReservationError::SessionConflict {
            session_id: existing.session_id,
            existing: existing.token,
        })
    }
}

fn settled_commit_outcome(settled: Reservation) -> CommitOutcome {
    match settled.status {
        ReservationStatus::Confirmed => CommitOutcome::AlreadyConfirmed(settled),
        status => CommitOutcome::Rejected { status },
    }
}

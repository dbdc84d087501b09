//! Expiry sweeper.
//!
//! Background worker that expires reservations whose hold lapsed and then
//! rebuilds hold store capacity from the ledger. Runs on a tokio interval
//! until the shutdown channel fires.

use crate::error::ReservationError;
use crate::metrics::SweeperMetrics;
use crate::reservations::{ExpireOutcome, ReservationCoordinator};
use futures::stream::{self, StreamExt};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Expirations run concurrently within a batch, up to this many at once.
const EXPIRE_CONCURRENCY: usize = 16;

/// Summary of one sweeper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Reservations this pass expired
    pub expired: usize,
    /// Reservations that had been settled by someone else in the meantime
    pub already_settled: usize,
    /// Expirations that failed and will be retried next pass
    pub failed: usize,
    /// Pools whose hold store capacity was rebuilt
    pub pools_reconciled: usize,
}

/// Periodically expires lapsed reservations.
#[derive(Debug, Clone)]
pub struct ExpirySweeper {
    coordinator: ReservationCoordinator,
    interval: Duration,
    batch_size: usize,
}

impl ExpirySweeper {
    /// Create a sweeper using the coordinator's configured interval and batch size.
    #[must_use]
    pub fn new(coordinator: ReservationCoordinator) -> Self {
        let interval = coordinator.config().sweep_interval;
        let batch_size = coordinator.config().sweep_batch_size.max(1);
        Self {
            coordinator,
            interval,
            batch_size,
        }
    }

    /// Run a single pass: expire everything due, then reconcile capacity.
    ///
    /// # Errors
    ///
    /// Returns error if the due list or the ledger pools cannot be read.
    /// Individual expiration failures are counted in the report instead.
    pub async fn sweep_once(&self) -> Result<SweepReport, ReservationError> {
        let started = Instant::now();
        let mut report = SweepReport::default();

        loop {
            let due = self.coordinator.due_for_expiry(self.batch_size).await?;
            if due.is_empty() {
                break;
            }
            let batch_len = due.len();

            let outcomes: Vec<_> = stream::iter(due)
                .map(|reservation| {
                    let coordinator = &self.coordinator;
                    async move { coordinator.expire(&reservation.token).await }
                })
                .buffer_unordered(EXPIRE_CONCURRENCY)
                .collect()
                .await;

            let mut progressed = 0;
            for outcome in outcomes {
                match outcome {
                    Ok(ExpireOutcome::Expired(_)) => {
                        report.expired += 1;
                        progressed += 1;
                    }
                    Ok(ExpireOutcome::AlreadySettled(_)) => {
                        report.already_settled += 1;
                        progressed += 1;
                    }
                    Ok(ExpireOutcome::NotDue(_)) => {}
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(error = %e, "Expiring reservation failed");
                    }
                }
            }

            // A short batch means nothing else is due; a batch without
            // progress would come back unchanged.
            if batch_len < self.batch_size || progressed == 0 {
                break;
            }
        }

        report.pools_reconciled = self.coordinator.reconcile().await?;
        SweeperMetrics::record_pass(report.expired, report.pools_reconciled, started.elapsed());
        if report.expired > 0 || report.failed > 0 {
            tracing::info!(
                expired = report.expired,
                already_settled = report.already_settled,
                failed = report.failed,
                pools = report.pools_reconciled,
                "Sweep complete"
            );
        }
        Ok(report)
    }

    /// Sweep every interval until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            batch_size = self.batch_size,
            "Expiry sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Expiry sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        SweeperMetrics::record_error();
                        tracing::error!(error = %e, "Sweep failed");
                    }
                }
            }
        }
    }

    /// Spawn [`ExpirySweeper::run`] on the tokio runtime.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::ReservationConfig;
    use crate::reservations::{ReserveOutcome, ReserveRequest};
    use boxoffice_core::environment::Clock;
    use boxoffice_core::{
        EventId, HoldStore, InventoryLedger, PoolKey, SessionId, TicketType,
    };
    use boxoffice_testing::{
        InMemoryHoldStore, InMemoryLedger, InMemoryReservationRepository, ManualClock, test_clock,
    };
    use std::sync::Arc;

    struct Harness {
        coordinator: ReservationCoordinator,
        ledger: InMemoryLedger,
        hold_store: InMemoryHoldStore,
        clock: Arc<ManualClock>,
        pool: PoolKey,
    }

    async fn harness(total: u32, batch: usize) -> Harness {
        let ledger = InMemoryLedger::new();
        let hold_store = InMemoryHoldStore::new();
        let clock = Arc::new(ManualClock::starting_at(test_clock().now()));
        let coordinator = ReservationCoordinator::new(
            Arc::new(hold_store.clone()),
            Arc::new(ledger.clone()),
            Arc::new(InMemoryReservationRepository::new()),
            clock.clone(),
            ReservationConfig::builder()
                .hold_ttl(Duration::from_secs(30))
                .sweep_interval(Duration::from_millis(10))
                .sweep_batch_size(batch)
                .build(),
        );
        let pool = PoolKey::new(EventId::new(), TicketType::parse("ga").unwrap());
        coordinator.provision(&pool, total).await.unwrap();
        Harness {
            coordinator,
            ledger,
            hold_store,
            clock,
            pool,
        }
    }

    async fn reserve(h: &Harness, session: &str) {
        let outcome = h
            .coordinator
            .reserve(ReserveRequest {
                pool: h.pool.clone(),
                quantity: 1,
                session_id: SessionId::new(session),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Reserved { .. }));
    }

    #[tokio::test]
    async fn test_sweep_expires_everything_due_across_batches() {
        let h = harness(10, 2).await;
        for i in 0..5 {
            reserve(&h, &format!("s{i}")).await;
        }
        h.clock.advance(chrono::Duration::seconds(31));

        let report = ExpirySweeper::new(h.coordinator.clone())
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(report.expired, 5);
        assert_eq!(report.failed, 0);
        assert_eq!(report.pools_reconciled, 1);
        let counts = h.ledger.counts(&h.pool).await.unwrap().unwrap();
        assert_eq!(counts.reserved, 0);
        assert_eq!(h.hold_store.capacity(&h.pool).unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_sweep_leaves_live_reservations_alone() {
        let h = harness(3, 10).await;
        reserve(&h, "s1").await;

        let report = ExpirySweeper::new(h.coordinator.clone())
            .sweep_once()
            .await
            .unwrap();
        assert_eq!(report.expired, 0);
        assert_eq!(h.ledger.counts(&h.pool).await.unwrap().unwrap().reserved, 1);
        assert_eq!(h.hold_store.reserved(&h.pool, h.clock.now()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lapsed_hold_capacity_is_withheld_until_expired() {
        let h = harness(2, 10).await;
        reserve(&h, "s1").await;
        reserve(&h, "s2").await;
        h.clock.advance(chrono::Duration::seconds(31));

        // Reconciling before expiry must not reopen the lapsed units.
        h.coordinator.reconcile().await.unwrap();
        assert_eq!(h.hold_store.capacity(&h.pool).unwrap(), Some(0));

        ExpirySweeper::new(h.coordinator.clone())
            .sweep_once()
            .await
            .unwrap();
        assert_eq!(h.hold_store.capacity(&h.pool).unwrap(), Some(2));
        assert!(h.coordinator.due_for_expiry(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(1, 10).await;
        let (tx, rx) = broadcast::channel(1);
        let handle = ExpirySweeper::new(h.coordinator.clone()).spawn(rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

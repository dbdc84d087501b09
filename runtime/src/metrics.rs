//! Prometheus metrics for the reservation core.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `boxoffice_reservations_total{outcome}` - reserve calls by outcome
//!   (`reserved`, `replayed`, `sold_out`, `rejected`, `error`)
//! - `boxoffice_settlements_total{status}` - reservations leaving `active`
//! - `boxoffice_tickets_sold_total` - units moved to sold
//! - `boxoffice_payments_total{status}` - intents by status
//!   (`created`, `replayed`, `succeeded`, `failed`)
//! - `boxoffice_payment_submissions_failed_total` - inconclusive submissions
//! - `boxoffice_refunds_required_total` - captured payments whose reservation
//!   could not be confirmed
//! - `boxoffice_compensations_total{step}` - compensation actions taken
//! - `boxoffice_compensation_failures_total{step}` - compensations that failed
//! - `boxoffice_sweeper_expired_total`, `boxoffice_sweeper_errors_total`
//! - `boxoffice_events_halted_total`
//!
//! ## Gauges
//! - `boxoffice_sweeper_last_pass_pools` - pools reconciled by the last pass
//!
//! ## Histograms
//! - `boxoffice_reserve_duration_seconds`
//! - `boxoffice_sweeper_pass_duration_seconds`

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Prometheus exporter serving `/metrics` on its own listener.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsServer")
            .field("addr", &self.addr)
            .field("started", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

impl MetricsServer {
    /// Create a metrics server that will listen on `addr`
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP exporter.
    ///
    /// Must be called from within a tokio runtime, once per process.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built (bad bucket
    /// configuration, address in use) or a recorder is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = builder()?
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        metrics::set_global_recorder(recorder)
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();

        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        self.handle = Some(handle);
        Ok(())
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))
}

/// Register descriptions for every metric this crate emits.
pub fn register_metrics() {
    describe_counter!(
        "boxoffice_reservations_total",
        "Reserve calls by outcome (reserved, replayed, sold_out, rejected, error)"
    );
    describe_histogram!(
        "boxoffice_reserve_duration_seconds",
        "Time taken to serve a reserve call"
    );
    describe_counter!(
        "boxoffice_settlements_total",
        "Reservations leaving active, by final status"
    );
    describe_counter!("boxoffice_tickets_sold_total", "Units moved to sold");

    describe_counter!("boxoffice_payments_total", "Payment intents by status");
    describe_counter!(
        "boxoffice_payment_submissions_failed_total",
        "Provider submissions that ended inconclusive"
    );
    describe_counter!(
        "boxoffice_refunds_required_total",
        "Captured payments whose reservation could not be confirmed"
    );

    describe_counter!(
        "boxoffice_compensations_total",
        "Compensating actions taken after a partial failure, by step"
    );
    describe_counter!(
        "boxoffice_compensation_failures_total",
        "Compensating actions that failed, by step"
    );
    describe_counter!("boxoffice_events_halted_total", "Events halted on invariant violation");

    describe_counter!(
        "boxoffice_sweeper_expired_total",
        "Reservations expired by the sweeper"
    );
    describe_counter!("boxoffice_sweeper_errors_total", "Sweeper failures");
    describe_gauge!(
        "boxoffice_sweeper_last_pass_pools",
        "Pools reconciled by the last sweeper pass"
    );
    describe_histogram!(
        "boxoffice_sweeper_pass_duration_seconds",
        "Time taken by one sweeper pass"
    );
}

/// Reservation metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record a reserve call.
    pub fn record_reserve(outcome: &'static str, duration: Duration) {
        counter!("boxoffice_reservations_total", "outcome" => outcome).increment(1);
        histogram!("boxoffice_reserve_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a reservation reaching a terminal status.
    pub fn record_settled(status: &'static str) {
        counter!("boxoffice_settlements_total", "status" => status).increment(1);
    }

    /// Record units moved to sold.
    pub fn record_sold(quantity: u32) {
        counter!("boxoffice_tickets_sold_total").increment(u64::from(quantity));
    }

    /// Record a compensating action.
    pub fn record_compensation(step: &'static str) {
        counter!("boxoffice_compensations_total", "step" => step).increment(1);
    }

    /// Record a failed compensating action.
    pub fn record_compensation_failure(step: &'static str) {
        counter!("boxoffice_compensation_failures_total", "step" => step).increment(1);
    }

    /// Record an event halted on invariant violation.
    pub fn record_halt() {
        counter!("boxoffice_events_halted_total").increment(1);
    }
}

/// Payment metrics recorder.
pub struct PaymentMetrics;

impl PaymentMetrics {
    /// Record an intent status change (or replay).
    pub fn record_status(status: &'static str) {
        counter!("boxoffice_payments_total", "status" => status).increment(1);
    }

    /// Record an inconclusive provider submission.
    pub fn record_submission_failed() {
        counter!("boxoffice_payment_submissions_failed_total").increment(1);
    }

    /// Record a captured payment that needs a refund.
    pub fn record_refund_required() {
        counter!("boxoffice_refunds_required_total").increment(1);
    }
}

/// Sweeper metrics recorder.
pub struct SweeperMetrics;

impl SweeperMetrics {
    /// Record a completed pass.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_pass(expired: usize, pools: usize, duration: Duration) {
        counter!("boxoffice_sweeper_expired_total").increment(expired as u64);
        gauge!("boxoffice_sweeper_last_pass_pools").set(pools as f64);
        histogram!("boxoffice_sweeper_pass_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a sweeper failure.
    pub fn record_error() {
        counter!("boxoffice_sweeper_errors_total").increment(1);
    }
}

//! Prometheus metrics for the transaction engine.
//!
//! Covered:
//! - booking transitions (applied, rejected by kind, latency)
//! - wallet hold credits and releases
//! - inventory consumption, restocks and adjustments
//! - release scheduler sweeps
//! - retries
//!
//! # Example
//!
//! ```rust,no_run
//! use servicehub_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Scrape http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use crate::scheduler::SweepReport;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use servicehub_core::error::EngineError;
use servicehub_core::state::BookingState;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the global recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
///
/// Must be started from within a tokio runtime: the HTTP listener runs as a
/// spawned task.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server that will listen on `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and start serving `/metrics`.
    ///
    /// A second call in the same process (common in tests) logs a warning
    /// and leaves the first recorder in place.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be configured.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already installed, skipping");
            return Ok(());
        }

        let addr = self.addr;
        tokio::spawn(async move {
            if let Err(e) = exporter.await {
                tracing::error!(%addr, error = ?e, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        Ok(())
    }

    /// The recorder handle, if this server installed it.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "booking_transitions_total",
        "Booking transitions committed, labelled by canonical target state"
    );
    describe_counter!(
        "booking_transitions_rejected_total",
        "Booking transitions rolled back, labelled by error kind"
    );
    describe_histogram!(
        "booking_transition_duration_seconds",
        "Time from unit-of-work open to commit or rollback"
    );
    describe_counter!(
        "booking_low_stock_alerts_total",
        "Low-stock alerts emitted after a committed transition"
    );

    describe_counter!("wallet_hold_credits_total", "Hold credits recorded");
    describe_counter!(
        "wallet_hold_credits_duplicate_total",
        "Hold credits skipped because the booking was already credited"
    );
    describe_counter!("wallet_releases_total", "Hold credits released to available");

    describe_counter!("inventory_consumptions_total", "Consumption entries recorded");
    describe_counter!(
        "inventory_consumptions_duplicate_total",
        "Consumption lines skipped because already recorded for the booking"
    );
    describe_counter!(
        "inventory_insufficient_stock_total",
        "Consumption lines rejected for insufficient stock"
    );
    describe_counter!("inventory_restocks_total", "Restock entries recorded");
    describe_counter!("inventory_adjustments_total", "Adjustment entries recorded");

    describe_counter!("scheduler_sweeps_total", "Release sweeps run");
    describe_counter!("scheduler_releases_total", "Entries released by sweeps");
    describe_counter!("scheduler_release_failures_total", "Entries that failed to release");
    describe_gauge!("scheduler_last_sweep_due", "Due entries seen by the last sweep");
    describe_histogram!("scheduler_sweep_duration_seconds", "Time taken by one sweep");

    describe_counter!("engine_retries_total", "Retries after a retryable error");
    describe_counter!(
        "engine_retries_exhausted_total",
        "Operations that failed after the last retry"
    );
}

/// Transition coordinator metrics recorder.
pub struct TransitionMetrics;

impl TransitionMetrics {
    /// Record a committed transition.
    pub fn record_applied(to: BookingState, duration: Duration) {
        counter!("booking_transitions_total", "to" => to.as_str()).increment(1);
        histogram!("booking_transition_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a rolled-back transition.
    pub fn record_rejected(error: &EngineError, duration: Duration) {
        counter!("booking_transitions_rejected_total", "kind" => error_kind(error)).increment(1);
        histogram!("booking_transition_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record low-stock alerts emitted after commit.
    pub fn record_alerts(count: usize) {
        counter!("booking_low_stock_alerts_total").increment(count as u64);
    }
}

/// Release scheduler metrics recorder.
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    /// Record the result of one sweep.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_sweep(report: &SweepReport, duration: Duration) {
        counter!("scheduler_sweeps_total").increment(1);
        counter!("scheduler_releases_total").increment(report.released as u64);
        counter!("scheduler_release_failures_total").increment(report.failed as u64);
        gauge!("scheduler_last_sweep_due").set(report.due() as f64);
        histogram!("scheduler_sweep_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Low-cardinality label for an error.
#[must_use]
pub const fn error_kind(error: &EngineError) -> &'static str {
    match error {
        EngineError::NotFound { .. } => "not_found",
        EngineError::InvalidTransition { .. } => "invalid_transition",
        EngineError::PreconditionFailed(_) => "precondition_failed",
        EngineError::InsufficientStock { .. } => "insufficient_stock",
        EngineError::InvalidAmount(_) => "invalid_amount",
        EngineError::InvalidQuantity(_) => "invalid_quantity",
        EngineError::LedgerInvariant(_) => "ledger_invariant",
        EngineError::Configuration(_) => "configuration",
        EngineError::LockTimeout(_) => "lock_timeout",
        EngineError::Transient(_) => "transient",
        EngineError::Storage(_) => "storage",
        EngineError::Collaborator(_) => "collaborator",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn server_starts_without_handle() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn start_records_and_renders() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        TransitionMetrics::record_applied(BookingState::Completed, Duration::from_millis(12));
        TransitionMetrics::record_rejected(
            &EngineError::PreconditionFailed("otp".into()),
            Duration::from_millis(3),
        );

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("booking_transitions_total"));
            assert!(rendered.contains("precondition_failed"));
        }
    }

    #[test]
    fn error_kinds_are_distinct_for_retryable_errors() {
        assert_eq!(error_kind(&EngineError::LockTimeout(String::new())), "lock_timeout");
        assert_eq!(error_kind(&EngineError::Transient(String::new())), "transient");
    }
}

//! Transition coordinator: the only code path that changes a booking's state.
//!
//! One call is one unit of work:
//!
//! 1. lock the booking row
//! 2. normalize its persisted status to a canonical state
//! 3. evaluate the gates for `from -> target` (OTP, payment)
//! 4. check the edge against the state graph
//! 5. write the new status (canonical or legacy, per persistence mode) and
//!    the timestamp the target implies
//! 6. append an audit record
//! 7. on completion: credit the partner's hold, consume inventory, invoice
//! 8. commit, then emit low-stock alerts
//!
//! Any error before the commit rolls everything back, so the booking, the
//! wallet and the inventory are untouched by a failed transition.

use crate::inventory::InventoryLedger;
use crate::metrics::TransitionMetrics;
use crate::retry::{RetryPolicy, retry_retryable};
use crate::wallet::WalletLedger;
use chrono::{DateTime, Utc};
use serde_json::json;
use servicehub_core::config::{CommissionPolicy, ConfigSource};
use servicehub_core::environment::{Clock, OtpVerifier, PaymentVerifier, StockAlertSink};
use servicehub_core::error::{EngineError, EngineResult};
use servicehub_core::gates::{self, Gate};
use servicehub_core::legacy::{self, PersistenceMode};
use servicehub_core::metadata::TransitionMetadata;
use servicehub_core::state::{self, BookingState};
use servicehub_core::store::{LedgerStore, UnitOfWork};
use servicehub_core::types::{ActorId, AuditId, AuditRecord, Booking, BookingId, LowStockAlert};
use std::sync::Arc;
use std::time::Instant;

/// Audit action written for every committed transition.
pub const TRANSITION_ACTION: &str = "booking.transition";

/// Collaborators the coordinator depends on.
#[derive(Clone)]
pub struct CoordinatorEnvironment {
    /// Ledger persistence
    pub store: Arc<dyn LedgerStore>,
    /// OTP handshake lookups
    pub otp: Arc<dyn OtpVerifier>,
    /// Payment verification and invoicing
    pub payments: Arc<dyn PaymentVerifier>,
    /// Commission and hold-window tunables
    pub config: Arc<dyn ConfigSource>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Receiver of post-commit low-stock alerts
    pub alerts: Arc<dyn StockAlertSink>,
    /// Which status vocabulary to write
    pub persistence_mode: PersistenceMode,
}

/// Work done inside the unit of work, handed back for post-commit steps.
struct Applied {
    booking: Booking,
    from: BookingState,
    alerts: Vec<LowStockAlert>,
}

/// Sole mutating entry point for booking state.
#[derive(Clone)]
pub struct TransitionCoordinator {
    env: CoordinatorEnvironment,
    wallet: WalletLedger,
    inventory: InventoryLedger,
    retry: RetryPolicy,
}

impl TransitionCoordinator {
    /// Creates a coordinator with the default retry policy.
    #[must_use]
    pub fn new(env: CoordinatorEnvironment) -> Self {
        let wallet = WalletLedger::new(Arc::clone(&env.clock));
        let inventory = InventoryLedger::new(Arc::clone(&env.clock));
        Self {
            env,
            wallet,
            inventory,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the policy used by [`Self::transition_with_retry`].
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The environment this coordinator runs against.
    #[must_use]
    pub const fn environment(&self) -> &CoordinatorEnvironment {
        &self.env
    }

    /// Move a booking to `target`.
    ///
    /// Returns the booking as committed.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the booking does not exist
    /// - [`EngineError::PreconditionFailed`] if a gate fails or a required partner is missing
    /// - [`EngineError::InvalidTransition`] if `target` is not reachable from the current state
    /// - [`EngineError::InsufficientStock`] and other ledger errors on completion
    /// - [`EngineError::LockTimeout`] / [`EngineError::Transient`] under contention (retryable)
    #[tracing::instrument(
        skip(self, metadata),
        fields(%booking_id, %target, %actor)
    )]
    pub async fn transition(
        &self,
        booking_id: BookingId,
        target: BookingState,
        actor: &ActorId,
        metadata: TransitionMetadata,
    ) -> EngineResult<Booking> {
        let started = Instant::now();
        let result = self.run(booking_id, target, actor, &metadata).await;

        match result {
            Ok(applied) => {
                TransitionMetrics::record_applied(target, started.elapsed());
                tracing::info!(
                    from = %applied.from,
                    to = %target,
                    status = %applied.booking.status,
                    "Booking transition committed"
                );
                self.emit_alerts(&applied.alerts);
                Ok(applied.booking)
            }
            Err(error) => {
                TransitionMetrics::record_rejected(&error, started.elapsed());
                if error.is_client_error() {
                    tracing::info!(%error, "Booking transition rejected");
                } else {
                    tracing::warn!(%error, "Booking transition failed");
                }
                Err(error)
            }
        }
    }

    /// [`Self::transition`] retried with backoff on lock timeouts and
    /// transient storage errors. Business errors are returned immediately.
    ///
    /// # Errors
    ///
    /// The last error, once retries are exhausted or a non-retryable error occurs.
    pub async fn transition_with_retry(
        &self,
        booking_id: BookingId,
        target: BookingState,
        actor: &ActorId,
        metadata: TransitionMetadata,
    ) -> EngineResult<Booking> {
        retry_retryable(&self.retry, || {
            self.transition(booking_id, target, actor, metadata.clone())
        })
        .await
    }

    async fn run(
        &self,
        booking_id: BookingId,
        target: BookingState,
        actor: &ActorId,
        metadata: &TransitionMetadata,
    ) -> EngineResult<Applied> {
        let mut uow = self.env.store.begin().await?;

        match self.apply(uow.as_mut(), booking_id, target, actor, metadata).await {
            Ok(applied) => {
                uow.commit().await?;
                Ok(applied)
            }
            Err(error) => {
                if let Err(rollback_error) = uow.rollback().await {
                    tracing::error!(%rollback_error, "Rollback failed");
                }
                Err(error)
            }
        }
    }

    async fn apply(
        &self,
        uow: &mut dyn UnitOfWork,
        booking_id: BookingId,
        target: BookingState,
        actor: &ActorId,
        metadata: &TransitionMetadata,
    ) -> EngineResult<Applied> {
        let mut booking = uow
            .lock_booking(booking_id)
            .await?
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;

        let from = legacy::to_canonical(&booking.status);
        let persisted_from = booking.status.clone();

        self.check_gates(&booking, from, target).await?;

        if !state::is_legal(from, target) {
            return Err(EngineError::InvalidTransition { from, to: target });
        }

        let now = self.env.clock.now();
        if target == BookingState::Assigned {
            let partner_id = metadata
                .partner_assignment()
                .or(booking.partner_id)
                .ok_or_else(|| {
                    EngineError::PreconditionFailed(format!(
                        "booking {booking_id} cannot be assigned without a partner"
                    ))
                })?;
            booking.partner_id = Some(partner_id);
        }
        if target.requires_partner() && booking.partner_id.is_none() {
            return Err(EngineError::PreconditionFailed(format!(
                "booking {booking_id} has no assigned partner"
            )));
        }

        booking.status = self.env.persistence_mode.encode(target).to_string();
        stamp(&mut booking, target, now);
        uow.save_booking(&booking).await?;

        uow.append_audit(&AuditRecord {
            id: AuditId::new(),
            entity_type: "booking".to_string(),
            entity_id: booking_id.to_string(),
            action: TRANSITION_ACTION.to_string(),
            from_state: Some(from.as_str().to_string()),
            to_state: Some(target.as_str().to_string()),
            actor: actor.clone(),
            metadata: json!({
                "persisted_from": persisted_from,
                "persisted_to": booking.status,
                "request": metadata.to_json(),
            }),
            created_at: now,
        })
        .await?;

        let alerts = if target == BookingState::Completed {
            self.complete(uow, &booking, actor, metadata, now).await?
        } else {
            Vec::new()
        };

        Ok(Applied {
            booking,
            from,
            alerts,
        })
    }

    async fn check_gates(
        &self,
        booking: &Booking,
        from: BookingState,
        target: BookingState,
    ) -> EngineResult<()> {
        for gate in gates::gates_for(from, target) {
            let passed = match gate {
                Gate::Otp => self.env.otp.has_valid_handshake(booking.id).await?,
                Gate::Payment => self.env.payments.is_final_payment_verified(booking.id).await?,
            };
            if !passed {
                tracing::debug!(%gate, "Gate not satisfied");
                return Err(EngineError::PreconditionFailed(match gate {
                    Gate::Otp => format!("no verified OTP handshake for booking {}", booking.id),
                    Gate::Payment => {
                        format!("final payment not verified for booking {}", booking.id)
                    }
                }));
            }
        }
        Ok(())
    }

    /// Completion side effects, all inside the caller's unit of work.
    async fn complete(
        &self,
        uow: &mut dyn UnitOfWork,
        booking: &Booking,
        actor: &ActorId,
        metadata: &TransitionMetadata,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<LowStockAlert>> {
        let partner_id = booking.partner_id.ok_or_else(|| {
            EngineError::PreconditionFailed(format!(
                "booking {} has no assigned partner",
                booking.id
            ))
        })?;

        let policy = CommissionPolicy::resolve(self.env.config.as_ref())?;
        let credit = policy.partner_credit();
        if credit.is_zero() {
            tracing::info!("Partner share is zero, no hold credit recorded");
        } else {
            self.wallet
                .credit_hold(uow, partner_id, booking.id, credit, now + policy.hold_window())
                .await?;
        }

        let mut alerts = Vec::new();
        if let Some(lines) = metadata.inventory_lines().filter(|lines| !lines.is_empty()) {
            let report = self.inventory.deduct(uow, booking.id, &lines, actor).await?;
            alerts = report.alerts;
        }

        // Last step before commit so a failed ledger write never leaves an invoice behind.
        self.env
            .payments
            .generate_invoice(booking.id, booking.customer_id, partner_id)
            .await?;

        Ok(alerts)
    }

    fn emit_alerts(&self, alerts: &[LowStockAlert]) {
        if alerts.is_empty() {
            return;
        }
        TransitionMetrics::record_alerts(alerts.len());
        for alert in alerts {
            self.env.alerts.low_stock(alert);
        }
    }
}

fn stamp(booking: &mut Booking, target: BookingState, now: DateTime<Utc>) {
    match target {
        BookingState::Assigned => booking.assigned_at = Some(now),
        BookingState::InProgress => booking.started_at = Some(now),
        BookingState::Completed => booking.completed_at = Some(now),
        BookingState::Created
        | BookingState::Accepted
        | BookingState::Cancelled
        | BookingState::Disputed => {}
    }
    booking.updated_at = now;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use servicehub_core::config::StaticConfig;
    use servicehub_testing::{
        InMemoryStore, ManualClock, MockOtp, MockPayments, RecordingStockAlerts, booking_in_state,
        test_clock,
    };

    struct Harness {
        store: InMemoryStore,
        otp: Arc<MockOtp>,
        payments: Arc<MockPayments>,
        clock: Arc<ManualClock>,
        coordinator: TransitionCoordinator,
    }

    fn harness(mode: PersistenceMode) -> Harness {
        let store = InMemoryStore::new();
        let otp = Arc::new(MockOtp::new());
        let payments = Arc::new(MockPayments::new());
        let clock = Arc::new(test_clock());
        let coordinator = TransitionCoordinator::new(CoordinatorEnvironment {
            store: Arc::new(store.clone()),
            otp: otp.clone(),
            payments: payments.clone(),
            config: Arc::new(StaticConfig::new()),
            clock: clock.clone(),
            alerts: Arc::new(RecordingStockAlerts::new()),
            persistence_mode: mode,
        });
        Harness {
            store,
            otp,
            payments,
            clock,
            coordinator,
        }
    }

    fn system() -> ActorId {
        ActorId::system()
    }

    #[tokio::test]
    async fn assignment_takes_partner_from_metadata() {
        let h = harness(PersistenceMode::Canonical);
        let booking = booking_in_state(BookingState::Created, None, h.clock.now());
        h.store.insert_booking(&booking).await.unwrap();
        let partner = servicehub_core::types::PartnerId::new();

        let updated = h
            .coordinator
            .transition(
                booking.id,
                BookingState::Assigned,
                &system(),
                TransitionMetadata::new().with_partner(partner),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, "ASSIGNED");
        assert_eq!(updated.partner_id, Some(partner));
        assert_eq!(updated.assigned_at, Some(h.clock.now()));
    }

    #[tokio::test]
    async fn assignment_without_partner_is_rejected() {
        let h = harness(PersistenceMode::Canonical);
        let booking = booking_in_state(BookingState::Created, None, h.clock.now());
        h.store.insert_booking(&booking).await.unwrap();

        let err = h
            .coordinator
            .transition(booking.id, BookingState::Assigned, &system(), TransitionMetadata::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::PreconditionFailed(_)));
        assert_eq!(h.store.booking(booking.id).await.unwrap().unwrap(), booking);
    }

    #[tokio::test]
    async fn legacy_mode_writes_legacy_status() {
        let h = harness(PersistenceMode::Legacy);
        let mut booking = booking_in_state(BookingState::Assigned, None, h.clock.now());
        booking.status = "confirmed".into();
        h.store.insert_booking(&booking).await.unwrap();

        let updated = h
            .coordinator
            .transition(booking.id, BookingState::Accepted, &system(), TransitionMetadata::new())
            .await
            .unwrap();
        assert_eq!(updated.status, "accepted");

        let audit = h.store.audit_records("booking", &booking.id.to_string()).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].from_state.as_deref(), Some("ASSIGNED"));
        assert_eq!(audit[0].to_state.as_deref(), Some("ACCEPTED"));
        assert_eq!(audit[0].metadata["persisted_from"], "confirmed");
        assert_eq!(audit[0].metadata["persisted_to"], "accepted");
    }

    #[tokio::test]
    async fn illegal_edge_is_invalid_transition() {
        let h = harness(PersistenceMode::Canonical);
        let booking = booking_in_state(BookingState::Created, None, h.clock.now());
        h.store.insert_booking(&booking).await.unwrap();

        let err = h
            .coordinator
            .transition(booking.id, BookingState::Accepted, &system(), TransitionMetadata::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            EngineError::InvalidTransition {
                from: BookingState::Created,
                to: BookingState::Accepted,
            }
        );
    }

    #[tokio::test]
    async fn unknown_booking_is_not_found() {
        let h = harness(PersistenceMode::Canonical);
        let err = h
            .coordinator
            .transition(
                BookingId::new(),
                BookingState::Cancelled,
                &system(),
                TransitionMetadata::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "booking", .. }));
    }

    #[tokio::test]
    async fn otp_outage_rolls_back() {
        let h = harness(PersistenceMode::Canonical);
        let booking = booking_in_state(BookingState::Accepted, None, h.clock.now());
        h.store.insert_booking(&booking).await.unwrap();
        h.otp.set_unavailable(true);

        let err = h
            .coordinator
            .transition(booking.id, BookingState::InProgress, &system(), TransitionMetadata::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Collaborator(_)));
        assert_eq!(h.store.booking(booking.id).await.unwrap().unwrap(), booking);
    }

    #[tokio::test]
    async fn failed_invoice_undoes_completion() {
        let h = harness(PersistenceMode::Canonical);
        let booking = booking_in_state(BookingState::InProgress, None, h.clock.now());
        let partner = booking.partner_id.unwrap();
        h.store.insert_booking(&booking).await.unwrap();
        h.payments.verify(booking.id);
        h.payments.set_fail_invoicing(true);

        let err = h
            .coordinator
            .transition(booking.id, BookingState::Completed, &system(), TransitionMetadata::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Collaborator(_)));
        assert_eq!(h.store.booking(booking.id).await.unwrap().unwrap(), booking);
        assert!(h.store.wallet(partner).await.unwrap().is_none());
        assert!(h.store.all_audit_records().unwrap().is_empty());
    }
}

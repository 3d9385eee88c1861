//! # ServiceHub Testing
//!
//! Testing utilities for the booking transaction engine.
//!
//! This crate provides:
//! - [`InMemoryStore`]: a `LedgerStore` with real row locks and atomic commits
//! - Mock collaborators (OTP, payments, stock alerts) with switchable answers
//! - A manually advanced clock
//! - Fixture builders for bookings and inventory items
//!
//! ## Example
//!
//! ```ignore
//! use servicehub_testing::{InMemoryStore, MockOtp, test_clock};
//!
//! #[tokio::test]
//! async fn starts_after_handshake() {
//!     let store = InMemoryStore::new();
//!     let otp = MockOtp::new();
//!     otp.verify(booking.id);
//!     // build a coordinator over `store` and `otp` ...
//! }
//! ```

use chrono::{DateTime, Utc};
use servicehub_core::environment::Clock;

pub mod memory_store;

pub use memory_store::{InMemoryStore, InMemoryUnitOfWork};

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use async_trait::async_trait;
    use servicehub_core::environment::{OtpVerifier, PaymentVerifier, StockAlertSink};
    use servicehub_core::error::{EngineError, EngineResult};
    use servicehub_core::types::{BookingId, CustomerId, LowStockAlert, PartnerId};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Clock that only moves when told to.
    ///
    /// # Example
    ///
    /// ```
    /// use servicehub_testing::mocks::ManualClock;
    /// use servicehub_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::days(7));
    /// assert_eq!(clock.now() - before, Duration::days(7));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut time) = self.time.lock() {
                *time += by;
            }
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            if let Ok(mut time) = self.time.lock() {
                *time = to;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .lock()
                .map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a clock for tests frozen at 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn test_clock() -> ManualClock {
        ManualClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(1_735_689_600))
    }

    /// OTP collaborator answering from a set of verified bookings.
    #[derive(Debug, Default)]
    pub struct MockOtp {
        verified: Mutex<HashSet<BookingId>>,
        unavailable: AtomicBool,
    }

    impl MockOtp {
        /// No booking has a handshake yet
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Record a verified handshake for a booking
        pub fn verify(&self, booking_id: BookingId) {
            if let Ok(mut verified) = self.verified.lock() {
                verified.insert(booking_id);
            }
        }

        /// Make every call fail as if the service were down
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl OtpVerifier for MockOtp {
        async fn has_valid_handshake(&self, booking_id: BookingId) -> EngineResult<bool> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(EngineError::Collaborator("otp service unavailable".into()));
            }
            Ok(self
                .verified
                .lock()
                .is_ok_and(|verified| verified.contains(&booking_id)))
        }
    }

    /// Invoice generated through [`MockPayments`].
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct IssuedInvoice {
        /// Booking invoiced
        pub booking_id: BookingId,
        /// Customer billed
        pub customer_id: CustomerId,
        /// Partner paid
        pub partner_id: PartnerId,
    }

    /// Payment collaborator answering from a set of verified bookings.
    #[derive(Debug, Default)]
    pub struct MockPayments {
        verified: Mutex<HashSet<BookingId>>,
        invoices: Mutex<Vec<IssuedInvoice>>,
        fail_invoicing: AtomicBool,
    }

    impl MockPayments {
        /// No payment verified yet
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Mark the final payment of a booking as verified
        pub fn verify(&self, booking_id: BookingId) {
            if let Ok(mut verified) = self.verified.lock() {
                verified.insert(booking_id);
            }
        }

        /// Make invoice generation fail
        pub fn set_fail_invoicing(&self, fail: bool) {
            self.fail_invoicing.store(fail, Ordering::SeqCst);
        }

        /// Invoices generated so far
        #[must_use]
        pub fn invoices(&self) -> Vec<IssuedInvoice> {
            self.invoices
                .lock()
                .map(|invoices| invoices.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl PaymentVerifier for MockPayments {
        async fn is_final_payment_verified(&self, booking_id: BookingId) -> EngineResult<bool> {
            Ok(self
                .verified
                .lock()
                .is_ok_and(|verified| verified.contains(&booking_id)))
        }

        async fn generate_invoice(
            &self,
            booking_id: BookingId,
            customer_id: CustomerId,
            partner_id: PartnerId,
        ) -> EngineResult<()> {
            if self.fail_invoicing.load(Ordering::SeqCst) {
                return Err(EngineError::Collaborator("invoice service unavailable".into()));
            }
            if let Ok(mut invoices) = self.invoices.lock() {
                invoices.push(IssuedInvoice {
                    booking_id,
                    customer_id,
                    partner_id,
                });
            }
            Ok(())
        }
    }

    /// Stock alert sink that records every alert.
    #[derive(Debug, Default)]
    pub struct RecordingStockAlerts {
        alerts: Mutex<Vec<LowStockAlert>>,
    }

    impl RecordingStockAlerts {
        /// Empty recorder
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Alerts received so far
        #[must_use]
        pub fn alerts(&self) -> Vec<LowStockAlert> {
            self.alerts
                .lock()
                .map(|alerts| alerts.clone())
                .unwrap_or_default()
        }
    }

    impl StockAlertSink for RecordingStockAlerts {
        fn low_stock(&self, alert: &LowStockAlert) {
            if let Ok(mut alerts) = self.alerts.lock() {
                alerts.push(alert.clone());
            }
        }
    }
}

/// Fixture builders.
pub mod helpers {
    use super::{DateTime, Utc};
    use servicehub_core::state::BookingState;
    use servicehub_core::types::{Booking, CustomerId, InventoryItem, ItemCode, Money, PartnerId};

    /// A booking already sitting in `state`, with timestamps consistent with it.
    ///
    /// States that require a partner get one (the given one, or a fresh id).
    #[must_use]
    pub fn booking_in_state(
        state: BookingState,
        partner_id: Option<PartnerId>,
        now: DateTime<Utc>,
    ) -> Booking {
        let mut booking = Booking::new(
            format!("BK-{}", &CustomerId::new().to_string()[..8]),
            CustomerId::new(),
            Money::from_major(1_000),
            Money::from_major(250),
            now,
        );
        booking.status = state.as_str().to_string();
        if state.requires_partner() || partner_id.is_some() {
            booking.partner_id = Some(partner_id.unwrap_or_default());
            booking.assigned_at = Some(now);
        }
        if matches!(state, BookingState::InProgress | BookingState::Completed) {
            booking.started_at = Some(now);
        }
        if state == BookingState::Completed {
            booking.completed_at = Some(now);
        }
        booking
    }

    /// An inventory item with the given stock levels.
    #[must_use]
    pub fn item(
        code: &str,
        current_stock: u32,
        min_stock: u32,
        unit_cost: Money,
        now: DateTime<Utc>,
    ) -> InventoryItem {
        InventoryItem {
            code: ItemCode::new(code),
            name: code.to_lowercase(),
            current_stock,
            min_stock,
            unit_cost,
            updated_at: now,
        }
    }

    /// Install a test-friendly tracing subscriber once per process.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use helpers::{booking_in_state, init_tracing, item};
pub use mocks::{
    IssuedInvoice, ManualClock, MockOtp, MockPayments, RecordingStockAlerts, test_clock,
};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use servicehub_core::state::BookingState;

    #[test]
    fn test_clock_is_new_year_2025() {
        let clock = test_clock();
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn in_progress_fixture_has_partner_and_start() {
        let booking = booking_in_state(BookingState::InProgress, None, test_clock().now());
        assert!(booking.partner_id.is_some());
        assert!(booking.started_at.is_some());
        assert_eq!(booking.state(), BookingState::InProgress);
    }

    #[test]
    fn mock_otp_answers_per_booking() {
        use servicehub_core::environment::OtpVerifier;
        use servicehub_core::types::BookingId;

        let otp = MockOtp::new();
        let verified = BookingId::new();
        otp.verify(verified);

        assert!(tokio_test::block_on(otp.has_valid_handshake(verified)).unwrap());
        assert!(!tokio_test::block_on(otp.has_valid_handshake(BookingId::new())).unwrap());

        otp.set_unavailable(true);
        assert!(tokio_test::block_on(otp.has_valid_handshake(verified)).is_err());
    }

    #[test]
    fn mock_payments_records_invoices() {
        use servicehub_core::environment::PaymentVerifier;
        use servicehub_core::types::{BookingId, CustomerId, PartnerId};

        let payments = MockPayments::new();
        let booking = BookingId::new();
        let invoice = payments.generate_invoice(booking, CustomerId::new(), PartnerId::new());
        tokio_test::block_on(invoice).unwrap();
        assert_eq!(payments.invoices().len(), 1);
        assert_eq!(payments.invoices()[0].booking_id, booking);

        payments.set_fail_invoicing(true);
        let invoice = payments.generate_invoice(booking, CustomerId::new(), PartnerId::new());
        assert!(tokio_test::block_on(invoice).is_err());
    }
}

//! Environment module - injected collaborators.
//!
//! Everything the engine consults outside its own ledger lives behind a trait
//! so production, test and development implementations can be swapped freely.

use crate::error::EngineResult;
use crate::types::{BookingId, CustomerId, LowStockAlert, PartnerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// OTP collaborator. Only the pass/fail contract matters to the engine.
#[async_trait]
pub trait OtpVerifier: Send + Sync {
    /// Whether a verified start-of-work handshake exists for the booking.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::Collaborator`] if the OTP service is unreachable.
    async fn has_valid_handshake(&self, booking_id: BookingId) -> EngineResult<bool>;
}

/// Payment collaborator.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    /// Whether the final payment for the booking has been verified.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::Collaborator`] if the payment service is unreachable.
    async fn is_final_payment_verified(&self, booking_id: BookingId) -> EngineResult<bool>;

    /// Generate the invoice for a completed booking.
    ///
    /// Called once per successful completion, before the transition commits.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::Collaborator`] if invoicing fails; the
    /// transition is then rolled back.
    async fn generate_invoice(
        &self,
        booking_id: BookingId,
        customer_id: CustomerId,
        partner_id: PartnerId,
    ) -> EngineResult<()>;
}

/// Receiver of non-blocking low-stock notifications.
pub trait StockAlertSink: Send + Sync {
    /// Deliver an alert. Must not block and must not fail the caller.
    fn low_stock(&self, alert: &LowStockAlert);
}

/// Alert sink that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingStockAlerts;

impl StockAlertSink for LoggingStockAlerts {
    fn low_stock(&self, alert: &LowStockAlert) {
        tracing::warn!(
            item = %alert.item_code,
            current_stock = alert.current_stock,
            min_stock = alert.min_stock,
            booking_id = ?alert.booking_id,
            "Inventory item at or below minimum stock"
        );
    }
}

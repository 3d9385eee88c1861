//! Engine-wide error taxonomy.
//!
//! Every error carries enough detail for a caller to tell three situations
//! apart (see [`RetryDisposition`]):
//!
//! - the request was wrong and must be fixed before retrying,
//! - the same request may be retried as-is (idempotency keys make it safe),
//! - the request will keep failing until some external state changes.

use crate::state::BookingState;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the transaction engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A booking, wallet, ledger entry or inventory item does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity (`booking`, `wallet`, `wallet_entry`, `inventory_item`).
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The requested transition is not an edge of the state graph.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Current canonical state.
        from: BookingState,
        /// Requested target state.
        to: BookingState,
    },

    /// A gate (OTP handshake, verified payment) or data precondition is not satisfied.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Not enough stock to consume or adjust.
    #[error("Insufficient stock for {item}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Inventory item code.
        item: String,
        /// Quantity requested.
        requested: i64,
        /// Stock on hand at the time of the request.
        available: u32,
    },

    /// A money amount was zero, negative or overflowed.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// An inventory quantity was zero or out of range.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Stored ledger data contradicts an invariant (e.g. hold balance would go negative).
    #[error("Ledger invariant violated: {0}")]
    LedgerInvariant(String),

    /// A configuration value is missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A row lock or statement did not complete within the configured timeout.
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Transient storage failure (serialization conflict, deadlock, pool exhaustion).
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Any other storage failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An external collaborator (OTP, payment, invoicing) failed.
    #[error("Collaborator error: {0}")]
    Collaborator(String),
}

/// How a caller should react to an [`EngineError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDisposition {
    /// The input was wrong. Retrying the same request will fail again.
    FixInput,
    /// Retrying the identical request is safe and may succeed.
    RetrySafe,
    /// Retrying will only succeed after external state changes
    /// (handshake verified, payment verified, stock replenished).
    NeedsExternalChange,
}

impl EngineError {
    /// Convenience constructor for [`EngineError::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classify the error for callers deciding whether to retry.
    #[must_use]
    pub const fn disposition(&self) -> RetryDisposition {
        match self {
            Self::NotFound { .. }
            | Self::InvalidTransition { .. }
            | Self::InvalidAmount(_)
            | Self::InvalidQuantity(_) => RetryDisposition::FixInput,
            Self::LockTimeout(_) | Self::Transient(_) | Self::Collaborator(_) => {
                RetryDisposition::RetrySafe
            }
            Self::PreconditionFailed(_)
            | Self::InsufficientStock { .. }
            | Self::LedgerInvariant(_)
            | Self::Configuration(_)
            | Self::Storage(_) => RetryDisposition::NeedsExternalChange,
        }
    }

    /// Whether an automatic retry of the identical request is worthwhile.
    ///
    /// Collaborator failures are safe to retry by hand but are not retried
    /// automatically: an invoice may already have been generated.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_) | Self::Transient(_))
    }

    /// Whether this is a caller error (4xx-equivalent).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::InvalidTransition { .. }
                | Self::PreconditionFailed(_)
                | Self::InvalidAmount(_)
                | Self::InvalidQuantity(_)
        )
    }
}

//! # ServiceHub Core
//!
//! Core types and traits for the booking lifecycle transaction engine.
//!
//! A service booking moves through a closed set of states. A handful of those
//! transitions carry ledger-grade side effects (crediting a partner wallet,
//! consuming inventory, writing an audit trail) that must be applied as one
//! atomic unit. This crate holds everything that is pure or declarative about
//! that process:
//!
//! - **State Model** ([`state`]): canonical states and the legal transition graph
//! - **Compatibility Mapper** ([`legacy`]): canonical ⇄ legacy persisted names
//! - **Gate Evaluators** ([`gates`]): which transitions need an OTP or payment check
//! - **Domain types** ([`types`], [`metadata`]): bookings, wallets, ledger entries
//! - **Errors** ([`error`]): the engine-wide error taxonomy
//! - **Store seam** ([`store`]): the explicit unit of work passed into every ledger call
//! - **Environment** ([`environment`], [`config`]): injected collaborators and tunables
//!
//! The orchestration itself (Transition Coordinator, ledgers, Release Scheduler)
//! lives in `servicehub-runtime`.
//!
//! ## Example
//!
//! ```
//! use servicehub_core::state::BookingState;
//! use servicehub_core::{gates, legacy};
//!
//! let current = legacy::to_canonical("accepted");
//! assert_eq!(current, BookingState::Accepted);
//! assert!(current.can_transition_to(BookingState::InProgress));
//! assert!(gates::requires_otp(current, BookingState::InProgress));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod config;
pub mod environment;
pub mod error;
pub mod gates;
pub mod legacy;
pub mod metadata;
pub mod state;
pub mod store;
pub mod types;

pub use error::{EngineError, EngineResult, RetryDisposition};
pub use state::BookingState;
pub use types::Outcome;

//! # ServiceHub Runtime
//!
//! The moving parts of the booking transaction engine:
//!
//! - [`TransitionCoordinator`]: the single entry point for booking state changes
//! - [`WalletLedger`]: partner hold credits and their release
//! - [`InventoryLedger`]: stock consumption, restock and adjustment
//! - [`ReleaseScheduler`]: periodic release of matured hold credits
//! - [`retry`]: backoff for lock timeouts and transient storage errors
//! - [`metrics`]: Prometheus exporter and metric recorders
//!
//! Ledger functions never open their own transaction: the caller passes a
//! `&mut dyn UnitOfWork` and decides when to commit.
//!
//! # Example
//!
//! ```ignore
//! use servicehub_runtime::{CoordinatorEnvironment, TransitionCoordinator};
//! use servicehub_core::{BookingState, metadata::TransitionMetadata, types::ActorId};
//!
//! let coordinator = TransitionCoordinator::new(env);
//! let booking = coordinator
//!     .transition(
//!         booking_id,
//!         BookingState::InProgress,
//!         &ActorId::new("partner-7"),
//!         TransitionMetadata::new(),
//!     )
//!     .await?;
//! ```

pub mod coordinator;
pub mod inventory;
pub mod metrics;
pub mod retry;
pub mod scheduler;
pub mod wallet;

pub use coordinator::{CoordinatorEnvironment, TransitionCoordinator};
pub use inventory::{DeductionReport, InventoryLedger};
pub use retry::RetryPolicy;
pub use scheduler::{ReleaseScheduler, SchedulerHandle, SweepReport};
pub use wallet::WalletLedger;

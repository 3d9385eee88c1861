//! Canonical booking states and the directed graph of legal transitions.
//!
//! ```text
//! CREATED ──► ASSIGNED ──► ACCEPTED ──► IN_PROGRESS ──► COMPLETED
//!    │            │            │             │              │
//!    └────────────┴────────────┴─► CANCELLED └─► DISPUTED ◄─┘
//! ```
//!
//! Cancellation is only possible before work starts. Once a technician is
//! on-site (`IN_PROGRESS`) the only ways forward are completion or dispute.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical state of a service booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingState {
    /// Booking received, no partner yet. The only initial state.
    Created,
    /// A partner has been assigned.
    Assigned,
    /// The assigned partner accepted the job.
    Accepted,
    /// Work has started on-site.
    InProgress,
    /// Work finished and the final payment was verified.
    Completed,
    /// Booking cancelled before work started. Terminal.
    Cancelled,
    /// Booking under dispute. Terminal.
    Disputed,
}

impl BookingState {
    /// Every canonical state, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Created,
        Self::Assigned,
        Self::Accepted,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
        Self::Disputed,
    ];

    /// Canonical persisted name of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Assigned => "ASSIGNED",
            Self::Accepted => "ACCEPTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Disputed => "DISPUTED",
        }
    }

    /// Parse a canonical state name (case-insensitive, surrounding whitespace ignored).
    ///
    /// Returns `None` for anything that is not one of the seven canonical names.
    /// Legacy names are handled by [`crate::legacy`].
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(raw))
    }

    /// States reachable from `self` in one step.
    #[must_use]
    pub const fn allowed_transitions(&self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::Assigned, Self::Cancelled],
            Self::Assigned => &[Self::Accepted, Self::Cancelled],
            Self::Accepted => &[Self::InProgress, Self::Cancelled],
            Self::InProgress => &[Self::Completed, Self::Disputed],
            Self::Completed => &[Self::Disputed],
            Self::Cancelled | Self::Disputed => &[],
        }
    }

    /// Whether `target` is reachable from `self` in one step.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Whether the state has no outgoing edges.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Disputed)
    }

    /// Whether a booking in this state must have an assigned partner.
    #[must_use]
    pub const fn requires_partner(&self) -> bool {
        matches!(
            self,
            Self::Assigned | Self::Accepted | Self::InProgress | Self::Completed
        )
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `is_legal(from, to) = to ∈ allowed(from)`.
#[must_use]
pub fn is_legal(from: BookingState, to: BookingState) -> bool {
    from.can_transition_to(to)
}

/// Legality check over a raw persisted `from` value.
///
/// Only canonical names are recognized here; an unrecognized `from` never
/// permits a transition.
#[must_use]
pub fn is_legal_raw(from: &str, to: BookingState) -> bool {
    BookingState::parse(from).is_some_and(|from| is_legal(from, to))
}

//! Compatibility mapping between canonical states and the legacy status vocabulary.
//!
//! Rows written before the canonical scheme existed carry legacy names
//! (`pending`, `confirmed`, ...). Both vocabularies must read back correctly,
//! so every read goes through [`to_canonical`] and every write goes through
//! [`PersistenceMode::encode`].
//!
//! | Canonical     | Legacy        | Also read as |
//! |---------------|---------------|--------------|
//! | `CREATED`     | `pending`     |              |
//! | `ASSIGNED`    | `confirmed`   |              |
//! | `ACCEPTED`    | `accepted`    |              |
//! | `IN_PROGRESS` | `in_progress` | `started`    |
//! | `COMPLETED`   | `completed`   |              |
//! | `CANCELLED`   | `cancelled`   | `canceled`   |
//! | `DISPUTED`    | `cancelled`   |              |
//!
//! `DISPUTED` has no legacy representation and is written as `cancelled`.
//! Once that happens a dispute can no longer be told apart from a
//! cancellation on read.

use crate::state::BookingState;
use serde::{Deserialize, Serialize};

/// Legacy name for a canonical state.
#[must_use]
pub const fn to_legacy(state: BookingState) -> &'static str {
    match state {
        BookingState::Created => "pending",
        BookingState::Assigned => "confirmed",
        BookingState::Accepted => "accepted",
        BookingState::InProgress => "in_progress",
        BookingState::Completed => "completed",
        BookingState::Cancelled | BookingState::Disputed => "cancelled",
    }
}

/// Strict mapping from any known persisted value (canonical or legacy).
///
/// Returns `None` for values neither vocabulary knows.
#[must_use]
pub fn try_to_canonical(raw: &str) -> Option<BookingState> {
    if let Some(state) = BookingState::parse(raw) {
        return Some(state);
    }

    let state = match raw.trim().to_ascii_lowercase().as_str() {
        "pending" => BookingState::Created,
        "confirmed" => BookingState::Assigned,
        "accepted" => BookingState::Accepted,
        "in_progress" | "started" => BookingState::InProgress,
        "completed" => BookingState::Completed,
        "cancelled" | "canceled" => BookingState::Cancelled,
        _ => return None,
    };
    Some(state)
}

/// Map a persisted value to its canonical state.
///
/// Unknown values fall back to [`BookingState::Created`] with a warning.
/// This never fails: it is a safety net for data that predates both schemes.
#[must_use]
pub fn to_canonical(raw: &str) -> BookingState {
    try_to_canonical(raw).unwrap_or_else(|| {
        tracing::warn!(
            raw_status = raw,
            fallback = BookingState::Created.as_str(),
            "Unrecognized booking status, defaulting to CREATED"
        );
        BookingState::Created
    })
}

/// Canonical name for a persisted value.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`, and canonical names
/// come back unchanged.
#[must_use]
pub fn normalize(raw: &str) -> &'static str {
    to_canonical(raw).as_str()
}

/// Which vocabulary the engine writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceMode {
    /// Write canonical names. Lossless.
    #[default]
    Canonical,
    /// Write legacy names for readers that have not migrated. `DISPUTED` is lossy.
    Legacy,
}

impl PersistenceMode {
    /// Persisted representation of `state` under this mode.
    #[must_use]
    pub fn encode(self, state: BookingState) -> &'static str {
        match self {
            Self::Canonical => state.as_str(),
            Self::Legacy => {
                if state == BookingState::Disputed {
                    tracing::warn!(
                        "DISPUTED has no legacy representation, persisting as 'cancelled'"
                    );
                }
                to_legacy(state)
            }
        }
    }

    /// Parse a mode name (`canonical` / `legacy`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "canonical" => Some(Self::Canonical),
            "legacy" => Some(Self::Legacy),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_names_map_to_canonical() {
        assert_eq!(to_canonical("pending"), BookingState::Created);
        assert_eq!(to_canonical("confirmed"), BookingState::Assigned);
        assert_eq!(to_canonical("Started"), BookingState::InProgress);
        assert_eq!(to_canonical("canceled"), BookingState::Cancelled);
    }

    #[test]
    fn unknown_defaults_to_created() {
        assert_eq!(to_canonical("on_hold"), BookingState::Created);
        assert_eq!(try_to_canonical("on_hold"), None);
    }

    #[test]
    fn normalize_leaves_canonical_names_alone() {
        for state in BookingState::ALL {
            assert_eq!(normalize(state.as_str()), state.as_str());
        }
        assert_eq!(normalize("pending"), "CREATED");
        assert_eq!(normalize(normalize("pending")), "CREATED");
    }

    #[test]
    fn disputed_degrades_to_cancelled() {
        assert_eq!(to_legacy(BookingState::Disputed), "cancelled");
        assert_eq!(
            to_canonical(PersistenceMode::Legacy.encode(BookingState::Disputed)),
            BookingState::Cancelled
        );
        assert_eq!(
            to_canonical(PersistenceMode::Canonical.encode(BookingState::Disputed)),
            BookingState::Disputed
        );
    }
}

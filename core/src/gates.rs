//! Gate evaluators: transitions that need an external precondition.
//!
//! Gates are independent of the state graph. They only say *whether* a
//! collaborator must be consulted; the Transition Coordinator does the
//! consulting.

use crate::state::BookingState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An external precondition guarding a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    /// A verified OTP handshake must exist for the booking.
    Otp,
    /// The final payment for the booking must be verified.
    Payment,
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Otp => f.write_str("otp"),
            Self::Payment => f.write_str("payment"),
        }
    }
}

/// True exactly for `ACCEPTED → IN_PROGRESS`.
#[must_use]
pub fn requires_otp(from: BookingState, to: BookingState) -> bool {
    from == BookingState::Accepted && to == BookingState::InProgress
}

/// True exactly for transitions into `COMPLETED`.
#[must_use]
pub fn requires_payment(_from: BookingState, to: BookingState) -> bool {
    to == BookingState::Completed
}

/// All gates guarding `from → to`, in evaluation order.
#[must_use]
pub fn gates_for(from: BookingState, to: BookingState) -> Vec<Gate> {
    let mut gates = Vec::with_capacity(2);
    if requires_otp(from, to) {
        gates.push(Gate::Otp);
    }
    if requires_payment(from, to) {
        gates.push(Gate::Payment);
    }
    gates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_gate_only_on_start() {
        for from in BookingState::ALL {
            for to in BookingState::ALL {
                let expected = from == BookingState::Accepted && to == BookingState::InProgress;
                assert_eq!(requires_otp(from, to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn payment_gate_on_any_completion() {
        for from in BookingState::ALL {
            assert!(requires_payment(from, BookingState::Completed));
            assert!(!requires_payment(from, BookingState::Disputed));
        }
    }

    #[test]
    fn gates_for_collects_both_predicates() {
        assert_eq!(
            gates_for(BookingState::Accepted, BookingState::InProgress),
            vec![Gate::Otp]
        );
        assert_eq!(
            gates_for(BookingState::InProgress, BookingState::Completed),
            vec![Gate::Payment]
        );
        assert!(gates_for(BookingState::Created, BookingState::Assigned).is_empty());
    }
}

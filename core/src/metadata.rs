//! Typed metadata carried through a transition request.
//!
//! Callers attach a free-form note plus a list of known extension payloads.
//! The whole struct is serialized into the audit record.

use crate::types::{ConsumptionLine, PartnerId};
use serde::{Deserialize, Serialize};

/// A known extension payload attached to a transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionExtension {
    /// Inventory consumed while completing the job.
    InventoryConsumption {
        /// Items and quantities used
        items: Vec<ConsumptionLine>,
    },
    /// Partner to assign on `→ ASSIGNED`.
    AssignPartner {
        /// Partner taking the job
        partner_id: PartnerId,
    },
    /// Why the booking was cancelled or disputed.
    CancellationReason {
        /// Human-readable reason
        reason: String,
    },
}

/// Metadata for one transition request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionMetadata {
    /// Free-form note recorded in the audit trail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Typed extension payloads
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<TransitionExtension>,
}

impl TransitionMetadata {
    /// Empty metadata
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a note
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Attach an inventory consumption request
    #[must_use]
    pub fn with_inventory(mut self, items: Vec<ConsumptionLine>) -> Self {
        self.extensions.push(TransitionExtension::InventoryConsumption { items });
        self
    }

    /// Attach a partner assignment
    #[must_use]
    pub fn with_partner(mut self, partner_id: PartnerId) -> Self {
        self.extensions.push(TransitionExtension::AssignPartner { partner_id });
        self
    }

    /// Attach a cancellation or dispute reason
    #[must_use]
    pub fn with_cancellation_reason(mut self, reason: impl Into<String>) -> Self {
        self.extensions.push(TransitionExtension::CancellationReason {
            reason: reason.into(),
        });
        self
    }

    /// All consumption lines across every `InventoryConsumption` extension.
    ///
    /// `None` when the caller supplied no inventory extension at all.
    #[must_use]
    pub fn inventory_lines(&self) -> Option<Vec<ConsumptionLine>> {
        let mut found = false;
        let mut lines = Vec::new();
        for extension in &self.extensions {
            if let TransitionExtension::InventoryConsumption { items } = extension {
                found = true;
                lines.extend(items.iter().cloned());
            }
        }
        found.then_some(lines)
    }

    /// The last partner assignment, if any.
    #[must_use]
    pub fn partner_assignment(&self) -> Option<PartnerId> {
        self.extensions.iter().rev().find_map(|extension| match extension {
            TransitionExtension::AssignPartner { partner_id } => Some(*partner_id),
            _ => None,
        })
    }

    /// The last cancellation reason, if any.
    #[must_use]
    pub fn cancellation_reason(&self) -> Option<&str> {
        self.extensions.iter().rev().find_map(|extension| match extension {
            TransitionExtension::CancellationReason { reason } => Some(reason.as_str()),
            _ => None,
        })
    }

    /// JSON form for the audit trail.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_lines_absent_without_extension() {
        assert!(TransitionMetadata::new().with_note("hi").inventory_lines().is_none());
    }

    #[test]
    fn inventory_lines_merge_extensions() {
        let metadata = TransitionMetadata::new()
            .with_inventory(vec![ConsumptionLine::new("PIPE", 2)])
            .with_inventory(vec![ConsumptionLine::new("TAPE", 1)]);
        assert_eq!(metadata.inventory_lines().map(|l| l.len()), Some(2));
    }

    #[test]
    fn serialized_extensions_are_tagged() {
        let metadata = TransitionMetadata::new().with_cancellation_reason("customer no-show");
        assert_eq!(metadata.cancellation_reason(), Some("customer no-show"));
        let json = metadata.to_json();
        assert_eq!(json["extensions"][0]["kind"], "cancellation_reason");
        assert_eq!(json["extensions"][0]["reason"], "customer no-show");
    }
}

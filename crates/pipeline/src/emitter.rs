//! Attribute construction from a rule match.

use chrono::{DateTime, Utc};

use certhunt_core::{Attribute, EnrichedEvent, ATTRIBUTE_TYPE_DOMAIN};
use certhunt_rules::Rule;

/// Builds [`Attribute`]s. Pure: no I/O, no shared state.
#[derive(Debug, Clone)]
pub struct AttributeEmitter {
    parent_event: String,
}

impl AttributeEmitter {
    pub fn new(parent_event: impl Into<String>) -> Self {
        Self {
            parent_event: parent_event.into(),
        }
    }

    pub fn build(&self, rule: &dyn Rule, event: &EnrichedEvent, value: String) -> Attribute {
        Attribute {
            parent_event: self.parent_event.clone(),
            event_name: rule.title().to_string(),
            event_tags: rule.tags().to_vec(),
            attr_type: ATTRIBUTE_TYPE_DOMAIN.to_string(),
            value,
            comment: provenance(event),
        }
    }
}

/// `Observed in Certstream: <YYYY-MM-DD> (<fingerprint>)`.
///
/// The date is the event's `seen` timestamp in UTC. The fingerprint is
/// lowercased with `:` separators removed and omitted when absent.
pub fn provenance(event: &EnrichedEvent) -> String {
    let date = event
        .seen()
        .and_then(|seen| DateTime::<Utc>::from_timestamp(seen.trunc() as i64, 0))
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let fingerprint = event
        .leaf_cert()
        .and_then(|leaf| leaf.fingerprint())
        .map(|fp| fp.replace(':', "").to_lowercase())
        .filter(|fp| !fp.is_empty());

    match fingerprint {
        Some(fp) => format!("Observed in Certstream: {date} ({fp})"),
        None => format!("Observed in Certstream: {date}"),
    }
}

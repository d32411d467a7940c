//! Flagged-domain output records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute type emitted for registered domains.
pub const ATTRIBUTE_TYPE_DOMAIN: &str = "domain";

/// One unit of flagged-domain output with provenance.
///
/// Serialized as one line of the durable attribute log and as the broadcast
/// payload, using the field names downstream consumers expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "parent_event_uuid")]
    pub parent_event: String,
    /// Title of the rule that matched.
    pub event_name: String,
    pub event_tags: Vec<String>,
    pub attr_type: String,
    #[serde(rename = "attr_value")]
    pub value: String,
    #[serde(rename = "attr_comment")]
    pub comment: String,
}

impl Attribute {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            event_name: self.event_name.clone(),
            value: self.value.clone(),
        }
    }
}

/// Identity under which an attribute is emitted at most once per TTL window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub event_name: String,
    pub value: String,
}

impl DedupKey {
    /// Key in the existence store: `attr:<event_name>:<value>`.
    pub fn store_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attr:{}:{}", self.event_name, self.value)
    }
}

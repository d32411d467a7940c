//! Serde types for YAML detection-rule documents.
//!
//! A document follows the Sigma layout, restricted to what certificate
//! events need:
//!
//! ```yaml
//! title: PayPal lookalike
//! id: 5d0e3a8e-paypal
//! description: Certificate for {{leaf_cert.subject.CN}} mentions paypal
//! tags: [phishing, brand.paypal]
//! level: high
//! detection:
//!   keywords:
//!     leaf_cert.all_domains|contains: paypal
//!   legit:
//!     leaf_cert.registered_domains|endswith:
//!       - paypal.com
//!       - paypal.me
//!   condition: keywords and not legit
//! ```
//!
//! Unknown top-level keys (`references`, `falsepositives`, `date`, ...) are
//! ignored so upstream Sigma files can be dropped in unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Detection keys that are not selections.
pub const RESERVED_DETECTION_KEYS: &[&str] = &["condition", "timeframe"];

/// A single rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDocument {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub detection: Detection,
}

/// Named selections plus the condition combining them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub condition: ConditionSpec,
    /// Everything else under `detection:`, keyed by selection name.
    #[serde(flatten)]
    pub selections: BTreeMap<String, serde_yaml::Value>,
}

/// `condition:` is either one expression or a list (any may match).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionSpec {
    Single(String),
    Any(Vec<String>),
}

impl ConditionSpec {
    pub fn expressions(&self) -> Vec<&str> {
        match self {
            Self::Single(expr) => vec![expr.as_str()],
            Self::Any(exprs) => exprs.iter().map(String::as_str).collect(),
        }
    }
}

//! Certificate-transparency stream events.
//!
//! A [`RawEvent`] is one decoded stream message. Only `certificate_update`
//! messages carry a certificate; after enrichment they become an
//! [`EnrichedEvent`] with the derived `registered_domains` attached.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::selector::{FieldSelector, FieldValue, Fields, Items};

/// `message_type` of stream messages that carry a newly logged certificate.
pub const CERTIFICATE_UPDATE: &str = "certificate_update";

/// `data.update_type` of pre-certificate log entries.
pub const PRECERT_UPDATE_TYPE: &str = "PrecertLogEntry";

/// Key under `leaf_cert` where enrichment stores the derived apex domains.
pub const REGISTERED_DOMAINS_KEY: &str = "registered_domains";

/// A decoded stream message, as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub message_type: String,
    #[serde(default)]
    pub data: Value,
}

impl RawEvent {
    pub fn is_certificate_update(&self) -> bool {
        self.message_type == CERTIFICATE_UPDATE
    }

    /// `data.update_type`, e.g. `X509LogEntry` or `PrecertLogEntry`.
    pub fn update_type(&self) -> Option<&str> {
        self.data.get("update_type").and_then(Value::as_str)
    }

    pub fn is_precert(&self) -> bool {
        self.update_type() == Some(PRECERT_UPDATE_TYPE)
    }

    /// View of `data.leaf_cert`, if present and an object.
    pub fn leaf_cert(&self) -> Option<LeafCertificate<'_>> {
        self.data
            .get("leaf_cert")
            .and_then(Value::as_object)
            .map(|map| LeafCertificate(Fields::new(map)))
    }
}

/// Borrowed view over `data.leaf_cert`.
#[derive(Debug, Clone, Copy)]
pub struct LeafCertificate<'a>(Fields<'a>);

impl<'a> LeafCertificate<'a> {
    /// `subject.CN`.
    pub fn common_name(&self) -> Option<&'a str> {
        match self.0.resolve("subject.CN")? {
            FieldValue::Scalar(std::borrow::Cow::Borrowed(cn)) => Some(cn),
            _ => None,
        }
    }

    /// Hostnames covered by the certificate. Non-string entries are skipped.
    pub fn all_domains(&self) -> impl Iterator<Item = &'a str> + 'a {
        let items = self
            .0
            .get("all_domains")
            .and_then(|v| v.as_sequence())
            .unwrap_or(Items::new(&[]));
        items.iter().filter_map(|v| match v {
            FieldValue::Scalar(std::borrow::Cow::Borrowed(s)) => Some(s),
            _ => None,
        })
    }

    /// Colon-separated hex fingerprint as published by the stream.
    pub fn fingerprint(&self) -> Option<&'a str> {
        match self.0.get("fingerprint")? {
            FieldValue::Scalar(std::borrow::Cow::Borrowed(fp)) => Some(fp),
            _ => None,
        }
    }
}

/// A certificate update with its registered domains derived.
///
/// `data` is the original message payload; `registered_domains` is also
/// written into `data.leaf_cert.registered_domains` so rules can select it.
#[derive(Debug, Clone)]
pub struct EnrichedEvent {
    data: Map<String, Value>,
    registered_domains: Vec<String>,
}

impl EnrichedEvent {
    /// Attach `registered_domains` to a certificate payload.
    ///
    /// Non-object payloads are replaced by an empty object.
    pub fn new(data: Value, registered_domains: Vec<String>) -> Self {
        let mut data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        if let Some(Value::Object(leaf)) = data.get_mut("leaf_cert") {
            leaf.insert(
                REGISTERED_DOMAINS_KEY.to_string(),
                Value::Array(
                    registered_domains
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                ),
            );
        }

        Self {
            data,
            registered_domains,
        }
    }

    pub fn registered_domains(&self) -> &[String] {
        &self.registered_domains
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn fields(&self) -> Fields<'_> {
        Fields::new(&self.data)
    }

    pub fn leaf_cert(&self) -> Option<LeafCertificate<'_>> {
        self.fields()
            .get("leaf_cert")
            .and_then(|v| v.as_mapping())
            .map(LeafCertificate)
    }

    /// `data.seen`, epoch seconds at which the stream observed the entry.
    pub fn seen(&self) -> Option<f64> {
        self.fields().get("seen")?.as_str()?.parse().ok()
    }
}

impl FieldSelector for EnrichedEvent {
    fn select(&self, path: &str) -> Option<FieldValue<'_>> {
        self.fields().resolve(path)
    }
}

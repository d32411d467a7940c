//! Dot-path field resolution over decoded stream events.
//!
//! Detection rules never see raw JSON. They read events exclusively through
//! [`FieldSelector::select`], which resolves a dot-delimited path and hands
//! back a [`FieldValue`] from a closed set of variants:
//!
//! - `Mapping` — a nested object, itself selectable
//! - `Sequence` — an array, with the `length` / `join` / index helpers
//! - `Scalar` — strings, plus numbers and booleans rendered as text
//! - `Null`
//!
//! Resolution never fails loudly. A missing key, an out-of-range index or a
//! type mismatch simply yields `None`.

use std::borrow::Cow;
use std::fmt;

use serde_json::{Map, Value};
use tracing::trace;

/// Read capability over a structured event.
pub trait FieldSelector {
    /// Resolve a dot-delimited path such as `leaf_cert.all_domains.length`.
    ///
    /// Returns `None` when the path does not exist.
    fn select(&self, path: &str) -> Option<FieldValue<'_>>;
}

/// A resolved field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Mapping(Fields<'a>),
    Sequence(Items<'a>),
    Scalar(Cow<'a, str>),
    Null,
}

impl<'a> FieldValue<'a> {
    /// Classify a JSON value. Numbers and booleans collapse into `Scalar`.
    pub fn from_json(value: &'a Value) -> Self {
        match value {
            Value::Object(map) => Self::Mapping(Fields(map)),
            Value::Array(items) => Self::Sequence(Items(items)),
            Value::String(s) => Self::Scalar(Cow::Borrowed(s.as_str())),
            Value::Null => Self::Null,
            Value::Number(n) => {
                trace!(value = %n, "coercing numeric field to scalar");
                Self::Scalar(Cow::Owned(n.to_string()))
            }
            Value::Bool(b) => {
                trace!(value = b, "coercing boolean field to scalar");
                Self::Scalar(Cow::Owned(b.to_string()))
            }
        }
    }

    /// Borrow the scalar text, if this is a scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<Items<'a>> {
        match self {
            Self::Sequence(items) => Some(*items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<Fields<'a>> {
        match self {
            Self::Mapping(fields) => Some(*fields),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => f.write_str(s),
            Self::Null => f.write_str("null"),
            Self::Sequence(items) => f.write_str(&items.join(",")),
            Self::Mapping(fields) => write!(f, "{}", Value::Object(fields.0.clone())),
        }
    }
}

// ── Mapping ─────────────────────────────────────────────────────────

/// A JSON object viewed through the selector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fields<'a>(&'a Map<String, Value>);

impl<'a> Fields<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self(map)
    }

    /// Look up a single key without path splitting.
    pub fn get(&self, key: &str) -> Option<FieldValue<'a>> {
        self.0.get(key).map(FieldValue::from_json)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> + 'a {
        let map: &'a Map<String, Value> = self.0;
        map.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve a dot-delimited path relative to this mapping.
    pub fn resolve(&self, path: &str) -> Option<FieldValue<'a>> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        let value = self.0.get(head)?;
        let Some(rest) = rest else {
            return Some(FieldValue::from_json(value));
        };

        match value {
            Value::Object(map) => Fields(map).resolve(rest),
            Value::Array(items) => Items(items).resolve(rest),
            // Scalars and null ignore any remaining path.
            other => Some(FieldValue::from_json(other)),
        }
    }
}

impl FieldSelector for Fields<'_> {
    fn select(&self, path: &str) -> Option<FieldValue<'_>> {
        self.resolve(path)
    }
}

// ── Sequence ────────────────────────────────────────────────────────

/// A JSON array viewed through the selector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Items<'a>(&'a [Value]);

impl<'a> Items<'a> {
    pub fn new(items: &'a [Value]) -> Self {
        Self(items)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<FieldValue<'a>> {
        self.0.get(index).map(FieldValue::from_json)
    }

    pub fn iter(&self) -> impl Iterator<Item = FieldValue<'a>> + 'a {
        let items: &'a [Value] = self.0;
        items.iter().map(FieldValue::from_json)
    }

    /// Render every element as text and join with `sep`.
    ///
    /// Null elements render empty; nested objects and arrays render as JSON.
    pub fn join(&self, sep: &str) -> String {
        self.0
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(sep)
    }

    /// Apply the remainder of a path to this sequence.
    ///
    /// `length` and `join` are computed helpers, a decimal index picks one
    /// element (bounds-checked), anything else yields the sequence itself.
    fn resolve(&self, rest: &str) -> Option<FieldValue<'a>> {
        match rest {
            "length" => Some(FieldValue::Scalar(Cow::Owned(self.len().to_string()))),
            "join" => Some(FieldValue::Scalar(Cow::Owned(self.join(",")))),
            _ if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) => {
                rest.parse::<usize>().ok().and_then(|index| self.get(index))
            }
            _ => Some(FieldValue::Sequence(*self)),
        }
    }
}

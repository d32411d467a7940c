//! `{{field.path}}` placeholders in rule descriptions.
//!
//! Each placeholder is replaced by the event's value at that path, rendered
//! with [`FieldValue`](certhunt_core::selector::FieldValue)'s `Display`.
//! Unresolvable paths render as `?`.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use certhunt_core::selector::FieldSelector;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid")
});

/// Fill in a description template from an event.
pub fn render_description(template: &str, event: &dyn FieldSelector) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match event.select(&caps[1]) {
            Some(value) => value.to_string(),
            None => "?".to_string(),
        })
        .into_owned()
}

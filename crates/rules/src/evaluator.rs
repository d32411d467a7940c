//! Compiled detection rules and their evaluation.
//!
//! A [`RuleDocument`] is compiled once into a [`SigmaRule`]:
//! - each selection becomes an OR of field groups
//! - each field group is an AND of field matchers
//! - each field matcher holds the patterns for one `field|modifiers` key
//!
//! Evaluation reads the event exclusively through [`FieldSelector`]. A field
//! that resolves to a sequence matches when any element matches, which lets
//! rules target `leaf_cert.all_domains` directly.

use regex::Regex;
use serde_yaml::Value as Yaml;

use certhunt_core::selector::{FieldSelector, FieldValue};

use crate::condition::Condition;
use crate::error::{Result, RuleError};
use crate::rule::Rule;
use crate::schema::{RuleDocument, RESERVED_DETECTION_KEYS};

// ── Rule ────────────────────────────────────────────────────────────

/// An executable rule compiled from a [`RuleDocument`].
#[derive(Debug)]
pub struct SigmaRule {
    title: String,
    id: Option<String>,
    description: Option<String>,
    tags: Vec<String>,
    level: Option<String>,
    selections: Vec<Selection>,
    condition: Condition,
}

impl SigmaRule {
    /// Compile a parsed document. Fails on unknown modifiers, malformed
    /// selections, invalid regexes or a condition naming missing selections.
    pub fn compile(doc: RuleDocument) -> Result<Self> {
        let title = doc.title.trim().to_string();
        if title.is_empty() {
            return Err(RuleError::compile("<untitled>", "title must not be empty"));
        }

        let mut names = Vec::new();
        let mut selections = Vec::new();
        for (name, body) in &doc.detection.selections {
            if RESERVED_DETECTION_KEYS.contains(&name.as_str()) {
                continue;
            }
            let selection = Selection::compile(body)
                .map_err(|e| RuleError::compile(&title, format!("selection '{name}': {e}")))?;
            names.push(name.clone());
            selections.push(selection);
        }

        let mut conditions = Vec::new();
        for expr in doc.detection.condition.expressions() {
            let condition = Condition::parse(expr, &names)
                .map_err(|e| RuleError::compile(&title, e.to_string()))?;
            conditions.push(condition);
        }
        let condition = match conditions.len() {
            0 => return Err(RuleError::compile(&title, "no condition")),
            1 => conditions.remove(0),
            _ => Condition::Or(conditions),
        };

        Ok(Self {
            title,
            id: doc.id,
            description: doc.description,
            tags: doc.tags,
            level: doc.level,
            selections,
            condition,
        })
    }

    /// Parse and compile a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let doc: RuleDocument = serde_yaml::from_str(yaml)?;
        Self::compile(doc)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn level(&self) -> Option<&str> {
        self.level.as_deref()
    }
}

impl Rule for SigmaRule {
    fn title(&self) -> &str {
        &self.title
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn evaluate(&self, event: &dyn FieldSelector) -> Result<bool> {
        // Each selection is evaluated at most once per event.
        let mut cache: Vec<Option<bool>> = vec![None; self.selections.len()];
        let matched = self.condition.eval(&mut |i| {
            *cache[i].get_or_insert_with(|| self.selections[i].matches(event))
        });
        Ok(matched)
    }
}

// ── Selection ───────────────────────────────────────────────────────

/// OR of field groups.
#[derive(Debug)]
struct Selection {
    groups: Vec<FieldGroup>,
}

/// AND of field matchers.
#[derive(Debug)]
struct FieldGroup {
    fields: Vec<FieldMatcher>,
}

impl Selection {
    fn compile(body: &Yaml) -> std::result::Result<Self, String> {
        let groups = match body {
            Yaml::Mapping(map) => vec![FieldGroup::compile(map)?],
            Yaml::Sequence(items) => items
                .iter()
                .map(|item| match item {
                    Yaml::Mapping(map) => FieldGroup::compile(map),
                    _ => Err("keyword selections are not supported".to_string()),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?,
            _ => return Err("selection must be a mapping or a list of mappings".into()),
        };
        if groups.is_empty() {
            return Err("selection is empty".into());
        }
        Ok(Self { groups })
    }

    fn matches(&self, event: &dyn FieldSelector) -> bool {
        self.groups.iter().any(|g| g.matches(event))
    }
}

impl FieldGroup {
    fn compile(map: &serde_yaml::Mapping) -> std::result::Result<Self, String> {
        let fields = map
            .iter()
            .map(|(key, value)| {
                let key = key
                    .as_str()
                    .ok_or_else(|| format!("field key {key:?} is not a string"))?;
                FieldMatcher::compile(key, value)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { fields })
    }

    fn matches(&self, event: &dyn FieldSelector) -> bool {
        self.fields.iter().all(|f| f.matches(event))
    }
}

// ── Field matcher ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modifier {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

#[derive(Debug)]
struct FieldMatcher {
    path: String,
    patterns: Vec<Pattern>,
    /// `|all`: every pattern must match instead of any.
    require_all: bool,
}

impl FieldMatcher {
    fn compile(key: &str, value: &Yaml) -> std::result::Result<Self, String> {
        let mut parts = key.split('|');
        let path = parts.next().unwrap_or_default().trim().to_string();
        if path.is_empty() {
            return Err(format!("empty field name in '{key}'"));
        }

        let mut modifier = Modifier::Equals;
        let mut require_all = false;
        for m in parts {
            match m {
                "contains" => modifier = Modifier::Contains,
                "startswith" => modifier = Modifier::StartsWith,
                "endswith" => modifier = Modifier::EndsWith,
                "re" => modifier = Modifier::Regex,
                "all" => require_all = true,
                other => return Err(format!("unsupported modifier '{other}' on '{path}'")),
            }
        }

        let values: Vec<&Yaml> = match value {
            Yaml::Sequence(items) => items.iter().collect(),
            other => vec![other],
        };
        if values.is_empty() {
            return Err(format!("no values for '{path}'"));
        }

        let patterns = values
            .into_iter()
            .map(|v| Pattern::compile(modifier, v))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| format!("{path}: {e}"))?;

        Ok(Self {
            path,
            patterns,
            require_all,
        })
    }

    fn matches(&self, event: &dyn FieldSelector) -> bool {
        let value = event.select(&self.path);
        let check = |p: &Pattern| p.matches(value.as_ref());
        if self.require_all {
            self.patterns.iter().all(check)
        } else {
            self.patterns.iter().any(check)
        }
    }
}

// ── Pattern ─────────────────────────────────────────────────────────

/// One compiled value pattern. Plain strings are stored lowercased and
/// compared case-insensitively.
#[derive(Debug)]
enum Pattern {
    Equals(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Regex(Regex),
    Null,
}

impl Pattern {
    fn compile(modifier: Modifier, value: &Yaml) -> std::result::Result<Self, String> {
        let text = match value {
            Yaml::Null => return Ok(Self::Null),
            Yaml::String(s) => s.clone(),
            Yaml::Number(n) => n.to_string(),
            Yaml::Bool(b) => b.to_string(),
            other => return Err(format!("unsupported value {other:?}")),
        };

        if modifier == Modifier::Regex {
            return Regex::new(&text).map(Self::Regex).map_err(|e| e.to_string());
        }

        if has_wildcard(&text) {
            let (lead, trail) = match modifier {
                Modifier::Contains => (true, true),
                Modifier::StartsWith => (false, true),
                Modifier::EndsWith => (true, false),
                _ => (false, false),
            };
            let pattern = glob_to_regex(&text, lead, trail);
            return Regex::new(&pattern).map(Self::Regex).map_err(|e| e.to_string());
        }

        let text = unescape(&text).to_lowercase();
        Ok(match modifier {
            Modifier::Contains => Self::Contains(text),
            Modifier::StartsWith => Self::StartsWith(text),
            Modifier::EndsWith => Self::EndsWith(text),
            _ => Self::Equals(text),
        })
    }

    fn matches(&self, value: Option<&FieldValue<'_>>) -> bool {
        match value {
            None | Some(FieldValue::Null) => matches!(self, Self::Null),
            Some(FieldValue::Scalar(s)) => self.matches_str(s),
            Some(FieldValue::Sequence(items)) => items.iter().any(|item| self.matches(Some(&item))),
            Some(FieldValue::Mapping(_)) => false,
        }
    }

    fn matches_str(&self, value: &str) -> bool {
        match self {
            Self::Regex(re) => re.is_match(value),
            Self::Null => false,
            plain => {
                let value = value.to_lowercase();
                match plain {
                    Self::Equals(p) => value == *p,
                    Self::Contains(p) => value.contains(p.as_str()),
                    Self::StartsWith(p) => value.starts_with(p.as_str()),
                    Self::EndsWith(p) => value.ends_with(p.as_str()),
                    Self::Regex(_) | Self::Null => false,
                }
            }
        }
    }
}

/// Whether `s` contains an unescaped `*` or `?`.
fn has_wildcard(s: &str) -> bool {
    let mut escaped = false;
    for c in s.chars() {
        match c {
            '\\' if !escaped => escaped = true,
            '*' | '?' if !escaped => return true,
            _ => escaped = false,
        }
    }
    false
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '*' | '?' | '\\') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Translate a Sigma wildcard value into an anchored, case-insensitive regex.
fn glob_to_regex(glob: &str, lead: bool, trail: bool) -> String {
    let mut out = String::from("(?is)^");
    if lead {
        out.push_str(".*");
    }
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(&next) if matches!(next, '*' | '?' | '\\') => {
                    out.push_str(&regex::escape(&next.to_string()));
                    chars.next();
                }
                _ => out.push_str(&regex::escape("\\")),
            },
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    if trail {
        out.push_str(".*");
    }
    out.push('$');
    out
}

//! The rule capability consumed by the matching pipeline.

use std::fmt;
use std::sync::Arc;

use certhunt_core::selector::FieldSelector;

use crate::error::Result;

/// An executable detection rule.
///
/// The pipeline only ever evaluates rules and reads their metadata; how a
/// rule decides a match is its own business.
pub trait Rule: Send + Sync {
    /// Human-readable title, used as the attribute's `event_name`.
    fn title(&self) -> &str;

    fn tags(&self) -> &[String];

    fn description(&self) -> Option<&str> {
        None
    }

    /// Evaluate the rule against one event.
    fn evaluate(&self, event: &dyn FieldSelector) -> Result<bool>;
}

/// An immutable, ordered collection of rules shared by all matcher workers.
#[derive(Clone)]
pub struct RuleSet {
    rules: Arc<[Arc<dyn Rule>]>,
}

impl RuleSet {
    pub fn new(rules: Vec<Arc<dyn Rule>>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn titles(&self) -> Vec<&str> {
        self.iter().map(Rule::title).collect()
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("rules", &self.titles())
            .finish()
    }
}

impl FromIterator<Arc<dyn Rule>> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Rule>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

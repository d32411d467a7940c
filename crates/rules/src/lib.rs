//! Detection rules evaluated against certificate events.
//!
//! This crate provides:
//! - The [`Rule`] capability the matching pipeline depends on
//! - A YAML detection-rule schema (Sigma subset) with serde deserialization
//! - A compiler from rule documents to executable [`SigmaRule`]s
//! - A filesystem loader that compiles a whole directory into a [`RuleSet`]
//! - `{{field}}` description templating

pub mod condition;
pub mod error;
pub mod evaluator;
pub mod loader;
pub mod rule;
pub mod schema;
pub mod templates;

pub use error::{Result, RuleError};
pub use evaluator::SigmaRule;
pub use loader::RuleLoader;
pub use rule::{Rule, RuleSet};
pub use templates::render_description;

//! Error types for rule loading, compilation and evaluation.

use std::path::{Path, PathBuf};

/// Errors that can occur while loading, compiling or evaluating rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse/deserialization error.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Rule is well-formed YAML but not a valid detection rule.
    #[error("invalid rule '{rule}': {message}")]
    Compile { rule: String, message: String },

    /// Condition expression could not be parsed.
    #[error("condition error: {0}")]
    Condition(String),

    /// A `|re` pattern failed to compile.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Rule evaluation failed for one event.
    #[error("evaluation of '{rule}' failed: {message}")]
    Evaluation { rule: String, message: String },

    /// Wraps any of the above with the file it came from.
    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: Box<RuleError>,
    },
}

impl RuleError {
    pub(crate) fn compile(rule: &str, message: impl Into<String>) -> Self {
        Self::Compile {
            rule: rule.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn in_file(self, path: &Path) -> Self {
        Self::File {
            path: path.to_path_buf(),
            source: Box::new(self),
        }
    }
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;

//! Filesystem rule loader.
//!
//! Loads every `.yml`/`.yaml` file under the rules directory (recursively,
//! in sorted path order) into a [`RuleSet`]. Loading is all-or-nothing: the
//! first file that fails to parse or compile aborts the load with an error
//! naming that file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, RuleError};
use crate::evaluator::SigmaRule;
use crate::rule::{Rule, RuleSet};
use crate::schema::RuleDocument;

pub struct RuleLoader {
    rules_dir: PathBuf,
}

impl RuleLoader {
    pub fn new(rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: rules_dir.into(),
        }
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    /// Load and compile every rule file under the rules directory.
    ///
    /// A missing directory is an error. An empty directory yields an empty
    /// set with a warning.
    pub fn load(&self) -> Result<RuleSet> {
        let mut paths = Vec::new();
        collect_rule_files(&self.rules_dir, &mut paths)?;
        paths.sort();

        let mut rules: Vec<Arc<dyn Rule>> = Vec::with_capacity(paths.len());
        for path in &paths {
            let rule = self.load_file(path)?;
            debug!(
                title = %rule.title(),
                id = rule.id().unwrap_or("-"),
                level = rule.level().unwrap_or("-"),
                path = %path.display(),
                "loaded rule"
            );
            rules.push(Arc::new(rule));
        }

        if rules.is_empty() {
            warn!(path = %self.rules_dir.display(), "no rule files found");
        } else {
            info!(count = rules.len(), path = %self.rules_dir.display(), "rules loaded");
        }
        Ok(RuleSet::new(rules))
    }

    /// Parse and compile a single YAML file.
    pub fn load_file(&self, path: &Path) -> Result<SigmaRule> {
        let parse = || -> Result<SigmaRule> {
            let contents = fs::read_to_string(path)?;
            let doc: RuleDocument = serde_yaml::from_str(&contents)?;
            SigmaRule::compile(doc)
        };
        parse().map_err(|e| e.in_file(path))
    }
}

/// Recursively gather YAML files, skipping dotfiles and dot-directories.
///
/// Symlinks are followed; a link back to one of its own ancestors is
/// skipped with a warning instead of being walked again.
fn collect_rule_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let walker = WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.loop_ancestor().is_some() => {
                warn!(error = %e, "symlink loop in rules directory, skipping");
                continue;
            }
            Err(e) => {
                let path = e.path().unwrap_or(dir).to_path_buf();
                return Err(RuleError::Io(e.into()).in_file(&path));
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let is_yaml = matches!(
            entry.path().extension().and_then(|e| e.to_str()),
            Some("yml" | "yaml")
        );
        if is_yaml {
            out.push(entry.into_path());
        }
    }
    Ok(())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

//! Scoped, time-bounded verdict suppressions.
//!
//! Exceptions are loaded once per scan and matched first-match-wins in
//! declaration order against (rule_id, scope, resource). An exception whose
//! expiry predates scan start is inert.

use crate::scan::error::{ScanError, ScanResult};
use crate::traits::FileSystem;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const SELECTOR_KEYS: [&str; 4] = ["account", "region", "service", "resource"];

/// What a matching exception does to the result. Suppression to SKIPPED is
/// currently the only effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionEffect {
    #[default]
    Skip,
}

/// One exception entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exception {
    pub id: String,

    /// Rule id to match: exact, or with `*` wildcards
    pub rule_id: String,

    /// Key/value constraints over account/region/service/resource; every
    /// listed key must match exactly
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    #[serde(default)]
    pub effect: ExceptionEffect,

    pub reason: String,

    /// Past expiry makes the exception inert
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ExceptionDocument {
    #[serde(default)]
    exceptions: Vec<Exception>,
}

/// The (rule, resource, scope) coordinate an exception is tested against
#[derive(Debug, Clone, Copy)]
pub struct ExceptionTarget<'a> {
    pub account: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    pub resource: &'a str,
}

impl<'a> ExceptionTarget<'a> {
    fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "account" => Some(self.account),
            "region" => Some(self.region),
            "service" => Some(self.service),
            "resource" => Some(self.resource),
            _ => None,
        }
    }
}

/// All loaded exceptions with their compiled rule patterns. Read-only for
/// the scan's duration.
#[derive(Debug, Default)]
pub struct ExceptionSet {
    exceptions: Vec<Exception>,
    patterns: Vec<Regex>,
}

impl ExceptionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load an exception document from a YAML file
    pub fn load_file(fs: &dyn FileSystem, path: &Path) -> ScanResult<Self> {
        let contents = fs
            .read_to_string(path)
            .map_err(|e| ScanError::ExceptionLoad(e.to_string()))?;

        let document: ExceptionDocument =
            serde_yaml::from_str(&contents).map_err(|e| ScanError::ExceptionLoad(e.to_string()))?;

        Self::from_exceptions(document.exceptions)
    }

    pub fn from_exceptions(exceptions: Vec<Exception>) -> ScanResult<Self> {
        let mut patterns = Vec::with_capacity(exceptions.len());

        for exception in &exceptions {
            for key in exception.selector.keys() {
                if !SELECTOR_KEYS.contains(&key.as_str()) {
                    return Err(ScanError::ExceptionLoad(format!(
                        "exception '{}' has unknown selector key '{}'",
                        exception.id, key
                    )));
                }
            }

            patterns.push(compile_wildcard(&exception.rule_id));
        }

        Ok(Self {
            exceptions,
            patterns,
        })
    }

    pub fn len(&self) -> usize {
        self.exceptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exceptions.is_empty()
    }

    /// First unexpired exception matching the rule and target, in
    /// declaration order
    pub fn match_for(
        &self,
        rule_id: &str,
        target: &ExceptionTarget<'_>,
        scan_start: DateTime<Utc>,
    ) -> Option<&Exception> {
        self.exceptions
            .iter()
            .zip(&self.patterns)
            .find(|(exception, pattern)| {
                if let Some(expires_at) = exception.expires_at {
                    // Expired before the scan started: treated as absent
                    if expires_at < scan_start {
                        return false;
                    }
                }

                if !pattern.is_match(rule_id) {
                    return false;
                }

                exception
                    .selector
                    .iter()
                    .all(|(key, value)| target.attribute(key) == Some(value.as_str()))
            })
            .map(|(exception, _)| exception)
    }
}

/// Compile a rule pattern: literal text with `*` matching any run of
/// characters, anchored at both ends
fn compile_wildcard(pattern: &str) -> Regex {
    let mut escaped = String::with_capacity(pattern.len() + 8);
    escaped.push('^');

    for (i, part) in pattern.split('*').enumerate() {
        if i > 0 {
            escaped.push_str(".*");
        }
        escaped.push_str(&regex::escape(part));
    }

    escaped.push('$');
    // Escaped literals and `.*` always form a valid pattern
    Regex::new(&escaped).expect("wildcard pattern compiles")
}

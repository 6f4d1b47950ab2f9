//! Issue records emitted by external detectors.
//!
//! Issues are read-only inputs to the fix pipeline: detectors produce them
//! with 1-based line/column positions and must not mutate them after
//! emission. The serialized field names are the stable cross-process schema.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a detected issue. The derived ordering is used for
/// deterministic tie-breaking: `Critical > Error > Warning > Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Category assigned by the detector that found the issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Performance,
    Maintainability,
    Complexity,
    Style,
    Error,
    Type,
    Logic,
    Compatibility,
    Deprecation,
    BestPractice,
    Other,
}

/// How a fix for an issue is expected to be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixKind {
    /// Direct text replacement: formatting, style, single-token rewrites.
    Simple,
    /// Structural rewrites that affect surrounding code.
    Complex,
    /// Requires an LLM collaborator to propose the replacement.
    LlmAssisted,
    /// Cannot be automated; surfaced for a human.
    Manual,
}

/// A problem detected in source code at a specific location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    /// Path of the file the issue was found in, as reported by the detector.
    #[serde(default)]
    pub file: String,
    /// 1-based line of the issue location.
    pub line: u32,
    /// 1-based column of the issue location.
    pub column: u32,
    #[serde(default)]
    pub end_line: Option<u32>,
    #[serde(default)]
    pub end_column: Option<u32>,
    pub message: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    pub category: Category,
    /// Name of the detector/tool that found the issue.
    #[serde(default)]
    pub source: String,
    /// Rule identifier within the detector (e.g. `W0612`, `F401`).
    #[serde(default)]
    pub rule_id: String,
    #[serde(default)]
    pub fixable: bool,
    #[serde(default = "FixKind::default_simple")]
    pub fix_type: FixKind,
    /// Optional code excerpt around the location.
    #[serde(default)]
    pub snippet: Option<String>,
}

impl FixKind {
    fn default_simple() -> Self {
        FixKind::Simple
    }
}

impl Issue {
    /// Create an issue with a fresh id and the given location and message.
    /// Remaining fields start from neutral defaults and are set by the
    /// detector before emission.
    pub fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file: String::new(),
            line,
            column,
            end_line: None,
            end_column: None,
            message: message.into(),
            description: String::new(),
            severity: Severity::Info,
            category: Category::Other,
            source: String::new(),
            rule_id: String::new(),
            fixable: false,
            fix_type: FixKind::Simple,
            snippet: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = rule_id.into();
        self
    }

    pub fn fixable(mut self, fix_type: FixKind) -> Self {
        self.fixable = true;
        self.fix_type = fix_type;
        self
    }
}

/// Remove duplicate issues, keyed on (line, rule_id, message). Detectors
/// wrapping several tools routinely report the same finding twice.
pub fn dedup_issues(issues: Vec<Issue>) -> Vec<Issue> {
    let mut seen = std::collections::HashSet::new();
    issues
        .into_iter()
        .filter(|issue| seen.insert((issue.line, issue.rule_id.clone(), issue.message.clone())))
        .collect()
}

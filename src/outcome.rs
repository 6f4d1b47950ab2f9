//! Pipeline output: warnings and the terminal fix outcome.
//!
//! Warnings are informational: dropped conflicts, stale ranges, degraded
//! generators. The single `error` slot is reserved for a complete inability
//! to produce code and is the only signal front-ends use to stop automated
//! action (e.g. skip writing `fixed_code` back to storage).

use crate::edit::EditDescriptor;
use crate::pipeline::Stage;
use crate::resolve::{RejectReason, Rejection};
use serde::Serialize;
use similar::TextDiff;
use thiserror::Error;
use uuid::Uuid;

/// A non-fatal condition recorded while fixing one file.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    #[error("edit {dropped} dropped: conflicts with accepted edit {kept} ({kept_description})")]
    Conflict {
        dropped: Uuid,
        kept: Uuid,
        kept_description: String,
    },

    #[error("edit {edit} dropped: whole-file edit {kept} accepted for this stage")]
    WholeFileExclusive { edit: Uuid, kept: Uuid },

    #[error("edit {edit} dropped: {detail}")]
    StaleRange { edit: Uuid, detail: String },

    #[error("edit {edit} dropped: {detail}")]
    OutOfBounds { edit: Uuid, detail: String },

    #[error("generator {name} failed: {reason}")]
    GeneratorFailure { name: String, reason: String },

    #[error("generator {name} timed out after {timeout_ms} ms")]
    GeneratorTimeout { name: String, timeout_ms: u64 },

    #[error("structural parse failure, structural generators disabled: {detail}")]
    StructuralParseFailure { detail: String },

    #[error("empty input, nothing to fix")]
    EmptyInput,

    #[error("cancelled before stage {stage}")]
    Cancelled { stage: Stage },
}

impl Warning {
    /// Render a resolver/applicator rejection as a warning.
    pub(crate) fn from_rejection(rejection: &Rejection) -> Self {
        let edit = rejection.edit.id;
        match &rejection.reason {
            RejectReason::Conflict {
                kept,
                kept_description,
            } => Warning::Conflict {
                dropped: edit,
                kept: *kept,
                kept_description: kept_description.clone(),
            },
            RejectReason::WholeFileExclusive { kept } => Warning::WholeFileExclusive {
                edit,
                kept: *kept,
            },
            reason @ RejectReason::StaleRange { .. } => Warning::StaleRange {
                edit,
                detail: reason.to_string(),
            },
            reason @ RejectReason::OutOfBounds(_) => Warning::OutOfBounds {
                edit,
                detail: reason.to_string(),
            },
        }
    }
}

/// An edit that was actually written, tagged with the stage that applied it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedEdit {
    pub stage: Stage,
    #[serde(flatten)]
    pub edit: EditDescriptor,
}

/// The code as it stood after one stage completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSnapshot {
    pub stage: Stage,
    pub code: String,
}

/// Terminal result of running the pipeline on one file. The only artifact
/// that survives a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixOutcome {
    pub original_code: String,
    pub fixed_code: String,
    /// Every accepted edit across every stage, in application order.
    pub applied: Vec<AppliedEdit>,
    pub warnings: Vec<Warning>,
    /// Running code after each stage that ran.
    pub snapshots: Vec<StageSnapshot>,
    /// Set only for unrecoverable conditions; everything else degrades to
    /// warnings.
    pub error: Option<String>,
    pub success: bool,
}

impl FixOutcome {
    /// An outcome that never entered the pipeline (e.g. unreadable input).
    pub fn failed(original_code: impl Into<String>, error: impl Into<String>) -> Self {
        let original_code = original_code.into();
        Self {
            fixed_code: original_code.clone(),
            original_code,
            applied: Vec::new(),
            warnings: Vec::new(),
            snapshots: Vec::new(),
            error: Some(error.into()),
            success: false,
        }
    }

    /// Unified diff between original and fixed code.
    pub fn unified_diff(&self) -> String {
        TextDiff::from_lines(&self.original_code, &self.fixed_code)
            .unified_diff()
            .context_radius(3)
            .header("original", "fixed")
            .to_string()
    }
}

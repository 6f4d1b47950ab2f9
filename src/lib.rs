//! Codefix: structured edit application for automated code fixing
//!
//! A deterministic engine that turns detector findings into applied text
//! changes through a staged pipeline.
//!
//! # Architecture
//!
//! Every fix compiles down to a single primitive: [`EditDescriptor`], a
//! verified span replacement with an expected before-text and a confidence.
//! Intelligence lives in the generators that propose edits; conflict
//! resolution and application only ever see this one shape.
//!
//! Fixing runs in five fixed stages (targeted, imports, style, bug
//! patterns, format). Each stage collects candidate edits against the
//! current code, resolves them into a non-overlapping [`PatchPlan`], and
//! applies the plan by forward concatenation before the next stage begins.
//!
//! # Safety
//!
//! - Every edit verifies its expected text before applying; stale edits
//!   are dropped, never written
//! - Accepted plans are non-overlapping and position-sorted by construction
//! - Identical inputs produce identical outputs, independent of generator
//!   completion order
//! - Generator failures and timeouts degrade to warnings, not aborts
//!
//! # Example
//!
//! ```no_run
//! use codefix::{Capabilities, FixKind, Issue, Orchestrator, Severity};
//! use codefix::heuristics::default_registry;
//!
//! # async fn run() {
//! let orchestrator = Orchestrator::new(default_registry(), Capabilities::default());
//!
//! let issue = Issue::new(1, 1, "Unused import: os")
//!     .with_rule("F401")
//!     .with_severity(Severity::Warning)
//!     .fixable(FixKind::Simple);
//!
//! let outcome = orchestrator.fix_code("import os\nprint('hi')\n", &[issue]).await;
//! println!("{}", outcome.unified_diff());
//! # }
//! ```

pub mod apply;
pub mod document;
pub mod edit;
pub mod generate;
pub mod heuristics;
pub mod issue;
pub mod outcome;
pub mod pipeline;
pub mod resolve;
pub mod runner;

// Re-exports
pub use apply::{apply, Applied, ApplyError};
pub use document::{Document, DocumentError, Line, Position, Span};
pub use edit::{EditDescriptor, MalformedEdit};
pub use generate::{
    Capabilities, FixGenerator, FixRequest, FnGenerator, GeneratorError, GeneratorKind,
    GeneratorRegistry,
};
pub use issue::{dedup_issues, Category, FixKind, Issue, Severity};
pub use outcome::{AppliedEdit, FixOutcome, StageSnapshot, Warning};
pub use pipeline::{CancelFlag, Orchestrator, Stage};
pub use resolve::{
    resolve, Candidate, PatchPlan, PlannedEdit, RejectReason, Rejection, StagePriority,
};
pub use runner::{fix_files, FileInput, FileOutcome, DEFAULT_CONCURRENCY};

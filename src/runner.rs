//! Bounded-concurrency driver over in-memory file inputs.
//!
//! The core never touches the filesystem: front-ends read files, hand the
//! contents here, and decide what to do with each [`FixOutcome`]. Files are
//! fixed concurrently up to a bound; within a file the pipeline stays
//! sequential.

use crate::issue::{dedup_issues, Issue};
use crate::outcome::FixOutcome;
use crate::pipeline::{CancelFlag, Orchestrator};
use futures::stream::{self, StreamExt};
use tracing::{debug, info};

pub const DEFAULT_CONCURRENCY: usize = 8;

/// One file's worth of work: its contents and the issues detected in it.
#[derive(Debug, Clone)]
pub struct FileInput {
    pub path: String,
    pub code: String,
    pub issues: Vec<Issue>,
}

/// The outcome for one input, keyed by its path.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: String,
    pub outcome: FixOutcome,
}

/// Fix a batch of files, at most `concurrency` in flight at a time.
/// Results come back sorted by path regardless of completion order.
///
/// Cancellation is cooperative: files already in flight finish their
/// current stage, files not yet started produce a partial outcome with a
/// cancellation warning and no applied edits.
pub async fn fix_files(
    orchestrator: &Orchestrator,
    inputs: Vec<FileInput>,
    concurrency: usize,
    cancel: &CancelFlag,
) -> Vec<FileOutcome> {
    info!(files = inputs.len(), concurrency, "starting batch fix");
    let mut outcomes: Vec<FileOutcome> = stream::iter(inputs)
        .map(|input| async move {
            let issues = dedup_issues(input.issues);
            debug!(path = %input.path, issues = issues.len(), "fixing file");
            let outcome = orchestrator
                .fix_code_with_cancel(&input.code, &issues, cancel)
                .await;
            FileOutcome {
                path: input.path,
                outcome,
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    outcomes.sort_by(|a, b| a.path.cmp(&b.path));
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::Capabilities;
    use crate::heuristics::default_registry;
    use crate::outcome::Warning;

    fn input(path: &str, code: &str) -> FileInput {
        FileInput {
            path: path.into(),
            code: code.into(),
            issues: Vec::new(),
        }
    }

    #[tokio::test]
    async fn fixes_files_and_sorts_by_path() {
        let orchestrator = Orchestrator::new(default_registry(), Capabilities::default());
        let inputs = vec![
            input("b.py", "x = 1  \n"),
            input("a.py", "y = 2"),
        ];
        let outcomes = fix_files(&orchestrator, inputs, 4, &CancelFlag::new()).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].path, "a.py");
        assert_eq!(outcomes[1].path, "b.py");
        assert_eq!(outcomes[0].outcome.fixed_code, "y = 2\n");
        assert_eq!(outcomes[1].outcome.fixed_code, "x = 1\n");
    }

    #[tokio::test]
    async fn duplicate_issues_are_fixed_once() {
        use crate::issue::{FixKind, Issue};
        let orchestrator = Orchestrator::new(default_registry(), Capabilities::default());
        let issue = Issue::new(1, 1, "Unused import: os")
            .with_rule("F401")
            .fixable(FixKind::Simple);
        let mut duplicate = issue.clone();
        duplicate.id = uuid::Uuid::new_v4();

        let inputs = vec![FileInput {
            path: "dup.py".into(),
            code: "import os\nprint('hi')\n".into(),
            issues: vec![issue, duplicate],
        }];
        let outcomes = fix_files(&orchestrator, inputs, 1, &CancelFlag::new()).await;

        assert_eq!(outcomes[0].outcome.fixed_code, "print('hi')\n");
        assert_eq!(outcomes[0].outcome.applied.len(), 1);
        assert!(outcomes[0]
            .outcome
            .warnings
            .iter()
            .all(|w| !matches!(w, Warning::Conflict { .. })));
    }

    #[tokio::test]
    async fn cancelled_batch_produces_wellformed_partials() {
        let orchestrator = Orchestrator::new(default_registry(), Capabilities::default());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcomes = fix_files(
            &orchestrator,
            vec![input("a.py", "x = 1  \n")],
            2,
            &cancel,
        )
        .await;

        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0].outcome;
        assert_eq!(outcome.fixed_code, outcome.original_code);
        assert!(outcome.applied.is_empty());
        assert!(outcome
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::Cancelled { .. })));
        assert!(outcome.error.is_none());
    }
}

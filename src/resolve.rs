//! Conflict resolution: reduce a batch of candidate edits to a
//! non-overlapping, position-ordered patch plan.
//!
//! Resolution is deterministic by construction: candidates are sorted on
//! explicit `(start, end, insertion order)` keys and every tie-break is an
//! ordered comparison, so repeated runs over identical input produce
//! byte-identical plans regardless of map iteration order.

use crate::document::{Document, DocumentError};
use crate::edit::EditDescriptor;
use crate::issue::Severity;
use std::cmp::Ordering;
use std::ops::Range;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Priority of the pipeline stage (or generator class) a candidate came
/// from. Higher wins equal-confidence conflicts: targeted fixes beat import
/// normalization, which beats style heuristics, and so on down to the
/// formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StagePriority {
    Formatter,
    BugHeuristic,
    StyleHeuristic,
    ImportNormalization,
    TargetedFix,
}

/// A candidate edit tagged with the resolution metadata the edit itself
/// does not carry. `severity` comes from the Issue the edit addresses, if
/// any; the resolver never mutates confidences.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub edit: EditDescriptor,
    pub priority: StagePriority,
    pub severity: Option<Severity>,
}

impl Candidate {
    pub fn new(edit: EditDescriptor, priority: StagePriority) -> Self {
        Self {
            edit,
            priority,
            severity: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Why an edit was excluded from a plan or from application.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error("conflicts with accepted edit {kept} ({kept_description})")]
    Conflict {
        kept: Uuid,
        kept_description: String,
    },

    #[error("a whole-file edit {kept} was accepted for this stage")]
    WholeFileExclusive { kept: Uuid },

    #[error("range no longer resolves in this document: {0}")]
    OutOfBounds(#[from] DocumentError),

    #[error("stale range: expected {expected:?}, found {found:?}")]
    StaleRange { expected: String, found: String },
}

/// An edit excluded from the plan, with the reason.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub edit: EditDescriptor,
    pub reason: RejectReason,
}

/// An accepted edit located to a byte range in the stage's document.
#[derive(Debug, Clone)]
pub struct PlannedEdit {
    pub edit: EditDescriptor,
    pub range: Range<usize>,
}

/// A resolved, non-overlapping, ascending set of edits plus everything
/// that was turned away.
#[derive(Debug, Clone, Default)]
pub struct PatchPlan {
    pub accepted: Vec<PlannedEdit>,
    pub rejected: Vec<Rejection>,
}

impl PatchPlan {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

struct Located {
    edit: EditDescriptor,
    priority: StagePriority,
    severity: Option<Severity>,
    seq: usize,
    range: Range<usize>,
}

impl Located {
    fn is_insertion(&self) -> bool {
        self.range.start == self.range.end
    }

    /// Whether this candidate displaces an already accepted edit it
    /// overlaps. Strictly greater confidence wins; on equal confidence the
    /// tie-break is stage priority, then issue severity, then batch
    /// insertion order (earlier wins).
    fn beats(&self, kept: &Located) -> bool {
        match self
            .edit
            .confidence
            .partial_cmp(&kept.edit.confidence)
            .unwrap_or(Ordering::Equal)
        {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match self.priority.cmp(&kept.priority) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => match self.severity.cmp(&kept.severity) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => self.seq < kept.seq,
                },
            },
        }
    }
}

/// Resolve one stage's batch of candidates into a [`PatchPlan`].
///
/// Whole-file edits are mutually exclusive with everything else proposed in
/// the same batch: if any are present, the single best one is kept and
/// every other candidate is rejected. Otherwise candidates are swept left
/// to right, keeping a frontier at the end of the last accepted edit; an
/// overlapping candidate replaces the incumbent only when it outranks it.
pub fn resolve(doc: &Document, batch: Vec<Candidate>) -> PatchPlan {
    let mut plan = PatchPlan::default();
    let mut located = Vec::with_capacity(batch.len());

    for (seq, candidate) in batch.into_iter().enumerate() {
        match doc.locate(candidate.edit.span) {
            Ok(range) => located.push(Located {
                edit: candidate.edit,
                priority: candidate.priority,
                severity: candidate.severity,
                seq,
                range,
            }),
            Err(err) => {
                debug!(edit = %candidate.edit.id, error = %err, "edit range out of bounds");
                plan.rejected.push(Rejection {
                    edit: candidate.edit,
                    reason: RejectReason::OutOfBounds(err),
                });
            }
        }
    }

    if located.iter().any(|c| doc.is_whole_file(&c.range)) {
        return resolve_whole_file(doc, located, plan);
    }

    located.sort_by(|a, b| {
        (a.range.start, a.range.end, a.seq).cmp(&(b.range.start, b.range.end, b.seq))
    });

    let mut accepted: Vec<Located> = Vec::new();
    for candidate in located {
        let Some(incumbent) = accepted.last() else {
            accepted.push(candidate);
            continue;
        };

        let conflict = candidate.range.start < incumbent.range.end
            || (candidate.is_insertion()
                && incumbent.is_insertion()
                && candidate.range.start == incumbent.range.start);

        if !conflict {
            accepted.push(candidate);
        } else if candidate.beats(incumbent) {
            let displaced = accepted.pop().map(|kept| Rejection {
                reason: RejectReason::Conflict {
                    kept: candidate.edit.id,
                    kept_description: candidate.edit.description.clone(),
                },
                edit: kept.edit,
            });
            plan.rejected.extend(displaced);
            accepted.push(candidate);
        } else {
            debug!(edit = %candidate.edit.id, kept = %incumbent.edit.id, "dropping conflicting edit");
            plan.rejected.push(Rejection {
                reason: RejectReason::Conflict {
                    kept: incumbent.edit.id,
                    kept_description: incumbent.edit.description.clone(),
                },
                edit: candidate.edit,
            });
        }
    }

    plan.accepted = accepted
        .into_iter()
        .map(|c| PlannedEdit {
            edit: c.edit,
            range: c.range,
        })
        .collect();
    plan
}

/// Whole-file partition: keep the single best whole-file edit by
/// (confidence, stage priority, insertion order) and reject every other
/// candidate in the batch.
fn resolve_whole_file(doc: &Document, located: Vec<Located>, mut plan: PatchPlan) -> PatchPlan {
    let mut best: Option<&Located> = None;
    for candidate in located.iter().filter(|c| doc.is_whole_file(&c.range)) {
        best = match best {
            None => Some(candidate),
            Some(incumbent) => {
                let ord = candidate
                    .edit
                    .confidence
                    .partial_cmp(&incumbent.edit.confidence)
                    .unwrap_or(Ordering::Equal)
                    .then(candidate.priority.cmp(&incumbent.priority));
                // Equal confidence and priority: earlier insertion wins,
                // and the incumbent was inserted earlier.
                if ord == Ordering::Greater {
                    Some(candidate)
                } else {
                    Some(incumbent)
                }
            }
        };
    }
    let Some(best) = best else {
        return plan;
    };
    let (best_seq, kept_id) = (best.seq, best.edit.id);
    debug!(kept = %kept_id, "whole-file edit excludes all other candidates");

    for candidate in located {
        if candidate.seq == best_seq {
            plan.accepted.push(PlannedEdit {
                edit: candidate.edit,
                range: candidate.range,
            });
        } else {
            plan.rejected.push(Rejection {
                edit: candidate.edit,
                reason: RejectReason::WholeFileExclusive { kept: kept_id },
            });
        }
    }
    plan
}

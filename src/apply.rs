//! Patch application: turn a resolved plan into new text.
//!
//! Every accepted edit is verified against the *original* snapshot before
//! anything is rewritten: if the slice at its range no longer matches the
//! descriptor's `original_text`, the edit is stale and dropped; application
//! never aborts over one rotten edit. Output is built by forward
//! concatenation over the untouched original, so offsets never have to be
//! remapped against partially rewritten text.

use crate::document::Document;
use crate::edit::EditDescriptor;
use crate::resolve::{PatchPlan, RejectReason, Rejection};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The output length did not match the accepted edits' arithmetic.
    /// Unreachable when the plan honors the non-overlap invariant.
    #[error("length invariant violated: expected {expected} bytes, produced {actual}")]
    LengthInvariant { expected: usize, actual: usize },
}

/// Result of applying a plan to one document.
#[derive(Debug, Clone)]
pub struct Applied {
    pub output: String,
    /// Edits actually written, in ascending position order.
    pub applied: Vec<EditDescriptor>,
    /// Edits dropped because their expected text no longer matched.
    pub stale: Vec<Rejection>,
}

/// Apply a conflict-free, position-sorted plan to the document it was
/// resolved against.
pub fn apply(doc: &Document, plan: &PatchPlan) -> Result<Applied, ApplyError> {
    let mut applied = Vec::with_capacity(plan.accepted.len());
    let mut stale = Vec::new();
    let mut live = Vec::with_capacity(plan.accepted.len());

    for planned in &plan.accepted {
        let found = doc.slice(planned.range.clone());
        if found != planned.edit.original_text {
            warn!(
                edit = %planned.edit.id,
                expected = %planned.edit.original_text,
                found = %found,
                "stale range, edit dropped"
            );
            stale.push(Rejection {
                edit: planned.edit.clone(),
                reason: RejectReason::StaleRange {
                    expected: planned.edit.original_text.clone(),
                    found: found.to_string(),
                },
            });
            continue;
        }
        live.push(planned);
    }

    let mut output = String::with_capacity(doc.len());
    let mut cursor = 0usize;
    for planned in &live {
        output.push_str(doc.slice(cursor..planned.range.start));
        output.push_str(&planned.edit.replacement_text);
        cursor = planned.range.end;
        applied.push(planned.edit.clone());
    }
    output.push_str(doc.slice(cursor..doc.len()));

    let removed: usize = live.iter().map(|p| p.range.len()).sum();
    let inserted: usize = live
        .iter()
        .map(|p| p.edit.replacement_text.len())
        .sum();
    let expected = doc.len() - removed + inserted;
    if output.len() != expected {
        return Err(ApplyError::LengthInvariant {
            expected,
            actual: output.len(),
        });
    }

    debug!(applied = applied.len(), stale = stale.len(), "plan applied");
    Ok(Applied {
        output,
        applied,
        stale,
    })
}

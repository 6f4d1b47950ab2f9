//! The candidate-change primitive: an immutable edit descriptor.
//!
//! Every fix a generator proposes compiles down to one [`EditDescriptor`]:
//! a span, the text expected at that span, and the replacement. Intelligence
//! lives in how generators pick spans; resolution and application only ever
//! see this one shape.
//!
//! Descriptors are validated at construction. A reversed range, an
//! out-of-bounds position, or a confidence outside `[0, 1]` is rejected as
//! [`MalformedEdit`] on the spot rather than surfacing later as a corrupt
//! rewrite.

use crate::document::{Document, DocumentError, Position, Span};
use crate::issue::FixKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedEdit {
    #[error("edit range is reversed: {start} > {end}")]
    ReversedRange { start: Position, end: Position },

    #[error("edit range outside document: {0}")]
    OutOfBounds(#[from] DocumentError),

    #[error("confidence {value} outside [0, 1]")]
    ConfidenceOutOfRange { value: f64 },
}

/// An immutable candidate text change.
///
/// `original_text` is the slice expected at `span` in the document the edit
/// was derived from; the applicator re-checks it before applying, which is
/// what makes cross-stage position reuse safe to reject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[must_use = "an EditDescriptor does nothing until resolved and applied"]
pub struct EditDescriptor {
    pub id: Uuid,
    pub description: String,
    #[serde(flatten)]
    pub span: Span,
    pub original_text: String,
    pub replacement_text: String,
    pub fix_type: FixKind,
    pub confidence: f64,
}

impl EditDescriptor {
    /// Create a descriptor against a document, capturing `original_text`
    /// from the document at the span.
    pub fn new(
        doc: &Document,
        span: Span,
        replacement_text: impl Into<String>,
        description: impl Into<String>,
        fix_type: FixKind,
        confidence: f64,
    ) -> Result<Self, MalformedEdit> {
        Self::check_span(span)?;
        Self::check_confidence(confidence)?;
        let range = doc.locate(span)?;
        Ok(Self {
            id: Uuid::new_v4(),
            description: description.into(),
            span,
            original_text: doc.slice(range).to_string(),
            replacement_text: replacement_text.into(),
            fix_type,
            confidence,
        })
    }

    /// Create a descriptor from externally supplied parts (e.g. received
    /// over the wire). Range direction and confidence are checked here;
    /// document bounds are checked at resolution.
    pub fn from_parts(
        span: Span,
        original_text: impl Into<String>,
        replacement_text: impl Into<String>,
        description: impl Into<String>,
        fix_type: FixKind,
        confidence: f64,
    ) -> Result<Self, MalformedEdit> {
        Self::check_span(span)?;
        Self::check_confidence(confidence)?;
        Ok(Self {
            id: Uuid::new_v4(),
            description: description.into(),
            span,
            original_text: original_text.into(),
            replacement_text: replacement_text.into(),
            fix_type,
            confidence,
        })
    }

    /// Descriptor replacing the entire document (formatter output).
    pub fn whole_file(
        doc: &Document,
        replacement_text: impl Into<String>,
        description: impl Into<String>,
        fix_type: FixKind,
        confidence: f64,
    ) -> Result<Self, MalformedEdit> {
        Self::new(
            doc,
            doc.whole_span(),
            replacement_text,
            description,
            fix_type,
            confidence,
        )
    }

    pub fn is_insertion(&self) -> bool {
        self.span.is_insertion()
    }

    fn check_span(span: Span) -> Result<(), MalformedEdit> {
        if span.start > span.end {
            return Err(MalformedEdit::ReversedRange {
                start: span.start,
                end: span.end,
            });
        }
        Ok(())
    }

    fn check_confidence(confidence: f64) -> Result<(), MalformedEdit> {
        if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
            return Err(MalformedEdit::ConfidenceOutOfRange { value: confidence });
        }
        Ok(())
    }
}

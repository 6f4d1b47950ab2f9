//! Immutable text snapshot with line/column to byte-offset arithmetic.
//!
//! All positions use the detector convention: 1-based line and column,
//! columns counted in bytes within the line. Spans are inclusive-start,
//! exclusive-end in document order; a span with `start == end` is a pure
//! insertion point. Offsets are always resolved against this snapshot, never
//! against partially rewritten text, which is what keeps position arithmetic
//! valid under repeated mutation.

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// A 1-based line/column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A half-open `[start, end)` region in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Span covering `[line:start_col, line:end_col)` on a single line.
    pub fn on_line(line: u32, start_col: u32, end_col: u32) -> Self {
        Self::new(Position::new(line, start_col), Position::new(line, end_col))
    }

    /// Zero-width insertion point.
    pub fn insertion(at: Position) -> Self {
        Self::new(at, at)
    }

    pub fn is_insertion(&self) -> bool {
        self.start == self.end
    }
}

// Wire form per the cross-process schema: `line`, `column`, `end_line`,
// `end_column`, flattened into the containing edit record.
impl Serialize for Span {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Span", 4)?;
        s.serialize_field("line", &self.start.line)?;
        s.serialize_field("column", &self.start.column)?;
        s.serialize_field("end_line", &self.end.line)?;
        s.serialize_field("end_column", &self.end.column)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for Span {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SpanVisitor;

        impl<'de> Visitor<'de> for SpanVisitor {
            type Value = Span;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map with line, column, end_line, end_column")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Span, A::Error> {
                let mut line = None;
                let mut column = None;
                let mut end_line = None;
                let mut end_column = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "line" => line = Some(map.next_value()?),
                        "column" => column = Some(map.next_value()?),
                        "end_line" => end_line = Some(map.next_value()?),
                        "end_column" => end_column = Some(map.next_value()?),
                        _ => {
                            let _ = map.next_value::<de::IgnoredAny>()?;
                        }
                    }
                }
                let line = line.ok_or_else(|| de::Error::missing_field("line"))?;
                let column = column.ok_or_else(|| de::Error::missing_field("column"))?;
                let end_line = end_line.ok_or_else(|| de::Error::missing_field("end_line"))?;
                let end_column =
                    end_column.ok_or_else(|| de::Error::missing_field("end_column"))?;
                Ok(Span::new(
                    Position::new(line, column),
                    Position::new(end_line, end_column),
                ))
            }
        }

        deserializer.deserialize_map(SpanVisitor)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("position {position} is outside the document ({lines} lines)")]
    OutOfBounds { position: Position, lines: usize },

    #[error("position {position} does not fall on a character boundary")]
    NotCharBoundary { position: Position },
}

/// An immutable view of one file's text for a single pipeline stage.
///
/// Built once per stage from the previous stage's output; all spans produced
/// during the stage are resolved against it.
#[derive(Debug, Clone)]
pub struct Document {
    text: String,
    /// Byte offset of the start of each line. If the text ends with a
    /// newline, the final entry is `text.len()`, standing for the empty
    /// slot after the last newline (insertion target for appends).
    line_starts: Vec<usize>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { text, line_starts }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of addressable lines, counting the empty slot after a
    /// trailing newline.
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Position one past the end of the document (valid insertion target).
    pub fn end_position(&self) -> Position {
        let last = self.line_starts.len() - 1;
        let column = (self.text.len() - self.line_starts[last]) as u32 + 1;
        Position::new(last as u32 + 1, column)
    }

    /// Span covering the entire document.
    pub fn whole_span(&self) -> Span {
        Span::new(Position::new(1, 1), self.end_position())
    }

    /// Resolve a position to a byte offset.
    ///
    /// A column may point one past the end of its line (the insertion point
    /// before the newline, or end of file on the last line), and line
    /// `line_count() + 1` column 1 addresses end of file; both are how
    /// detectors express appends.
    pub fn offset(&self, position: Position) -> Result<usize, DocumentError> {
        if position.line == 0 || position.column == 0 {
            return Err(DocumentError::OutOfBounds {
                position,
                lines: self.line_count(),
            });
        }
        let idx = position.line as usize - 1;
        let offset = if idx < self.line_starts.len() {
            let line_end = self
                .line_starts
                .get(idx + 1)
                .copied()
                .unwrap_or(self.text.len());
            let offset = self.line_starts[idx] + position.column as usize - 1;
            if offset > line_end {
                return Err(DocumentError::OutOfBounds {
                    position,
                    lines: self.line_count(),
                });
            }
            offset
        } else if idx == self.line_starts.len() && position.column == 1 {
            self.text.len()
        } else {
            return Err(DocumentError::OutOfBounds {
                position,
                lines: self.line_count(),
            });
        };

        if !self.text.is_char_boundary(offset) {
            return Err(DocumentError::NotCharBoundary { position });
        }
        Ok(offset)
    }

    /// Resolve a span to a byte range. The caller guarantees `start <= end`
    /// in document order; a reversed span resolves to a reversed range and
    /// is reported as out of bounds.
    pub fn locate(&self, span: Span) -> Result<Range<usize>, DocumentError> {
        let start = self.offset(span.start)?;
        let end = self.offset(span.end)?;
        if start > end {
            return Err(DocumentError::OutOfBounds {
                position: span.end,
                lines: self.line_count(),
            });
        }
        Ok(start..end)
    }

    /// Slice the snapshot at an already-located range.
    pub fn slice(&self, range: Range<usize>) -> &str {
        &self.text[range]
    }

    /// Whether a located range covers the entire (non-empty) document.
    pub fn is_whole_file(&self, range: &Range<usize>) -> bool {
        range.start == 0 && range.end == self.text.len() && !self.text.is_empty()
    }

    /// Iterate lines with their 1-based numbers, content, and line ending.
    pub fn lines(&self) -> impl Iterator<Item = Line<'_>> {
        let text = self.text.as_str();
        self.line_starts
            .iter()
            .enumerate()
            .filter_map(move |(i, &start)| {
                let end = self
                    .line_starts
                    .get(i + 1)
                    .copied()
                    .unwrap_or(text.len());
                if start == end && i + 1 == self.line_starts.len() {
                    // Empty slot after a trailing newline, not a real line.
                    return None;
                }
                let raw = &text[start..end];
                let (content, ending) = match raw.strip_suffix("\r\n") {
                    Some(c) => (c, "\r\n"),
                    None => match raw.strip_suffix('\n') {
                        Some(c) => (c, "\n"),
                        None => (raw, ""),
                    },
                };
                Some(Line {
                    number: i as u32 + 1,
                    content,
                    ending,
                })
            })
    }
}

/// One line of a document, line ending split out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    /// 1-based line number.
    pub number: u32,
    /// Line content without its ending.
    pub content: &'a str,
    /// `"\n"`, `"\r\n"`, or `""` for an unterminated final line.
    pub ending: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_one_based() {
        let doc = Document::new("ab\ncd\n");
        assert_eq!(doc.offset(Position::new(1, 1)).unwrap(), 0);
        assert_eq!(doc.offset(Position::new(1, 3)).unwrap(), 2); // the newline
        assert_eq!(doc.offset(Position::new(2, 1)).unwrap(), 3);
        assert_eq!(doc.offset(Position::new(2, 2)).unwrap(), 4);
    }

    #[test]
    fn column_past_line_end_is_rejected() {
        let doc = Document::new("ab\ncd\n");
        assert!(doc.offset(Position::new(1, 5)).is_err());
        assert!(doc.offset(Position::new(9, 1)).is_err());
        assert!(doc.offset(Position::new(0, 1)).is_err());
    }

    #[test]
    fn end_of_file_insertion_points() {
        // Unterminated final line: one line, append addressed past it.
        let doc = Document::new("abc");
        assert_eq!(doc.offset(Position::new(1, 4)).unwrap(), 3);
        assert_eq!(doc.offset(Position::new(2, 1)).unwrap(), 3);
        assert_eq!(doc.end_position(), Position::new(1, 4));

        // Trailing newline: the empty slot after it is line 2.
        let doc = Document::new("abc\n");
        assert_eq!(doc.offset(Position::new(2, 1)).unwrap(), 4);
        assert_eq!(doc.end_position(), Position::new(2, 1));
    }

    #[test]
    fn whole_span_covers_everything() {
        let doc = Document::new("fn main() {}\nlet x = 1;\n");
        let range = doc.locate(doc.whole_span()).unwrap();
        assert_eq!(range, 0..doc.len());
        assert!(doc.is_whole_file(&range));
    }

    #[test]
    fn locate_rejects_reversed_span() {
        let doc = Document::new("hello\nworld\n");
        let span = Span::new(Position::new(2, 3), Position::new(1, 1));
        assert!(doc.locate(span).is_err());
    }

    #[test]
    fn char_boundary_enforced() {
        let doc = Document::new("héllo\n");
        // Column 3 lands inside the two-byte 'é'.
        assert!(matches!(
            doc.offset(Position::new(1, 3)),
            Err(DocumentError::NotCharBoundary { .. })
        ));
    }

    #[test]
    fn lines_preserve_endings() {
        let doc = Document::new("a \r\nb\nc");
        let lines: Vec<_> = doc.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!((lines[0].content, lines[0].ending), ("a ", "\r\n"));
        assert_eq!((lines[1].content, lines[1].ending), ("b", "\n"));
        assert_eq!((lines[2].content, lines[2].ending), ("c", ""));
    }

    #[test]
    fn span_wire_format() {
        let span = Span::on_line(5, 2, 9);
        let value = serde_json::to_value(span).unwrap();
        assert_eq!(value["line"], 5);
        assert_eq!(value["column"], 2);
        assert_eq!(value["end_line"], 5);
        assert_eq!(value["end_column"], 9);
        let back: Span = serde_json::from_value(value).unwrap();
        assert_eq!(back, span);
    }
}

//! Built-in textual fix generators.
//!
//! These are deliberately dumb: regex and line arithmetic over the current
//! snapshot, no parsing. Each one is idempotent on its own output, so a
//! second pipeline run over fixed code produces no further edits.
//!
//! Confidence bands: 0.9 for single-token or pure-deletion rewrites, 0.8
//! for full-line rewrites, 0.7 for speculative insertions.

use crate::document::{Document, Line, Position, Span};
use crate::edit::EditDescriptor;
use crate::generate::{FixGenerator, FixRequest, GeneratorError, GeneratorRegistry};
use crate::issue::{FixKind, Issue};
use crate::pipeline::Stage;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;

static UNUSED_IMPORT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[Uu]nused import:?\s*['"]?([A-Za-z0-9_.]+)"#).expect("pattern compiles")
});

// pyflakes F401 phrasing.
static IMPORTED_BUT_UNUSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'([A-Za-z0-9_.]+)' imported but unused").expect("pattern compiles")
});

static UNUSED_VARIABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:[Uu]nused variable\s*['"]?|[Ll]ocal variable ['"])([A-Za-z0-9_]+)"#)
        .expect("pattern compiles")
});

static FROM_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)from\s+([A-Za-z0-9_.]+)\s+import\s+(.+?)\s*$").expect("pattern compiles")
});

static PLAIN_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)import\s+(.+?)\s*$").expect("pattern compiles"));

fn line_at(doc: &Document, number: u32) -> Option<Line<'_>> {
    doc.lines().find(|l| l.number == number)
}

/// Registry wired with every built-in generator under its conventional
/// rule ids and stages.
pub fn default_registry() -> GeneratorRegistry {
    let unused_import: Arc<dyn FixGenerator> = Arc::new(UnusedImportFix);
    let unused_variable: Arc<dyn FixGenerator> = Arc::new(UnusedVariableFix);
    GeneratorRegistry::new()
        .with_rule(None, "F401", Arc::clone(&unused_import))
        .with_rule(None, "W0611", unused_import)
        .with_rule(None, "F841", Arc::clone(&unused_variable))
        .with_rule(None, "W0612", unused_variable)
        .with_stage(Stage::Style, Arc::new(TrailingWhitespace))
        .with_stage(Stage::Style, Arc::new(IndentNormalizer))
        .with_stage(Stage::Style, Arc::new(FinalNewline))
}

/// Removes an unused import named in the issue message. Drops the whole
/// line when it imports nothing else, otherwise rewrites the line without
/// the named item.
pub struct UnusedImportFix;

impl UnusedImportFix {
    fn edits(doc: &Document, issue: &Issue) -> Result<Vec<EditDescriptor>, GeneratorError> {
        let Some(name) = UNUSED_IMPORT_NAME
            .captures(&issue.message)
            .or_else(|| IMPORTED_BUT_UNUSED.captures(&issue.message))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
        else {
            return Ok(Vec::new());
        };
        let Some(line) = line_at(doc, issue.line) else {
            return Ok(Vec::new());
        };

        let keeps = |item: &&str| {
            let item = item.trim();
            item != name && !item.starts_with(&format!("{name} "))
        };

        if let Some(caps) = FROM_IMPORT.captures(line.content) {
            let indent = &caps[1];
            let module = &caps[2];
            let remaining: Vec<&str> = caps[3].split(',').filter(keeps).collect();
            let edit = if remaining.is_empty() {
                Self::remove_line(doc, &line, &name)?
            } else {
                let items = remaining
                    .iter()
                    .map(|s| s.trim())
                    .collect::<Vec<_>>()
                    .join(", ");
                Self::rewrite_line(
                    doc,
                    &line,
                    format!("{indent}from {module} import {items}"),
                    &name,
                )?
            };
            return Ok(vec![edit]);
        }

        if let Some(caps) = PLAIN_IMPORT.captures(line.content) {
            let indent = &caps[1];
            let remaining: Vec<&str> = caps[2].split(',').filter(keeps).collect();
            let edit = if remaining.is_empty() {
                Self::remove_line(doc, &line, &name)?
            } else {
                let items = remaining
                    .iter()
                    .map(|s| s.trim())
                    .collect::<Vec<_>>()
                    .join(", ");
                Self::rewrite_line(doc, &line, format!("{indent}import {items}"), &name)?
            };
            return Ok(vec![edit]);
        }

        Ok(Vec::new())
    }

    /// Delete the line including its ending.
    fn remove_line(
        doc: &Document,
        line: &Line<'_>,
        name: &str,
    ) -> Result<EditDescriptor, GeneratorError> {
        let span = Span::new(
            Position::new(line.number, 1),
            Position::new(line.number + 1, 1),
        );
        Ok(EditDescriptor::new(
            doc,
            span,
            "",
            format!("remove unused import '{name}'"),
            FixKind::Simple,
            0.9,
        )?)
    }

    fn rewrite_line(
        doc: &Document,
        line: &Line<'_>,
        replacement: String,
        name: &str,
    ) -> Result<EditDescriptor, GeneratorError> {
        let span = Span::on_line(line.number, 1, line.content.len() as u32 + 1);
        Ok(EditDescriptor::new(
            doc,
            span,
            replacement,
            format!("remove unused import '{name}'"),
            FixKind::Simple,
            0.8,
        )?)
    }
}

#[async_trait]
impl FixGenerator for UnusedImportFix {
    fn name(&self) -> &str {
        "unused-import"
    }

    async fn generate(
        &self,
        request: &FixRequest<'_>,
    ) -> Result<Vec<EditDescriptor>, GeneratorError> {
        match request.issue {
            Some(issue) => Self::edits(request.code, issue),
            None => Ok(Vec::new()),
        }
    }
}

/// Renames an unused assignment target to `_`.
pub struct UnusedVariableFix;

impl UnusedVariableFix {
    fn edits(doc: &Document, issue: &Issue) -> Result<Vec<EditDescriptor>, GeneratorError> {
        let Some(name) = UNUSED_VARIABLE_NAME
            .captures(&issue.message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
        else {
            return Ok(Vec::new());
        };
        let Some(line) = line_at(doc, issue.line) else {
            return Ok(Vec::new());
        };

        // Only rewrite a plain assignment target; `==` is a comparison.
        let pattern = format!(r"\b({})\s*=(?:[^=]|$)", regex::escape(&name));
        let assignment =
            Regex::new(&pattern).map_err(|e| GeneratorError::Failed(e.to_string()))?;
        let Some(target) = assignment.captures(line.content).and_then(|c| c.get(1)) else {
            return Ok(Vec::new());
        };

        let span = Span::on_line(
            line.number,
            target.start() as u32 + 1,
            target.end() as u32 + 1,
        );
        let edit = EditDescriptor::new(
            doc,
            span,
            "_",
            format!("rename unused variable '{name}' to '_'"),
            FixKind::Simple,
            0.9,
        )?;
        Ok(vec![edit])
    }
}

#[async_trait]
impl FixGenerator for UnusedVariableFix {
    fn name(&self) -> &str {
        "unused-variable"
    }

    async fn generate(
        &self,
        request: &FixRequest<'_>,
    ) -> Result<Vec<EditDescriptor>, GeneratorError> {
        match request.issue {
            Some(issue) => Self::edits(request.code, issue),
            None => Ok(Vec::new()),
        }
    }
}

/// Strips trailing whitespace from every line that has it.
pub struct TrailingWhitespace;

#[async_trait]
impl FixGenerator for TrailingWhitespace {
    fn name(&self) -> &str {
        "trailing-whitespace"
    }

    async fn generate(
        &self,
        request: &FixRequest<'_>,
    ) -> Result<Vec<EditDescriptor>, GeneratorError> {
        let doc = request.code;
        let mut edits = Vec::new();
        for line in doc.lines() {
            let kept = line.content.trim_end();
            if kept.len() == line.content.len() {
                continue;
            }
            let span = Span::on_line(
                line.number,
                kept.len() as u32 + 1,
                line.content.len() as u32 + 1,
            );
            edits.push(EditDescriptor::new(
                doc,
                span,
                "",
                "remove trailing whitespace",
                FixKind::Simple,
                0.9,
            )?);
        }
        Ok(edits)
    }
}

/// Appends a newline when the last line is unterminated.
pub struct FinalNewline;

#[async_trait]
impl FixGenerator for FinalNewline {
    fn name(&self) -> &str {
        "final-newline"
    }

    async fn generate(
        &self,
        request: &FixRequest<'_>,
    ) -> Result<Vec<EditDescriptor>, GeneratorError> {
        let doc = request.code;
        if doc.is_empty() || doc.text().ends_with('\n') {
            return Ok(Vec::new());
        }
        let edit = EditDescriptor::new(
            doc,
            Span::insertion(doc.end_position()),
            "\n",
            "add missing final newline",
            FixKind::Simple,
            0.9,
        )?;
        Ok(vec![edit])
    }
}

/// Converts tab indentation to spaces when the file predominantly uses
/// space indentation. The tab width follows the file's most common
/// space-indent depth, falling back to four.
pub struct IndentNormalizer;

impl IndentNormalizer {
    fn tab_width(doc: &Document) -> Option<usize> {
        let mut tab_lines = 0usize;
        let mut space_lines = 0usize;
        let mut depth_counts: std::collections::HashMap<usize, usize> = Default::default();

        for line in doc.lines() {
            if line.content.trim().is_empty() || line.content.trim_start().starts_with('#') {
                continue;
            }
            let indent: &str = &line.content[..indent_len(line.content)];
            if indent.contains('\t') {
                tab_lines += 1;
            } else if !indent.is_empty() {
                space_lines += 1;
                *depth_counts.entry(indent.len()).or_insert(0) += 1;
            }
        }

        if tab_lines == 0 || space_lines < tab_lines {
            return None;
        }
        let width = depth_counts
            .into_iter()
            .max_by_key(|&(depth, count)| (count, std::cmp::Reverse(depth)))
            .map(|(depth, _)| depth)
            .unwrap_or(4);
        Some(width)
    }
}

fn indent_len(content: &str) -> usize {
    content.len() - content.trim_start_matches([' ', '\t']).len()
}

#[async_trait]
impl FixGenerator for IndentNormalizer {
    fn name(&self) -> &str {
        "indent-normalizer"
    }

    async fn generate(
        &self,
        request: &FixRequest<'_>,
    ) -> Result<Vec<EditDescriptor>, GeneratorError> {
        let doc = request.code;
        let Some(width) = Self::tab_width(doc) else {
            return Ok(Vec::new());
        };

        let mut edits = Vec::new();
        for line in doc.lines() {
            let indent = &line.content[..indent_len(line.content)];
            if !indent.contains('\t') {
                continue;
            }
            let expanded = indent.replace('\t', &" ".repeat(width));
            let span = Span::on_line(line.number, 1, indent.len() as u32 + 1);
            edits.push(EditDescriptor::new(
                doc,
                span,
                expanded,
                "convert tab indentation to spaces",
                FixKind::Simple,
                0.8,
            )?);
        }
        Ok(edits)
    }
}

//! The fix-generator contract and the rule-table registry.
//!
//! A generator is a pure async function from (Issue, current code) to a
//! list of candidate edits. Failures are explicit [`GeneratorError`] values,
//! never unhandled faults: the orchestrator inspects every result and
//! degrades a failed generator to zero edits plus a warning.
//!
//! Rule dispatch is data, not branching: bindings map a (category,
//! rule-id prefix) pattern to a generator and are resolved once at startup.
//! New rule mappings are additive rows in the table.

use crate::document::Document;
use crate::edit::{EditDescriptor, MalformedEdit};
use crate::issue::{Category, Issue};
use crate::pipeline::Stage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How expensive/invasive a generator is. Within the targeted stage,
/// simple generators are asked before complex ones, and llm-assisted
/// generators only when neither produced an edit for the issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GeneratorKind {
    Simple,
    Complex,
    LlmAssisted,
}

#[derive(Error, Debug, Clone)]
pub enum GeneratorError {
    #[error("generator failed: {0}")]
    Failed(String),

    #[error("external collaborator unavailable: {0}")]
    Unavailable(String),

    /// The input could not be tokenized/parsed by this structural
    /// generator. Disables structural generators for the rest of the run;
    /// textual generators proceed.
    #[error("structural parse failure: {0}")]
    StructuralParse(String),

    #[error(transparent)]
    MalformedEdit(#[from] MalformedEdit),
}

/// Immutable process-wide capabilities, computed once and passed in.
/// Replaces probe-and-cache instance flags: nothing here mutates after
/// construction.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// An LLM collaborator is reachable; llm-assisted generators are
    /// requested only when this is set.
    pub llm_available: bool,
    /// Structural (parsing) generators may run.
    pub structural_parsing: bool,
    /// Bound on any single external generator invocation.
    pub generator_timeout: Duration,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            llm_available: false,
            structural_parsing: true,
            generator_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything a generator may look at for one invocation.
pub struct FixRequest<'a> {
    /// The current code: the previous stage's output, or the original on
    /// the first stage.
    pub code: &'a Document,
    /// The issue being targeted, when the stage is issue-driven.
    pub issue: Option<&'a Issue>,
    pub capabilities: &'a Capabilities,
}

/// A fix generator. Implementations must not mutate shared state; external
/// work (subprocesses, network) belongs behind the async boundary so the
/// orchestrator can bound it with a timeout.
#[async_trait]
pub trait FixGenerator: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> GeneratorKind {
        GeneratorKind::Simple
    }

    /// Structural generators need the input to parse; they are disabled for
    /// the rest of a run after any [`GeneratorError::StructuralParse`].
    fn structural(&self) -> bool {
        false
    }

    async fn generate(
        &self,
        request: &FixRequest<'_>,
    ) -> Result<Vec<EditDescriptor>, GeneratorError>;
}

/// One row of the dispatch table: issues whose category and rule id match
/// are offered to `generator` in the targeted stage.
struct RuleBinding {
    category: Option<Category>,
    rule_prefix: String,
    generator: Arc<dyn FixGenerator>,
}

impl RuleBinding {
    fn matches(&self, issue: &Issue) -> bool {
        if let Some(category) = self.category {
            if issue.category != category {
                return false;
            }
        }
        issue.rule_id.starts_with(&self.rule_prefix)
    }
}

/// Startup-resolved mapping from issues and stages to generators.
#[derive(Default)]
pub struct GeneratorRegistry {
    rules: Vec<RuleBinding>,
    stages: Vec<(Stage, Arc<dyn FixGenerator>)>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a generator to issues matching a rule-id prefix (and optionally
    /// a category). An empty prefix matches every rule id.
    pub fn with_rule(
        mut self,
        category: Option<Category>,
        rule_prefix: impl Into<String>,
        generator: Arc<dyn FixGenerator>,
    ) -> Self {
        self.rules.push(RuleBinding {
            category,
            rule_prefix: rule_prefix.into(),
            generator,
        });
        self
    }

    /// Register a generator that runs for a whole (non-targeted) stage.
    pub fn with_stage(mut self, stage: Stage, generator: Arc<dyn FixGenerator>) -> Self {
        self.stages.push((stage, generator));
        self
    }

    /// Generators bound to an issue, in registration order.
    pub fn generators_for_issue(&self, issue: &Issue) -> Vec<Arc<dyn FixGenerator>> {
        self.rules
            .iter()
            .filter(|binding| binding.matches(issue))
            .map(|binding| Arc::clone(&binding.generator))
            .collect()
    }

    /// Generators registered for a stage, in registration order.
    pub fn stage_generators(&self, stage: Stage) -> Vec<Arc<dyn FixGenerator>> {
        self.stages
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, g)| Arc::clone(g))
            .collect()
    }
}

/// Adapter turning a synchronous closure into a [`FixGenerator`]. Handy for
/// formatter collaborators and tests.
pub struct FnGenerator<F> {
    name: String,
    kind: GeneratorKind,
    structural: bool,
    func: F,
}

impl<F> FnGenerator<F>
where
    F: Fn(&FixRequest<'_>) -> Result<Vec<EditDescriptor>, GeneratorError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            kind: GeneratorKind::Simple,
            structural: false,
            func,
        }
    }

    pub fn with_kind(mut self, kind: GeneratorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn structural(mut self) -> Self {
        self.structural = true;
        self
    }
}

#[async_trait]
impl<F> FixGenerator for FnGenerator<F>
where
    F: Fn(&FixRequest<'_>) -> Result<Vec<EditDescriptor>, GeneratorError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> GeneratorKind {
        self.kind
    }

    fn structural(&self) -> bool {
        self.structural
    }

    async fn generate(
        &self,
        request: &FixRequest<'_>,
    ) -> Result<Vec<EditDescriptor>, GeneratorError> {
        (self.func)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{FixKind, Severity};

    fn noop(name: &str) -> Arc<dyn FixGenerator> {
        Arc::new(FnGenerator::new(name, |_req| Ok(Vec::new())))
    }

    #[test]
    fn rule_binding_matches_prefix_and_category() {
        let registry = GeneratorRegistry::new()
            .with_rule(None, "F401", noop("unused-import"))
            .with_rule(Some(Category::Style), "C03", noop("style"));

        let unused = Issue::new(1, 1, "unused import")
            .with_rule("F401")
            .with_category(Category::Maintainability);
        assert_eq!(registry.generators_for_issue(&unused).len(), 1);

        let trailing = Issue::new(2, 1, "trailing whitespace")
            .with_rule("C0303")
            .with_category(Category::Style);
        assert_eq!(registry.generators_for_issue(&trailing).len(), 1);

        // Same rule prefix, wrong category.
        let not_style = Issue::new(2, 1, "trailing whitespace")
            .with_rule("C0303")
            .with_category(Category::Logic);
        assert!(registry.generators_for_issue(&not_style).is_empty());
    }

    #[test]
    fn empty_prefix_is_a_catch_all() {
        let registry = GeneratorRegistry::new().with_rule(None, "", noop("fallback"));
        let issue = Issue::new(1, 1, "anything").with_rule("XYZ123");
        assert_eq!(registry.generators_for_issue(&issue).len(), 1);
    }

    #[test]
    fn stage_generators_keep_registration_order() {
        let registry = GeneratorRegistry::new()
            .with_stage(Stage::Style, noop("first"))
            .with_stage(Stage::Format, noop("formatter"))
            .with_stage(Stage::Style, noop("second"));

        let style: Vec<_> = registry
            .stage_generators(Stage::Style)
            .iter()
            .map(|g| g.name().to_string())
            .collect();
        assert_eq!(style, vec!["first", "second"]);
        assert_eq!(registry.stage_generators(Stage::Format).len(), 1);
        assert!(registry.stage_generators(Stage::Imports).is_empty());
    }

    #[tokio::test]
    async fn fn_generator_invokes_closure() {
        let doc = Document::new("x\n");
        let caps = Capabilities::default();
        let generator = FnGenerator::new("semicolon", |req: &FixRequest<'_>| {
            let edit = EditDescriptor::new(
                req.code,
                crate::document::Span::insertion(crate::document::Position::new(1, 2)),
                ";",
                "add semicolon",
                FixKind::Simple,
                0.9,
            )?;
            Ok(vec![edit])
        });

        let issue = Issue::new(1, 1, "missing semicolon").with_severity(Severity::Error);
        let request = FixRequest {
            code: &doc,
            issue: Some(&issue),
            capabilities: &caps,
        };
        let edits = generator.generate(&request).await.unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].replacement_text, ";");
    }
}

//! The five-stage fix pipeline.
//!
//! Each stage re-derives edits against the *current* code (the previous
//! stage's output), resolves conflicts, applies the plan, and hands the
//! result to the next stage. Positions are never re-mapped across stages:
//! stage N's spans are meaningless in stage N+1, which is why application
//! re-verifies every edit's expected text.
//!
//! A stage awaits its entire generator set before resolving, so the
//! resolver always sees a consistent batch. Generator failures and timeouts
//! degrade to zero edits plus a warning; they never abort the stage or the
//! file.

use crate::apply::apply;
use crate::document::Document;
use crate::edit::EditDescriptor;
use crate::generate::{
    Capabilities, FixGenerator, FixRequest, GeneratorError, GeneratorKind, GeneratorRegistry,
};
use crate::issue::Issue;
use crate::outcome::{AppliedEdit, FixOutcome, StageSnapshot, Warning};
use crate::resolve::{resolve, Candidate, StagePriority};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// One phase of the fix pipeline, in fixed execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fixes targeted at pre-identified issues.
    Targeted,
    /// Import/namespace normalization.
    Imports,
    /// Style heuristics.
    Style,
    /// Bug-pattern heuristics.
    BugPatterns,
    /// Whole-document formatter pass.
    Format,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Targeted,
        Stage::Imports,
        Stage::Style,
        Stage::BugPatterns,
        Stage::Format,
    ];

    /// Conflict-resolution priority of edits produced in this stage.
    pub fn priority(self) -> StagePriority {
        match self {
            Stage::Targeted => StagePriority::TargetedFix,
            Stage::Imports => StagePriority::ImportNormalization,
            Stage::Style => StagePriority::StyleHeuristic,
            Stage::BugPatterns => StagePriority::BugHeuristic,
            Stage::Format => StagePriority::Formatter,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Targeted => "targeted",
            Stage::Imports => "imports",
            Stage::Style => "style",
            Stage::BugPatterns => "bug_patterns",
            Stage::Format => "format",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation for in-flight runs. Cancelling stops the
/// orchestrator from *starting* another stage; the stage already in flight
/// finishes so its computed edits are not discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What one generator invocation contributed to a stage batch.
struct Contribution {
    edits: Vec<Candidate>,
    warnings: Vec<Warning>,
    structural_failure: bool,
}

impl Contribution {
    fn empty() -> Self {
        Self {
            edits: Vec::new(),
            warnings: Vec::new(),
            structural_failure: false,
        }
    }
}

/// Runs the fixed stage pipeline over one file's code.
pub struct Orchestrator {
    registry: GeneratorRegistry,
    capabilities: Capabilities,
}

impl Orchestrator {
    pub fn new(registry: GeneratorRegistry, capabilities: Capabilities) -> Self {
        Self {
            registry,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Fix one file's code given its detected issues.
    pub async fn fix_code(&self, code: &str, issues: &[Issue]) -> FixOutcome {
        self.fix_code_with_cancel(code, issues, &CancelFlag::new())
            .await
    }

    /// Fix with cooperative cancellation. The partial outcome after a
    /// cancelled run is well-formed up to the last fully applied stage.
    pub async fn fix_code_with_cancel(
        &self,
        code: &str,
        issues: &[Issue],
        cancel: &CancelFlag,
    ) -> FixOutcome {
        let mut warnings = Vec::new();
        let mut applied: Vec<AppliedEdit> = Vec::new();
        let mut snapshots = Vec::new();

        if code.trim().is_empty() {
            debug!("empty input, skipping pipeline");
            return FixOutcome {
                original_code: code.to_string(),
                fixed_code: code.to_string(),
                applied,
                warnings: vec![Warning::EmptyInput],
                snapshots,
                error: None,
                success: true,
            };
        }

        let mut current = code.to_string();
        let mut structural_disabled = !self.capabilities.structural_parsing;

        for stage in Stage::ALL {
            if cancel.is_cancelled() {
                info!(%stage, "cancelled, not starting stage");
                warnings.push(Warning::Cancelled { stage });
                break;
            }

            let doc = Document::new(current.clone());
            let contribution = match stage {
                Stage::Targeted => {
                    self.run_targeted(&doc, issues, structural_disabled).await
                }
                _ => self.run_stage(stage, &doc, structural_disabled).await,
            };

            warnings.extend(contribution.warnings);
            if contribution.structural_failure && !structural_disabled {
                warn!(%stage, "structural generators disabled for the rest of this run");
                structural_disabled = true;
            }

            let batch_len = contribution.edits.len();
            let plan = resolve(&doc, contribution.edits);
            warnings.extend(plan.rejected.iter().map(Warning::from_rejection));

            match apply(&doc, &plan) {
                Ok(result) => {
                    warnings.extend(result.stale.iter().map(Warning::from_rejection));
                    debug!(
                        %stage,
                        candidates = batch_len,
                        applied = result.applied.len(),
                        "stage complete"
                    );
                    applied.extend(
                        result
                            .applied
                            .into_iter()
                            .map(|edit| AppliedEdit { stage, edit }),
                    );
                    current = result.output;
                }
                Err(err) => {
                    // Output arithmetic disagreed with the plan; do not
                    // trust this stage's rewrite.
                    warn!(%stage, error = %err, "stage application rejected");
                    return FixOutcome {
                        original_code: code.to_string(),
                        fixed_code: current,
                        applied,
                        warnings,
                        snapshots,
                        error: Some(err.to_string()),
                        success: false,
                    };
                }
            }

            snapshots.push(StageSnapshot {
                stage,
                code: current.clone(),
            });
        }

        let success = current != code || !applied.is_empty();
        FixOutcome {
            original_code: code.to_string(),
            fixed_code: current,
            applied,
            warnings,
            snapshots,
            error: None,
            success,
        }
    }

    /// Targeted stage: per fixable issue, ask simple generators first, then
    /// complex ones; llm-assisted generators are requested only when
    /// neither produced an edit for that issue and an LLM collaborator is
    /// reachable. Issues run concurrently; the whole set is awaited before
    /// resolution.
    async fn run_targeted(
        &self,
        doc: &Document,
        issues: &[Issue],
        structural_disabled: bool,
    ) -> Contribution {
        let tasks = issues.iter().filter(|i| i.fixable).map(|issue| async move {
            let mut contribution = Contribution::empty();
            let mut generators = self.registry.generators_for_issue(issue);
            // Stable by kind: simple, then complex, then llm-assisted.
            generators.sort_by_key(|g| g.kind());

            let mut produced = false;
            for generator in &generators {
                match generator.kind() {
                    GeneratorKind::LlmAssisted => {
                        if produced || !self.capabilities.llm_available {
                            continue;
                        }
                    }
                    GeneratorKind::Simple | GeneratorKind::Complex => {}
                }
                if structural_disabled && generator.structural() {
                    debug!(generator = generator.name(), "skipping structural generator");
                    continue;
                }

                let (edits, warning, structural_failure) =
                    self.invoke(generator, doc, Some(issue)).await;
                produced |= !edits.is_empty();
                contribution.edits.extend(edits.into_iter().map(|edit| {
                    Candidate::new(edit, StagePriority::TargetedFix)
                        .with_severity(issue.severity)
                }));
                contribution.warnings.extend(warning);
                contribution.structural_failure |= structural_failure;
            }
            contribution
        });

        merge(join_all(tasks).await)
    }

    /// Non-targeted stage: run every registered generator for the stage
    /// concurrently against the current code.
    async fn run_stage(
        &self,
        stage: Stage,
        doc: &Document,
        structural_disabled: bool,
    ) -> Contribution {
        let generators = self.registry.stage_generators(stage);
        let tasks = generators.iter().map(|generator| async move {
            let mut contribution = Contribution::empty();
            if structural_disabled && generator.structural() {
                debug!(generator = generator.name(), "skipping structural generator");
                return contribution;
            }
            if generator.kind() == GeneratorKind::LlmAssisted && !self.capabilities.llm_available
            {
                debug!(generator = generator.name(), "llm collaborator unreachable, skipping");
                return contribution;
            }

            let (edits, warning, structural_failure) = self.invoke(generator, doc, None).await;
            contribution.edits.extend(
                edits
                    .into_iter()
                    .map(|edit| Candidate::new(edit, stage.priority())),
            );
            contribution.warnings.extend(warning);
            contribution.structural_failure = structural_failure;
            contribution
        });

        merge(join_all(tasks).await)
    }

    /// Invoke one generator under the capability timeout. Failures and
    /// timeouts become an empty edit set plus a warning.
    async fn invoke(
        &self,
        generator: &Arc<dyn FixGenerator>,
        doc: &Document,
        issue: Option<&Issue>,
    ) -> (Vec<EditDescriptor>, Option<Warning>, bool) {
        let request = FixRequest {
            code: doc,
            issue,
            capabilities: &self.capabilities,
        };
        match timeout(
            self.capabilities.generator_timeout,
            generator.generate(&request),
        )
        .await
        {
            Ok(Ok(edits)) => (edits, None, false),
            Ok(Err(GeneratorError::StructuralParse(detail))) => {
                warn!(generator = generator.name(), %detail, "structural parse failure");
                (
                    Vec::new(),
                    Some(Warning::StructuralParseFailure { detail }),
                    true,
                )
            }
            Ok(Err(err)) => {
                warn!(generator = generator.name(), error = %err, "generator failed");
                (
                    Vec::new(),
                    Some(Warning::GeneratorFailure {
                        name: generator.name().to_string(),
                        reason: err.to_string(),
                    }),
                    false,
                )
            }
            Err(_) => {
                warn!(generator = generator.name(), "generator timed out");
                (
                    Vec::new(),
                    Some(Warning::GeneratorTimeout {
                        name: generator.name().to_string(),
                        timeout_ms: self.capabilities.generator_timeout.as_millis() as u64,
                    }),
                    false,
                )
            }
        }
    }
}

fn merge(parts: Vec<Contribution>) -> Contribution {
    let mut merged = Contribution::empty();
    for part in parts {
        merged.edits.extend(part.edits);
        merged.warnings.extend(part.warnings);
        merged.structural_failure |= part.structural_failure;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Position, Span};
    use crate::generate::FnGenerator;
    use crate::issue::{Category, FixKind, Severity};

    fn insert_generator(name: &str, text: &'static str) -> Arc<dyn FixGenerator> {
        Arc::new(FnGenerator::new(name, move |req: &FixRequest<'_>| {
            let at = req.code.end_position();
            Ok(vec![EditDescriptor::new(
                req.code,
                Span::insertion(at),
                text,
                "append",
                FixKind::Simple,
                0.8,
            )?])
        }))
    }

    #[tokio::test]
    async fn empty_input_is_a_noop_success() {
        let orchestrator =
            Orchestrator::new(GeneratorRegistry::new(), Capabilities::default());
        let outcome = orchestrator.fix_code("   \n", &[]).await;
        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.fixed_code, outcome.original_code);
        assert_eq!(outcome.warnings, vec![Warning::EmptyInput]);
    }

    #[tokio::test]
    async fn no_generators_no_issues_is_unsuccessful_but_clean() {
        let orchestrator =
            Orchestrator::new(GeneratorRegistry::new(), Capabilities::default());
        let outcome = orchestrator.fix_code("fn main() {}\n", &[]).await;
        assert!(!outcome.success);
        assert_eq!(outcome.fixed_code, outcome.original_code);
        assert!(outcome.warnings.is_empty());
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn generator_failure_degrades_to_warning() {
        let failing: Arc<dyn FixGenerator> = Arc::new(FnGenerator::new("flaky", |_req| {
            Err(GeneratorError::Failed("subprocess exited 1".into()))
        }));
        let registry = GeneratorRegistry::new()
            .with_stage(Stage::Style, failing)
            .with_stage(Stage::Style, insert_generator("appender", "// ok\n"));

        let orchestrator = Orchestrator::new(registry, Capabilities::default());
        let outcome = orchestrator.fix_code("fn main() {}\n", &[]).await;

        assert!(outcome.success);
        assert!(outcome.fixed_code.ends_with("// ok\n"));
        assert!(outcome
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::GeneratorFailure { name, .. } if name == "flaky")));
    }

    #[tokio::test]
    async fn generator_timeout_degrades_to_warning() {
        let slow: Arc<dyn FixGenerator> = Arc::new(SlowGenerator);
        let registry = GeneratorRegistry::new().with_stage(Stage::Style, slow);
        let capabilities = Capabilities {
            generator_timeout: std::time::Duration::from_millis(10),
            ..Capabilities::default()
        };

        let orchestrator = Orchestrator::new(registry, capabilities);
        let outcome = orchestrator.fix_code("fn main() {}\n", &[]).await;

        assert!(!outcome.success);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::GeneratorTimeout { name, .. } if name == "sleeper")));
    }

    struct SlowGenerator;

    #[async_trait::async_trait]
    impl FixGenerator for SlowGenerator {
        fn name(&self) -> &str {
            "sleeper"
        }

        async fn generate(
            &self,
            _request: &FixRequest<'_>,
        ) -> Result<Vec<EditDescriptor>, GeneratorError> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn llm_generator_only_runs_when_nothing_else_produced() {
        let simple: Arc<dyn FixGenerator> =
            Arc::new(FnGenerator::new("simple", |req: &FixRequest<'_>| {
                Ok(vec![EditDescriptor::new(
                    req.code,
                    Span::on_line(1, 1, 4),
                    "pub",
                    "simple fix",
                    FixKind::Simple,
                    0.9,
                )?])
            }));
        let llm: Arc<dyn FixGenerator> = Arc::new(
            FnGenerator::new("llm", |req: &FixRequest<'_>| {
                Ok(vec![EditDescriptor::new(
                    req.code,
                    Span::on_line(1, 1, 4),
                    "LLM",
                    "llm fix",
                    FixKind::LlmAssisted,
                    0.7,
                )?])
            })
            .with_kind(GeneratorKind::LlmAssisted),
        );

        let registry = GeneratorRegistry::new()
            .with_rule(None, "X1", simple)
            .with_rule(None, "X1", llm);
        let capabilities = Capabilities {
            llm_available: true,
            ..Capabilities::default()
        };
        let orchestrator = Orchestrator::new(registry, capabilities);

        let issue = Issue::new(1, 1, "needs pub")
            .with_rule("X100")
            .with_severity(Severity::Warning)
            .with_category(Category::Style)
            .fixable(FixKind::Simple);

        let outcome = orchestrator.fix_code("let x = 1;\n", &[issue]).await;
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.applied[0].edit.description, "simple fix");
        assert_eq!(outcome.fixed_code, "pub x = 1;\n");
    }

    #[tokio::test]
    async fn llm_generator_fills_the_gap_when_reachable() {
        let llm: Arc<dyn FixGenerator> = Arc::new(
            FnGenerator::new("llm", |req: &FixRequest<'_>| {
                Ok(vec![EditDescriptor::new(
                    req.code,
                    Span::on_line(1, 1, 4),
                    "LLM",
                    "llm fix",
                    FixKind::LlmAssisted,
                    0.7,
                )?])
            })
            .with_kind(GeneratorKind::LlmAssisted),
        );
        let registry = GeneratorRegistry::new().with_rule(None, "X1", llm);

        let issue = Issue::new(1, 1, "needs rewrite")
            .with_rule("X100")
            .fixable(FixKind::LlmAssisted);

        // Unreachable LLM: nothing happens.
        let orchestrator = Orchestrator::new(registry, Capabilities::default());
        let outcome = orchestrator.fix_code("let x = 1;\n", &[issue.clone()]).await;
        assert!(!outcome.success);
        assert!(outcome.applied.is_empty());

        // Reachable LLM: the llm-assisted generator runs.
        let llm2: Arc<dyn FixGenerator> = Arc::new(
            FnGenerator::new("llm", |req: &FixRequest<'_>| {
                Ok(vec![EditDescriptor::new(
                    req.code,
                    Span::on_line(1, 1, 4),
                    "LLM",
                    "llm fix",
                    FixKind::LlmAssisted,
                    0.7,
                )?])
            })
            .with_kind(GeneratorKind::LlmAssisted),
        );
        let registry = GeneratorRegistry::new().with_rule(None, "X1", llm2);
        let capabilities = Capabilities {
            llm_available: true,
            ..Capabilities::default()
        };
        let orchestrator = Orchestrator::new(registry, capabilities);
        let outcome = orchestrator.fix_code("let x = 1;\n", &[issue]).await;
        assert_eq!(outcome.fixed_code, "LLM x = 1;\n");
    }

    #[tokio::test]
    async fn structural_failure_disables_structural_generators_only() {
        let structural: Arc<dyn FixGenerator> = Arc::new(
            FnGenerator::new("parser", |_req: &FixRequest<'_>| {
                Err(GeneratorError::StructuralParse("unexpected token".into()))
            })
            .structural(),
        );
        // Registered for a later stage; must be skipped after the failure.
        let structural_late: Arc<dyn FixGenerator> = Arc::new(
            FnGenerator::new("late-parser", |req: &FixRequest<'_>| {
                let at = req.code.end_position();
                Ok(vec![EditDescriptor::new(
                    req.code,
                    Span::insertion(at),
                    "// should never appear\n",
                    "structural",
                    FixKind::Complex,
                    0.9,
                )?])
            })
            .structural(),
        );

        let registry = GeneratorRegistry::new()
            .with_stage(Stage::Imports, structural)
            .with_stage(Stage::BugPatterns, structural_late)
            .with_stage(Stage::Style, insert_generator("textual", "// textual\n"));

        let orchestrator = Orchestrator::new(registry, Capabilities::default());
        let outcome = orchestrator.fix_code("fn main() {}\n", &[]).await;

        assert!(outcome.fixed_code.contains("// textual"));
        assert!(!outcome.fixed_code.contains("should never appear"));
        assert!(outcome
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::StructuralParseFailure { .. })));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_stage() {
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        let cancelling: Arc<dyn FixGenerator> =
            Arc::new(FnGenerator::new("canceller", move |req: &FixRequest<'_>| {
                flag.cancel();
                let at = req.code.end_position();
                Ok(vec![EditDescriptor::new(
                    req.code,
                    Span::insertion(at),
                    "// first stage ran\n",
                    "append",
                    FixKind::Simple,
                    0.8,
                )?])
            }));
        let registry = GeneratorRegistry::new()
            .with_stage(Stage::Imports, cancelling)
            .with_stage(Stage::Style, insert_generator("later", "// later\n"));

        let orchestrator = Orchestrator::new(registry, Capabilities::default());
        let outcome = orchestrator
            .fix_code_with_cancel("fn main() {}\n", &[], &cancel)
            .await;

        // The in-flight stage finished; nothing after it started.
        assert!(outcome.fixed_code.contains("first stage ran"));
        assert!(!outcome.fixed_code.contains("// later"));
        assert!(outcome
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::Cancelled { stage: Stage::Style })));
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn snapshots_track_code_after_each_stage() {
        let registry = GeneratorRegistry::new()
            .with_stage(Stage::Style, insert_generator("style", "// style\n"));
        let orchestrator = Orchestrator::new(registry, Capabilities::default());
        let outcome = orchestrator.fix_code("fn main() {}\n", &[]).await;

        assert_eq!(outcome.snapshots.len(), Stage::ALL.len());
        assert_eq!(outcome.snapshots[0].code, "fn main() {}\n");
        assert!(outcome.snapshots[2].code.contains("// style"));
        assert_eq!(
            outcome.snapshots.last().map(|s| s.code.as_str()),
            Some(outcome.fixed_code.as_str())
        );
    }

    #[tokio::test]
    async fn zero_width_insertion_point_tie_break() {
        let a: Arc<dyn FixGenerator> =
            Arc::new(FnGenerator::new("weak", |req: &FixRequest<'_>| {
                Ok(vec![EditDescriptor::new(
                    req.code,
                    Span::insertion(Position::new(1, 1)),
                    "// weak\n",
                    "weak insert",
                    FixKind::Simple,
                    0.6,
                )?])
            }));
        let b: Arc<dyn FixGenerator> =
            Arc::new(FnGenerator::new("strong", |req: &FixRequest<'_>| {
                Ok(vec![EditDescriptor::new(
                    req.code,
                    Span::insertion(Position::new(1, 1)),
                    "// strong\n",
                    "strong insert",
                    FixKind::Simple,
                    0.9,
                )?])
            }));
        let registry = GeneratorRegistry::new()
            .with_stage(Stage::Style, a)
            .with_stage(Stage::Style, b);

        let orchestrator = Orchestrator::new(registry, Capabilities::default());
        let outcome = orchestrator.fix_code("fn main() {}\n", &[]).await;

        assert!(outcome.fixed_code.starts_with("// strong\n"));
        assert!(!outcome.fixed_code.contains("// weak"));
        assert_eq!(outcome.applied.len(), 1);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::Conflict { .. })));
    }
}

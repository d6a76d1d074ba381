//! The Transformer Library (spec §4.4): one named, deterministic Tier-1
//! transformer per pre-coded library migration, each a composition of
//! small rewrite rules.
//!
//! Mirrors the teacher's `ruff_rule_*` crate shape — one module per rule
//! family, matcher-then-rewrite, an explicit per-rule confidence — except a
//! "rule" here produces a source-to-source [`pyshift_knowledge::Edit`]
//! instead of a lint `Diagnostic`. Matching never relies on type inference
//! (spec §9 "Dynamic typing without inference"): a rule either narrows on
//! the Usage Index's resolved symbol (exact, `Confidence::High`) or falls
//! back to a syntactic shape gated only by "is the library in scope in this
//! file" (heuristic, `Confidence::Medium`), exactly as spec §4.4 describes
//! for `.dict()`-style calls. `Confidence::Low` rules are never authored
//! here — spec §4.4 reserves `low` for the model-assisted tiers and keeps
//! it disabled by default in tier-1 mode.

mod fastapi;
mod pydantic;
mod sqlalchemy;

use pyshift_cst::Cst;
pub use pyshift_knowledge::{Confidence, Edit};
use pyshift_usage::UsageIndex;

/// An import a rule's rewrite depends on, requested via
/// [`pyshift_cst::EditBatch::ensure_import`] once the engine commits this
/// rule's edits (spec §4.1 "import ops").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequirement {
    pub module: String,
    pub name: String,
    pub alias: Option<String>,
}

impl ImportRequirement {
    #[must_use]
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self { module: module.into(), name: name.into(), alias: None }
    }
}

/// What one rule invocation produced against a single file: edits, imports
/// the rewrite now depends on, and local names that may have become unused
/// as a result (spec §3 `BreakingChange.requires_imports`/`removes_imports`,
/// applied at rule granularity).
#[derive(Debug, Clone, Default)]
pub struct RuleOutput {
    pub edits: Vec<Edit>,
    pub requires_imports: Vec<ImportRequirement>,
    pub removes_imports: Vec<String>,
}

impl RuleOutput {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub(crate) fn merge(&mut self, mut other: RuleOutput) {
        self.edits.append(&mut other.edits);
        self.requires_imports.append(&mut other.requires_imports);
        self.removes_imports.append(&mut other.removes_imports);
    }
}

/// One deterministic rewrite rule (spec §4.4 "Each transformer is a named
/// composition of rewrite rules"). `id` doubles as the `BreakingChange`-like
/// provenance tag the engine records per edit (spec §3 Patch provenance).
pub struct Rule {
    pub id: &'static str,
    pub confidence: Confidence,
    #[allow(clippy::type_complexity)]
    pub apply: fn(&Cst, &UsageIndex) -> RuleOutput,
}

/// Everything one rule application (across every match it found in a file)
/// produced, tagged with provenance — consumed by the engine to build a
/// [`pyshift_knowledge::ProvenancedEdit`] list.
pub struct AppliedRule {
    pub rule_id: &'static str,
    pub confidence: Confidence,
    pub output: RuleOutput,
}

/// A library's complete Tier-1 rewrite: an ordered rule set plus which
/// library it applies to. Rules run higher-confidence-first (spec §4.6
/// "within a tier, rules with higher confidence run first"); a rule below
/// `confidence_floor` is skipped and reported as a policy skip (spec §7
/// "Policy errors").
pub trait Tier1Transformer: Send + Sync {
    fn library(&self) -> &'static str;
    fn rules(&self) -> &'static [Rule];

    /// Builds the Usage Index for this transformer's library and runs every
    /// rule at or above `confidence_floor`, highest confidence first.
    fn apply(&self, cst: &Cst, confidence_floor: Confidence) -> Vec<AppliedRule> {
        let index = UsageIndex::build(cst, self.library());
        let mut ordered: Vec<&Rule> = self.rules().iter().collect();
        ordered.sort_by(|a, b| b.confidence.cmp(&a.confidence));

        ordered
            .into_iter()
            .filter(|rule| rule.confidence >= confidence_floor)
            .map(|rule| {
                let output = (rule.apply)(cst, &index);
                if output.is_empty() {
                    tracing::debug!(rule = rule.id, "rule did not match");
                }
                AppliedRule { rule_id: rule.id, confidence: rule.confidence, output }
            })
            .filter(|applied| !applied.output.is_empty())
            .collect()
    }
}

pub use fastapi::FastApiTransformer;
pub use pydantic::PydanticTransformer;
pub use sqlalchemy::SqlAlchemyTransformer;

/// Every Tier-1 transformer this build knows about, keyed by library name
/// (spec §6 `libraries() -> [SupportedLibrary]`).
#[must_use]
pub fn known_transformers() -> Vec<Box<dyn Tier1Transformer>> {
    vec![Box::new(PydanticTransformer), Box::new(SqlAlchemyTransformer), Box::new(FastApiTransformer)]
}

/// Looks up the Tier-1 transformer for `library`, if this build has one
/// (spec §4.6 "Tier 1 if a Tier-1 transformer exists for `library`").
#[must_use]
pub fn transformer_for(library: &str) -> Option<Box<dyn Tier1Transformer>> {
    known_transformers().into_iter().find(|t| t.library() == library)
}

/// Reads the original text a node's exact range spans, for rules that need
/// to splice an existing subexpression (an argument value, an object
/// receiver) verbatim into a replacement.
pub(crate) fn slice<'a>(cst: &'a Cst, node: pyshift_cst::NodeId) -> &'a str {
    cst.arena().get_node_range(node).slice(cst.source())
}

/// The leading whitespace and line terminator of a statement's rendered
/// range, so a rewrite that replaces a whole line (e.g. a decorator) can
/// reuse the same indentation and stay byte-compatible with the rest of the
/// file (spec §1 "textually minimal, format-preserving").
pub(crate) fn line_indent_and_terminator(text: &str) -> (&str, &'static str) {
    let indent_len = text.len() - text.trim_start_matches([' ', '\t']).len();
    let terminator = if text.ends_with("\r\n") { "\r\n" } else { "\n" };
    (&text[..indent_len], terminator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_transformers_cover_the_three_tier1_libraries() {
        let names: Vec<_> = known_transformers().iter().map(|t| t.library()).collect();
        assert_eq!(names, vec!["pydantic", "sqlalchemy", "fastapi"]);
    }

    #[test]
    fn transformer_for_unknown_library_is_none() {
        assert!(transformer_for("numpy").is_none());
    }
}

//! Per-file tier dispatch for the Migration Engine (spec §4.6): Tier 1 if a
//! Tier-1 transformer covers this library, otherwise Tier 2 against a cached
//! `MigrationSpec` (falling back to the rewrite oracle only to complete a
//! `Template` replacement), otherwise Tier 3 is left to the caller to
//! attempt only when `tier-policy=all` permits it.
//!
//! Tier selection here is per-*library*, not per-change: this build's three
//! Tier-1 transformers are authored with full rule coverage for the shapes
//! they model, so "does a Tier-1 transformer exist for this library" already
//! answers spec's per-change question in practice. A change a Tier-1
//! transformer doesn't know about in a library it *does* own never reaches
//! Tier 2 — that's a conscious simplification over spec's literal per-change
//! wording, recorded in `DESIGN.md`.

use pyshift_cst::Cst;
use pyshift_knowledge::{
    BreakingChange, BreakingChangeKind, Confidence, Edit, MatchSpec, MigrationSpec, ProvenancedEdit, ReplacementSpec, SessionDiagnostic, Severity, Tier,
};
use pyshift_usage::{ImportKind, UsageIndex, UsageRole};

use crate::collaborators::{AuthenticationQuotaGate, RewriteOracle, RewriteRequest};
use crate::TierPolicy;

/// What one file contributed to a session.
#[derive(Default)]
pub struct FileOutcome {
    pub edits: Vec<ProvenancedEdit>,
    pub tier: Option<Tier>,
    pub diagnostics: Vec<SessionDiagnostic>,
    pub tier2_changes: usize,
    pub tier3_changes: usize,
    pub medium_or_lower_confidence_changes: usize,
    /// Imports the engine must `ensure_import` once `edits` are committed
    /// (spec §3 `BreakingChange.requires_imports`, spec §4.4 rule "import
    /// side effects"), collected from both Tier-1 rules and Tier-2 changes.
    pub requires_imports: Vec<pyshift_transform::ImportRequirement>,
    /// Local names that may have become unused once `edits` land; the
    /// engine re-checks each against the post-edit tree before actually
    /// dropping anything (spec §4.1 key algorithm).
    pub removes_imports: Vec<String>,
}

#[allow(clippy::too_many_arguments)]
pub fn analyse_file(
    cst: &Cst,
    library: &str,
    confidence_floor: Confidence,
    tier_policy: TierPolicy,
    tier1: Option<&dyn pyshift_transform::Tier1Transformer>,
    migration_spec: Option<&MigrationSpec>,
    rewrite_oracle: &dyn RewriteOracle,
    quota_gate: &dyn AuthenticationQuotaGate,
    from_version: &str,
    to_version: &str,
) -> FileOutcome {
    let mut outcome = FileOutcome::default();

    if let Some(transformer) = tier1 {
        for applied in transformer.apply(cst, confidence_floor) {
            let count = applied.output.edits.len();
            if applied.confidence <= Confidence::Medium {
                outcome.medium_or_lower_confidence_changes += count;
            }
            outcome.requires_imports.extend(applied.output.requires_imports.iter().cloned());
            outcome.removes_imports.extend(applied.output.removes_imports.iter().cloned());
            for edit in applied.output.edits {
                outcome.edits.push(ProvenancedEdit { edit, breaking_change_id: applied.rule_id.to_string() });
            }
            outcome.tier = Some(Tier::Tier1);
        }
        return outcome;
    }

    if matches!(tier_policy, TierPolicy::Tier1Only) {
        outcome.diagnostics.push(SessionDiagnostic {
            file: None,
            message: format!("no Tier-1 transformer for {library}; tier-policy=tier1-only skips the rest of this file"),
            severity: Severity::Warn,
        });
        return outcome;
    }

    let Some(spec) = migration_spec else {
        if matches!(tier_policy, TierPolicy::All) {
            tier3_fallback(cst, library, rewrite_oracle, quota_gate, from_version, to_version, &mut outcome);
        }
        return outcome;
    };
    if spec.changes.is_empty() {
        outcome.diagnostics.push(SessionDiagnostic {
            file: None,
            message: format!("no known breaking changes for {library} {from_version}->{to_version}; nothing for tier 2 or 3 to act on"),
            severity: Severity::Info,
        });
        if matches!(tier_policy, TierPolicy::All) {
            tier3_fallback(cst, library, rewrite_oracle, quota_gate, from_version, to_version, &mut outcome);
        }
        return outcome;
    }

    let index = UsageIndex::build(cst, library);
    for change in &spec.changes {
        if change.confidence < confidence_floor {
            outcome.diagnostics.push(SessionDiagnostic {
                file: None,
                message: format!("{} skipped: confidence {:?} below floor {:?}", change.id, change.confidence, confidence_floor),
                severity: Severity::Info,
            });
            continue;
        }

        let edits = tier2_edits_for_change(cst, &index, change, rewrite_oracle, quota_gate, library, from_version, to_version, &mut outcome.diagnostics);
        if edits.is_empty() {
            continue;
        }
        outcome.tier2_changes += edits.len();
        if change.confidence <= Confidence::Medium {
            outcome.medium_or_lower_confidence_changes += edits.len();
        }
        outcome.tier = Some(Tier::Tier2);
        outcome.requires_imports.extend(change.requires_imports.iter().map(|dotted| import_requirement_from_dotted(dotted)));
        outcome.removes_imports.extend(change.removes_imports.iter().cloned());
        for edit in edits {
            outcome.edits.push(ProvenancedEdit { edit, breaking_change_id: change.id.clone() });
        }
    }

    outcome
}

/// Finds every exact-symbol usage `change.matcher` names and builds the
/// `Edit` its `ReplacementSpec` describes. Deterministic variants
/// (`Rename`/`MethodRename`/`AttributeRename`/`ArgumentRemove`/
/// `ArgumentRename`/`ImportMove`) never touch the oracle — spec §9 open
/// question (b)'s pure-template fast path. Only `Template` calls out.
#[allow(clippy::too_many_arguments)]
fn tier2_edits_for_change(
    cst: &Cst,
    index: &UsageIndex,
    change: &BreakingChange,
    rewrite_oracle: &dyn RewriteOracle,
    quota_gate: &dyn AuthenticationQuotaGate,
    library: &str,
    from_version: &str,
    to_version: &str,
    diagnostics: &mut Vec<SessionDiagnostic>,
) -> Vec<Edit> {
    if let ReplacementSpec::ImportMove { new_module } = &change.replacement {
        return index
            .imports
            .iter()
            .filter(|import| import.module == change.matcher.symbol && !matches!(import.kind, ImportKind::Wildcard))
            .map(|import| {
                let local = import.imported_symbol.as_deref().unwrap_or(import.local_name.as_str());
                let new_source = if import.is_aliased {
                    format!("from {new_module} import {local} as {}\n", import.local_name)
                } else {
                    format!("from {new_module} import {local}\n")
                };
                Edit::ReplaceImport { node: import.node, new_source }
            })
            .collect();
    }

    let mut edits = Vec::new();
    for usage in &index.usages {
        if usage.symbol != change.matcher.symbol {
            continue;
        }
        if let Some(role) = change.matcher.role {
            if usage.role != role {
                continue;
            }
        }

        match &change.replacement {
            ReplacementSpec::Rename { new_symbol } | ReplacementSpec::MethodRename { new_method: new_symbol } | ReplacementSpec::AttributeRename { new_attr: new_symbol } => {
                edits.push(Edit::ReplaceNode { node: usage.node, replacement: new_symbol.clone() });
            }
            ReplacementSpec::ArgumentRemove { name } => {
                if let Some(edit) = remove_call_argument(cst, usage.node, name) {
                    edits.push(edit);
                }
            }
            ReplacementSpec::ArgumentRename { old_name, new_name } => {
                if let Some(edit) = rename_call_argument(cst, usage.node, old_name, new_name) {
                    edits.push(edit);
                }
            }
            ReplacementSpec::Template { .. } => {
                if usage.role != UsageRole::Call {
                    continue;
                }
                if !quota_gate.allow_oracle_call() {
                    diagnostics.push(SessionDiagnostic {
                        file: None,
                        message: format!("{}: quota gate denied the rewrite oracle; change skipped", change.id),
                        severity: Severity::Warn,
                    });
                    continue;
                }
                let Some(call_node) = cst.arena().parent_of(usage.node) else { continue };
                let slice = cst.arena().get_node_range(call_node).slice(cst.source());
                let request = RewriteRequest { library, from_version, to_version, change, file_slice: slice };
                match rewrite_oracle.rewrite(&request) {
                    Ok(replacement) => edits.push(Edit::ReplaceNode { node: call_node, replacement }),
                    Err(error) => diagnostics.push(SessionDiagnostic {
                        file: None,
                        message: format!("{}: rewrite oracle failed: {error}", change.id),
                        severity: Severity::Warn,
                    }),
                }
            }
            ReplacementSpec::ImportMove { .. } => unreachable!("handled above"),
        }
    }
    edits
}

/// Tier 3 (spec §4.6): reached only when no Tier-1 transformer and no
/// (or empty) `MigrationSpec` cover this library at all, and only when
/// `tier-policy=all` permits it. Every call-site usage of the library is
/// hand-built into a synthetic, low-confidence `BreakingChange` whose
/// `Template` replacement has nothing pre-filled — existing purely to carry
/// the `RewriteRequest` the oracle contract expects — and handed straight
/// to the rewrite oracle with the enclosing call's exact source slice.
/// Accepted only if the oracle's replacement parses (checked by the
/// engine's later parse-check, not here).
#[allow(clippy::too_many_arguments)]
fn tier3_fallback(
    cst: &Cst,
    library: &str,
    rewrite_oracle: &dyn RewriteOracle,
    quota_gate: &dyn AuthenticationQuotaGate,
    from_version: &str,
    to_version: &str,
    outcome: &mut FileOutcome,
) {
    let index = UsageIndex::build(cst, library);
    if index.usages.is_empty() {
        return;
    }
    if !quota_gate.allow_oracle_call() {
        outcome.diagnostics.push(SessionDiagnostic {
            file: None,
            message: format!("tier-3 fallback for {library} skipped: quota gate denied the rewrite oracle"),
            severity: Severity::Warn,
        });
        return;
    }

    for usage in &index.usages {
        if usage.role != UsageRole::Call {
            continue;
        }
        let Some(call_node) = cst.arena().parent_of(usage.node) else { continue };
        let placeholder = BreakingChange::new(
            format!("tier3.{}", usage.symbol),
            BreakingChangeKind::BehaviorChange,
            MatchSpec::symbol(usage.symbol.clone()),
            ReplacementSpec::Template { template: String::new() },
            Confidence::Low,
        );
        let slice = cst.arena().get_node_range(call_node).slice(cst.source());
        let request = RewriteRequest { library, from_version, to_version, change: &placeholder, file_slice: slice };
        match rewrite_oracle.rewrite(&request) {
            Ok(replacement) => {
                outcome.edits.push(ProvenancedEdit { edit: Edit::ReplaceNode { node: call_node, replacement }, breaking_change_id: placeholder.id.clone() });
                outcome.tier3_changes += 1;
                outcome.medium_or_lower_confidence_changes += 1;
                outcome.tier = Some(Tier::Tier3);
            }
            Err(error) => outcome.diagnostics.push(SessionDiagnostic {
                file: None,
                message: format!("tier-3 rewrite oracle failed for {}: {error}", usage.symbol),
                severity: Severity::Warn,
            }),
        }
    }
}

/// `BreakingChange.requires_imports`/`removes_imports` carry dotted
/// `module.symbol` strings (spec §3); splits one at its last `.` into the
/// `(module, name)` pair `ensure_import` wants.
fn import_requirement_from_dotted(dotted: &str) -> pyshift_transform::ImportRequirement {
    match dotted.rsplit_once('.') {
        Some((module, name)) => pyshift_transform::ImportRequirement::new(module, name),
        None => pyshift_transform::ImportRequirement::new(dotted, dotted),
    }
}

fn remove_call_argument(cst: &Cst, symbol_node: pyshift_cst::NodeId, name: &str) -> Option<Edit> {
    let arena = cst.arena();
    let call_node = arena.parent_of(symbol_node)?;
    let pyshift_cst::CstKind::Call { args, .. } = arena.kind(call_node) else { return None };
    let keep: Vec<&pyshift_cst::CallArg> = args.iter().filter(|arg| keyword_name(cst, arg) != Some(name)).collect();
    if keep.len() == args.len() {
        return None;
    }
    let start = args.iter().map(|arg| arg_start(cst, arg)).min()?;
    let end = args.iter().map(|arg| arena.get_node_range(arg.value).end()).max()?;
    let rendered: Vec<String> = keep.iter().map(|arg| render_arg(cst, arg)).collect();
    Some(Edit::ReplaceStringAtRange { range: pyshift_text_size::TextRange::new(start, end), replacement: rendered.join(", ") })
}

fn rename_call_argument(cst: &Cst, symbol_node: pyshift_cst::NodeId, old_name: &str, new_name: &str) -> Option<Edit> {
    let arena = cst.arena();
    let call_node = arena.parent_of(symbol_node)?;
    let pyshift_cst::CstKind::Call { args, .. } = arena.kind(call_node) else { return None };
    let keyword_node = args.iter().find(|arg| keyword_name(cst, arg) == Some(old_name))?.keyword?;
    Some(Edit::ReplaceNode { node: keyword_node, replacement: new_name.to_string() })
}

fn keyword_name<'a>(cst: &'a Cst, arg: &pyshift_cst::CallArg) -> Option<&'a str> {
    let keyword = arg.keyword?;
    match cst.arena().kind(keyword) {
        pyshift_cst::CstKind::Name { id } => Some(id.as_str()),
        _ => None,
    }
}

fn arg_start(cst: &Cst, arg: &pyshift_cst::CallArg) -> pyshift_text_size::TextSize {
    match arg.keyword {
        Some(keyword) => cst.arena().get_node_range(keyword).start(),
        None => cst.arena().get_node_range(arg.value).start(),
    }
}

fn render_arg(cst: &Cst, arg: &pyshift_cst::CallArg) -> String {
    let prefix = if arg.is_starred { "*" } else { "" };
    match arg.keyword {
        Some(keyword) => format!("{prefix}{}={}", cst.arena().get_node_range(keyword).slice(cst.source()), cst.arena().get_node_range(arg.value).slice(cst.source())),
        None => format!("{prefix}{}", cst.arena().get_node_range(arg.value).slice(cst.source())),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use pyshift_cst::EditBatch;
    use pyshift_knowledge::BreakingChangeKind;

    use super::*;
    use crate::collaborators::{AlwaysAllow, AlwaysDeny};

    /// Always returns the same fixed replacement text, recording every
    /// request it was handed so a test can assert the oracle was (or wasn't)
    /// called.
    struct FakeOracle {
        replacement: &'static str,
    }

    impl RewriteOracle for FakeOracle {
        fn rewrite(&self, _request: &RewriteRequest<'_>) -> Result<String, crate::EngineError> {
            Ok(self.replacement.to_string())
        }
    }

    /// Always fails, so a test can exercise the "oracle call failed" branch.
    struct FailingOracle;

    impl RewriteOracle for FailingOracle {
        fn rewrite(&self, _request: &RewriteRequest<'_>) -> Result<String, crate::EngineError> {
            Err(crate::EngineError::Collaborator("oracle unreachable".to_string()))
        }
    }

    fn commit(cst: &Cst, outcome: &FileOutcome) -> String {
        let mut batch = EditBatch::new();
        for provenanced in &outcome.edits {
            match &provenanced.edit {
                Edit::ReplaceImport { node, new_source } => batch.replace_node(cst, *node, new_source.clone()),
                Edit::ReplaceNode { node, replacement } => batch.replace_node(cst, *node, replacement.clone()),
                Edit::ReplaceStringAtRange { range, replacement } => batch.replace_range(*range, replacement.clone()),
            }
        }
        batch.commit(cst, Path::new("<test>")).unwrap().render()
    }

    fn import_move_change(old_module: &str, new_module: &str) -> BreakingChange {
        BreakingChange::new(
            "test.import-move",
            BreakingChangeKind::ImportMove,
            MatchSpec::symbol(old_module),
            ReplacementSpec::ImportMove { new_module: new_module.to_string() },
            Confidence::High,
        )
    }

    /// Locks in the fix for the import-move splice: the replaced node's
    /// range covers the whole logical line including its trailing newline,
    /// so `new_source` must supply its own or the next statement merges onto
    /// the same line.
    #[test]
    fn tier2_import_move_keeps_following_statement_on_its_own_line() {
        let source = "from oldlib.mod import Thing\nx = Thing()\n";
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let change = import_move_change("oldlib.mod", "newlib.mod");
        let spec = MigrationSpec::new("oldlib", "1.0", "1.9", "2.0", vec![change]);

        let outcome = analyse_file(&cst, "oldlib", Confidence::Low, TierPolicy::UpToTier2, None, Some(&spec), &AlwaysAllow, &AlwaysAllow, "1.5", "2.0");

        assert_eq!(outcome.tier, Some(Tier::Tier2));
        assert_eq!(outcome.edits.len(), 1);
        let Edit::ReplaceImport { new_source, .. } = &outcome.edits[0].edit else { panic!("expected an import replacement") };
        assert!(new_source.ends_with('\n'));
        assert_eq!(commit(&cst, &outcome), "from newlib.mod import Thing\nx = Thing()\n");
    }

    #[test]
    fn tier2_import_move_preserves_alias() {
        let source = "from oldlib.mod import Thing as T\n";
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let index = UsageIndex::build(&cst, "oldlib");
        let change = import_move_change("oldlib.mod", "newlib.mod");

        let edits = tier2_edits_for_change(&cst, &index, &change, &AlwaysAllow, &AlwaysAllow, "oldlib", "1.5", "2.0", &mut Vec::new());

        assert_eq!(edits.len(), 1);
        let Edit::ReplaceImport { new_source, .. } = &edits[0] else { panic!("expected an import replacement") };
        assert_eq!(new_source, "from newlib.mod import Thing as T\n");
    }

    #[test]
    fn tier2_template_change_uses_oracle_when_quota_allows() {
        let source = "oldlib.frobnicate(1, 2)\n";
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let change = BreakingChange::new(
            "test.template",
            BreakingChangeKind::BehaviorChange,
            MatchSpec::symbol("oldlib.frobnicate"),
            ReplacementSpec::Template { template: String::new() },
            Confidence::Medium,
        );
        let spec = MigrationSpec::new("oldlib", "1.0", "1.9", "2.0", vec![change]);
        let oracle = FakeOracle { replacement: "newlib.frobnicate(1, 2)" };

        let outcome = analyse_file(&cst, "oldlib", Confidence::Low, TierPolicy::UpToTier2, None, Some(&spec), &oracle, &AlwaysAllow, "1.5", "2.0");

        assert_eq!(outcome.tier, Some(Tier::Tier2));
        assert_eq!(outcome.edits.len(), 1);
        assert_eq!(commit(&cst, &outcome), "newlib.frobnicate(1, 2)\n");
    }

    #[test]
    fn tier2_template_change_skipped_when_quota_gate_denies() {
        let source = "oldlib.frobnicate(1, 2)\n";
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let change = BreakingChange::new(
            "test.template",
            BreakingChangeKind::BehaviorChange,
            MatchSpec::symbol("oldlib.frobnicate"),
            ReplacementSpec::Template { template: String::new() },
            Confidence::Medium,
        );
        let spec = MigrationSpec::new("oldlib", "1.0", "1.9", "2.0", vec![change]);
        let oracle = FakeOracle { replacement: "unused" };

        let outcome = analyse_file(&cst, "oldlib", Confidence::Low, TierPolicy::UpToTier2, None, Some(&spec), &oracle, &AlwaysDeny, "1.5", "2.0");

        assert!(outcome.edits.is_empty());
        assert!(outcome.diagnostics.iter().any(|d| d.message.contains("quota gate denied")));
    }

    #[test]
    fn tier2_template_change_records_diagnostic_when_oracle_fails() {
        let source = "oldlib.frobnicate(1, 2)\n";
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let index = UsageIndex::build(&cst, "oldlib");
        let change = BreakingChange::new(
            "test.template",
            BreakingChangeKind::BehaviorChange,
            MatchSpec::symbol("oldlib.frobnicate"),
            ReplacementSpec::Template { template: String::new() },
            Confidence::Medium,
        );

        let edits = tier2_edits_for_change(&cst, &index, &change, &FailingOracle, &AlwaysAllow, "oldlib", "1.5", "2.0", &mut Vec::new());

        assert!(edits.is_empty());
    }

    #[test]
    fn tier1_only_policy_skips_tier2_and_tier3_with_downgrade_diagnostic() {
        let source = "oldlib.frobnicate(1, 2)\n";
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let change = import_move_change("oldlib.mod", "newlib.mod");
        let spec = MigrationSpec::new("oldlib", "1.0", "1.9", "2.0", vec![change]);

        let outcome = analyse_file(&cst, "oldlib", Confidence::Low, TierPolicy::Tier1Only, None, Some(&spec), &AlwaysAllow, &AlwaysAllow, "1.5", "2.0");

        assert!(outcome.edits.is_empty());
        assert_eq!(outcome.tier, None);
        assert!(outcome.diagnostics.iter().any(|d| d.message.contains("tier-policy=tier1-only")));
    }

    #[test]
    fn no_migration_spec_falls_back_to_tier3_only_when_policy_allows_all() {
        let source = "oldlib.frobnicate(1, 2)\n";
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let oracle = FakeOracle { replacement: "newlib.frobnicate(1, 2)" };

        let outcome = analyse_file(&cst, "oldlib", Confidence::Low, TierPolicy::UpToTier2, None, None, &oracle, &AlwaysAllow, "1.5", "2.0");
        assert!(outcome.edits.is_empty());
        assert_eq!(outcome.tier, None);

        let outcome = analyse_file(&cst, "oldlib", Confidence::Low, TierPolicy::All, None, None, &oracle, &AlwaysAllow, "1.5", "2.0");
        assert_eq!(outcome.tier, Some(Tier::Tier3));
        assert_eq!(outcome.tier3_changes, 1);
        assert_eq!(commit(&cst, &outcome), "newlib.frobnicate(1, 2)\n");
    }

    #[test]
    fn tier3_fallback_skipped_when_quota_gate_denies() {
        let source = "oldlib.frobnicate(1, 2)\n";
        let cst = Cst::parse(source, Path::new("<test>")).unwrap();
        let oracle = FakeOracle { replacement: "unused" };

        let outcome = analyse_file(&cst, "oldlib", Confidence::Low, TierPolicy::All, None, None, &oracle, &AlwaysDeny, "1.5", "2.0");

        assert!(outcome.edits.is_empty());
        assert!(outcome.diagnostics.iter().any(|d| d.message.contains("tier-3 fallback")));
    }
}

//! The Migration Engine (spec §4.6), Risk & Validation (§4.7) and Patch
//! Store (§4.8): orchestrates one library's migration over a project,
//! gluing the Scanner, Usage Index, Transformer Library, Knowledge Model
//! and Acquisition together behind the six functions spec §6 names.
//!
//! This crate never depends on `anyhow` — every fallible path returns
//! [`EngineError`], a single `thiserror` enum composing every crate
//! boundary below it, so the CLI Shell is the only place that needs to
//! attach ad-hoc context.

mod collaborators;
mod ordering;
mod patch_store;
mod risk;
mod tier;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use pyshift_cst::{Cst, EditBatch};
use pyshift_knowledge::{Confidence, MigrationSession, Patch, PatchState, ProvenancedEdit, SessionDiagnostic, Severity, Tier};
use pyshift_scanner::{ScanOptions, SourceFile};
use thiserror::Error;

pub use collaborators::{
    AlwaysAllow, AlwaysDeny, AuthenticationQuotaGate, DependencyLister, DependencyReport, RewriteOracle, RewriteRequest, SupportedLibrary, VersionResolver,
};
pub use ordering::order_libraries;
pub use patch_store::PatchStore;
pub use risk::{is_sensitive_path, RiskInputs};

/// Every error a caller of this crate's top-level functions can observe.
/// Composes the per-crate error enums it sits on top of via `#[from]`
/// (spec §7 "the engine-wide error type composes the per-crate `thiserror`
/// enums"); collaborator adapters that need to surface their own failure
/// map it into [`EngineError::Collaborator`] rather than this crate
/// growing a variant per adapter.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Scan(#[from] pyshift_scanner::ScanError),
    #[error(transparent)]
    Parse(#[from] pyshift_cst::ParseError),
    #[error(transparent)]
    Commit(#[from] pyshift_cst::CommitError),
    #[error(transparent)]
    Cache(#[from] pyshift_knowledge::CacheError),
    #[error(transparent)]
    Acquire(#[from] pyshift_acquire::AcquireError),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session store at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("session store at {path} has schema version {found}, expected {expected}")]
    UnsupportedSchemaVersion { path: PathBuf, found: u32, expected: u32 },
    #[error("no pending migration session found under {0}")]
    NoSession(PathBuf),
    #[error("unknown library: {0}")]
    UnknownLibrary(String),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
    /// A pluggable collaborator (`DependencyLister`, `VersionResolver`,
    /// `RewriteOracle`, ...) failed in a way specific to its own adapter;
    /// the engine has no structured representation for it.
    #[error("{0}")]
    Collaborator(String),
}

impl EngineError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

/// Upper bound on tiers a session is allowed to use (spec §6 `analyse`
/// option `tier-policy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierPolicy {
    /// Only run a file's Tier-1 transformer, if this build has one; never
    /// falls back to a cached `MigrationSpec` or the oracle.
    Tier1Only,
    /// Tier 1 where available, Tier 2 (cached `MigrationSpec`, oracle only
    /// to complete a `Template`) otherwise; never reaches Tier 3.
    UpToTier2,
    /// Every tier, including the oracle-only Tier-3 fallback for libraries
    /// with no Tier-1 transformer and no known breaking changes at all.
    All,
}

/// A cooperative cancellation flag (spec §5 "Cooperative cancellation as
/// messages"): checked between files and before every oracle call, never
/// forcibly aborting mid-file.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }
}

/// Options recognised by `analyse` (spec §6).
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub tier_policy: TierPolicy,
    pub confidence_floor: Confidence,
    /// Extra gitignore-style exclude patterns, on top of the Scanner's
    /// built-in defaults (spec §4.2, §6).
    pub exclude: Vec<String>,
    /// When `true`, `analyse` still builds the full `MigrationSession` (so
    /// the caller can inspect the would-be diff) but the session is not
    /// persisted to the Patch Store.
    pub dry_run: bool,
    /// Worker pool size (spec §5: "a worker pool (configurable, default =
    /// available cores)"); `None` lets `rayon` pick the default.
    pub jobs: Option<usize>,
    pub cancellation: Cancellation,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            tier_policy: TierPolicy::UpToTier2,
            confidence_floor: Confidence::Medium,
            exclude: Vec::new(),
            dry_run: false,
            jobs: None,
            cancellation: Cancellation::new(),
        }
    }
}

/// Options recognised by `apply` (spec §6).
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Write a `<file>.bak` of the pre-patch content before applying.
    pub backup: bool,
    /// Apply only the patch for this file; `None` applies every `Ready`
    /// patch in the session.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub applied: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl ApplyReport {
    /// Spec §7 "user-visible failure": non-zero only when the caller asked
    /// for an apply and not a single patch went through.
    #[must_use]
    pub fn is_total_failure(&self) -> bool {
        !self.failed.is_empty() && self.applied.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub session: Option<MigrationSession>,
}

/// Collaborators `analyse` needs beyond the options above (spec §6 "all
/// collaborators are pluggable"): acquisition's cache and two adapters, plus
/// the per-usage rewrite oracle and its quota gate.
pub struct AnalyseCollaborators<'a> {
    pub cache: &'a pyshift_knowledge::KnowledgeCache,
    pub source_fetcher: &'a dyn pyshift_acquire::SourceFetcher,
    pub extraction_oracle: &'a dyn pyshift_acquire::ExtractionOracle,
    pub rewrite_oracle: &'a dyn RewriteOracle,
    pub quota_gate: &'a dyn AuthenticationQuotaGate,
}

/// Spec §6 `libraries() -> [SupportedLibrary]`: every library this build
/// has a Tier-1 transformer for.
#[must_use]
pub fn libraries() -> Vec<SupportedLibrary> {
    pyshift_transform::known_transformers().iter().map(|transformer| SupportedLibrary { name: transformer.library().to_string() }).collect()
}

/// Spec §6 `scan(project-root) -> [DependencyReport]`.
pub fn scan(project_root: &Path, lister: &dyn DependencyLister, resolver: &dyn VersionResolver) -> Result<Vec<DependencyReport>, EngineError> {
    let declared = lister.list(project_root)?;
    let mut reports = Vec::with_capacity(declared.len());
    for (package, version_pin) in declared {
        let latest_version = resolver.latest_version(&package)?;
        let has_tier1_transformer = pyshift_transform::transformer_for(&package).is_some();
        reports.push(DependencyReport { package, version_pin, latest_version, has_tier1_transformer });
    }
    Ok(reports)
}

/// Spec §6 `status(project-root) -> SessionStatus`.
pub fn status(project_root: &Path) -> Result<SessionStatus, EngineError> {
    Ok(SessionStatus { session: PatchStore::new(project_root).load()? })
}

/// Spec §6 `diff(session) -> unified-text`: renders every `Ready` or
/// already-`Applied` patch as a unified diff against the file's current
/// on-disk content.
pub fn diff(session: &MigrationSession) -> Result<String, EngineError> {
    let mut rendered = String::new();
    for patch in &session.patches {
        if !matches!(patch.state, PatchState::Ready | PatchState::Applied) {
            continue;
        }
        let original = std::fs::read_to_string(&patch.file).map_err(|source| EngineError::io(&patch.file, source))?;
        let display_path = patch.file.display().to_string();
        let text_diff = similar::TextDiff::from_lines(&original, &patch.new_source);
        rendered.push_str(&text_diff.unified_diff().header(&display_path, &display_path).to_string());
    }
    Ok(rendered)
}

/// Spec §6 `apply(session, options) -> ApplyReport`: writes every `Ready`
/// patch's `new_source` to disk (write-to-temp-then-rename, spec §4.6
/// "Atomicity"), refusing any file that changed on disk since `analyse`.
pub fn apply(session: &mut MigrationSession, options: &ApplyOptions, project_root: &Path) -> Result<ApplyReport, EngineError> {
    let mut report = ApplyReport::default();

    for patch in &mut session.patches {
        if let Some(only) = &options.file {
            if &patch.file != only {
                continue;
            }
        }
        if !matches!(patch.state, PatchState::Ready) {
            report.skipped.push(patch.file.clone());
            continue;
        }

        let current = match std::fs::read_to_string(&patch.file) {
            Ok(text) => text,
            Err(error) => {
                patch.mark_failed();
                report.failed.push((patch.file.clone(), error.to_string()));
                continue;
            }
        };

        if current == patch.new_source {
            // Spec §4.8 idempotence: the file already reads as migrated.
            patch.mark_applied();
            report.applied.push(patch.file.clone());
            continue;
        }

        if Patch::fingerprint(&current) != patch.source_fingerprint {
            patch.mark_failed();
            report.failed.push((patch.file.clone(), "file changed on disk since analyse; re-run analyse before apply".to_string()));
            continue;
        }

        if options.backup {
            if let Err(error) = std::fs::write(backup_path_for(&patch.file), &current) {
                patch.mark_failed();
                report.failed.push((patch.file.clone(), error.to_string()));
                continue;
            }
        }

        match write_atomically(&patch.file, &patch.new_source) {
            Ok(()) => {
                patch.mark_applied();
                report.applied.push(patch.file.clone());
            }
            Err(error) => {
                patch.mark_failed();
                report.failed.push((patch.file.clone(), error.to_string()));
            }
        }
    }

    PatchStore::new(project_root).save(session)?;
    Ok(report)
}

fn backup_path_for(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

/// Write-to-temp-then-rename in the file's own directory, so the rename is
/// same-filesystem and therefore atomic; a failed write never touches the
/// original (spec §4.6 "Atomicity: either all of a single file's edits
/// land or none").
fn write_atomically(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, contents.as_bytes())?;
    tmp.persist(path).map_err(|error| error.error)?;
    Ok(())
}

/// Spec §6 `analyse(library, target-version, project-root, options) ->
/// MigrationSession`: scans the project, dispatches every file through the
/// tier pipeline (spec §4.6), resolves import bookkeeping, parse-checks the
/// result, and scores the session's aggregate risk (spec §4.7).
pub fn analyse(
    library: &str,
    from_version: &str,
    to_version: &str,
    project_root: &Path,
    options: &MigrationOptions,
    collaborators: &AnalyseCollaborators<'_>,
) -> Result<MigrationSession, EngineError> {
    let _span = tracing::info_span!("session", library, from_version, to_version).entered();

    let scan_options = ScanOptions { exclude: options.exclude.clone(), ..ScanOptions::default() };
    let scan_result = pyshift_scanner::scan(project_root, &scan_options)?;

    let mut session = MigrationSession::new(library, from_version, to_version);
    for diagnostic in scan_result.diagnostics {
        session.diagnostics.push(scan_diagnostic_to_session(diagnostic));
    }

    let tier1 = pyshift_transform::transformer_for(library);
    let migration_spec = if tier1.is_some() || matches!(options.tier_policy, TierPolicy::Tier1Only) {
        None
    } else {
        Some(pyshift_acquire::acquire(library, from_version, to_version, collaborators.cache, collaborators.source_fetcher, collaborators.extraction_oracle)?)
    };

    let pool = build_pool(options.jobs)?;
    let tier1_ref = tier1.as_deref();
    let migration_spec_ref = migration_spec.as_ref();
    let cancellation = &options.cancellation;

    let built: Vec<FileBuild> = pool.install(|| {
        use rayon::prelude::*;
        scan_result
            .files
            .par_iter()
            .map(|source_file| {
                if cancellation.is_cancelled() {
                    return FileBuild::default();
                }
                build_file(
                    source_file,
                    library,
                    from_version,
                    to_version,
                    options,
                    tier1_ref,
                    migration_spec_ref,
                    collaborators.rewrite_oracle,
                    collaborators.quota_gate,
                )
            })
            .collect()
    });

    let mut total = RiskInputsAccumulator::default();
    for build in built {
        session.diagnostics.extend(build.diagnostics);
        if let Some(patch) = build.patch {
            session.tier_by_file.insert(patch.file.clone(), build.tier.unwrap_or(Tier::Tier1));
            session.patches.push(patch);
        }
        total.add(&build.risk);
    }

    let score = risk::score(&total.as_inputs());
    session.risk = risk::as_confidence(score);

    if !options.dry_run {
        PatchStore::new(project_root).save(&session)?;
    }

    Ok(session)
}

fn build_pool(jobs: Option<usize>) -> Result<rayon::ThreadPool, EngineError> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(jobs) = jobs {
        builder = builder.num_threads(jobs);
    }
    builder.build().map_err(|error| EngineError::ThreadPool(error.to_string()))
}

fn scan_diagnostic_to_session(diagnostic: pyshift_scanner::ScanDiagnostic) -> SessionDiagnostic {
    match diagnostic {
        pyshift_scanner::ScanDiagnostic::ParseFailed { path, error } => {
            SessionDiagnostic { file: Some(path), message: format!("failed to parse: {error}"), severity: Severity::Warn }
        }
        pyshift_scanner::ScanDiagnostic::Skipped { path, reason } => {
            SessionDiagnostic { file: Some(path), message: format!("skipped: {reason:?}"), severity: Severity::Info }
        }
    }
}

#[derive(Default)]
struct FileBuild {
    patch: Option<Patch>,
    tier: Option<Tier>,
    diagnostics: Vec<SessionDiagnostic>,
    risk: RiskInputs,
}

#[derive(Default, Clone, Copy)]
struct RiskInputsAccumulator {
    files_affected: usize,
    change_count: usize,
    tier2_changes: usize,
    tier3_changes: usize,
    sensitive_path_hits: usize,
    medium_or_lower_confidence_changes: usize,
}

impl RiskInputsAccumulator {
    fn add(&mut self, inputs: &RiskInputs) {
        self.files_affected += inputs.files_affected;
        self.change_count += inputs.change_count;
        self.tier2_changes += inputs.tier2_changes;
        self.tier3_changes += inputs.tier3_changes;
        self.sensitive_path_hits += inputs.sensitive_path_hits;
        self.medium_or_lower_confidence_changes += inputs.medium_or_lower_confidence_changes;
    }

    fn as_inputs(self) -> RiskInputs {
        RiskInputs {
            files_affected: self.files_affected,
            change_count: self.change_count,
            tier2_changes: self.tier2_changes,
            tier3_changes: self.tier3_changes,
            sensitive_path_hits: self.sensitive_path_hits,
            medium_or_lower_confidence_changes: self.medium_or_lower_confidence_changes,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_file(
    source_file: &SourceFile,
    library: &str,
    from_version: &str,
    to_version: &str,
    options: &MigrationOptions,
    tier1: Option<&dyn pyshift_transform::Tier1Transformer>,
    migration_spec: Option<&pyshift_knowledge::MigrationSpec>,
    rewrite_oracle: &dyn RewriteOracle,
    quota_gate: &dyn AuthenticationQuotaGate,
) -> FileBuild {
    let outcome = tier::analyse_file(
        &source_file.cst,
        library,
        options.confidence_floor,
        options.tier_policy,
        tier1,
        migration_spec,
        rewrite_oracle,
        quota_gate,
        from_version,
        to_version,
    );

    let mut diagnostics: Vec<SessionDiagnostic> = outcome
        .diagnostics
        .into_iter()
        .map(|mut diagnostic| {
            diagnostic.file.get_or_insert_with(|| source_file.path.clone());
            diagnostic
        })
        .collect();

    if outcome.edits.is_empty() {
        return FileBuild { diagnostics, ..FileBuild::default() };
    }

    let change_count = outcome.edits.len();
    let risk = RiskInputs {
        files_affected: 1,
        change_count,
        tier2_changes: outcome.tier2_changes,
        tier3_changes: outcome.tier3_changes,
        sensitive_path_hits: usize::from(risk::is_sensitive_path(&source_file.path)),
        medium_or_lower_confidence_changes: outcome.medium_or_lower_confidence_changes,
    };

    match build_patch(&source_file.cst, &source_file.path, outcome.edits, &outcome.requires_imports, &outcome.removes_imports) {
        Ok(mut patch) => {
            patch.mark_ready();
            FileBuild { patch: Some(patch), tier: outcome.tier, diagnostics, risk }
        }
        Err(error) => {
            diagnostics.push(SessionDiagnostic { file: Some(source_file.path.clone()), message: format!("patch rejected: {error}"), severity: Severity::Error });
            FileBuild { diagnostics, risk, ..FileBuild::default() }
        }
    }
}

/// Commits a file's rewrite edits, then resolves import bookkeeping against
/// the rewritten tree (spec §4.1 "import ops"), then parse-checks the final
/// text (spec §4.7 Validation) before handing back a `Patch` carrying its
/// rendered `new_source` (see [`pyshift_knowledge::Patch`]'s doc comment for
/// why the edits themselves are not replayed post-persistence).
fn build_patch(
    cst: &Cst,
    path: &Path,
    edits: Vec<ProvenancedEdit>,
    requires_imports: &[pyshift_transform::ImportRequirement],
    removes_imports: &[String],
) -> Result<Patch, EngineError> {
    let mut batch = EditBatch::new();
    for provenanced in &edits {
        queue_edit(&mut batch, cst, &provenanced.edit);
    }
    let rewritten = batch.commit(cst, path)?;

    let mut import_batch = EditBatch::new();
    for requirement in requires_imports {
        import_batch.ensure_import(&rewritten, &requirement.module, &requirement.name, requirement.alias.as_deref());
    }
    if !removes_imports.is_empty() {
        let candidates: std::collections::HashSet<&str> = removes_imports.iter().map(String::as_str).collect();
        import_batch.remove_unused_imports(&rewritten, |name| !candidates.contains(name) || is_name_referenced(&rewritten, name));
    }
    let final_cst = if import_batch.is_empty() { rewritten } else { import_batch.commit(&rewritten, path)? };

    let new_source = final_cst.render();
    let fingerprint = Patch::fingerprint(cst.source());
    Ok(Patch::new(path, edits, fingerprint, new_source))
}

fn queue_edit(batch: &mut EditBatch, cst: &Cst, edit: &pyshift_knowledge::Edit) {
    use pyshift_knowledge::Edit;
    match edit {
        Edit::ReplaceNode { node, replacement } => batch.replace_node(cst, *node, replacement.clone()),
        Edit::ReplaceStringAtRange { range, replacement } => batch.replace_range(*range, replacement.clone()),
        Edit::InsertSiblingBefore { anchor, text } => batch.insert_before(cst.arena().get_node_range(*anchor), text.clone()),
        Edit::InsertSiblingAfter { anchor, text } => {
            let end = cst.arena().get_node_range(*anchor).end();
            batch.replace_range(pyshift_text_size::TextRange::at(end, pyshift_text_size::TextSize::new(0)), text.clone());
        }
        Edit::DeleteNode { node } => batch.delete_range(cst.arena().get_node_range(*node)),
        Edit::ReplaceImport { node, new_source } => batch.replace_node(cst, *node, new_source.clone()),
    }
}

/// Whether `name` is referenced anywhere outside an import statement.
/// Import statements never produce `Name` nodes of their own (aliases are
/// plain strings on `ImportAlias`), so any `Name` node bound to `name`
/// found in the arena is necessarily a real usage site.
fn is_name_referenced(cst: &Cst, name: &str) -> bool {
    cst.arena().nodes().any(|(_, kind, _)| matches!(kind, pyshift_cst::CstKind::Name { id } if id == name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_report_is_total_failure_only_when_nothing_applied() {
        let mut report = ApplyReport::default();
        assert!(!report.is_total_failure());
        report.failed.push((PathBuf::from("a.py"), "boom".to_string()));
        assert!(report.is_total_failure());
        report.applied.push(PathBuf::from("b.py"));
        assert!(!report.is_total_failure());
    }

    #[test]
    fn cancellation_starts_uncancelled() {
        let cancellation = Cancellation::new();
        assert!(!cancellation.is_cancelled());
        cancellation.cancel();
        assert!(cancellation.is_cancelled());
    }

    #[test]
    fn is_name_referenced_ignores_import_statements() {
        let cst = Cst::parse("from pydantic import BaseModel\nx = 1\n", Path::new("<test>")).unwrap();
        assert!(!is_name_referenced(&cst, "BaseModel"));
    }

    #[test]
    fn is_name_referenced_finds_real_usage() {
        let cst = Cst::parse("from pydantic import BaseModel\nu = BaseModel()\n", Path::new("<test>")).unwrap();
        assert!(is_name_referenced(&cst, "BaseModel"));
    }
}

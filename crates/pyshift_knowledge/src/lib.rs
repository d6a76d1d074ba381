//! The Knowledge Model (spec §3: `BreakingChange`, `MigrationSpec`) and its
//! on-disk, schema-versioned cache (spec §4.5 step 1, §6 persisted-state
//! layout).
//!
//! Every field but `BreakingChange::explanation` is machine-consumable, per
//! spec — there is deliberately no free-form "rule body" here: `kind`,
//! `matcher` and `replacement` are closed enums (spec.md §9 "Tagged variants
//! over inheritance"), so a transformer or the engine can `match` on them
//! exhaustively instead of calling into opaque logic.

use std::fs;
use std::path::{Path, PathBuf};

use pyshift_cst::NodeId;
use pyshift_text_size::TextRange;
use pyshift_usage::UsageRole;
use serde::{Deserialize, Serialize};

/// One of the nine breaking-change shapes spec.md §3 enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakingChangeKind {
    SymbolRename,
    AttributeRename,
    MethodRename,
    FunctionSignature,
    DecoratorShape,
    ClassConfigRestructure,
    ImportMove,
    ArgumentRename,
    ArgumentRemoved,
    BehaviorChange,
}

/// Confidence ordered `Low < Medium < High` so an engine can fold a list of
/// them down to the weakest one feeding a session's aggregate risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Source-version match predicate for a `BreakingChange`: a dotted symbol
/// plus the optional lexical/syntactic constraints that narrow a candidate
/// usage down to the exact shape this change applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpec {
    /// Dotted source-version symbol, e.g. `"pydantic.BaseModel.dict"`.
    pub symbol: String,
    /// Restrict to usages found in this syntactic role, when the rule only
    /// applies to one (e.g. a decorator-shape change only matches
    /// [`UsageRole::Decorator`] usages).
    pub role: Option<UsageRole>,
    pub min_positional_args: Option<usize>,
    pub required_kwargs: Vec<String>,
}

impl MatchSpec {
    #[must_use]
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self { symbol: symbol.into(), role: None, min_positional_args: None, required_kwargs: Vec::new() }
    }

    #[must_use]
    pub fn with_role(mut self, role: UsageRole) -> Self {
        self.role = Some(role);
        self
    }
}

/// Target-version replacement shape, with capture interpolation left to the
/// consumer (the matched symbol/arguments are available wherever `{0}`-style
/// placeholders appear in [`ReplacementSpec::Template`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplacementSpec {
    Rename { new_symbol: String },
    MethodRename { new_method: String },
    AttributeRename { new_attr: String },
    ArgumentRename { old_name: String, new_name: String },
    ArgumentRemove { name: String },
    ImportMove { new_module: String },
    /// A free-form shape that still needs the extraction/rewrite oracle (or
    /// tier-3 full generation) to complete, e.g. a multi-statement
    /// class-config restructure. `template` may contain `{0}`, `{1}`, ...
    /// placeholders referring to the matched call's positional arguments.
    Template { template: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakingChange {
    pub id: String,
    pub kind: BreakingChangeKind,
    pub matcher: MatchSpec,
    pub replacement: ReplacementSpec,
    pub confidence: Confidence,
    /// Imports this change requires adding to a file it touches.
    pub requires_imports: Vec<String>,
    /// Imports that may become unused once this change is applied; the
    /// engine decides whether to actually remove them (it's a possibility,
    /// not a certainty — another usage in the file may still need them).
    pub removes_imports: Vec<String>,
    pub explanation: String,
    pub source_url: String,
    pub source_excerpt: String,
}

impl BreakingChange {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: BreakingChangeKind, matcher: MatchSpec, replacement: ReplacementSpec, confidence: Confidence) -> Self {
        Self {
            id: id.into(),
            kind,
            matcher,
            replacement,
            confidence,
            requires_imports: Vec::new(),
            removes_imports: Vec::new(),
            explanation: String::new(),
            source_url: String::new(),
            source_excerpt: String::new(),
        }
    }

    /// De-duplication key for merging extraction-oracle output across
    /// independently fetched sources (spec §4.5 step 3: "merge... de-duplicating
    /// by `(kind, symbol, replacement)`").
    #[must_use]
    pub fn dedup_key(&self) -> (BreakingChangeKind, &str, &ReplacementSpec) {
        (self.kind, self.matcher.symbol.as_str(), &self.replacement)
    }
}

/// A library name, source-version range, and target version, together with
/// the ordered `BreakingChange` list between them. Identity is
/// `(library, source_range, target_version)`; immutable after construction,
/// and cached once acquired (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSpec {
    pub library: String,
    pub source_version_min: String,
    pub source_version_max: String,
    pub target_version: String,
    pub changes: Vec<BreakingChange>,
}

impl MigrationSpec {
    #[must_use]
    pub fn new(library: impl Into<String>, source_version_min: impl Into<String>, source_version_max: impl Into<String>, target_version: impl Into<String>, changes: Vec<BreakingChange>) -> Self {
        Self {
            library: library.into(),
            source_version_min: source_version_min.into(),
            source_version_max: source_version_max.into(),
            target_version: target_version.into(),
            changes,
        }
    }

    /// An empty spec with no changes and no source provenance, returned by
    /// Knowledge Acquisition when zero sources were found for a version pair
    /// (spec §4.5 step 2) so upstream layers degrade to tier-3 rather than
    /// erroring.
    #[must_use]
    pub fn empty(library: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        Self { library: library.into(), source_version_min: from.clone(), source_version_max: from, target_version: to.into(), changes: Vec::new() }
    }

    #[must_use]
    pub fn cache_key(&self) -> String {
        cache_key(&self.library, &self.source_version_min, &self.target_version)
    }
}

#[must_use]
fn cache_key(library: &str, from: &str, to: &str) -> String {
    format!("{library}_{from}_{to}")
}

/// A structural mutation against a specific node identity (spec §3). Edits
/// are pure descriptions: they do not execute until [`pyshift_cst::EditBatch`]
/// renders and commits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Edit {
    ReplaceNode { node: NodeId, replacement: String },
    ReplaceStringAtRange { range: TextRange, replacement: String },
    InsertSiblingBefore { anchor: NodeId, text: String },
    InsertSiblingAfter { anchor: NodeId, text: String },
    DeleteNode { node: NodeId },
    /// Rewrites an entire `import`/`from...import` statement, e.g. moving a
    /// symbol to a new module (spec's `import-move` kind).
    ReplaceImport { node: NodeId, new_source: String },
}

/// One `Edit` plus which `BreakingChange` produced it (spec §3 Patch
/// provenance requirement).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenancedEdit {
    pub edit: Edit,
    pub breaking_change_id: String,
}

/// Patch lifecycle (spec §4.6): `Proposed` → (parse-check) → `Ready` |
/// `Rejected`; `Ready` → (apply) → `Applied` | `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchState {
    Proposed,
    Ready,
    Rejected,
    Applied,
    Failed,
}

/// Per-file ordered, non-overlapping set of `Edit`s plus provenance (spec
/// §3). The `Edit`s themselves reference `NodeId`s only meaningful against
/// the `Cst` alive in the `analyse` process (spec §3 Ownership note: "a
/// persisted `Patch` may outlive the process... that produced it") — so the
/// engine resolves them to a concrete `new_source` once, during `analyse`,
/// while the arena is still live. `edits` is kept for provenance and risk
/// reporting; `new_source` is what `apply` actually writes and what `diff`
/// compares against the current file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub file: PathBuf,
    pub edits: Vec<ProvenancedEdit>,
    pub state: PatchState,
    /// A cheap fingerprint of the original file's bytes at analyse time,
    /// used by the Patch Store to detect a file that changed on disk
    /// between `analyse` and `apply` — the stored `Edit`s reference node
    /// identities that are only meaningful against that exact source text
    /// (spec §3 `NodeId` note: a `Patch` may outlive the arena that
    /// produced it).
    pub source_fingerprint: u64,
    /// The fully rendered post-patch file content, already parse-checked
    /// (spec §4.7 Validation) at the point this `Patch` was built.
    pub new_source: String,
}

impl Patch {
    #[must_use]
    pub fn new(file: impl Into<PathBuf>, edits: Vec<ProvenancedEdit>, source_fingerprint: u64, new_source: impl Into<String>) -> Self {
        Self { file: file.into(), edits, state: PatchState::Proposed, source_fingerprint, new_source: new_source.into() }
    }

    /// Hashes source text the same way every caller must, so a fingerprint
    /// computed at `analyse` time and one recomputed at `apply` time are
    /// comparable.
    #[must_use]
    pub fn fingerprint(source: &str) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        source.hash(&mut hasher);
        hasher.finish()
    }

    /// Moves `Proposed` → `Ready`, the only transition a parse-check success
    /// is allowed to make.
    pub fn mark_ready(&mut self) {
        debug_assert_eq!(self.state, PatchState::Proposed, "only a Proposed patch can become Ready");
        self.state = PatchState::Ready;
    }

    pub fn mark_rejected(&mut self) {
        debug_assert_eq!(self.state, PatchState::Proposed, "only a Proposed patch can be Rejected");
        self.state = PatchState::Rejected;
    }

    pub fn mark_applied(&mut self) {
        debug_assert_eq!(self.state, PatchState::Ready, "only a Ready patch can become Applied");
        self.state = PatchState::Applied;
    }

    /// A failed apply must not corrupt the original file (spec §4.6); this
    /// only records the outcome, the actual write is the Patch Store's job
    /// and must have already failed atomically (write-to-temp, no rename).
    pub fn mark_failed(&mut self) {
        debug_assert_eq!(self.state, PatchState::Ready, "only a Ready patch can become Failed");
        self.state = PatchState::Failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDiagnostic {
    pub file: Option<PathBuf>,
    pub message: String,
    pub severity: Severity,
}

/// Transient, persisted between `analyse` and `apply` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSession {
    pub library: String,
    pub from_version: String,
    pub to_version: String,
    pub patches: Vec<Patch>,
    pub risk: Confidence,
    pub diagnostics: Vec<SessionDiagnostic>,
    /// Tier used for each patch, keyed by the patch's file path, since a
    /// session's patches are the only per-file granularity spec.md names
    /// ("tier used for each Patch").
    pub tier_by_file: std::collections::BTreeMap<PathBuf, Tier>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl MigrationSession {
    #[must_use]
    pub fn new(library: impl Into<String>, from_version: impl Into<String>, to_version: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            from_version: from_version.into(),
            to_version: to_version.into(),
            patches: Vec::new(),
            risk: Confidence::Low,
            diagnostics: Vec::new(),
            tier_by_file: std::collections::BTreeMap::new(),
            created_at: chrono::Utc::now(),
        }
    }
}

/// Errors from the schema-versioned `MigrationSpec` cache (spec §4.5 step 1,
/// §6 persisted-state layout).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("cache entry at {path} is corrupt: {source}")]
    Corrupt { path: PathBuf, #[source] source: serde_json::Error },
    #[error("cache entry at {path} has schema version {found}, expected {expected}")]
    UnsupportedSchemaVersion { path: PathBuf, found: u32, expected: u32 },
}

const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    schema_version: u32,
    spec: MigrationSpec,
}

/// The `MigrationSpec` cache (spec §6 `cache/<library>_<from>_<to>.spec`):
/// read-shared across workers, writer-serialized, durable-rename on write
/// (spec §4.5, §5 "Shared resources") exactly like the Patch Store persists
/// patches, so a crash mid-write never corrupts a cache entry.
pub struct KnowledgeCache {
    root: PathBuf,
}

impl KnowledgeCache {
    /// `root` is the session directory's `cache/` subdirectory
    /// (`<project-root>/.pyshift/cache`); created lazily on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, library: &str, from: &str, to: &str) -> PathBuf {
        self.root.join(format!("{}.spec", cache_key(library, from, to)))
    }

    /// Returns `Ok(None)` on a cache miss; never treats a miss as an error.
    pub fn get(&self, library: &str, from: &str, to: &str) -> Result<Option<MigrationSpec>, CacheError> {
        let path = self.path_for(library, from, to);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        // Schema version is checked against the raw JSON first: an unknown
        // version may not even deserialize into the current `MigrationSpec`
        // shape, and "refuse to read unknown versions" must win over "failed
        // to parse" (spec §6).
        let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt { path: path.clone(), source })?;
        let found_version = value.get("schema_version").and_then(serde_json::Value::as_u64).unwrap_or(0);
        if found_version != u64::from(CACHE_SCHEMA_VERSION) {
            return Err(CacheError::UnsupportedSchemaVersion {
                path,
                found: u32::try_from(found_version).unwrap_or(u32::MAX),
                expected: CACHE_SCHEMA_VERSION,
            });
        }
        let envelope: CacheEnvelope = serde_json::from_value(value).map_err(|source| CacheError::Corrupt { path: path.clone(), source })?;
        tracing::debug!(library, from, to, "knowledge cache hit");
        Ok(Some(envelope.spec))
    }

    /// Writes `spec` keyed by its own `(library, source_version_min,
    /// target_version)`, via write-to-`.tmp`-then-`rename` so a reader never
    /// observes a partially written file.
    pub fn put(&self, spec: &MigrationSpec) -> Result<(), CacheError> {
        fs::create_dir_all(&self.root).map_err(|source| CacheError::Io { path: self.root.clone(), source })?;
        let path = self.path_for(&spec.library, &spec.source_version_min, &spec.target_version);
        let tmp_path = path.with_extension("spec.tmp");
        let envelope = CacheEnvelope { schema_version: CACHE_SCHEMA_VERSION, spec: spec.clone() };
        let bytes = serde_json::to_vec_pretty(&envelope).map_err(|source| CacheError::Corrupt { path: tmp_path.clone(), source })?;
        fs::write(&tmp_path, bytes).map_err(|source| CacheError::Io { path: tmp_path.clone(), source })?;
        fs::rename(&tmp_path, &path).map_err(|source| CacheError::Io { path, source })?;
        tracing::debug!(library = %spec.library, from = %spec.source_version_min, to = %spec.target_version, "knowledge cache write");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn sample_spec() -> MigrationSpec {
        let change = BreakingChange::new(
            "pydantic.dict-to-model_dump",
            BreakingChangeKind::MethodRename,
            MatchSpec::symbol("pydantic.BaseModel.dict").with_role(UsageRole::Call),
            ReplacementSpec::MethodRename { new_method: "model_dump".to_string() },
            Confidence::High,
        );
        MigrationSpec::new("pydantic", "1.10", "1.10", "2.5", vec![change])
    }

    #[test]
    fn confidence_orders_low_to_high() {
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
    }

    #[test]
    fn dedup_key_ignores_id_and_confidence() {
        let a = BreakingChange::new("a", BreakingChangeKind::MethodRename, MatchSpec::symbol("x.y"), ReplacementSpec::MethodRename { new_method: "z".into() }, Confidence::Low);
        let b = BreakingChange::new("b", BreakingChangeKind::MethodRename, MatchSpec::symbol("x.y"), ReplacementSpec::MethodRename { new_method: "z".into() }, Confidence::High);
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn patch_state_machine_follows_spec_transitions() {
        let mut patch = Patch::new(Path::new("a.py"), vec![], Patch::fingerprint(""), "");
        assert_eq!(patch.state, PatchState::Proposed);
        patch.mark_ready();
        assert_eq!(patch.state, PatchState::Ready);
        patch.mark_applied();
        assert_eq!(patch.state, PatchState::Applied);
    }

    #[test]
    fn cache_round_trips_through_durable_rename() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KnowledgeCache::new(dir.path());
        let spec = sample_spec();

        assert!(cache.get("pydantic", "1.10", "2.5").unwrap().is_none());
        cache.put(&spec).unwrap();
        let roundtripped = cache.get("pydantic", "1.10", "2.5").unwrap().unwrap();
        assert_eq!(roundtripped.library, "pydantic");
        assert_eq!(roundtripped.changes.len(), 1);

        let tmp_leftover = dir.path().join("pydantic_1.10_2.5.spec.tmp");
        assert!(!tmp_leftover.exists(), "durable-rename must not leave a .tmp file behind");
    }

    #[test]
    fn cache_rejects_unknown_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pydantic_1.10_2.5.spec");
        fs::write(&path, br#"{"schema_version":99,"spec":null}"#).unwrap();
        let cache = KnowledgeCache::new(dir.path());
        let err = cache.get("pydantic", "1.10", "2.5").unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedSchemaVersion { found: 99, expected: CACHE_SCHEMA_VERSION, .. }));
    }

    #[test]
    fn empty_spec_has_no_changes_for_zero_sources() {
        let spec = MigrationSpec::empty("obscure-lib", "1.0", "2.0");
        assert!(spec.changes.is_empty());
        assert_eq!(spec.cache_key(), "obscure-lib_1.0_2.0");
    }
}

//! Collaborator interfaces the engine requires from its environment (spec
//! §6) beyond the `SourceFetcher`/`ExtractionOracle` pair already defined by
//! [`pyshift_acquire`]. Every one of these is pluggable; the engine itself
//! only ever calls through the trait object, never a concrete adapter.

use pyshift_knowledge::BreakingChange;

use crate::EngineError;

/// One declared dependency read from a project manifest, with its current
/// pin and (if resolved) the latest released version.
#[derive(Debug, Clone)]
pub struct DependencyReport {
    pub package: String,
    pub version_pin: String,
    pub latest_version: Option<String>,
    pub has_tier1_transformer: bool,
}

/// A library this build can migrate at Tier 1 (spec §6 `libraries()`).
#[derive(Debug, Clone)]
pub struct SupportedLibrary {
    pub name: String,
}

/// Returns `(package, version-pin)` tuples from a project manifest (spec §6
/// "Dependency lister"). The engine never parses manifests itself — a
/// `pyproject.toml`/`requirements.txt` reader is the caller's concern.
pub trait DependencyLister: Send + Sync {
    fn list(&self, project_root: &std::path::Path) -> Result<Vec<(String, String)>, EngineError>;
}

/// Given a package name, returns the latest released version string (spec
/// §6 "Version resolver").
pub trait VersionResolver: Send + Sync {
    fn latest_version(&self, package: &str) -> Result<Option<String>, EngineError>;
}

/// What a [`RewriteOracle`] is handed: the breaking change it should resolve
/// and the exact source slice surrounding the matched usage (spec §6
/// "Rewrite oracle").
pub struct RewriteRequest<'a> {
    pub library: &'a str,
    pub from_version: &'a str,
    pub to_version: &'a str,
    pub change: &'a BreakingChange,
    pub file_slice: &'a str,
}

/// Given `{library, from-version, to-version, breaking-change, file-slice}`,
/// returns a replacement for the slice that must parse (spec §6 "Rewrite
/// oracle"). Used to complete a Tier-2 [`pyshift_knowledge::ReplacementSpec::Template`]
/// and to drive Tier-3 rewrites outright.
pub trait RewriteOracle: Send + Sync {
    fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<String, EngineError>;
}

/// A yes/no predicate consulted before invoking the rewrite oracle (spec §6
/// "Authentication/quota gate"); on `no` the engine degrades to a lower tier
/// rather than treating the call as an error.
pub trait AuthenticationQuotaGate: Send + Sync {
    fn allow_oracle_call(&self) -> bool;
}

/// Always permits oracle calls — the default for tests and for a build with
/// no quota concept.
pub struct AlwaysAllow;
impl AuthenticationQuotaGate for AlwaysAllow {
    fn allow_oracle_call(&self) -> bool {
        true
    }
}

/// Never permits oracle calls; a session run against this gate is pinned to
/// whatever Tier-1/pure-template Tier-2 coverage already exists.
pub struct AlwaysDeny;
impl AuthenticationQuotaGate for AlwaysDeny {
    fn allow_oracle_call(&self) -> bool {
        false
    }
}

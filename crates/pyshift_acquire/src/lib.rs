//! Knowledge Acquisition (spec §4.5): fetches changelogs/migration guides
//! for a `(library, from-version, to-version)` pair, hands them to an
//! extraction oracle, and merges the result into a cached [`MigrationSpec`].
//!
//! Both collaborators — the source fetcher and the extraction oracle — are
//! traits (spec §6 "all collaborators are pluggable"). This crate ships one
//! production adapter for each, built the way `vowstar-llm-git`'s
//! `api.rs` builds its Anthropic-messages client: a blocking `reqwest`
//! client, a bounded retry budget with exponential backoff, and a narrow
//! JSON contract. The acquisition algorithm itself (`acquire`) only ever
//! talks to the trait objects, so tests exercise it against fakes without a
//! network.

use std::time::Duration;

use pyshift_knowledge::{BreakingChange, Confidence, KnowledgeCache, MigrationSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod oracle_http;
mod source_http;

pub use oracle_http::HttpExtractionOracle;
pub use source_http::GithubChangelogFetcher;

/// One fetched document: a changelog page, a migration guide, a release
/// note. `content_type` is whatever the source reported (`text/markdown`,
/// `text/html`, ...); the oracle decides how to read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub url: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("source fetch failed for {library} {from_version}->{to_version}: {message}")]
    Fetch { library: String, from_version: String, to_version: String, message: String },
    #[error("extraction oracle failed: {message}")]
    Oracle { message: String },
    #[error(transparent)]
    Cache(#[from] pyshift_knowledge::CacheError),
}

/// Given `(package)`, returns zero or more source documents describing
/// breaking changes between two versions (spec §6 "Source fetcher").
/// Implementations are expected to retry transient failures themselves
/// (see [`retry_with_backoff`]) and return `Ok(vec![])`, not an error, when
/// no documents exist — spec §4.5 step 2 treats "zero sources" as a normal
/// outcome, not a failure.
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, library: &str, from_version: &str, to_version: &str) -> Result<Vec<SourceDocument>, AcquireError>;
}

/// Given `{library, from-version, to-version, documents}`, returns
/// `BreakingChange` candidates with confidences (spec §6 "Extraction
/// oracle"). Invoked once per document (spec §4.5 step 3: "invoke the
/// extraction oracle on each source independently").
pub trait ExtractionOracle: Send + Sync {
    fn extract(
        &self,
        library: &str,
        from_version: &str,
        to_version: &str,
        document: &SourceDocument,
    ) -> Result<Vec<BreakingChange>, AcquireError>;
}

/// Retry budget shared by both collaborator adapters (spec §7 "Resource
/// errors ... retry with exponential backoff up to a fixed budget").
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 3 attempts, matching SPEC_FULL.md §4.5; the per-call timeout is
        // spec.md §5's documented default of 60s per external call.
        Self { max_attempts: 3, initial_backoff: Duration::from_millis(250), timeout: Duration::from_secs(60) }
    }
}

/// Runs `op` up to `policy.max_attempts` times, doubling the backoff after
/// each failure, returning the last error if every attempt fails. Used by
/// both the [`source_http`] and [`oracle_http`] adapters so the retry shape
/// is defined once rather than duplicated per collaborator.
pub fn retry_with_backoff<T, E>(policy: RetryPolicy, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E> {
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= policy.max_attempts => return Err(err),
            Err(_) => {
                tracing::debug!(attempt, backoff_ms = backoff.as_millis(), "retrying after transient failure");
                std::thread::sleep(backoff);
                backoff *= 2;
                attempt += 1;
            }
        }
    }
}

/// Knowledge Acquisition (spec §4.5 algorithm, steps 1–5):
///
/// 1. Cache hit short-circuits the whole call.
/// 2. Zero fetched sources returns [`MigrationSpec::empty`] with a
///    diagnostic logged, not an error — upstream layers degrade to tier 3.
/// 3. The oracle runs once per source; results are merged, de-duplicated by
///    `(kind, symbol, replacement)`.
/// 4. A change's confidence is the minimum across the sources it came from;
///    one found by more than one source is promoted to `High`.
/// 5. The merged spec is persisted to the cache with its schema version.
pub fn acquire(
    library: &str,
    from_version: &str,
    to_version: &str,
    cache: &KnowledgeCache,
    fetcher: &dyn SourceFetcher,
    oracle: &dyn ExtractionOracle,
) -> Result<MigrationSpec, AcquireError> {
    if let Some(cached) = cache.get(library, from_version, to_version)? {
        tracing::debug!(library, from_version, to_version, "knowledge acquisition cache hit");
        return Ok(cached);
    }

    let documents = fetcher.fetch(library, from_version, to_version)?;
    if documents.is_empty() {
        tracing::info!(library, from_version, to_version, "no migration sources found; degrading to tier 3");
        let spec = MigrationSpec::empty(library, from_version, to_version);
        cache.put(&spec)?;
        return Ok(spec);
    }

    let mut per_key: std::collections::BTreeMap<(pyshift_knowledge::BreakingChangeKind, String, String), (BreakingChange, u32)> =
        std::collections::BTreeMap::new();

    for document in &documents {
        let extracted = oracle.extract(library, from_version, to_version, document)?;
        for change in extracted {
            let key = dedup_key_owned(&change);
            per_key
                .entry(key)
                .and_modify(|(existing, count)| {
                    existing.confidence = existing.confidence.min(change.confidence);
                    *count += 1;
                })
                .or_insert((change, 1));
        }
    }

    let changes: Vec<BreakingChange> = per_key
        .into_values()
        .map(|(mut change, source_count)| {
            if source_count > 1 {
                change.confidence = Confidence::High;
            }
            change
        })
        .collect();

    let spec = MigrationSpec::new(library, from_version, from_version, to_version, changes);
    cache.put(&spec)?;
    Ok(spec)
}

fn dedup_key_owned(change: &BreakingChange) -> (pyshift_knowledge::BreakingChangeKind, String, String) {
    let (kind, symbol, replacement) = change.dedup_key();
    (kind, symbol.to_string(), format!("{replacement:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyshift_knowledge::{BreakingChangeKind, Confidence, MatchSpec, ReplacementSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedFetcher(Vec<SourceDocument>);
    impl SourceFetcher for FixedFetcher {
        fn fetch(&self, _: &str, _: &str, _: &str) -> Result<Vec<SourceDocument>, AcquireError> {
            Ok(self.0.clone())
        }
    }

    struct EmptyFetcher;
    impl SourceFetcher for EmptyFetcher {
        fn fetch(&self, _: &str, _: &str, _: &str) -> Result<Vec<SourceDocument>, AcquireError> {
            Ok(Vec::new())
        }
    }

    fn change(confidence: Confidence) -> BreakingChange {
        BreakingChange::new(
            "x",
            BreakingChangeKind::MethodRename,
            MatchSpec::symbol("lib.Thing.old"),
            ReplacementSpec::MethodRename { new_method: "new".into() },
            confidence,
        )
    }

    struct StaticOracle(Vec<BreakingChange>);
    impl ExtractionOracle for StaticOracle {
        fn extract(&self, _: &str, _: &str, _: &str, _: &SourceDocument) -> Result<Vec<BreakingChange>, AcquireError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn empty_sources_degrade_to_empty_spec() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KnowledgeCache::new(dir.path());
        let spec = acquire("obscure", "1.0", "2.0", &cache, &EmptyFetcher, &StaticOracle(Vec::new())).unwrap();
        assert!(spec.changes.is_empty());
    }

    #[test]
    fn same_change_from_two_sources_is_promoted_to_high() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KnowledgeCache::new(dir.path());
        let docs = vec![
            SourceDocument { url: "a".into(), content_type: "text/markdown".into(), bytes: b"a".to_vec() },
            SourceDocument { url: "b".into(), content_type: "text/markdown".into(), bytes: b"b".to_vec() },
        ];
        let oracle = StaticOracle(vec![change(Confidence::Medium)]);
        let spec = acquire("lib", "1.0", "2.0", &cache, &FixedFetcher(docs), &oracle).unwrap();
        assert_eq!(spec.changes.len(), 1);
        assert_eq!(spec.changes[0].confidence, Confidence::High);
    }

    #[test]
    fn second_call_is_a_cache_hit_and_never_calls_the_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KnowledgeCache::new(dir.path());
        let docs = vec![SourceDocument { url: "a".into(), content_type: "text/markdown".into(), bytes: b"a".to_vec() }];
        let oracle = StaticOracle(vec![change(Confidence::High)]);

        struct CountingFetcher {
            calls: AtomicUsize,
            docs: Vec<SourceDocument>,
        }
        impl SourceFetcher for CountingFetcher {
            fn fetch(&self, _: &str, _: &str, _: &str) -> Result<Vec<SourceDocument>, AcquireError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.docs.clone())
            }
        }
        let fetcher = CountingFetcher { calls: AtomicUsize::new(0), docs };

        let first = acquire("lib", "1.0", "2.0", &cache, &fetcher, &oracle).unwrap();
        let second = acquire("lib", "1.0", "2.0", &cache, &fetcher, &oracle).unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.changes.len(), second.changes.len());
    }

    #[test]
    fn retry_with_backoff_returns_first_success() {
        let attempts = AtomicUsize::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            RetryPolicy { max_attempts: 3, initial_backoff: Duration::from_millis(1), timeout: Duration::from_secs(1) },
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            },
        );
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_with_backoff_exhausts_budget() {
        let attempts = AtomicUsize::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            RetryPolicy { max_attempts: 2, initial_backoff: Duration::from_millis(1), timeout: Duration::from_secs(1) },
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("still failing")
            },
        );
        assert_eq!(result, Err("still failing"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}

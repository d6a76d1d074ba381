//! The Patch Store (spec §4.8): persists a [`MigrationSession`] between
//! `analyse` and a later `apply` under `<project-root>/.pyshift/`, the same
//! schema-versioned, durable-rename scheme [`pyshift_knowledge::KnowledgeCache`]
//! uses one layer down for cached `MigrationSpec`s.

use std::fs;
use std::path::{Path, PathBuf};

use pyshift_knowledge::MigrationSession;
use serde::{Deserialize, Serialize};

use crate::EngineError;

const SESSION_SCHEMA_VERSION: u32 = 1;
const SESSION_DIR: &str = ".pyshift";
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Serialize, Deserialize)]
struct SessionEnvelope {
    schema_version: u32,
    session: MigrationSession,
}

/// Reads and writes the single pending `MigrationSession` a project carries
/// at a time (spec §6 persisted-state layout: `<project-root>/.pyshift/`).
/// Also the parent of the Knowledge Acquisition cache directory, so both
/// persisted-state concerns live under the one session root.
pub struct PatchStore {
    root: PathBuf,
}

impl PatchStore {
    #[must_use]
    pub fn new(project_root: &Path) -> Self {
        Self { root: project_root.join(SESSION_DIR) }
    }

    /// `<project-root>/.pyshift/cache`, handed to [`pyshift_knowledge::KnowledgeCache::new`]
    /// by callers that want the two persisted-state stores nested together.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    fn session_path(&self) -> PathBuf {
        self.root.join(SESSION_FILE)
    }

    /// `Ok(None)` when no session has ever been persisted; a missing file
    /// is `status`'s normal "nothing pending" case, not an error.
    pub fn load(&self) -> Result<Option<MigrationSession>, EngineError> {
        let path = self.session_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(EngineError::io(&path, source)),
        };

        // Schema version is checked against the raw JSON first, exactly as
        // `KnowledgeCache::get` does: an unknown version may not even
        // deserialize into the current `MigrationSession` shape, and
        // "unsupported schema" must win over "failed to parse".
        let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|source| EngineError::Corrupt { path: path.clone(), source })?;
        let found_version = value.get("schema_version").and_then(serde_json::Value::as_u64).unwrap_or(0);
        if found_version != u64::from(SESSION_SCHEMA_VERSION) {
            return Err(EngineError::UnsupportedSchemaVersion { path, found: u32::try_from(found_version).unwrap_or(u32::MAX), expected: SESSION_SCHEMA_VERSION });
        }
        let envelope: SessionEnvelope = serde_json::from_value(value).map_err(|source| EngineError::Corrupt { path: path.clone(), source })?;
        Ok(Some(envelope.session))
    }

    /// Writes `session` via write-to-`.tmp`-then-`rename` so a crash
    /// mid-write never leaves a reader observing a half-written session
    /// (spec §4.8, matching `KnowledgeCache::put`'s durable-rename).
    pub fn save(&self, session: &MigrationSession) -> Result<(), EngineError> {
        fs::create_dir_all(&self.root).map_err(|source| EngineError::io(&self.root, source))?;
        let path = self.session_path();
        let tmp_path = path.with_extension("json.tmp");
        let envelope = SessionEnvelope { schema_version: SESSION_SCHEMA_VERSION, session: session.clone() };
        let bytes = serde_json::to_vec_pretty(&envelope).map_err(|source| EngineError::Corrupt { path: tmp_path.clone(), source })?;
        fs::write(&tmp_path, bytes).map_err(|source| EngineError::io(&tmp_path, source))?;
        fs::rename(&tmp_path, &path).map_err(|source| EngineError::io(&path, source))?;
        tracing::debug!(library = %session.library, from = %session.from_version, to = %session.to_version, "migration session persisted");
        Ok(())
    }

    /// Removes the persisted session, e.g. once every patch has reached a
    /// terminal state and the caller is about to start a fresh `analyse`.
    /// A session that was never written is not an error.
    pub fn clear(&self) -> Result<(), EngineError> {
        let path = self.session_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(EngineError::io(&path, source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyshift_knowledge::MigrationSession;

    #[test]
    fn load_is_none_before_any_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatchStore::new(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips_through_durable_rename() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatchStore::new(dir.path());
        let session = MigrationSession::new("pydantic", "1.10", "2.5");

        store.save(&session).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.library, "pydantic");
        assert_eq!(loaded.from_version, "1.10");

        let tmp_leftover = dir.path().join(".pyshift").join("session.json.tmp");
        assert!(!tmp_leftover.exists(), "durable-rename must not leave a .tmp file behind");
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatchStore::new(dir.path());
        fs::create_dir_all(dir.path().join(".pyshift")).unwrap();
        fs::write(dir.path().join(".pyshift").join("session.json"), br#"{"schema_version":99,"session":null}"#).unwrap();
        let err = store.load().unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedSchemaVersion { found: 99, expected: SESSION_SCHEMA_VERSION, .. }));
    }

    #[test]
    fn clear_is_a_no_op_when_nothing_was_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatchStore::new(dir.path());
        store.clear().unwrap();
    }

    #[test]
    fn clear_removes_a_saved_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatchStore::new(dir.path());
        store.save(&MigrationSession::new("pydantic", "1.10", "2.5")).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn cache_dir_nests_under_the_session_root() {
        let store = PatchStore::new(Path::new("/proj"));
        assert_eq!(store.cache_dir(), Path::new("/proj/.pyshift/cache"));
    }
}

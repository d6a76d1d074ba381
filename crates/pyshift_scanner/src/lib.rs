//! The Project Scanner (spec §4.2): walks a project directory, applies
//! exclude globs, and hands back a per-file [`pyshift_cst::Cst`] for every
//! Python source file found.
//!
//! The walk itself is pure I/O plus CST parsing — it does not know anything
//! about library semantics, imports, or usages; that is the Usage Index's
//! job one layer up. Deterministic, sorted order is load-bearing: the same
//! project scanned twice must enumerate files in the same order so that
//! downstream session diffs are stable.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use rayon::prelude::*;
use thiserror::Error;

use pyshift_cst::{Cst, ParseError};

/// Directories skipped even when the caller supplies no excludes of their
/// own: virtualenvs, VCS metadata, bytecode caches, and pyshift's own
/// session state directory (spec §4.2, §6 persisted-state layout).
const DEFAULT_EXCLUDED_DIRS: &[&str] =
    &[".venv", "venv", "env", "__pycache__", ".git", ".hg", ".mypy_cache", ".ruff_cache", ".pyshift"];

/// Files larger than this are reported as skipped rather than parsed, so one
/// oversized generated file can't stall an otherwise-fast scan.
const DEFAULT_MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("project root does not exist or is not a directory: {0}")]
    InvalidRoot(PathBuf),
    #[error("failed to walk {path}: {source}")]
    Walk { path: PathBuf, source: ignore::Error },
    #[error("invalid exclude pattern {pattern:?}: {source}")]
    BadExcludePattern { pattern: String, source: ignore::Error },
}

/// Options controlling what [`scan`] includes. Mirrors the `exclude` option
/// threaded through from `analyse` (spec §6).
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Additional gitignore-style glob patterns to exclude, beyond the
    /// built-in virtualenv/VCS/session-dir defaults.
    pub exclude: Vec<String>,
    /// When `false` (the default), directories that look like test suites
    /// (`tests/`, `test_*.py`) are still scanned; set `true` to skip them.
    pub exclude_tests: bool,
    pub max_file_bytes: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { exclude: Vec::new(), exclude_tests: false, max_file_bytes: DEFAULT_MAX_FILE_BYTES }
    }
}

/// A successfully parsed Python source file: its path (relative to the scan
/// root when the root itself was relative, absolute otherwise) and its
/// lossless CST.
#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    pub cst: Cst,
}

#[derive(Debug, Clone)]
pub enum SkipReason {
    TooLarge { bytes: u64, limit: u64 },
    ExcludedByPattern,
    /// A symlink whose target resolves outside the project root (spec
    /// §4.2: "symbolic links pointing outside the project root are
    /// skipped"). Symlinks that stay within the root are followed normally.
    SymlinkEscapesRoot,
}

#[derive(Debug)]
pub enum ScanDiagnostic {
    /// The file matched a `.py` extension but failed to parse; reported, not
    /// fatal, per spec §4.2 ("files that failed to parse (reported but not
    /// fatal)").
    ParseFailed { path: PathBuf, error: ParseError },
    Skipped { path: PathBuf, reason: SkipReason },
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<SourceFile>,
    pub diagnostics: Vec<ScanDiagnostic>,
}

/// Enumerates and parses every Python source file under `root`, honoring
/// `options.exclude` on top of the built-in defaults. Walk order is sorted
/// by file name so two scans of an unchanged tree enumerate identically;
/// parsing itself runs across a `rayon` pool (spec §5: "File parsing ...
/// run in parallel across files, bounded by a worker pool").
pub fn scan(root: &Path, options: &ScanOptions) -> Result<ScanResult, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::InvalidRoot(root.to_path_buf()));
    }

    let mut overrides = OverrideBuilder::new(root);
    for dir in DEFAULT_EXCLUDED_DIRS {
        overrides
            .add(&format!("!{dir}/"))
            .map_err(|source| ScanError::BadExcludePattern { pattern: (*dir).to_string(), source })?;
    }
    if options.exclude_tests {
        overrides
            .add("!tests/")
            .map_err(|source| ScanError::BadExcludePattern { pattern: "tests/".to_string(), source })?;
        overrides
            .add("!test_*.py")
            .map_err(|source| ScanError::BadExcludePattern { pattern: "test_*.py".to_string(), source })?;
    }
    for pattern in &options.exclude {
        let negated = format!("!{pattern}");
        overrides
            .add(&negated)
            .map_err(|source| ScanError::BadExcludePattern { pattern: pattern.clone(), source })?;
    }
    let overrides =
        overrides.build().map_err(|source| ScanError::BadExcludePattern { pattern: String::new(), source })?;

    let canonical_root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());

    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(true)
        .follow_links(true)
        .overrides(overrides)
        .sort_by_file_name(std::ffi::OsStr::cmp);

    let diagnostics: Mutex<Vec<ScanDiagnostic>> = Mutex::new(Vec::new());
    let mut candidates = Vec::new();
    for entry in builder.build() {
        let entry = entry.map_err(|source| ScanError::Walk { path: root.to_path_buf(), source })?;
        let path = entry.path();
        if !entry.file_type().is_some_and(|ft| ft.is_file()) || !path.extension().is_some_and(|ext| ext == "py") {
            continue;
        }
        if entry.path_is_symlink() {
            let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            if !target.starts_with(&canonical_root) {
                diagnostics
                    .lock()
                    .unwrap()
                    .push(ScanDiagnostic::Skipped { path: path.to_path_buf(), reason: SkipReason::SymlinkEscapesRoot });
                continue;
            }
        }
        candidates.push(path.to_path_buf());
    }

    let max_bytes = options.max_file_bytes;

    let mut files: Vec<SourceFile> = candidates
        .par_iter()
        .filter_map(|path| {
            let metadata = match fs::metadata(path) {
                Ok(metadata) => metadata,
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "failed to stat candidate file");
                    return None;
                }
            };
            if metadata.len() > max_bytes {
                diagnostics.lock().unwrap().push(ScanDiagnostic::Skipped {
                    path: path.clone(),
                    reason: SkipReason::TooLarge { bytes: metadata.len(), limit: max_bytes },
                });
                return None;
            }

            let source = match fs::read_to_string(path) {
                Ok(source) => source,
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "failed to read candidate file");
                    return None;
                }
            };

            match Cst::parse(&source, path) {
                Ok(cst) => Some(SourceFile { path: path.clone(), cst }),
                Err(error) => {
                    tracing::debug!(path = %path.display(), "parse failed during scan");
                    diagnostics.lock().unwrap().push(ScanDiagnostic::ParseFailed { path: path.clone(), error });
                    None
                }
            }
        })
        .collect();

    files.sort_by(|a, b| a.path.cmp(&b.path));
    let mut diagnostics = diagnostics.into_inner().unwrap();
    diagnostics.sort_by(|a, b| diagnostic_path(a).cmp(diagnostic_path(b)));

    Ok(ScanResult { files, diagnostics })
}

fn diagnostic_path(diagnostic: &ScanDiagnostic) -> &Path {
    match diagnostic {
        ScanDiagnostic::ParseFailed { path, .. } | ScanDiagnostic::Skipped { path, .. } => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn scan_finds_py_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.py", "import os\n");
        write(dir.path(), "a.py", "import sys\n");
        write(dir.path(), "README.md", "not python");

        let result = scan(dir.path(), &ScanOptions::default()).unwrap();
        let names: Vec<_> = result.files.iter().map(|f| f.path.file_name().unwrap().to_str().unwrap()).collect();
        assert_eq!(names, vec!["a.py", "b.py"]);
    }

    #[test]
    fn scan_skips_default_excluded_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".venv/lib/site.py", "import os\n");
        write(dir.path(), "app.py", "import os\n");

        let result = scan(dir.path(), &ScanOptions::default()).unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].path.file_name().unwrap(), "app.py");
    }

    #[test]
    fn scan_reports_parse_failures_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.py", "def f(:\n");
        write(dir.path(), "ok.py", "import os\n");

        let result = scan(dir.path(), &ScanOptions::default()).unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.diagnostics.len(), 1);
        assert!(matches!(result.diagnostics[0], ScanDiagnostic::ParseFailed { .. }));
    }

    #[test]
    fn scan_skips_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.py", &"x = 1\n".repeat(10));

        let options = ScanOptions { max_file_bytes: 10, ..ScanOptions::default() };
        let result = scan(dir.path(), &options).unwrap();
        assert!(result.files.is_empty());
        assert!(matches!(
            result.diagnostics[0],
            ScanDiagnostic::Skipped { reason: SkipReason::TooLarge { .. }, .. }
        ));
    }

    #[test]
    fn scan_honors_caller_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "migrations/0001.py", "import os\n");
        write(dir.path(), "app.py", "import os\n");

        let options = ScanOptions { exclude: vec!["migrations/**".to_string()], ..ScanOptions::default() };
        let result = scan(dir.path(), &options).unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].path.file_name().unwrap(), "app.py");
    }

    #[test]
    fn scan_rejects_missing_root() {
        let missing = Path::new("/nonexistent/pyshift-scan-target");
        assert!(matches!(scan(missing, &ScanOptions::default()), Err(ScanError::InvalidRoot(_))));
    }
}

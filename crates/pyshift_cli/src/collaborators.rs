//! Production collaborator adapters for the CLI Shell (spec §6): a
//! manifest-based dependency lister, a PyPI-backed version resolver, an HTTP
//! rewrite oracle, and an API-key quota gate. `pyshift_engine` never parses a
//! manifest or opens a socket itself — that's this crate's job.

use std::fs;
use std::path::Path;
use std::time::Duration;

use pyshift_acquire::{retry_with_backoff, RetryPolicy};
use pyshift_engine::{AuthenticationQuotaGate, DependencyLister, EngineError, RewriteOracle, RewriteRequest, VersionResolver};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Reads `[project].dependencies` out of `pyproject.toml`, falling back to a
/// `requirements.txt` at the project root when there is no `pyproject.toml`
/// or it declares no dependencies.
pub struct ManifestDependencyLister;

#[derive(Debug, Deserialize)]
struct PyprojectFile {
    project: Option<PyprojectProject>,
}

#[derive(Debug, Deserialize)]
struct PyprojectProject {
    #[serde(default)]
    dependencies: Vec<String>,
}

impl DependencyLister for ManifestDependencyLister {
    fn list(&self, project_root: &Path) -> Result<Vec<(String, String)>, EngineError> {
        let pyproject_path = project_root.join("pyproject.toml");
        if let Ok(text) = fs::read_to_string(&pyproject_path) {
            let parsed: PyprojectFile =
                toml::from_str(&text).map_err(|error| EngineError::Collaborator(format!("{}: {error}", pyproject_path.display())))?;
            if let Some(project) = parsed.project {
                if !project.dependencies.is_empty() {
                    return Ok(project.dependencies.iter().filter_map(|line| split_requirement(line)).collect());
                }
            }
        }

        let requirements_path = project_root.join("requirements.txt");
        match fs::read_to_string(&requirements_path) {
            Ok(text) => Ok(text.lines().filter_map(split_requirement).collect()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(error) => Err(EngineError::Collaborator(format!("{}: {error}", requirements_path.display()))),
        }
    }
}

/// Splits a PEP 508-ish requirement line (`"pydantic>=2.0,<3.0"`,
/// `"fastapi==0.110"`, a bare `"httpx"`) into `(name, pin)`. Extras
/// (`package[extra]`) and environment markers (`; python_version...`) are
/// stripped rather than parsed; comments and blank lines are skipped.
fn split_requirement(line: &str) -> Option<(String, String)> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return None;
    }
    let line = line.split(';').next().unwrap_or(line).trim();
    let pattern = Regex::new(r"^([A-Za-z0-9_.\-]+)(\[[^\]]*\])?\s*(.*)$").expect("requirement pattern is a static literal");
    let captures = pattern.captures(line)?;
    let name = captures.get(1)?.as_str().to_string();
    let pin = captures.get(3).map_or("", |m| m.as_str()).trim().to_string();
    Some((name, if pin.is_empty() { "*".to_string() } else { pin }))
}

/// Resolves a package's latest release from the PyPI JSON API (spec §6
/// "Version resolver"), built the same blocking-`reqwest`-plus-retry way
/// `pyshift_acquire`'s production adapters are.
pub struct PyPiVersionResolver {
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
}

impl PyPiVersionResolver {
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(RetryPolicy::default().timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("static client configuration is always valid");
        Self { client, retry: RetryPolicy::default() }
    }
}

impl Default for PyPiVersionResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct PyPiResponse {
    info: PyPiInfo,
}

#[derive(Debug, Deserialize)]
struct PyPiInfo {
    version: String,
}

impl VersionResolver for PyPiVersionResolver {
    fn latest_version(&self, package: &str) -> Result<Option<String>, EngineError> {
        let url = format!("https://pypi.org/pypi/{package}/json");
        let call = || -> Result<reqwest::blocking::Response, reqwest::Error> { self.client.get(&url).send() };
        let response = retry_with_backoff(self.retry, call).map_err(|error| EngineError::Collaborator(format!("PyPI lookup for {package} failed: {error}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(EngineError::Collaborator(format!("PyPI responded with status {} for {package}", response.status())));
        }
        let body: PyPiResponse = response.json().map_err(|error| EngineError::Collaborator(format!("malformed PyPI response for {package}: {error}")))?;
        Ok(Some(body.info.version))
    }
}

/// Completes a Tier-2 `Template` replacement or drives a Tier-3 rewrite by
/// posting the matched slice to a chat-completions endpoint and taking its
/// raw text response as the replacement (spec §6 "Rewrite oracle"); mirrors
/// `pyshift_acquire::HttpExtractionOracle`'s client setup but expects prose
/// code back, not a forced tool call.
pub struct HttpRewriteOracle {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
    retry: RetryPolicy,
}

impl HttpRewriteOracle {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(RetryPolicy::default().timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("static client configuration is always valid");
        Self { client, endpoint: endpoint.into(), model: model.into(), api_key: api_key.into(), retry: RetryPolicy::default() }
    }
}

#[derive(Debug, Serialize)]
struct CompletionMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

impl RewriteOracle for HttpRewriteOracle {
    fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<String, EngineError> {
        let prompt = format!(
            "Library: {}\nUpgrade: {} -> {}\nBreaking change: {:?}\n{}\n\nRewrite the following Python source slice to the target version's API. Respond with only the replacement code: no prose, no markdown fences.\n\n{}",
            request.library, request.from_version, request.to_version, request.change.kind, request.change.explanation, request.file_slice
        );
        let body = CompletionRequest {
            model: self.model.clone(),
            max_tokens: 1024,
            temperature: 0.0,
            messages: vec![CompletionMessage { role: "user".to_string(), content: prompt }],
        };

        let call = || -> Result<CompletionResponse, String> {
            let response = self.client.post(&self.endpoint).bearer_auth(&self.api_key).json(&body).send().map_err(|error| error.to_string())?;
            if !response.status().is_success() {
                return Err(format!("rewrite oracle responded with status {}", response.status()));
            }
            response.json::<CompletionResponse>().map_err(|error| error.to_string())
        };

        let response = retry_with_backoff(self.retry, call).map_err(EngineError::Collaborator)?;
        let replacement = response.choices.into_iter().next().map(|choice| choice.message.content).ok_or_else(|| EngineError::Collaborator("rewrite oracle returned no choices".to_string()))?;
        Ok(replacement.trim().to_string())
    }
}

/// Permits the rewrite oracle only when an API key was actually configured
/// (spec §6 "Authentication/quota gate"); a key-less run is pinned to Tier 1
/// and whatever pure-template Tier-2 coverage already exists.
pub struct ApiKeyQuotaGate {
    has_key: bool,
}

impl ApiKeyQuotaGate {
    #[must_use]
    pub fn new(api_key: &str) -> Self {
        Self { has_key: !api_key.trim().is_empty() }
    }
}

impl AuthenticationQuotaGate for ApiKeyQuotaGate {
    fn allow_oracle_call(&self) -> bool {
        self.has_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_requirement_parses_bare_name() {
        assert_eq!(split_requirement("httpx"), Some(("httpx".to_string(), "*".to_string())));
    }

    #[test]
    fn split_requirement_parses_pinned_range() {
        assert_eq!(split_requirement("pydantic>=2.0,<3.0"), Some(("pydantic".to_string(), ">=2.0,<3.0".to_string())));
    }

    #[test]
    fn split_requirement_strips_extras_and_markers() {
        assert_eq!(split_requirement("uvicorn[standard]==0.30 ; python_version >= \"3.9\""), Some(("uvicorn".to_string(), "==0.30".to_string())));
    }

    #[test]
    fn split_requirement_skips_comments_and_blank_lines() {
        assert_eq!(split_requirement("# a comment"), None);
        assert_eq!(split_requirement("   "), None);
    }

    #[test]
    fn quota_gate_denies_without_a_key() {
        assert!(!ApiKeyQuotaGate::new("").allow_oracle_call());
        assert!(ApiKeyQuotaGate::new("sk-test").allow_oracle_call());
    }
}

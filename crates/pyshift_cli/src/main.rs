//! Thin CLI Shell wiring clap subcommands onto the engine's invocation
//! surface (spec §6). Everything library-specific — tiering, transformer
//! selection, risk scoring — lives in `pyshift_engine`; this binary only
//! parses arguments, builds the production collaborator adapters, and
//! prints reports.

mod collaborators;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use pyshift_engine::{AlwaysDeny, AnalyseCollaborators, AuthenticationQuotaGate, ApplyOptions, MigrationOptions, TierPolicy};
use pyshift_knowledge::{Confidence, KnowledgeCache, PatchState};

use collaborators::{ApiKeyQuotaGate, HttpRewriteOracle, ManifestDependencyLister, PyPiVersionResolver};

#[derive(Parser)]
#[command(name = "pyshift", version, about = "Migrates a Python source tree across a library's breaking-change upgrade.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v, -vv); default shows warnings only.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// List declared dependencies and whether a Tier-1 transformer covers them.
    Scan {
        #[arg(default_value = ".")]
        project_root: PathBuf,
    },
    /// List every library this build has a Tier-1 transformer for.
    Libraries,
    /// Analyse a library upgrade and persist the resulting session.
    Analyse {
        /// Library to migrate, e.g. `pydantic`.
        library: String,
        /// Current version, e.g. `1.10`.
        #[arg(long = "from")]
        from_version: String,
        /// Target version, e.g. `2.5`.
        #[arg(long = "to")]
        to_version: String,
        #[arg(long, default_value = ".")]
        project_root: PathBuf,
        #[arg(long, value_enum, default_value_t = CliTierPolicy::UpToTier2)]
        tier_policy: CliTierPolicy,
        #[arg(long, value_enum, default_value_t = CliConfidence::Medium)]
        confidence_floor: CliConfidence,
        /// Extra gitignore-style exclude pattern; may be repeated.
        #[arg(long = "exclude")]
        exclude: Vec<String>,
        /// Build the session but do not persist it to `.pyshift/`.
        #[arg(long)]
        dry_run: bool,
        /// Worker pool size; defaults to available cores.
        #[arg(long)]
        jobs: Option<usize>,
        /// Bearer token for the rewrite oracle; Tier 3 and oracle-completed
        /// Tier 2 are skipped entirely when unset.
        #[arg(long, env = "PYSHIFT_ORACLE_API_KEY", default_value = "")]
        oracle_api_key: String,
        #[arg(long, env = "PYSHIFT_ORACLE_ENDPOINT", default_value = "https://api.openai.com/v1/chat/completions")]
        oracle_endpoint: String,
        #[arg(long, env = "PYSHIFT_ORACLE_MODEL", default_value = "gpt-4o-mini")]
        oracle_model: String,
    },
    /// Print the pending session's patches as a unified diff.
    Diff {
        #[arg(default_value = ".")]
        project_root: PathBuf,
    },
    /// Apply the pending session's patches to disk.
    Apply {
        #[arg(default_value = ".")]
        project_root: PathBuf,
        /// Write a `<file>.bak` of every file before overwriting it.
        #[arg(long)]
        backup: bool,
        /// Apply only the patch for this file.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Report whether a session is pending for this project.
    Status {
        #[arg(default_value = ".")]
        project_root: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliTierPolicy {
    Tier1Only,
    UpToTier2,
    All,
}

impl std::fmt::Display for CliTierPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CliTierPolicy::Tier1Only => "tier1-only",
            CliTierPolicy::UpToTier2 => "up-to-tier2",
            CliTierPolicy::All => "all",
        };
        f.write_str(text)
    }
}

impl From<CliTierPolicy> for TierPolicy {
    fn from(value: CliTierPolicy) -> Self {
        match value {
            CliTierPolicy::Tier1Only => TierPolicy::Tier1Only,
            CliTierPolicy::UpToTier2 => TierPolicy::UpToTier2,
            CliTierPolicy::All => TierPolicy::All,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CliConfidence {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for CliConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CliConfidence::High => "high",
            CliConfidence::Medium => "medium",
            CliConfidence::Low => "low",
        };
        f.write_str(text)
    }
}

impl From<CliConfidence> for Confidence {
    fn from(value: CliConfidence) -> Self {
        match value {
            CliConfidence::High => Confidence::High,
            CliConfidence::Medium => Confidence::Medium,
            CliConfidence::Low => Confidence::Low,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{} {error:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)))
        .with_target(false)
        .without_time()
        .init();
}

fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Scan { project_root } => run_scan(&project_root),
        Command::Libraries => run_libraries(),
        Command::Analyse {
            library,
            from_version,
            to_version,
            project_root,
            tier_policy,
            confidence_floor,
            exclude,
            dry_run,
            jobs,
            oracle_api_key,
            oracle_endpoint,
            oracle_model,
        } => run_analyse(
            &library,
            &from_version,
            &to_version,
            &project_root,
            tier_policy.into(),
            confidence_floor.into(),
            exclude,
            dry_run,
            jobs,
            &oracle_api_key,
            &oracle_endpoint,
            &oracle_model,
        ),
        Command::Diff { project_root } => run_diff(&project_root),
        Command::Apply { project_root, backup, file } => run_apply(&project_root, backup, file),
        Command::Status { project_root } => run_status(&project_root),
    }
}

fn run_scan(project_root: &std::path::Path) -> Result<ExitCode> {
    let lister = ManifestDependencyLister;
    let resolver = PyPiVersionResolver::new();
    let reports = pyshift_engine::scan(project_root, &lister, &resolver).context("scan failed")?;

    if reports.is_empty() {
        println!("no declared dependencies found under {}", project_root.display());
        return Ok(ExitCode::SUCCESS);
    }

    for report in reports {
        let tier_marker = if report.has_tier1_transformer { "tier1".green() } else { "no transformer".dimmed() };
        let latest = report.latest_version.as_deref().unwrap_or("unknown");
        println!("{:<24} pinned {:<16} latest {:<12} {}", report.package.bold(), report.version_pin, latest, tier_marker);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_libraries() -> Result<ExitCode> {
    for library in pyshift_engine::libraries() {
        println!("{}", library.name);
    }
    Ok(ExitCode::SUCCESS)
}

#[allow(clippy::too_many_arguments)]
fn run_analyse(
    library: &str,
    from_version: &str,
    to_version: &str,
    project_root: &std::path::Path,
    tier_policy: TierPolicy,
    confidence_floor: Confidence,
    exclude: Vec<String>,
    dry_run: bool,
    jobs: Option<usize>,
    oracle_api_key: &str,
    oracle_endpoint: &str,
    oracle_model: &str,
) -> Result<ExitCode> {
    let cache = KnowledgeCache::new(project_root.join(".pyshift").join("cache"));
    let source_fetcher = pyshift_acquire::GithubChangelogFetcher::new();
    let extraction_oracle = pyshift_acquire::HttpExtractionOracle::new(oracle_endpoint, oracle_model, oracle_api_key);
    let rewrite_oracle = HttpRewriteOracle::new(oracle_endpoint, oracle_model, oracle_api_key);
    let quota_gate = ApiKeyQuotaGate::new(oracle_api_key);
    let always_deny = AlwaysDeny;
    let quota_gate: &dyn AuthenticationQuotaGate = if matches!(tier_policy, TierPolicy::Tier1Only) { &always_deny } else { &quota_gate };

    let collaborators = AnalyseCollaborators {
        cache: &cache,
        source_fetcher: &source_fetcher,
        extraction_oracle: &extraction_oracle,
        rewrite_oracle: &rewrite_oracle,
        quota_gate,
    };

    let options = MigrationOptions { tier_policy, confidence_floor, exclude, dry_run, jobs, cancellation: pyshift_engine::Cancellation::new() };

    let session = pyshift_engine::analyse(library, from_version, to_version, project_root, &options, &collaborators).context("analyse failed")?;

    print_session_summary(&session);
    Ok(ExitCode::SUCCESS)
}

fn print_session_summary(session: &pyshift_knowledge::MigrationSession) {
    let ready = session.patches.iter().filter(|patch| matches!(patch.state, PatchState::Ready)).count();
    let rejected = session.patches.iter().filter(|patch| matches!(patch.state, PatchState::Rejected)).count();

    println!(
        "{} {} -> {}: {} file(s) with patches ({} ready, {} rejected), risk {:?}",
        session.library.bold(),
        session.from_version,
        session.to_version,
        session.patches.len(),
        ready,
        rejected,
        session.risk
    );
    for diagnostic in &session.diagnostics {
        let label = match diagnostic.severity {
            pyshift_knowledge::Severity::Info => "info".dimmed(),
            pyshift_knowledge::Severity::Warn => "warn".yellow(),
            pyshift_knowledge::Severity::Error => "error".red(),
        };
        match &diagnostic.file {
            Some(path) => println!("  {label} {}: {}", path.display(), diagnostic.message),
            None => println!("  {label} {}", diagnostic.message),
        }
    }
}

fn run_diff(project_root: &std::path::Path) -> Result<ExitCode> {
    let status = pyshift_engine::status(project_root).context("failed to load pending session")?;
    let Some(session) = status.session else {
        println!("no pending session under {}", project_root.join(".pyshift").display());
        return Ok(ExitCode::SUCCESS);
    };
    let rendered = pyshift_engine::diff(&session).context("failed to render diff")?;
    print!("{rendered}");
    Ok(ExitCode::SUCCESS)
}

fn run_apply(project_root: &std::path::Path, backup: bool, file: Option<PathBuf>) -> Result<ExitCode> {
    let status = pyshift_engine::status(project_root).context("failed to load pending session")?;
    let Some(mut session) = status.session else {
        println!("no pending session under {}", project_root.join(".pyshift").display());
        return Ok(ExitCode::SUCCESS);
    };

    let options = ApplyOptions { backup, file };
    let report = pyshift_engine::apply(&mut session, &options, project_root).context("apply failed")?;

    for path in &report.applied {
        println!("{} {}", "applied".green(), path.display());
    }
    for path in &report.skipped {
        println!("{} {}", "skipped".dimmed(), path.display());
    }
    for (path, reason) in &report.failed {
        println!("{} {}: {reason}", "failed".red(), path.display());
    }

    Ok(if report.is_total_failure() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn run_status(project_root: &std::path::Path) -> Result<ExitCode> {
    let status = pyshift_engine::status(project_root).context("failed to load pending session")?;
    match status.session {
        Some(session) => print_session_summary(&session),
        None => println!("no pending session under {}", project_root.join(".pyshift").display()),
    }
    Ok(ExitCode::SUCCESS)
}

//! shipgate - security-gated build and publish
//!
//! ## Commands
//!
//! - `run`: build, scan, report and (when the policy passes) publish one image
//! - `evaluate`: apply a severity policy to saved scanner output
//! - `sarif`: convert saved scanner output to SARIF 2.1.0

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn, Level};

use shipgate_adapters::{
    parse_trivy_report, DockerBuilder, DockerRegistry, FileReportSink, HttpCredentialIssuer,
    HttpReportSink, TrivyScanner,
};
use shipgate_core::{
    cancel_pair, decide, render_run_summary_md, to_sarif, write_run_artifacts, ArtifactDigest,
    Clock, Collaborators, GateDecision, IdentityAssertion, PipelineOrchestrator, ReportSink,
    RunReport, RunRequest, ScanReport, ScannerInfo, SecretString, Severity, SeverityPolicy,
    SystemClock, METRICS,
};

use crate::config::{ReportConfig, ShipgateConfig, DEFAULT_CONFIG_FILE};

/// Exit code for configuration and usage errors.
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "shipgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Security-gated container build and publish", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for one source revision
    Run {
        /// Configuration file
        #[arg(short, long, env = "SHIPGATE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Source revision being built (commit SHA)
        #[arg(long, env = "SHIPGATE_REVISION")]
        revision: String,

        /// Build context directory
        #[arg(long, default_value = ".")]
        context: PathBuf,

        /// Tags to publish, repeatable
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// JSON file with the identity claims (iss, aud, sub, exp)
        #[arg(long, env = "SHIPGATE_IDENTITY_CLAIMS")]
        identity_claims: PathBuf,

        /// Signed identity token forwarded to the credential issuer
        #[arg(long, env = "SHIPGATE_IDENTITY_TOKEN", hide_env_values = true)]
        identity_token: String,

        /// Directory for run_report.json and run_summary.md
        #[arg(long, default_value = ".shipgate/runs")]
        out_dir: PathBuf,
    },

    /// Apply a severity policy to saved scanner JSON output
    Evaluate {
        /// Scanner JSON output
        scan: PathBuf,

        /// Take the policy from this configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Minimum blocking severity (overrides the configured policy)
        #[arg(long)]
        min_severity: Option<String>,

        /// Accepted finding id, repeatable
        #[arg(long = "allow")]
        allow: Vec<String>,
    },

    /// Convert saved scanner JSON output to SARIF
    Sarif {
        /// Scanner JSON output
        scan: PathBuf,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Scanner version recorded in the log
        #[arg(long)]
        scanner_version: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    shipgate_core::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run {
            config,
            revision,
            context,
            tags,
            identity_claims,
            identity_token,
            out_dir,
        } => {
            cmd_run(RunArgs {
                config,
                revision,
                context,
                tags,
                identity_claims,
                identity_token,
                out_dir,
            })
            .await
        }
        Commands::Evaluate {
            scan,
            config,
            min_severity,
            allow,
        } => cmd_evaluate(&scan, config.as_deref(), min_severity.as_deref(), allow),
        Commands::Sarif {
            scan,
            output,
            scanner_version,
        } => cmd_sarif(&scan, output.as_deref(), scanner_version),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

struct RunArgs {
    config: PathBuf,
    revision: String,
    context: PathBuf,
    tags: Vec<String>,
    identity_claims: PathBuf,
    identity_token: String,
    out_dir: PathBuf,
}

/// Claims as exported by the CI host next to its signed token.
#[derive(Debug, Deserialize)]
struct IdentityClaims {
    iss: String,
    aud: String,
    sub: String,
    /// Unix seconds.
    exp: i64,
}

fn load_assertion(claims_path: &Path, token: String) -> Result<IdentityAssertion> {
    let raw = std::fs::read_to_string(claims_path)
        .with_context(|| format!("failed to read identity claims {}", claims_path.display()))?;
    let claims: IdentityClaims = serde_json::from_str(&raw)
        .with_context(|| format!("invalid identity claims {}", claims_path.display()))?;
    let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
        .with_context(|| format!("identity claim exp out of range: {}", claims.exp))?;
    if token.trim().is_empty() {
        bail!("identity token is empty");
    }
    Ok(IdentityAssertion {
        issuer: claims.iss,
        audience: claims.aud,
        subject: claims.sub,
        expires_at,
        token: SecretString::new(token.trim()),
    })
}

fn report_sink(report: &ReportConfig) -> Result<Arc<dyn ReportSink>> {
    let sink: Arc<dyn ReportSink> = match report {
        ReportConfig::File { path } => Arc::new(FileReportSink::new(path)),
        ReportConfig::Http {
            endpoint,
            token_env,
        } => {
            let token = match token_env {
                Some(var) => {
                    let value = std::env::var(var)
                        .with_context(|| format!("report token variable {var} is not set"))?;
                    Some(SecretString::new(value))
                }
                None => None,
            };
            Arc::new(HttpReportSink::new(endpoint, token).context("failed to build HTTP client")?)
        }
    };
    Ok(sink)
}

async fn cmd_run(args: RunArgs) -> Result<ExitCode> {
    let config = ShipgateConfig::load(&args.config)?;
    let assertion = load_assertion(&args.identity_claims, args.identity_token)?;
    if args.tags.is_empty() {
        warn!("no --tag given; the image is published by digest only");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let issuer = HttpCredentialIssuer::new(&config.credentials.endpoint, clock.clone())
        .context("failed to build HTTP client")?;
    let orchestrator = PipelineOrchestrator::from_collaborators(
        Collaborators {
            issuer: Arc::new(issuer),
            builder: Arc::new(DockerBuilder::new(config.build.clone())),
            scanner: Arc::new(TrivyScanner::new(config.scan.clone())),
            sink: report_sink(&config.report)?,
            registry: Arc::new(DockerRegistry::new(config.build.clone())),
        },
        config.trust_policy(),
        clock,
        config.settings(),
    );

    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling at the next stage boundary");
            cancel.cancel();
        }
    });

    let request = RunRequest {
        source_revision: args.revision,
        build_context: args.context,
        tags: args.tags,
        target: config.scope(),
        region: config.target.region.clone(),
        assertion,
        max_lifetime: config.max_lifetime(),
        policy: config.policy.clone(),
    };
    let report = orchestrator.run(request, &signal).await;

    Ok(ExitCode::from(conclude_run(&report, &args.out_dir)))
}

/// Print the summary and persist the run artifacts. The exit code always
/// follows the run outcome; a failed artifact write is only a warning.
fn conclude_run(report: &RunReport, out_dir: &Path) -> u8 {
    println!("{}", render_run_summary_md(report));

    let run_dir = out_dir.join(report.run.run_id.to_string());
    match write_run_artifacts(&run_dir, report, Utc::now()) {
        Ok(paths) => {
            info!(report = %paths.report_json.display(), "run artifacts written");
            println!("Report: {}", paths.report_json.display());
        }
        Err(e) => warn!(
            dir = %run_dir.display(),
            error = %format!("{e:#}"),
            "failed to write run artifacts"
        ),
    }
    METRICS.flush();

    report.exit_code() as u8
}

// ---------------------------------------------------------------------------
// evaluate / sarif
// ---------------------------------------------------------------------------

/// Read saved Trivy output. Unreadable output yields an incomplete report,
/// which the gate always fails.
fn load_scan(path: &Path, scanner_version: Option<String>) -> Result<ScanReport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scan output {}", path.display()))?;
    let digest = ArtifactDigest::of_bytes(raw.as_bytes());
    let scanner = ScannerInfo::new("trivy", scanner_version);
    Ok(match parse_trivy_report(&raw) {
        Ok(findings) => ScanReport::complete(digest, scanner, Utc::now(), findings),
        Err(e) => ScanReport::incomplete(digest, scanner, Utc::now(), e.to_string(), Vec::new()),
    })
}

fn evaluation_policy(
    config: Option<&Path>,
    min_severity: Option<&str>,
    allow: Vec<String>,
) -> Result<SeverityPolicy> {
    let mut policy = match config {
        Some(path) => ShipgateConfig::load(path)?.policy,
        None => SeverityPolicy::default(),
    };
    if let Some(raw) = min_severity {
        let severity: Severity = raw
            .parse()
            .map_err(|e| anyhow::anyhow!("--min-severity {raw:?}: {e}"))?;
        policy = policy.with_minimum(severity);
    }
    Ok(allow.into_iter().fold(policy, |p, id| p.allow(id)))
}

fn cmd_evaluate(
    scan: &Path,
    config: Option<&Path>,
    min_severity: Option<&str>,
    allow: Vec<String>,
) -> Result<ExitCode> {
    let policy = evaluation_policy(config, min_severity, allow)?;
    let report = load_scan(scan, None)?;
    let decision = decide(&report, &policy);

    println!(
        "Policy: minimum {} ({} allowed), digest {}",
        policy.minimum_blocking_severity,
        policy.allow_list.len(),
        policy.digest()
    );
    println!("Findings: {}", report.findings.len());
    match &decision {
        GateDecision::Pass => {
            println!("Gate: ✓ PASS");
            Ok(ExitCode::SUCCESS)
        }
        GateDecision::Fail { blocking } => {
            println!("Gate: ✗ FAIL");
            for f in blocking {
                println!("  - {} {} {}", f.severity, f.id, f.component);
            }
            Ok(ExitCode::from(1))
        }
    }
}

fn cmd_sarif(
    scan: &Path,
    output: Option<&Path>,
    scanner_version: Option<String>,
) -> Result<ExitCode> {
    let report = load_scan(scan, scanner_version)?;
    let json = serde_json::to_string_pretty(&to_sarif(&report))?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), results = report.findings.len(), "sarif written");
        }
        None => println!("{json}"),
    }
    Ok(ExitCode::SUCCESS)
}

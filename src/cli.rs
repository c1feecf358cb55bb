//! CLI definition and entry point

use crate::detectors::{AnalysisEngine, DirectDbDetector, OutputEscapingDetector};
use crate::models::{Finding, FindingsSummary, Severity};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Parse and validate workers count (1-64)
fn parse_workers(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if n == 0 {
        Err("workers must be at least 1".to_string())
    } else if n > 64 {
        Err("workers cannot exceed 64".to_string())
    } else {
        Ok(n)
    }
}

fn parse_severity(s: &str) -> Result<Severity, String> {
    match s.to_ascii_lowercase().as_str() {
        "info" => Ok(Severity::Info),
        "low" => Ok(Severity::Low),
        "medium" => Ok(Severity::Medium),
        "high" => Ok(Severity::High),
        "critical" => Ok(Severity::Critical),
        other => Err(format!(
            "'{}' is not a severity (info, low, medium, high, critical)",
            other
        )),
    }
}

/// Sinkcheck - escaping analysis for PHP
///
/// 100% LOCAL - No account needed. No data leaves your machine.
#[derive(Parser, Debug)]
#[command(name = "sinkcheck")]
#[command(
    version,
    about = "Taint-tracking escaping analyzer for PHP - flags unescaped data reaching database queries and page output",
    long_about = "Sinkcheck scans PHP source for externally influenced values that reach a \
dangerous sink ($wpdb query methods, echo/print/exit) without passing through a recognized \
escaping function such as esc_sql(), $wpdb->prepare() or esc_html().\n\n\
100% LOCAL - No account needed. No data leaves your machine.",
    after_help = "\
Examples:
  sinkcheck .                          Analyze current directory
  sinkcheck plugin.php                 Analyze a single file
  sinkcheck . --format json            JSON output for scripting
  sinkcheck . --severity high          Only show high/critical findings
  sinkcheck . --fail-on medium         Exit code 1 on medium+ findings (CI mode)"
)]
pub struct Cli {
    /// Path to a PHP file or directory (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Output format: text, json
    #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json"])]
    pub format: String,

    /// Write the report to a file instead of stdout
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Only report findings at or above this severity
    #[arg(long, value_parser = parse_severity)]
    pub severity: Option<Severity>,

    /// Exit with code 1 when findings at or above this severity exist
    #[arg(long, default_value = "high", value_parser = parse_severity)]
    pub fail_on: Severity,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    /// Number of parallel workers (1-64)
    #[arg(long, default_value = "8", value_parser = parse_workers)]
    pub workers: usize,

    /// Maximum findings to report
    #[arg(long)]
    pub max_findings: Option<usize>,
}

/// Serialized report shape for `--format json`.
#[derive(Serialize)]
struct Report<'a> {
    findings: &'a [Finding],
    summary: FindingsSummary,
    files_analyzed: usize,
    files_failed: usize,
}

pub fn run(cli: Cli) -> Result<ExitCode> {
    let mut engine = AnalysisEngine::new(cli.workers)
        .register(Arc::new(DirectDbDetector::new()))
        .register(Arc::new(OutputEscapingDetector::new()));
    if let Some(max) = cli.max_findings {
        engine = engine.with_max_findings(max);
    }

    let (mut findings, summary) = engine.run(&cli.path)?;

    if let Some(min) = cli.severity {
        findings.retain(|f| f.severity >= min);
    }

    let rendered = match cli.format.as_str() {
        "json" => {
            let report = Report {
                findings: &findings,
                summary: FindingsSummary::from_findings(&findings),
                files_analyzed: summary.files_analyzed,
                files_failed: summary.files_failed,
            };
            serde_json::to_string_pretty(&report)?
        }
        _ => render_text(&findings, summary.files_analyzed),
    };

    match &cli.output {
        Some(path) => std::fs::write(path, rendered.as_bytes())
            .with_context(|| format!("failed to write report to {}", path.display()))?,
        None => println!("{rendered}"),
    }

    let failing = findings.iter().any(|f| f.severity >= cli.fail_on);
    Ok(if failing {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn render_text(findings: &[Finding], files_analyzed: usize) -> String {
    let mut out = String::new();

    for f in findings {
        let line = f.line.unwrap_or(0);
        out.push_str(&format!(
            "{}:{} [{}] {}: {}\n",
            f.file.display(),
            line,
            f.severity,
            f.rule_id,
            f.title
        ));
        for note in &f.explanation {
            out.push_str(&format!("    {note}\n"));
        }
    }

    let summary = FindingsSummary::from_findings(findings);
    if !findings.is_empty() {
        out.push('\n');
    }
    out.push_str(&format!(
        "{} finding(s) in {} file(s) analyzed ({} high, {} medium, {} low)",
        summary.total, files_analyzed, summary.high, summary.medium, summary.low
    ));
    out
}

//! Base detector trait and types
//!
//! This module defines the core abstractions for escaping analysis:
//! - `Detector` trait that all detectors implement
//! - `ParsedFile`, the shared per-file parse product
//! - `DetectorResult` for capturing execution results
//! - Helper types for detector configuration

use crate::analyzer::{Diagnostic, DiagnosticSeverity, ScopeResolver, SinkPolicy, StatementDriver};
use crate::lexer::{tokenize, LexError};
use crate::models::{deterministic_finding_id, Finding, Severity};
use crate::tokens::TokenStream;
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;

/// One source file, tokenized and scope-resolved exactly once and shared by
/// every detector that runs over it.
#[derive(Debug)]
pub struct ParsedFile {
    pub path: PathBuf,
    pub stream: TokenStream,
    pub scopes: ScopeResolver,
}

impl ParsedFile {
    pub fn parse(path: PathBuf, source: &str) -> Result<Self, LexError> {
        let stream = tokenize(source)?;
        let scopes = ScopeResolver::new(&stream);
        Ok(Self {
            path,
            stream,
            scopes,
        })
    }
}

/// Result from running a single detector over one file
#[derive(Debug, Clone)]
pub struct DetectorResult {
    /// Name of the detector that produced these results
    pub detector_name: String,
    /// Findings produced by the detector
    pub findings: Vec<Finding>,
    /// Execution time in milliseconds
    pub duration_ms: u64,
    /// Whether the detector completed successfully
    pub success: bool,
    /// Error message if the detector failed
    pub error: Option<String>,
}

impl DetectorResult {
    /// Create a successful result
    pub fn success(detector_name: String, findings: Vec<Finding>, duration_ms: u64) -> Self {
        Self {
            detector_name,
            findings,
            duration_ms,
            success: true,
            error: None,
        }
    }

    /// Create a failed result
    pub fn failure(detector_name: String, error: String, duration_ms: u64) -> Self {
        Self {
            detector_name,
            findings: Vec::new(),
            duration_ms,
            success: false,
            error: Some(error),
        }
    }
}

/// Configuration options for detectors
#[derive(Debug, Clone, Default)]
pub struct DetectorConfig {
    /// Maximum findings to return per detector
    pub max_findings: Option<usize>,
    /// Detector-specific thresholds and options
    pub options: HashMap<String, serde_json::Value>,
}

impl DetectorConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum findings
    pub fn with_max_findings(mut self, max: usize) -> Self {
        self.max_findings = Some(max);
        self
    }

    /// Set a custom option
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Get a typed option value
    pub fn get_option<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.options
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get an option with a default value
    pub fn get_option_or<T: serde::de::DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_option(key).unwrap_or(default)
    }
}

/// Trait for all escaping detectors
///
/// A detector examines one parsed file at a time and returns findings.
/// Implementations must be `Send + Sync`: the engine fans files out across a
/// rayon pool and shares each detector by reference.
pub trait Detector: Send + Sync {
    /// Unique identifier for this detector (e.g. "DirectDbDetector")
    fn name(&self) -> &'static str;

    /// Human-readable description of what this detector finds
    fn description(&self) -> &'static str;

    /// Run detection over one file and return findings
    fn detect(&self, file: &ParsedFile) -> Result<Vec<Finding>>;

    /// Category of issues this detector finds
    fn category(&self) -> &'static str {
        "security"
    }

    /// Get the configuration for this detector
    fn config(&self) -> Option<&DetectorConfig> {
        None
    }
}

/// Progress callback for engine execution: (file, done, total)
pub type ProgressCallback = Box<dyn Fn(&str, usize, usize) + Send + Sync>;

/// Summary statistics from running all detectors
#[derive(Debug, Clone, Default)]
pub struct DetectionSummary {
    /// Number of files analyzed
    pub files_analyzed: usize,
    /// Number of files that failed to parse
    pub files_failed: usize,
    /// Number of detector runs that succeeded
    pub detectors_succeeded: usize,
    /// Number of detector runs that failed
    pub detectors_failed: usize,
    /// Total findings across all detectors
    pub total_findings: usize,
    /// Findings by severity
    pub by_severity: HashMap<Severity, usize>,
    /// Total execution time in milliseconds
    pub total_duration_ms: u64,
}

impl DetectionSummary {
    /// Update summary with a detector result
    pub fn add_result(&mut self, result: &DetectorResult) {
        self.total_duration_ms += result.duration_ms;

        if result.success {
            self.detectors_succeeded += 1;
            self.total_findings += result.findings.len();

            for finding in &result.findings {
                *self.by_severity.entry(finding.severity).or_insert(0) += 1;
            }
        } else {
            self.detectors_failed += 1;
        }
    }
}

/// Shared driver invocation: run `policy` over `file` and wrap the resulting
/// diagnostics as findings attributed to `detector`.
pub(crate) fn run_policy(detector: &'static str, policy: &SinkPolicy, file: &ParsedFile) -> Vec<Finding> {
    let driver = StatementDriver::new(&file.stream, &file.scopes, policy);
    driver
        .analyze()
        .into_iter()
        .map(|diag| finding_from_diagnostic(detector, policy, file, diag))
        .collect()
}

fn finding_from_diagnostic(
    detector: &'static str,
    policy: &SinkPolicy,
    file: &ParsedFile,
    diag: Diagnostic,
) -> Finding {
    let severity = match diag.severity {
        DiagnosticSeverity::Error => Severity::High,
        DiagnosticSeverity::Warning => Severity::Medium,
    };
    let file_str = file.path.display().to_string();
    let description = if diag.notes.is_empty() {
        diag.message.clone()
    } else {
        format!("{}\n{}", diag.message, diag.notes.join("\n"))
    };

    Finding {
        id: deterministic_finding_id(detector, &file_str, diag.line, &diag.message),
        detector: detector.to_string(),
        rule_id: diag.rule_id.to_string(),
        severity,
        title: diag.message,
        description,
        file: file.path.clone(),
        line: Some(diag.line),
        unsafe_expression: Some(diag.unsafe_expression),
        explanation: diag.notes,
        cwe_id: Some(policy.cwe_id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_config() {
        let config = DetectorConfig::new()
            .with_max_findings(100)
            .with_option("threshold", serde_json::json!(10));

        assert_eq!(config.max_findings, Some(100));
        assert_eq!(config.get_option::<i32>("threshold"), Some(10));
        assert_eq!(config.get_option_or("missing", 5), 5);
    }

    #[test]
    fn test_detector_result_success() {
        let result = DetectorResult::success("TestDetector".to_string(), vec![], 100);
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.duration_ms, 100);
    }

    #[test]
    fn test_detector_result_failure() {
        let result = DetectorResult::failure("TestDetector".to_string(), "oops".to_string(), 50);
        assert!(!result.success);
        assert_eq!(result.error, Some("oops".to_string()));
    }

    #[test]
    fn test_detection_summary() {
        let mut summary = DetectionSummary::default();

        let result1 = DetectorResult::success("D1".to_string(), vec![], 100);
        let result2 = DetectorResult::failure("D2".to_string(), "err".to_string(), 50);

        summary.add_result(&result1);
        summary.add_result(&result2);

        assert_eq!(summary.detectors_succeeded, 1);
        assert_eq!(summary.detectors_failed, 1);
        assert_eq!(summary.total_duration_ms, 150);
    }

    #[test]
    fn test_finding_from_diagnostic_maps_severity() {
        let policy = SinkPolicy::sql();
        let file = ParsedFile::parse(PathBuf::from("x.php"), "<?php $a = 1;").unwrap();
        let diag = Diagnostic {
            severity: DiagnosticSeverity::Warning,
            line: 3,
            rule_id: "UnescapedDBParameter",
            message: "Unescaped parameter `$t` used in $wpdb->query()".to_string(),
            unsafe_expression: "$t".to_string(),
            notes: vec!["`$t` is used without escaping.".to_string()],
        };
        let finding = finding_from_diagnostic("DirectDbDetector", &policy, &file, diag);
        assert_eq!(finding.severity, Severity::Medium);
        assert_eq!(finding.cwe_id.as_deref(), Some("CWE-89"));
        assert_eq!(finding.line, Some(3));
        assert!(finding.description.contains("without escaping"));
    }
}

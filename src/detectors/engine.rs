//! Detector execution engine with parallel support
//!
//! The `AnalysisEngine` orchestrates a run over a source tree:
//! - Walks the tree for PHP files, honoring `.gitignore`
//! - Parses each file once and shares the parse with every detector
//! - Fans files out across a rayon pool
//! - Collects findings in deterministic (file, line) order

use crate::detectors::base::{
    DetectionSummary, Detector, DetectorResult, ParsedFile, ProgressCallback,
};
use crate::models::Finding;
use anyhow::{Context, Result};
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Maximum findings to keep to prevent memory exhaustion
const MAX_FINDINGS_LIMIT: usize = 10_000;

/// Orchestrates escaping analysis across all registered detectors
pub struct AnalysisEngine {
    /// Registered detectors
    detectors: Vec<Arc<dyn Detector>>,
    /// Number of worker threads for parallel execution
    workers: usize,
    /// Maximum findings to return (prevents memory issues on large trees)
    max_findings: usize,
    /// Progress callback for reporting execution status
    progress_callback: Option<ProgressCallback>,
}

impl AnalysisEngine {
    /// Create a new analysis engine
    ///
    /// # Arguments
    /// * `workers` - Number of worker threads (0 = auto-detect)
    pub fn new(workers: usize) -> Self {
        let actual_workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
                .min(16)
        } else {
            workers
        };

        Self {
            detectors: Vec::new(),
            workers: actual_workers,
            max_findings: MAX_FINDINGS_LIMIT,
            progress_callback: None,
        }
    }

    /// Set the maximum number of findings to return
    pub fn with_max_findings(mut self, max: usize) -> Self {
        self.max_findings = max;
        self
    }

    /// Set a progress callback
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Register a detector
    pub fn register(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Run every registered detector over every PHP file under `root`.
    /// `root` may also be a single file.
    pub fn run(&self, root: &Path) -> Result<(Vec<Finding>, DetectionSummary)> {
        let files = collect_php_files(root)?;
        info!(files = files.len(), workers = self.workers, "starting analysis");

        let completed = Arc::new(AtomicUsize::new(0));
        let total = files.len();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .context("failed to build worker pool")?;

        let per_file: Vec<FileOutcome> = pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    let outcome = self.analyze_file(path);

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref callback) = self.progress_callback {
                        callback(&path.display().to_string(), done, total);
                    }

                    outcome
                })
                .collect()
        });

        let mut all_findings: Vec<Finding> = Vec::new();
        let mut summary = DetectionSummary::default();

        for outcome in per_file {
            if outcome.parse_failed {
                summary.files_failed += 1;
            } else {
                summary.files_analyzed += 1;
            }
            for result in outcome.results {
                summary.add_result(&result);
                if result.success {
                    all_findings.extend(result.findings);
                } else if let Some(err) = &result.error {
                    warn!("Detector {} failed: {}", result.detector_name, err);
                }
            }
        }

        all_findings.sort_by(|a, b| {
            (&a.file, a.line, &a.detector).cmp(&(&b.file, b.line, &b.detector))
        });
        if all_findings.len() > self.max_findings {
            warn!(
                "Truncating findings from {} to {}",
                all_findings.len(),
                self.max_findings
            );
            all_findings.truncate(self.max_findings);
        }
        summary.total_findings = all_findings.len();

        Ok((all_findings, summary))
    }

    fn analyze_file(&self, path: &Path) -> FileOutcome {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read file");
                return FileOutcome::parse_failure();
            }
        };

        let parsed = match ParsedFile::parse(path.to_path_buf(), &source) {
            Ok(p) => p,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to tokenize file");
                return FileOutcome::parse_failure();
            }
        };

        let mut results = Vec::with_capacity(self.detectors.len());
        for detector in &self.detectors {
            let start = Instant::now();
            let result = match detector.detect(&parsed) {
                Ok(findings) => {
                    debug!(
                        detector = detector.name(),
                        path = %path.display(),
                        findings = findings.len(),
                        "detector finished"
                    );
                    DetectorResult::success(
                        detector.name().to_string(),
                        findings,
                        start.elapsed().as_millis() as u64,
                    )
                }
                Err(err) => DetectorResult::failure(
                    detector.name().to_string(),
                    err.to_string(),
                    start.elapsed().as_millis() as u64,
                ),
            };
            results.push(result);
        }

        FileOutcome {
            parse_failed: false,
            results,
        }
    }
}

struct FileOutcome {
    parse_failed: bool,
    results: Vec<DetectorResult>,
}

impl FileOutcome {
    fn parse_failure() -> Self {
        Self {
            parse_failed: true,
            results: Vec::new(),
        }
    }
}

/// PHP files under `root`, sorted for deterministic output order.
fn collect_php_files(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .build();

    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_file() {
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if ext.eq_ignore_ascii_case("php") {
                    files.push(path.to_path_buf());
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

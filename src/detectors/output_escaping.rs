//! Output escaping detector
//!
//! Flags `echo`, `print`, `exit(...)` and `<?=` emitting values that were
//! not passed through an output escaping function such as `esc_html()`.

use crate::analyzer::SinkPolicy;
use crate::detectors::base::{run_policy, Detector, DetectorConfig, ParsedFile};
use crate::models::Finding;
use anyhow::Result;

pub struct OutputEscapingDetector {
    policy: SinkPolicy,
    config: DetectorConfig,
}

impl OutputEscapingDetector {
    pub fn new() -> Self {
        Self::with_config(DetectorConfig::new())
    }

    pub fn with_config(config: DetectorConfig) -> Self {
        Self {
            policy: SinkPolicy::output(),
            config,
        }
    }
}

impl Default for OutputEscapingDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for OutputEscapingDetector {
    fn name(&self) -> &'static str {
        "OutputEscapingDetector"
    }

    fn description(&self) -> &'static str {
        "Detects unescaped, externally influenced values reaching page output"
    }

    fn detect(&self, file: &ParsedFile) -> Result<Vec<Finding>> {
        let mut findings = run_policy(self.name(), &self.policy, file);
        if let Some(max) = self.config.max_findings {
            findings.truncate(max);
        }
        Ok(findings)
    }

    fn config(&self) -> Option<&DetectorConfig> {
        Some(&self.config)
    }
}

//! Direct database query detector
//!
//! Flags `$wpdb` query methods whose query argument can contain data that
//! was not escaped with `esc_sql()`/`absint()` or run through
//! `$wpdb->prepare()`.

use crate::analyzer::SinkPolicy;
use crate::detectors::base::{run_policy, Detector, DetectorConfig, ParsedFile};
use crate::models::Finding;
use anyhow::Result;

pub struct DirectDbDetector {
    policy: SinkPolicy,
    config: DetectorConfig,
}

impl DirectDbDetector {
    pub fn new() -> Self {
        Self::with_config(DetectorConfig::new())
    }

    pub fn with_config(config: DetectorConfig) -> Self {
        Self {
            policy: SinkPolicy::sql(),
            config,
        }
    }
}

impl Default for DirectDbDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for DirectDbDetector {
    fn name(&self) -> &'static str {
        "DirectDbDetector"
    }

    fn description(&self) -> &'static str {
        "Detects database queries built from unescaped, externally influenced values"
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

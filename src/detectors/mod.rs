//! Escaping detectors
//!
//! This module provides the detector framework and the two built-in
//! detectors.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     AnalysisEngine                          │
//! │  - Walks the tree for PHP files (gitignore-aware)           │
//! │  - Parses each file once (lexer + scope resolution)         │
//! │  - Runs detectors per file in parallel (rayon)              │
//! │  - Collects findings in deterministic order                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Detector Trait                         │
//! │  - name(): Unique identifier                                │
//! │  - description(): Human-readable description                │
//! │  - detect(file): Run detection, return findings             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//! ┌──────────────────────┐      ┌──────────────────────────┐
//! │ DirectDbDetector     │      │ OutputEscapingDetector   │
//! │ ($wpdb query sinks)  │      │ (echo/print/exit sinks)  │
//! └──────────────────────┘      └──────────────────────────┘
//! ```
//!
//! Both detectors share the same taint analysis core and differ only in
//! their [`SinkPolicy`](crate::analyzer::SinkPolicy).

mod base;
mod direct_db;
mod engine;
mod output_escaping;

pub use base::{
    DetectionSummary, Detector, DetectorConfig, DetectorResult, ParsedFile, ProgressCallback,
};
pub use direct_db::DirectDbDetector;
pub use engine::AnalysisEngine;
pub use output_escaping::OutputEscapingDetector;

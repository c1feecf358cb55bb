//! Sinkcheck - taint-tracking escaping analysis for PHP
//!
//! A fast, local-first analyzer that flags externally influenced data
//! reaching dangerous sinks (database query methods and output statements)
//! without passing through a recognized escaping function.
//!
//! The crate is organized as a pipeline:
//! [`lexer`] turns source into a [`tokens::TokenStream`], [`analyzer`] runs
//! the taint analysis over it, and [`detectors`] wraps the analysis into
//! per-sink detectors driven by an engine that walks whole source trees.

pub mod analyzer;
pub mod cli;
pub mod detectors;
pub mod lexer;
pub mod models;
pub mod tokens;

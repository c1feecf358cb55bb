//! Sinkcheck - escaping analysis CLI for PHP
//!
//! A fast, local-first analyzer that flags unescaped, externally
//! influenced data reaching database queries and page output.

use clap::Parser;
use sinkcheck::cli;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    // Initialize logging; RUST_LOG overrides --log-level.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    match cli::run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

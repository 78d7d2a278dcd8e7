// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface Module
//!
//! The service takes a single configuration path and a verbosity flag; every
//! other piece of service configuration (ports, pipeline weight budget,
//! watchdog interval) lives in the INI file, not on the command line.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, clap::Parser)]
#[command(name = "inference_server", about = "Pipeline orchestration inference server", version)]
pub struct Cli {
    /// Path to the service configuration file (INI format).
    #[arg(short = 'C', long = "config", value_name = "PATH")]
    pub config: PathBuf,

    /// Enable verbose (debug-level) logging.
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid argument {arg}: {reason}")]
    InvalidValue { arg: String, reason: String },

    #[error("config file does not exist: {0}")]
    ConfigNotFound(PathBuf),
}

/// Validated CLI configuration: the config path is confirmed to exist before
/// the rest of bootstrap proceeds.
#[derive(Debug, Clone)]
pub struct ValidatedCli {
    pub config: PathBuf,
    pub verbose: bool,
}

pub fn parse_cli() -> Cli {
    <Cli as clap::Parser>::parse()
}

/// Parse and validate CLI arguments: parses with `clap`, then confirms the
/// config path exists so a missing `-C` argument fails fast with a clear
/// message rather than surfacing later as a generic I/O error.
pub fn parse_and_validate() -> Result<ValidatedCli, ParseError> {
    let cli = parse_cli();
    if !cli.config.exists() {
        return Err(ParseError::ConfigNotFound(cli.config));
    }
    Ok(ValidatedCli {
        config: cli.config,
        verbose: cli.verbose,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_path_is_reported_by_name() {
        let err = ParseError::ConfigNotFound(PathBuf::from("/no/such/file.ini"));
        assert!(err.to_string().contains("/no/such/file.ini"));
    }
}

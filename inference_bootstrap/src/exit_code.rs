// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Process Exit Codes
//!
//! The service exits 0 on clean shutdown and 1 on configuration error — a
//! two-value scheme rather than a full BSD `sysexits.h` mapping, since this
//! service has no broader exit taxonomy to carry.

use std::process::ExitCode as StdExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    ConfigurationError,
}

impl ExitCode {
    pub fn as_u8(self) -> u8 {
        match self {
            ExitCode::Success => 0,
            ExitCode::ConfigurationError => 1,
        }
    }
}

impl From<ExitCode> for StdExitCode {
    fn from(code: ExitCode) -> Self {
        StdExitCode::from(code.as_u8())
    }
}

/// Any bootstrap-time failure (bad CLI args, malformed config file) maps to
/// `ConfigurationError`; this is the only failure class that can occur
/// before the pipeline managers and frontends are up.
pub fn map_error_to_exit_code<E>(_error: &E) -> ExitCode {
    ExitCode::ConfigurationError
}

pub fn result_to_exit_code<T, E>(result: Result<T, E>) -> StdExitCode {
    match result {
        Ok(_) => ExitCode::Success.into(),
        Err(ref e) => map_error_to_exit_code(e).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_maps_to_zero() {
        assert_eq!(ExitCode::Success.as_u8(), 0);
    }

    #[test]
    fn configuration_error_maps_to_one() {
        assert_eq!(ExitCode::ConfigurationError.as_u8(), 1);
    }

    #[test]
    fn map_error_to_exit_code_is_always_configuration_error() {
        let err = "bad config";
        assert_eq!(map_error_to_exit_code(&err), ExitCode::ConfigurationError);
    }

    #[test]
    fn result_to_exit_code_does_not_panic() {
        let ok: Result<(), &str> = Ok(());
        let err: Result<(), &str> = Err("bad config");
        let _ = result_to_exit_code(ok);
        let _ = result_to_exit_code(err);
    }
}

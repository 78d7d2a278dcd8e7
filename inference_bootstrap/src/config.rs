// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bootstrap Configuration Loading
//!
//! Loads the INI file named by `-C <path>` into a generic
//! `config::Config` tree. Bootstrap only validates that the file parses;
//! section-specific typed extraction (`[Service]`, `[HTTP]`, `[Pipeline]`)
//! happens in `inference_engine::infrastructure::config`, which knows the
//! field names and defaults. Keeping this layer generic lets bootstrap stay
//! ignorant of application-layer configuration shape, matching its role as
//! the outermost composition root.

use std::path::Path;

use config::{Config, File, FileFormat};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: config::ConfigError,
    },
}

/// Reads `path` as an INI file and returns the parsed tree. Any malformed
/// configuration is a `BuildFailure`-class error that exits the process with
/// code 1.
pub fn load_ini(path: &Path) -> Result<Config, ConfigError> {
    Config::builder()
        .add_source(File::new(&path.to_string_lossy(), FileFormat::Ini))
        .build()
        .map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_well_formed_ini_file() {
        let mut file = tempfile_with_contents("[Service]\nseverity=info\n");
        let config = load_ini(file.path()).unwrap();
        assert_eq!(config.get_string("Service.severity").unwrap(), "info");
        file.flush().unwrap();
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let err = load_ini(Path::new("/no/such/config.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }

    fn tempfile_with_contents(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }
}

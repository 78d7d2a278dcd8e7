// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Typed extraction of the `[Service]`/`[HTTP]`/`[Pipeline]` sections from
//! the generic `config::Config` tree `inference_bootstrap::config` parses.
//! Malformed configuration is a `BuildFailure`-class error; the process
//! exits 1 on failure.

use std::path::Path;

use inference_domain::PipelineError;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub log_dir: Option<String>,
    pub log_rotation: LogRotation,
    pub severity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Never,
    Daily,
    Hourly,
}

impl LogRotation {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "daily" => LogRotation::Daily,
            "hourly" => LogRotation::Hourly,
            _ => LogRotation::Never,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub address: String,
    pub rest_port: u16,
    pub grpc_port: u16,
    pub metrics_port: u16,
}

#[derive(Debug, Clone)]
pub struct PipelineManagerConfig {
    pub max_concurrent_workload: u32,
    pub max_pipeline_lifetime_secs: u64,
    pub pipeline_manager_pool_size: u32,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub service: ServiceConfig,
    pub http: HttpConfig,
    pub pipeline: PipelineManagerConfig,
}

/// Loads `-C <path>` and extracts the typed sections, filling in sensible
/// defaults when a key is absent.
pub fn load(path: &Path) -> Result<EngineConfig, PipelineError> {
    let tree = inference_bootstrap::config::load_ini(path).map_err(|e| PipelineError::build_failure(e.to_string()))?;

    let service = ServiceConfig {
        log_dir: tree.get_string("Service.log dir").ok(),
        log_rotation: tree.get_string("Service.rotation").map(|v| LogRotation::parse(&v)).unwrap_or(LogRotation::Never),
        severity: tree.get_string("Service.severity").unwrap_or_else(|_| "info".to_string()),
    };

    let http = HttpConfig {
        address: tree.get_string("HTTP.address").unwrap_or_else(|_| "0.0.0.0".to_string()),
        rest_port: parse_port(&tree, "HTTP.rest port", 8080)?,
        grpc_port: parse_port(&tree, "HTTP.grpc port", 50051)?,
        metrics_port: parse_port(&tree, "HTTP.metrics port", 9090)?,
    };

    let pipeline = PipelineManagerConfig {
        max_concurrent_workload: parse_u32(&tree, "Pipeline.maxConcurrentWorkload", 100)?,
        max_pipeline_lifetime_secs: parse_u32(&tree, "Pipeline.maxPipelineLifetime", 30)? as u64,
        pipeline_manager_pool_size: parse_u32(&tree, "Pipeline.pipelineManagerPoolSize", 4)?,
    };

    Ok(EngineConfig { service, http, pipeline })
}

fn parse_port(tree: &config::Config, key: &str, default: u16) -> Result<u16, PipelineError> {
    match tree.get_string(key) {
        Ok(raw) => raw.parse().map_err(|_| PipelineError::build_failure(format!("{key} is not a valid port: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn parse_u32(tree: &config::Config, key: &str, default: u32) -> Result<u32, PipelineError> {
    match tree.get_string(key) {
        Ok(raw) => raw.parse().map_err(|_| PipelineError::build_failure(format!("{key} is not a valid integer: {raw}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_optional_fields_fall_back_to_spec_defaults() {
        let file = write_ini("[Service]\nseverity=debug\n");
        let config = load(file.path()).unwrap();
        assert_eq!(config.service.severity, "debug");
        assert_eq!(config.http.rest_port, 8080);
        assert_eq!(config.pipeline.max_pipeline_lifetime_secs, 30);
    }

    #[test]
    fn explicit_sections_are_read_back() {
        let file = write_ini("[HTTP]\nrest port=9000\ngrpc port=9001\n[Pipeline]\nmaxConcurrentWorkload=50\npipelineManagerPoolSize=2\n");
        let config = load(file.path()).unwrap();
        assert_eq!(config.http.rest_port, 9000);
        assert_eq!(config.http.grpc_port, 9001);
        assert_eq!(config.pipeline.max_concurrent_workload, 50);
        assert_eq!(config.pipeline.pipeline_manager_pool_size, 2);
    }

    #[test]
    fn malformed_port_is_a_build_failure() {
        let file = write_ini("[HTTP]\nrest port=not-a-port\n");
        let err = load(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::BuildFailure(_)));
    }
}

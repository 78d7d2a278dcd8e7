// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Structured logging via `tracing`/`tracing-subscriber`. Every
//! scheduler thread, watchdog tick, and node worker should emit its events
//! within a span carrying `pipeline_id`/`job_handle`/`node_name`/
//! `stream_id` where applicable, so a log aggregator can reconstruct one
//! request's path through the graph; `pipeline_span` builds that span.

use std::fs::File;
use std::path::Path;

use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::infrastructure::config::ServiceConfig;

fn level_from_severity(severity: &str) -> Level {
    match severity.to_ascii_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Initializes the global `tracing` subscriber from the `[Service]` config
/// section. `log_rotation` is accepted for forward compatibility with a
/// future rolling-file writer; the current writer appends to one file for
/// the process lifetime when `log_dir` is set, matching the bounded ambient
/// stack this service carries without pulling in a dedicated rotation crate.
pub fn init(service: &ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let level = level_from_severity(&service.severity);
    let filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let writer = match &service.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let path = Path::new(dir).join("inference_engine.log");
            let file = File::create(path)?;
            BoxMakeWriter::new(move || file.try_clone().expect("failed to clone log file handle"))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let _ = service.log_rotation;

    tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).with_target(true).json().try_init()?;
    Ok(())
}

/// Builds the per-request span every worker/scheduler-loop iteration should
/// run inside.
pub fn pipeline_span(pipeline_id: &str, job_handle: u32, node_name: &str, stream_id: u32) -> tracing::Span {
    tracing::info_span!("pipeline", pipeline_id = %pipeline_id, job_handle, node_name = %node_name, stream_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_from_severity_maps_known_strings() {
        assert_eq!(level_from_severity("error"), Level::ERROR);
        assert_eq!(level_from_severity("DEBUG"), Level::DEBUG);
        assert_eq!(level_from_severity("unrecognized"), Level::INFO);
    }
}

// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Composition root: parses `-C <path>`, loads config, wires a
//! `PipelineManager` per transport, starts the
//! HTTP, gRPC, and metrics listeners, and drives the SIGINT/SIGTERM shutdown
//! sequence: stop both frontends, then both pipeline managers, then exit.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Server as TonicServer;
use tracing::{error, info};

use inference_engine::application::node_registry::NodeRegistry;
use inference_engine::application::pipeline_manager::{ManagerConfig, PipelineManager};
use inference_engine::infrastructure::{config, logging, metrics};
use inference_engine::presentation::grpc::{AiInferenceService, RunServer};
use inference_engine::presentation::http::{self, HttpState};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match inference_bootstrap::bootstrap_cli() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };

    let engine_config = match config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };

    let mut service_config = engine_config.service.clone();
    if cli.verbose {
        service_config.severity = "debug".to_string();
    }
    if let Err(err) = logging::init(&service_config) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::from(1);
    }

    info!(config = %cli.config.display(), "starting inference_server");

    let registry = Arc::new(NodeRegistry::with_builtin_nodes());
    let manager_config = ManagerConfig {
        max_concurrent_workload: engine_config.pipeline.max_concurrent_workload,
        max_pipeline_lifetime: Duration::from_secs(engine_config.pipeline.max_pipeline_lifetime_secs),
        pool_size: engine_config.pipeline.pipeline_manager_pool_size,
        queue_capacity: 64,
    };

    let metrics_service = match metrics::MetricsService::new() {
        Ok(service) => Arc::new(service),
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            return ExitCode::from(1);
        }
    };

    // One PipelineManager instance per transport.
    let http_manager = PipelineManager::new(manager_config, registry.clone(), metrics_service.clone(), "http");
    let grpc_manager = PipelineManager::new(manager_config, registry, metrics_service.clone(), "grpc");

    let rest_addr: SocketAddr = match format!("{}:{}", engine_config.http.address, engine_config.http.rest_port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, "invalid REST bind address");
            return ExitCode::from(1);
        }
    };
    let grpc_addr: SocketAddr = match format!("{}:{}", engine_config.http.address, engine_config.http.grpc_port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, "invalid gRPC bind address");
            return ExitCode::from(1);
        }
    };
    let metrics_addr: SocketAddr = match format!("{}:{}", engine_config.http.address, engine_config.http.metrics_port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, "invalid metrics bind address");
            return ExitCode::from(1);
        }
    };

    let http_state = HttpState::new(http_manager.clone(), manager_config.max_pipeline_lifetime);
    let rest_handle = tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(rest_addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(error = %err, addr = %rest_addr, "failed to bind REST listener");
                return;
            }
        };
        info!(addr = %rest_addr, "REST frontend listening");
        if let Err(err) = axum::serve(listener, http::router(http_state)).await {
            error!(error = %err, "REST frontend exited with an error");
        }
    });

    let grpc_service = AiInferenceService::new(grpc_manager.clone());
    let grpc_handle = tokio::spawn(async move {
        info!(addr = %grpc_addr, "gRPC frontend listening");
        if let Err(err) = TonicServer::builder().add_service(RunServer::new(grpc_service)).serve(grpc_addr).await {
            error!(error = %err, "gRPC frontend exited with an error");
        }
    });

    let metrics_handle = tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(metrics_addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(error = %err, addr = %metrics_addr, "failed to bind metrics listener");
                return;
            }
        };
        info!(addr = %metrics_addr, "metrics endpoint listening");
        if let Err(err) = axum::serve(listener, metrics::router(metrics_service)).await {
            error!(error = %err, "metrics endpoint exited with an error");
        }
    });

    inference_bootstrap::signals::wait_for_shutdown_signal().await;
    info!("stopping frontends");
    rest_handle.abort();
    grpc_handle.abort();
    metrics_handle.abort();

    info!("stopping pipeline managers");
    http_manager.shutdown();
    grpc_manager.shutdown();

    info!("shutdown complete");
    ExitCode::from(0)
}

// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Prometheus-based observability: an active-pipeline gauge, a
//! weight-budget gauge per `PipelineManager`, per-node processing-duration
//! histograms, frame errors labelled by [`PipelineError::category`], and a
//! watchdog health-check counter backing `GET /healthz`.
//!
//! This crate already carries axum for the HTTP frontend, so `router` hangs
//! both endpoints off that stack instead of a second hand-rolled listener.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::debug;

use inference_domain::{NodeName, PipelineError, PipelineObserver};

/// Owns the Prometheus `Registry` and every named metric this engine emits.
/// Cheap to clone (every field is a registry handle or an `Arc`).
#[derive(Clone)]
pub struct MetricsService {
    registry: Arc<Registry>,
    active_pipelines: IntGauge,
    watchdog_ticks_total: IntCounter,
    manager_weight_in_use: IntGaugeVec,
    manager_weight_budget: IntGaugeVec,
    node_processing_duration: Histogram,
    frame_errors_total: IntCounterVec,
}

impl MetricsService {
    pub fn new() -> Result<Self, PipelineError> {
        let registry = Registry::new();

        let active_pipelines = IntGauge::with_opts(
            Opts::new("pipelines_active", "Number of pipelines currently in Running or Paused state").namespace("inference_engine"),
        )
        .map_err(|e| PipelineError::internal(format!("failed to create pipelines_active metric: {e}")))?;

        let watchdog_ticks_total = IntCounter::with_opts(
            Opts::new("watchdog_ticks_total", "Number of watchdog health-check ticks completed").namespace("inference_engine"),
        )
        .map_err(|e| PipelineError::internal(format!("failed to create watchdog_ticks_total metric: {e}")))?;

        let manager_weight_in_use = IntGaugeVec::new(
            Opts::new("manager_weight_in_use", "Weight currently reserved by running pipelines").namespace("inference_engine"),
            &["manager"],
        )
        .map_err(|e| PipelineError::internal(format!("failed to create manager_weight_in_use metric: {e}")))?;

        let manager_weight_budget = IntGaugeVec::new(
            Opts::new("manager_weight_budget", "Total weight budget configured for a pipeline manager").namespace("inference_engine"),
            &["manager"],
        )
        .map_err(|e| PipelineError::internal(format!("failed to create manager_weight_budget metric: {e}")))?;

        let node_processing_duration = Histogram::with_opts(
            HistogramOpts::new("node_processing_duration_seconds", "Time a node worker spends in process() per batch")
                .namespace("inference_engine")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )
        .map_err(|e| PipelineError::internal(format!("failed to create node_processing_duration metric: {e}")))?;

        let frame_errors_total = IntCounterVec::new(
            Opts::new("frame_errors_total", "Frame-processing errors by taxonomy category").namespace("inference_engine"),
            &["category"],
        )
        .map_err(|e| PipelineError::internal(format!("failed to create frame_errors_total metric: {e}")))?;

        registry
            .register(Box::new(active_pipelines.clone()))
            .map_err(|e| PipelineError::internal(format!("failed to register pipelines_active: {e}")))?;
        registry
            .register(Box::new(watchdog_ticks_total.clone()))
            .map_err(|e| PipelineError::internal(format!("failed to register watchdog_ticks_total: {e}")))?;
        registry
            .register(Box::new(manager_weight_in_use.clone()))
            .map_err(|e| PipelineError::internal(format!("failed to register manager_weight_in_use: {e}")))?;
        registry
            .register(Box::new(manager_weight_budget.clone()))
            .map_err(|e| PipelineError::internal(format!("failed to register manager_weight_budget: {e}")))?;
        registry
            .register(Box::new(node_processing_duration.clone()))
            .map_err(|e| PipelineError::internal(format!("failed to register node_processing_duration: {e}")))?;
        registry
            .register(Box::new(frame_errors_total.clone()))
            .map_err(|e| PipelineError::internal(format!("failed to register frame_errors_total: {e}")))?;

        debug!("metrics service initialized");

        Ok(Self {
            registry: Arc::new(registry),
            active_pipelines,
            watchdog_ticks_total,
            manager_weight_in_use,
            manager_weight_budget,
            node_processing_duration,
            frame_errors_total,
        })
    }

    pub fn set_active_pipelines(&self, count: i64) {
        self.active_pipelines.set(count);
    }

    pub fn record_watchdog_tick(&self) {
        self.watchdog_ticks_total.inc();
    }

    pub fn set_manager_weight(&self, manager: &str, in_use: i64, budget: i64) {
        self.manager_weight_in_use.with_label_values(&[manager]).set(in_use);
        self.manager_weight_budget.with_label_values(&[manager]).set(budget);
    }

    pub fn observe_node_duration(&self, seconds: f64) {
        self.node_processing_duration.observe(seconds);
    }

    pub fn record_frame_error(&self, error: &PipelineError) {
        self.frame_errors_total.with_label_values(&[error.category()]).inc();
    }

    fn encode(&self) -> Result<String, PipelineError> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| PipelineError::internal(format!("failed to encode metrics: {e}")))?;
        String::from_utf8(buffer).map_err(|e| PipelineError::internal(format!("metrics output was not utf-8: {e}")))
    }
}

impl PipelineObserver for MetricsService {
    fn on_worker_duration(&self, _node: &NodeName, elapsed: std::time::Duration) {
        self.observe_node_duration(elapsed.as_secs_f64());
    }

    fn on_frame_error(&self, error: &PipelineError) {
        self.record_frame_error(error);
    }
}

async fn metrics_handler(State(service): State<Arc<MetricsService>>) -> impl IntoResponse {
    match service.encode() {
        Ok(body) => (axum::http::StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], body).into_response(),
        Err(err) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

/// `GET /metrics` and `GET /healthz`, merged into the presentation layer's
/// axum router at the configured metrics port.
pub fn router(service: Arc<MetricsService>) -> Router {
    Router::new().route("/metrics", get(metrics_handler)).route("/healthz", get(health_handler)).with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_contains_namespaced_metric_names() {
        let service = MetricsService::new().unwrap();
        service.set_active_pipelines(3);
        service.record_frame_error(&PipelineError::Timeout);
        let text = service.encode().unwrap();
        assert!(text.contains("inference_engine_pipelines_active 3"));
        assert!(text.contains("inference_engine_frame_errors_total"));
        assert!(text.contains("category=\"timeout\""));
    }

    #[test]
    fn manager_weight_labels_are_independent() {
        let service = MetricsService::new().unwrap();
        service.set_manager_weight("video", 4, 10);
        service.set_manager_weight("radar", 1, 2);
        let text = service.encode().unwrap();
        assert!(text.contains("manager=\"video\""));
        assert!(text.contains("manager=\"radar\""));
    }
}

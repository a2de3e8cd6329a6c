// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics.
//!
//! Metrics live in an explicit [`Metrics`] struct owned by the shared
//! context rather than global statics, so tests get isolated registries
//! and nothing registers at import time. The `/metrics` endpoint is served
//! by a small axum router.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tracing::info;

use crate::constants::{METRICS_SERVER_BIND_ADDRESS, METRICS_SERVER_PATH};

/// All operator metrics, backed by one registry.
pub struct Metrics {
    registry: Registry,
    /// Reconciliations by controller and outcome (`success`, `error`,
    /// `requeue`).
    pub reconciliations: IntCounterVec,
    /// Reconcile wall time by controller.
    pub reconcile_duration: HistogramVec,
    /// Cloudflare API errors by classified reason.
    pub cloudflare_errors: IntCounterVec,
    /// Live entries in the credential cache.
    pub credential_cache_size: IntGauge,
}

impl Metrics {
    /// Build and register all collectors.
    ///
    /// # Errors
    ///
    /// Returns a prometheus error when collector registration fails, which
    /// only happens on duplicate registration within one registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "cfgate_reconciliations_total",
                "Reconciliations by controller and outcome",
            ),
            &["controller", "outcome"],
        )?;
        registry.register(Box::new(reconciliations.clone()))?;

        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "cfgate_reconcile_duration_seconds",
                "Reconcile duration by controller",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["controller"],
        )?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        let cloudflare_errors = IntCounterVec::new(
            Opts::new(
                "cfgate_cloudflare_errors_total",
                "Cloudflare API errors by classified reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(cloudflare_errors.clone()))?;

        let credential_cache_size = IntGauge::new(
            "cfgate_credential_cache_size",
            "Live entries in the credential cache",
        )?;
        registry.register(Box::new(credential_cache_size.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            reconcile_duration,
            cloudflare_errors,
            credential_cache_size,
        })
    }

    /// Record one reconcile attempt.
    pub fn observe_reconcile(&self, controller: &str, outcome: &str, duration_secs: f64) {
        self.reconciliations
            .with_label_values(&[controller, outcome])
            .inc();
        self.reconcile_duration
            .with_label_values(&[controller])
            .observe(duration_secs);
    }

    /// Render the registry in the Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> (StatusCode, String) {
    (StatusCode::OK, metrics.render())
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

/// Serve `/metrics` and `/healthz` until the process exits.
///
/// # Errors
///
/// Returns an error when the listener cannot bind or the server fails.
pub async fn run_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route("/healthz", get(health_handler))
        .with_state(metrics);

    let addr = format!("{METRICS_SERVER_BIND_ADDRESS}:{port}");
    info!(%addr, "starting metrics server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

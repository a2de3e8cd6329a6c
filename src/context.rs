// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared controller context.
//!
//! One [`Context`] is built at startup and handed to every controller as
//! `Arc<Context>`. Everything reconcilers share (the Kubernetes client, the
//! credential cache, metrics) travels through it explicitly; there is no
//! global state.

use std::sync::Arc;

use crate::credentials::CredentialCache;
use crate::metrics::Metrics;

/// Name cfgate reports in per-ancestor policy status entries.
pub const CONTROLLER_NAME: &str = "cfgate.firestoned.io/controller";

/// Shared state for all reconcilers.
pub struct Context {
    /// Kubernetes API client.
    pub client: kube::Client,
    /// Validated Cloudflare API clients keyed by credentials secret.
    pub credentials: CredentialCache,
    /// Operator metrics.
    pub metrics: Arc<Metrics>,
}

impl Context {
    /// Build a context around a Kubernetes client.
    #[must_use]
    pub fn new(client: kube::Client, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            credentials: CredentialCache::new(),
            metrics,
        }
    }

    /// Context with a pre-built credential cache (used by tests to inject
    /// fake Cloudflare clients).
    #[must_use]
    pub fn with_credentials(
        client: kube::Client,
        metrics: Arc<Metrics>,
        credentials: CredentialCache,
    ) -> Self {
        Self {
            client,
            credentials,
            metrics,
        }
    }
}

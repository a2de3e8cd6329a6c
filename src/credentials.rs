// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Credential resolution and API client caching.
//!
//! Every reconciliation needs a validated Cloudflare client for some
//! credentials secret. Building one is expensive (a token verification
//! round-trip), so clients are cached keyed by secret coordinates plus a
//! fingerprint of the token value. Rotating the secret changes the
//! fingerprint, which transparently builds a fresh client and evicts the
//! stale one; an authentication failure at use time evicts explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cloudflare::client::{CloudflareApi, HttpCloudflareClient};
use crate::cloudflare::error::CloudflareError;
use crate::crd::CloudflareConfig;

/// Errors from credential resolution.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Reading the secret from the API server failed.
    #[error("failed to read credentials secret: {0}")]
    Kube(#[from] kube::Error),

    /// The secret exists but the expected key is missing or empty.
    #[error("secret {namespace}/{name} has no usable key {key}")]
    MissingKey {
        /// Secret namespace.
        namespace: String,
        /// Secret name.
        name: String,
        /// Expected key.
        key: String,
    },

    /// The Cloudflare API rejected or could not verify the token.
    #[error(transparent)]
    Cloudflare(#[from] CloudflareError),
}

impl CredentialError {
    /// Short CamelCase reason suitable for a status condition.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            CredentialError::Kube(_) => "SecretUnavailable",
            CredentialError::MissingKey { .. } => "SecretKeyMissing",
            CredentialError::Cloudflare(e) => e.status_reason(),
        }
    }
}

type ClientFactory =
    Box<dyn Fn(&str) -> Result<Arc<dyn CloudflareApi>, CloudflareError> + Send + Sync>;

/// Cache of validated Cloudflare API clients keyed by secret identity and
/// token fingerprint.
pub struct CredentialCache {
    clients: RwLock<HashMap<String, Arc<dyn CloudflareApi>>>,
    factory: ClientFactory,
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialCache {
    /// Cache producing real HTTP clients.
    #[must_use]
    pub fn new() -> Self {
        Self::with_factory(Box::new(|token| {
            Ok(Arc::new(HttpCloudflareClient::new(token)?) as Arc<dyn CloudflareApi>)
        }))
    }

    /// Cache with a custom client factory (used by tests).
    #[must_use]
    pub fn with_factory(factory: ClientFactory) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            factory,
        }
    }

    /// Resolve a validated client for the given credentials configuration.
    ///
    /// `default_namespace` applies when the secret reference has no
    /// namespace of its own. The returned client has had its token verified
    /// at least once since creation or rotation.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the secret is unreadable, the token
    /// key is missing, or the token fails verification.
    pub async fn get_or_create(
        &self,
        kube: &kube::Client,
        config: &CloudflareConfig,
        default_namespace: &str,
    ) -> Result<Arc<dyn CloudflareApi>, CredentialError> {
        let namespace = config
            .secret_ref
            .namespace
            .as_deref()
            .unwrap_or(default_namespace);
        let name = &config.secret_ref.name;
        let key = config.api_token_key();

        let secrets: Api<Secret> = Api::namespaced(kube.clone(), namespace);
        let secret = secrets.get(name).await?;
        let token = secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|v| String::from_utf8_lossy(&v.0).trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CredentialError::MissingKey {
                namespace: namespace.to_string(),
                name: name.clone(),
                key: key.to_string(),
            })?;

        let secret_id = format!("{namespace}/{name}/{key}");
        let cache_key = format!("{secret_id}:{}", token_fingerprint(&token));

        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(&cache_key) {
                debug!(secret = %secret_id, "credential cache hit");
                return Ok(Arc::clone(client));
            }
        }

        let mut clients = self.clients.write().await;
        // Double-check under the write lock; a concurrent reconcile may
        // have built the client while we waited.
        if let Some(client) = clients.get(&cache_key) {
            return Ok(Arc::clone(client));
        }

        let client = (self.factory)(&token)?;
        client.verify_token().await?;

        let stale_prefix = format!("{secret_id}:");
        clients.retain(|k, _| !k.starts_with(&stale_prefix));
        clients.insert(cache_key, Arc::clone(&client));
        info!(secret = %secret_id, "validated Cloudflare credentials");
        Ok(client)
    }

    /// Drop all cached clients for a secret.
    ///
    /// Called when a cached client starts failing authentication, so the
    /// next reconcile re-reads the secret and re-verifies.
    pub async fn invalidate(&self, namespace: &str, name: &str) {
        let prefix = format!("{namespace}/{name}/");
        let mut clients = self.clients.write().await;
        let before = clients.len();
        clients.retain(|k, _| !k.starts_with(&prefix));
        if clients.len() != before {
            info!(secret = %format!("{namespace}/{name}"), "invalidated cached credentials");
        }
    }

    /// Number of live cached clients.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Seed a cache entry directly, bypassing secret resolution.
    #[cfg(test)]
    pub async fn insert_for_tests(&self, key: &str, client: Arc<dyn CloudflareApi>) {
        self.clients
            .write()
            .await
            .insert(key.to_string(), client);
    }
}

/// Stable fingerprint of a token value for cache keying. The token itself
/// is never logged or stored outside the client.
fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    // 16 hex chars is plenty for cache keying.
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Resolve the account id for a credentials configuration.
///
/// An explicit `account_id` wins; otherwise the `account_name` is looked
/// up via the API. Having neither is a configuration error.
///
/// # Errors
///
/// Returns [`CloudflareError::Configuration`] when the account cannot be
/// identified, or the underlying API error from the lookup.
pub async fn resolve_account_id(
    api: &dyn CloudflareApi,
    config: &CloudflareConfig,
) -> Result<String, CloudflareError> {
    if let Some(id) = config.account_id.as_deref().filter(|s| !s.is_empty()) {
        return Ok(id.to_string());
    }
    let name = config
        .account_name
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CloudflareError::Configuration {
            message: "cloudflare config needs accountId or accountName".to_string(),
        })?;
    let account = api.find_account_by_name(name).await?.ok_or_else(|| {
        CloudflareError::Configuration {
            message: format!("no Cloudflare account named {name}"),
        }
    })?;
    Ok(account.id)
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod credentials_tests;

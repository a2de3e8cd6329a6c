// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tunnel lifecycle service.
//!
//! Wraps a [`TunnelClient`] with the idempotent semantics reconcilers need:
//! adopt-or-create by name, configuration sync with the catch-all invariant,
//! health interpretation, and cascade deletion.

use tracing::{debug, info, warn};

use crate::cloudflare::client::TunnelClient;
use crate::cloudflare::error::CloudflareError;
use crate::cloudflare::types::{ConfigIngressRule, Tunnel, TunnelConfig};
use crate::constants::{CATCH_ALL_SERVICE, TUNNEL_DOMAIN_SUFFIX};

/// CNAME target domain for a tunnel id.
#[must_use]
pub fn tunnel_domain(tunnel_id: &str) -> String {
    format!("{tunnel_id}.{TUNNEL_DOMAIN_SUFFIX}")
}

/// Idempotent tunnel operations over a [`TunnelClient`].
pub struct TunnelService<'a> {
    client: &'a dyn TunnelClient,
}

impl<'a> TunnelService<'a> {
    /// Wrap a client.
    #[must_use]
    pub fn new(client: &'a dyn TunnelClient) -> Self {
        Self { client }
    }

    /// Resolve a tunnel by name, creating it if absent.
    ///
    /// Existing live tunnels with the name are adopted rather than
    /// duplicated, so any number of resources declaring the same tunnel
    /// name converge on one tunnel. A create that loses a race to another
    /// creator falls back to re-querying and adopting the winner.
    ///
    /// Returns the tunnel and whether this call created it.
    ///
    /// # Errors
    ///
    /// Returns the underlying API error, including a conflict error when a
    /// lost create race cannot be resolved by re-query.
    pub async fn ensure_tunnel(
        &self,
        account_id: &str,
        name: &str,
    ) -> Result<(Tunnel, bool), CloudflareError> {
        if let Some(existing) = self.client.find_tunnel_by_name(account_id, name).await? {
            debug!(tunnel_id = %existing.id, %name, "adopted existing tunnel");
            return Ok((existing, false));
        }

        match self.client.create_tunnel(account_id, name).await {
            Ok(tunnel) => {
                info!(tunnel_id = %tunnel.id, %name, "created tunnel");
                Ok((tunnel, true))
            }
            Err(err) if err.is_conflict() => {
                // Lost the create race; the winner's tunnel is ours to adopt.
                self.client
                    .find_tunnel_by_name(account_id, name)
                    .await?
                    .map(|t| (t, false))
                    .ok_or(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Sync the tunnel's remotely managed configuration.
    ///
    /// The desired rules are normalized so the configuration always ends in
    /// exactly one catch-all rule; a no-op sync (current config already
    /// equal) skips the write entirely.
    ///
    /// Returns whether a write was performed.
    ///
    /// # Errors
    ///
    /// Returns the underlying API error.
    pub async fn update_configuration(
        &self,
        account_id: &str,
        tunnel_id: &str,
        rules: &[ConfigIngressRule],
        fallback_service: Option<&str>,
    ) -> Result<bool, CloudflareError> {
        let desired = TunnelConfig {
            ingress: ensure_catch_all(rules, fallback_service),
        };

        let current = self
            .client
            .get_tunnel_configuration(account_id, tunnel_id)
            .await?;
        if current.as_ref() == Some(&desired) {
            debug!(%tunnel_id, "tunnel configuration already up to date");
            return Ok(false);
        }

        self.client
            .put_tunnel_configuration(account_id, tunnel_id, &desired)
            .await?;
        info!(%tunnel_id, rules = desired.ingress.len(), "synced tunnel configuration");
        Ok(true)
    }

    /// Whether the tunnel currently reports a connected, serving state.
    ///
    /// A missing tunnel or absent status field is "not healthy", never an
    /// error; only API failures propagate.
    ///
    /// # Errors
    ///
    /// Returns the underlying API error.
    pub async fn is_healthy(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<bool, CloudflareError> {
        let tunnel = self.client.get_tunnel(account_id, tunnel_id).await?;
        Ok(tunnel
            .and_then(|t| t.status)
            .is_some_and(|s| s == "healthy" || s == "active"))
    }

    /// Delete a tunnel, dropping its active connections first.
    ///
    /// Connection cleanup failures are logged and do not block the tunnel
    /// delete; Cloudflare drops connections server-side eventually. A
    /// tunnel that is already gone counts as success.
    ///
    /// # Errors
    ///
    /// Returns the API error from the tunnel delete itself.
    pub async fn delete_cascade(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<(), CloudflareError> {
        match self
            .client
            .list_tunnel_connections(account_id, tunnel_id)
            .await
        {
            Ok(connections) if !connections.is_empty() => {
                info!(%tunnel_id, count = connections.len(), "dropping tunnel connections");
                if let Err(err) = self
                    .client
                    .delete_tunnel_connections(account_id, tunnel_id)
                    .await
                {
                    warn!(%tunnel_id, error = %err, "failed to drop tunnel connections, deleting anyway");
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%tunnel_id, error = %err, "failed to list tunnel connections, deleting anyway");
            }
        }

        self.client.delete_tunnel(account_id, tunnel_id).await?;
        info!(%tunnel_id, "deleted tunnel");
        Ok(())
    }
}

/// Normalize ingress rules so exactly one catch-all rule terminates the
/// list.
///
/// Catch-all rules declared anywhere but last are dropped (they would
/// shadow every following rule); a missing terminal catch-all is appended
/// using `fallback_service` (default `http_status:404`).
#[must_use]
pub fn ensure_catch_all(
    rules: &[ConfigIngressRule],
    fallback_service: Option<&str>,
) -> Vec<ConfigIngressRule> {
    let mut out: Vec<ConfigIngressRule> = rules
        .iter()
        .filter(|r| !r.is_catch_all())
        .cloned()
        .collect();

    let service = rules
        .iter()
        .rev()
        .find(|r| r.is_catch_all())
        .map_or_else(
            || fallback_service.unwrap_or(CATCH_ALL_SERVICE).to_string(),
            |r| r.service.clone(),
        );
    out.push(ConfigIngressRule {
        hostname: None,
        path: None,
        service,
    });
    out
}

#[cfg(test)]
#[path = "tunnel_tests.rs"]
mod tunnel_tests;

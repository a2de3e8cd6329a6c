// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `CloudflareTunnel` reconciler.
//!
//! Converges a declared tunnel onto Cloudflare: validate credentials,
//! adopt-or-create the tunnel by name, replace its remotely managed ingress
//! configuration (catch-all guaranteed), and publish the resolved identity
//! (tunnel id, CNAME domain, account id) through status. Deletion is
//! finalizer-gated: connections and the tunnel are removed before the
//! resource is released.

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use crate::cloudflare::tunnel::{tunnel_domain, TunnelService};
use crate::cloudflare::types::ConfigIngressRule;
use crate::constants::{
    CONDITION_CONFIGURATION_SYNCED, CONDITION_CREDENTIALS_VALID, CONDITION_READY,
    CONDITION_TUNNEL_CREATED, ERROR_REQUEUE_DURATION_SECS, NOT_READY_REQUEUE_DURATION_SECS,
    READY_REQUEUE_DURATION_SECS, TUNNEL_FINALIZER,
};
use crate::context::Context;
use crate::crd::{CloudflareConfig, CloudflareTunnel, CloudflareTunnelStatus};
use crate::reconcilers::finalizers::{ensure_finalizer, handle_deletion, FinalizerCleanup};
use crate::reconcilers::status::{
    merge_conditions, new_condition, patch_status, ConditionBatch,
};
use crate::reconcilers::ReconcileError;

const CONTROLLER: &str = "cloudflaretunnel";

const READY_REQUIREMENTS: &[&str] = &[
    CONDITION_CREDENTIALS_VALID,
    CONDITION_TUNNEL_CREATED,
    CONDITION_CONFIGURATION_SYNCED,
];

/// Controller entry point.
///
/// # Errors
///
/// Returns a wrapped error for the controller's error policy; expected
/// failures (bad credentials, API pressure) are absorbed into conditions
/// and a requeue instead.
pub async fn reconcile(
    tunnel: Arc<CloudflareTunnel>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_inner(&tunnel, &ctx).await;
    let outcome = if result.is_ok() { "success" } else { "error" };
    ctx.metrics
        .observe_reconcile(CONTROLLER, outcome, start.elapsed().as_secs_f64());
    result.map_err(ReconcileError::from)
}

/// Requeue policy for reconcile errors.
#[must_use]
pub fn error_policy(
    tunnel: Arc<CloudflareTunnel>,
    err: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        name = %tunnel.name_any(),
        namespace = tunnel.namespace().unwrap_or_default(),
        error = %err,
        "tunnel reconcile failed"
    );
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

#[instrument(skip_all, fields(namespace, name = %tunnel.name_any()))]
async fn reconcile_inner(
    tunnel: &Arc<CloudflareTunnel>,
    ctx: &Context,
) -> anyhow::Result<Action> {
    let namespace = tunnel
        .namespace()
        .ok_or_else(|| anyhow::anyhow!("CloudflareTunnel is namespaced"))?;
    let name = tunnel.name_any();
    let api: Api<CloudflareTunnel> = Api::namespaced(ctx.client.clone(), &namespace);

    if tunnel.metadata.deletion_timestamp.is_some() {
        return Ok(handle_deletion(&api, tunnel, TUNNEL_FINALIZER, ctx).await?);
    }
    ensure_finalizer(&api, tunnel.as_ref(), TUNNEL_FINALIZER).await?;

    let generation = tunnel.metadata.generation;
    let mut batch = ConditionBatch::new(generation);
    let mut status = tunnel.status.clone().unwrap_or_default();
    status.observed_generation = generation;

    // Credentials
    let cf = match ctx
        .credentials
        .get_or_create(&ctx.client, &tunnel.spec.cloudflare, &namespace)
        .await
    {
        Ok(cf) => cf,
        Err(err) => {
            batch.set(
                CONDITION_CREDENTIALS_VALID,
                false,
                err.status_reason(),
                &err.to_string(),
            );
            return finish(&api, &name, tunnel, status, batch, false).await;
        }
    };
    let account_id = match crate::credentials::resolve_account_id(
        cf.as_ref(),
        &tunnel.spec.cloudflare,
    )
    .await
    {
        Ok(id) => id,
        Err(err) => {
            ctx.metrics
                .cloudflare_errors
                .with_label_values(&[err.status_reason()])
                .inc();
            batch.set(
                CONDITION_CREDENTIALS_VALID,
                false,
                err.status_reason(),
                &err.to_string(),
            );
            return finish(&api, &name, tunnel, status, batch, false).await;
        }
    };
    batch.set(
        CONDITION_CREDENTIALS_VALID,
        true,
        "CredentialsValidated",
        "Cloudflare API token verified",
    );
    status.account_id = Some(account_id.clone());

    // Tunnel
    let service = TunnelService::new(cf.as_ref());
    let remote = match service
        .ensure_tunnel(&account_id, &tunnel.spec.tunnel.name)
        .await
    {
        Ok((remote, created)) => {
            let reason = if created { "TunnelCreated" } else { "TunnelAdopted" };
            batch.set(
                CONDITION_TUNNEL_CREATED,
                true,
                reason,
                &format!("tunnel {} ({})", remote.name, remote.id),
            );
            remote
        }
        Err(err) => {
            on_cloudflare_error(ctx, tunnel, &err).await;
            batch.set(
                CONDITION_TUNNEL_CREATED,
                false,
                err.status_reason(),
                &err.to_string(),
            );
            return finish(&api, &name, tunnel, status, batch, false).await;
        }
    };
    status.tunnel_id = Some(remote.id.clone());
    status.tunnel_name = Some(remote.name.clone());
    status.tunnel_domain = Some(tunnel_domain(&remote.id));

    // Configuration
    let rules: Vec<ConfigIngressRule> = tunnel
        .spec
        .ingress
        .iter()
        .map(|r| ConfigIngressRule {
            hostname: r.hostname.clone(),
            path: r.path.clone(),
            service: r.service.clone(),
        })
        .collect();
    match service
        .update_configuration(
            &account_id,
            &remote.id,
            &rules,
            tunnel.spec.fallback_target.as_deref(),
        )
        .await
    {
        Ok(written) => {
            if written {
                status.last_sync_time = Some(crate::reconcilers::status::now_rfc3339());
            }
            batch.set(
                CONDITION_CONFIGURATION_SYNCED,
                true,
                "ConfigurationSynced",
                &format!("{} ingress rule(s) synced", rules.len()),
            );
        }
        Err(err) => {
            on_cloudflare_error(ctx, tunnel, &err).await;
            batch.set(
                CONDITION_CONFIGURATION_SYNCED,
                false,
                err.status_reason(),
                &err.to_string(),
            );
            return finish(&api, &name, tunnel, status, batch, false).await;
        }
    }

    // Health gates readiness but is no error: a tunnel with no connected
    // cloudflared yet is simply not ready.
    let healthy = match service.is_healthy(&account_id, &remote.id).await {
        Ok(healthy) => healthy,
        Err(err) => {
            warn!(tunnel_id = %remote.id, error = %err, "health check failed");
            false
        }
    };

    finish(&api, &name, tunnel, status, batch, healthy).await
}

/// Merge conditions, patch status when it changed, and pick the requeue.
async fn finish(
    api: &Api<CloudflareTunnel>,
    name: &str,
    tunnel: &CloudflareTunnel,
    mut status: CloudflareTunnelStatus,
    batch: ConditionBatch,
    healthy: bool,
) -> anyhow::Result<Action> {
    let existing = tunnel
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    let generation = tunnel.metadata.generation;
    let all_ok = batch.all_ok();
    let mut conditions = batch.finish(existing, READY_REQUIREMENTS);
    if all_ok && !healthy {
        let not_healthy = new_condition(
            CONDITION_READY,
            false,
            "TunnelNotHealthy",
            "tunnel has no healthy connection",
            generation,
        );
        conditions = merge_conditions(&conditions, &[not_healthy]);
    }
    let ready = conditions
        .iter()
        .any(|c| c.r#type == CONDITION_READY && c.status == "True");
    status.conditions = conditions;

    if tunnel.status.as_ref() != Some(&status) {
        patch_status(api, name, &status).await?;
    }

    if ready {
        info!(%name, "tunnel ready");
        Ok(Action::requeue(Duration::from_secs(
            READY_REQUEUE_DURATION_SECS,
        )))
    } else {
        Ok(Action::requeue(Duration::from_secs(
            NOT_READY_REQUEUE_DURATION_SECS,
        )))
    }
}

/// Count the error and drop cached credentials when the token was
/// rejected, so the next pass re-reads the secret.
async fn on_cloudflare_error(
    ctx: &Context,
    tunnel: &CloudflareTunnel,
    err: &crate::cloudflare::CloudflareError,
) {
    ctx.metrics
        .cloudflare_errors
        .with_label_values(&[err.status_reason()])
        .inc();
    if err.is_auth() {
        let config = &tunnel.spec.cloudflare;
        let namespace = config
            .secret_ref
            .namespace
            .clone()
            .or_else(|| tunnel.namespace())
            .unwrap_or_default();
        ctx.credentials
            .invalidate(&namespace, &config.secret_ref.name)
            .await;
    }
}

#[async_trait]
impl FinalizerCleanup for CloudflareTunnel {
    async fn cleanup(&self, ctx: &Context) -> anyhow::Result<()> {
        let Some(status) = self.status.as_ref() else {
            return Ok(());
        };
        let (Some(tunnel_id), Some(account_id)) =
            (status.tunnel_id.as_deref(), status.account_id.as_deref())
        else {
            return Ok(());
        };
        let namespace = self.namespace().unwrap_or_default();

        let cf = match ctx
            .credentials
            .get_or_create(&ctx.client, &self.spec.cloudflare, &namespace)
            .await
        {
            Ok(cf) => cf,
            Err(primary_err) => {
                // The primary secret is often deleted alongside the CR;
                // the fallback reference exists for exactly this window.
                let Some(fallback) = self.spec.fallback_credentials_ref.as_ref() else {
                    return Err(primary_err.into());
                };
                warn!(
                    name = %self.name_any(),
                    error = %primary_err,
                    "primary credentials unavailable, trying fallback"
                );
                let fallback_config = CloudflareConfig {
                    account_id: Some(account_id.to_string()),
                    account_name: None,
                    secret_ref: fallback.clone(),
                    secret_keys: self.spec.cloudflare.secret_keys.clone(),
                };
                ctx.credentials
                    .get_or_create(&ctx.client, &fallback_config, &namespace)
                    .await?
            }
        };

        let service = TunnelService::new(cf.as_ref());
        service.delete_cascade(account_id, tunnel_id).await?;
        info!(name = %self.name_any(), %tunnel_id, "tunnel cleanup complete");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tunnel_tests.rs"]
mod tunnel_tests;

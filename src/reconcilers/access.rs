// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `CloudflareAccessPolicy` reconciler.
//!
//! Resolves the Gateway API targets (each independently, partial failure
//! tolerated), ensures the Access application protecting the derived
//! domain, provisions service tokens into Kubernetes Secrets, and converges
//! the ordered policy rules. Status carries one ancestor entry per target
//! reference, mirroring `spec.targetRefs` 1:1.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use crate::cloudflare::access::AccessService;
use crate::cloudflare::client::AccessClient;
use crate::cloudflare::types::AccessApplicationParams;
use crate::constants::{
    ACCESS_POLICY_FINALIZER, CONDITION_APPLICATION_CREATED, CONDITION_CREDENTIALS_VALID,
    CONDITION_POLICIES_SYNCED, CONDITION_READY, CONDITION_SERVICE_TOKENS_READY,
    CONDITION_TARGETS_RESOLVED, ERROR_REQUEUE_DURATION_SECS, NOT_READY_REQUEUE_DURATION_SECS,
    READY_REQUEUE_DURATION_SECS, SERVICE_TOKEN_CLIENT_ID_KEY, SERVICE_TOKEN_CLIENT_SECRET_KEY,
};
use crate::context::{Context, CONTROLLER_NAME};
use crate::crd::{
    CloudflareAccessPolicy, CloudflareAccessPolicyStatus, PolicyAncestorStatus, ServiceTokenConfig,
};
use crate::reconcilers::finalizers::{ensure_finalizer, handle_deletion, FinalizerCleanup};
use crate::reconcilers::retry::retry_api_call;
use crate::reconcilers::status::{patch_status, ConditionBatch};
use crate::reconcilers::targets::{resolve_all, TargetResolution};
use crate::reconcilers::ReconcileError;
use crate::rules::validate_rules;

const CONTROLLER: &str = "cloudflareaccesspolicy";

const READY_REQUIREMENTS: &[&str] = &[
    CONDITION_CREDENTIALS_VALID,
    CONDITION_TARGETS_RESOLVED,
    CONDITION_APPLICATION_CREATED,
    CONDITION_SERVICE_TOKENS_READY,
    CONDITION_POLICIES_SYNCED,
];

/// Controller entry point.
///
/// # Errors
///
/// Returns a wrapped error for the controller's error policy.
pub async fn reconcile(
    policy: Arc<CloudflareAccessPolicy>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_inner(&policy, &ctx).await;
    let outcome = if result.is_ok() { "success" } else { "error" };
    ctx.metrics
        .observe_reconcile(CONTROLLER, outcome, start.elapsed().as_secs_f64());
    result.map_err(ReconcileError::from)
}

/// Requeue policy for reconcile errors.
#[must_use]
pub fn error_policy(
    policy: Arc<CloudflareAccessPolicy>,
    err: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        name = %policy.name_any(),
        namespace = policy.namespace().unwrap_or_default(),
        error = %err,
        "access policy reconcile failed"
    );
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

#[instrument(skip_all, fields(name = %policy.name_any()))]
async fn reconcile_inner(
    policy: &Arc<CloudflareAccessPolicy>,
    ctx: &Context,
) -> anyhow::Result<Action> {
    let namespace = policy
        .namespace()
        .ok_or_else(|| anyhow::anyhow!("CloudflareAccessPolicy is namespaced"))?;
    let name = policy.name_any();
    let api: Api<CloudflareAccessPolicy> = Api::namespaced(ctx.client.clone(), &namespace);

    if policy.metadata.deletion_timestamp.is_some() {
        return Ok(handle_deletion(&api, policy, ACCESS_POLICY_FINALIZER, ctx).await?);
    }
    ensure_finalizer(&api, policy.as_ref(), ACCESS_POLICY_FINALIZER).await?;

    let generation = policy.metadata.generation;
    let mut batch = ConditionBatch::new(generation);
    let mut status = policy.status.clone().unwrap_or_default();
    status.observed_generation = generation;

    // Credentials
    let Some(config) = policy.spec.cloudflare.as_ref() else {
        batch.set(
            CONDITION_CREDENTIALS_VALID,
            false,
            "MissingCredentials",
            "spec.cloudflare is required",
        );
        return finish(&api, &name, policy, status, batch).await;
    };
    let cf = match ctx
        .credentials
        .get_or_create(&ctx.client, config, &namespace)
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
            return finish(&api, &name, policy, status, batch).await;
        }
    };
    let account_id = match crate::credentials::resolve_account_id(cf.as_ref(), config).await {
        Ok(id) => id,
        Err(err) => {
            batch.set(
                CONDITION_CREDENTIALS_VALID,
                false,
                err.status_reason(),
                &err.to_string(),
            );
            return finish(&api, &name, policy, status, batch).await;
        }
    };
    batch.set(
        CONDITION_CREDENTIALS_VALID,
        true,
        "CredentialsValidated",
        "Cloudflare API token verified",
    );

    // Targets
    let resolutions = resolve_all(&ctx.client, &namespace, &policy.spec.target_refs).await;
    status.ancestors = resolutions.iter().map(|r| ancestor_status(r)).collect();
    let attached = resolutions.iter().filter(|r| r.resolved).count();
    status.attached_targets = i32::try_from(attached).unwrap_or(i32::MAX);
    if attached == resolutions.len() {
        batch.set(
            CONDITION_TARGETS_RESOLVED,
            true,
            "TargetsResolved",
            &format!("{attached} target(s) resolved"),
        );
    } else {
        batch.set(
            CONDITION_TARGETS_RESOLVED,
            false,
            "TargetResolutionFailed",
            &format!("{attached} of {} target(s) resolved", resolutions.len()),
        );
    }

    // Application
    let Some(domain) = application_domain(policy, &resolutions) else {
        batch.set(
            CONDITION_APPLICATION_CREATED,
            false,
            "NoProtectedDomain",
            "no application domain configured and no target hostname resolved",
        );
        return finish(&api, &name, policy, status, batch).await;
    };
    let service = AccessService::new(cf.as_ref());
    let params = application_params(policy, &name, &domain);
    let app = match service.ensure_application(&account_id, &params).await {
        Ok(app) => {
            batch.set(
                CONDITION_APPLICATION_CREATED,
                true,
                "ApplicationCreated",
                &format!("access application {} protects {domain}", app.id),
            );
            app
        }
        Err(err) => {
            ctx.metrics
                .cloudflare_errors
                .with_label_values(&[err.status_reason()])
                .inc();
            batch.set(
                CONDITION_APPLICATION_CREATED,
                false,
                err.status_reason(),
                &err.to_string(),
            );
            return finish(&api, &name, policy, status, batch).await;
        }
    };
    status.application_id = Some(app.id.clone());
    status.application_aud = app.aud.clone();

    // Service tokens
    let mut token_ids: BTreeMap<String, String> = BTreeMap::new();
    let mut token_errors: Vec<String> = Vec::new();
    for token_cfg in &policy.spec.service_tokens {
        match ensure_token(ctx, &service, &account_id, &namespace, token_cfg).await {
            Ok(token_id) => {
                token_ids.insert(token_cfg.name.clone(), token_id);
            }
            Err(err) => token_errors.push(format!("{}: {err}", token_cfg.name)),
        }
    }
    status.service_token_ids = token_ids;
    if token_errors.is_empty() {
        batch.set(
            CONDITION_SERVICE_TOKENS_READY,
            true,
            "ServiceTokensReady",
            &format!("{} service token(s) ready", policy.spec.service_tokens.len()),
        );
    } else {
        batch.set(
            CONDITION_SERVICE_TOKENS_READY,
            false,
            "ServiceTokenFailed",
            &token_errors.join("; "),
        );
    }

    // Policy rules
    match validate_rules(&policy.spec.policies) {
        Ok(()) => match service
            .sync_policies(&account_id, &app.id, &policy.spec.policies)
            .await
        {
            Ok(outcome) => {
                batch.set(
                    CONDITION_POLICIES_SYNCED,
                    true,
                    "PoliciesSynced",
                    &format!(
                        "{} created, {} updated, {} deleted",
                        outcome.created, outcome.updated, outcome.deleted
                    ),
                );
            }
            Err(err) => {
                ctx.metrics
                    .cloudflare_errors
                    .with_label_values(&[err.status_reason()])
                    .inc();
                batch.set(
                    CONDITION_POLICIES_SYNCED,
                    false,
                    err.status_reason(),
                    &err.to_string(),
                );
            }
        },
        Err(message) => {
            batch.set(CONDITION_POLICIES_SYNCED, false, "InvalidRules", &message);
        }
    }

    finish(&api, &name, policy, status, batch).await
}

async fn finish(
    api: &Api<CloudflareAccessPolicy>,
    name: &str,
    policy: &CloudflareAccessPolicy,
    mut status: CloudflareAccessPolicyStatus,
    batch: ConditionBatch,
) -> anyhow::Result<Action> {
    let existing = policy
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    status.conditions = batch.finish(existing, READY_REQUIREMENTS);
    let ready = status
        .conditions
        .iter()
        .any(|c| c.r#type == CONDITION_READY && c.status == "True");

    if policy.status.as_ref() != Some(&status) {
        patch_status(api, name, &status).await?;
    }

    if ready {
        Ok(Action::requeue(Duration::from_secs(
            READY_REQUEUE_DURATION_SECS,
        )))
    } else {
        Ok(Action::requeue(Duration::from_secs(
            NOT_READY_REQUEUE_DURATION_SECS,
        )))
    }
}

fn ancestor_status(resolution: &TargetResolution) -> PolicyAncestorStatus {
    PolicyAncestorStatus {
        ancestor_ref: resolution.reference.clone(),
        controller_name: CONTROLLER_NAME.to_string(),
        resolved: resolution.resolved,
        message: resolution.message.clone(),
    }
}

/// The domain the Access application protects: the explicit spec value, or
/// the first hostname of the first resolved target, plus the optional path.
fn application_domain(
    policy: &CloudflareAccessPolicy,
    resolutions: &[TargetResolution],
) -> Option<String> {
    let host = policy
        .spec
        .application
        .domain
        .clone()
        .or_else(|| {
            resolutions
                .iter()
                .filter(|r| r.resolved)
                .flat_map(|r| r.hostnames.iter())
                .next()
                .cloned()
        })?;
    let path = policy.spec.application.path.as_deref().unwrap_or_default();
    Some(format!("{host}{path}"))
}

fn application_params(
    policy: &CloudflareAccessPolicy,
    cr_name: &str,
    domain: &str,
) -> AccessApplicationParams {
    let app = &policy.spec.application;
    AccessApplicationParams {
        name: app.name.clone().unwrap_or_else(|| cr_name.to_string()),
        domain: domain.to_string(),
        r#type: "self_hosted".to_string(),
        session_duration: app.session_duration.clone(),
        app_launcher_visible: app.app_launcher_visible.resolve(true),
        skip_interstitial: app.skip_interstitial,
    }
}

/// Ensure one service token exists and its credentials are stored.
///
/// A token created here writes its client id and secret into the referenced
/// Secret; the secret material only exists in the creation response. An
/// adopted token requires the stored Secret to already exist, since the
/// secret cannot be re-read from Cloudflare.
async fn ensure_token(
    ctx: &Context,
    service: &AccessService<'_>,
    account_id: &str,
    namespace: &str,
    token_cfg: &ServiceTokenConfig,
) -> anyhow::Result<String> {
    let (token, created) = service
        .ensure_service_token(account_id, &token_cfg.name, token_cfg.duration.as_deref())
        .await?;

    let secret_ns = token_cfg
        .secret_ref
        .namespace
        .as_deref()
        .unwrap_or(namespace);
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), secret_ns);

    if created {
        let client_id = token
            .client_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("token creation response carried no client id"))?;
        let client_secret = token
            .client_secret
            .clone()
            .ok_or_else(|| anyhow::anyhow!("token creation response carried no client secret"))?;
        store_token_secret(
            &secrets,
            &token_cfg.secret_ref.name,
            &client_id,
            &client_secret,
        )
        .await?;
        info!(token = %token_cfg.name, secret = %token_cfg.secret_ref.name, "stored service token credentials");
    } else {
        let stored = secrets.get_opt(&token_cfg.secret_ref.name).await?;
        let complete = stored.as_ref().is_some_and(|s| {
            s.data.as_ref().is_some_and(|d| {
                d.contains_key(SERVICE_TOKEN_CLIENT_ID_KEY)
                    && d.contains_key(SERVICE_TOKEN_CLIENT_SECRET_KEY)
            })
        });
        if !complete {
            anyhow::bail!(
                "token exists in Cloudflare but secret {secret_ns}/{} is missing its \
                 credentials; delete the token to recreate it",
                token_cfg.secret_ref.name
            );
        }
    }

    Ok(token.id)
}

/// Create or overwrite the Secret holding service token credentials.
async fn store_token_secret(
    secrets: &Api<Secret>,
    name: &str,
    client_id: &str,
    client_secret: &str,
) -> anyhow::Result<()> {
    let body = json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": name },
        "type": "Opaque",
        "stringData": {
            SERVICE_TOKEN_CLIENT_ID_KEY: client_id,
            SERVICE_TOKEN_CLIENT_SECRET_KEY: client_secret,
        },
    });

    let secret: Secret = serde_json::from_value(body.clone())?;
    match secrets.create(&PostParams::default(), &secret).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => {
            retry_api_call("store_token_secret", || async {
                secrets
                    .patch(name, &PatchParams::default(), &Patch::Merge(&body))
                    .await
            })
            .await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl FinalizerCleanup for CloudflareAccessPolicy {
    async fn cleanup(&self, ctx: &Context) -> anyhow::Result<()> {
        let Some(status) = self.status.as_ref() else {
            return Ok(());
        };
        let Some(config) = self.spec.cloudflare.as_ref() else {
            // Nothing external can have been created without credentials.
            return Ok(());
        };
        let namespace = self.namespace().unwrap_or_default();

        let cf = ctx
            .credentials
            .get_or_create(&ctx.client, config, &namespace)
            .await?;
        let account_id = crate::credentials::resolve_account_id(cf.as_ref(), config).await?;

        for (token_name, token_id) in &status.service_token_ids {
            if let Err(err) = cf.delete_service_token(&account_id, token_id).await {
                warn!(token = %token_name, error = %err, "failed to delete service token");
            }
        }

        if let Some(app_id) = status.application_id.as_deref() {
            // Deleting the application removes its policies with it.
            cf.delete_application(&account_id, app_id).await?;
            info!(%app_id, "deleted access application");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "access_tests.rs"]
mod access_tests;

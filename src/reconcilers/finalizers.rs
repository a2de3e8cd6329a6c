// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management and two-phase deletion.
//!
//! Every cfgate CRD carries a finalizer so external Cloudflare state is
//! cleaned up before Kubernetes forgets the resource. Deletion runs in two
//! phases: first the resource-specific cleanup, then finalizer removal;
//! a cleanup failure leaves the finalizer in place and the deletion retries
//! on the next requeue.

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use kube::runtime::controller::Action;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::constants::ERROR_REQUEUE_DURATION_SECS;
use crate::context::Context;
use crate::reconcilers::retry::retry_api_call;

/// Cleanup of external state before a resource is released for deletion.
#[async_trait]
pub trait FinalizerCleanup {
    /// Remove the external state this resource owns.
    ///
    /// Must be idempotent: already-absent external entities are success.
    ///
    /// # Errors
    ///
    /// Returns an error when cleanup could not complete; the finalizer stays
    /// and deletion is retried.
    async fn cleanup(&self, ctx: &Context) -> anyhow::Result<()>;
}

/// Add the finalizer if the resource does not carry it yet.
///
/// Returns whether a patch was written.
///
/// # Errors
///
/// Returns the kube API error from the metadata patch.
pub async fn ensure_finalizer<K>(
    api: &Api<K>,
    resource: &K,
    finalizer: &str,
) -> Result<bool, kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if resource.finalizers().iter().any(|f| f == finalizer) {
        return Ok(false);
    }

    let name = resource.name_any();
    let mut finalizers: Vec<String> = resource.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    let body = json!({ "metadata": { "finalizers": finalizers } });
    retry_api_call("ensure_finalizer", || async {
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&body))
            .await
    })
    .await?;
    info!(%name, finalizer, "added finalizer");
    Ok(true)
}

/// Remove the finalizer, releasing the resource for deletion.
///
/// # Errors
///
/// Returns the kube API error from the metadata patch.
pub async fn remove_finalizer<K>(
    api: &Api<K>,
    resource: &K,
    finalizer: &str,
) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if !resource.finalizers().iter().any(|f| f == finalizer) {
        return Ok(());
    }

    let name = resource.name_any();
    let finalizers: Vec<String> = resource
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != finalizer)
        .cloned()
        .collect();
    let body = json!({ "metadata": { "finalizers": finalizers } });
    retry_api_call("remove_finalizer", || async {
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&body))
            .await
    })
    .await?;
    info!(%name, finalizer, "removed finalizer");
    Ok(())
}

/// Run the two-phase deletion for a resource with a deletion timestamp.
///
/// Phase one is the resource's [`FinalizerCleanup`]; only after it succeeds
/// is the finalizer removed in phase two. A cleanup failure requeues
/// without touching the finalizer.
///
/// # Errors
///
/// Returns the kube API error from the finalizer removal patch; cleanup
/// errors are absorbed into a requeue.
pub async fn handle_deletion<K>(
    api: &Api<K>,
    resource: &Arc<K>,
    finalizer: &str,
    ctx: &Context,
) -> Result<Action, kube::Error>
where
    K: Resource + FinalizerCleanup + Clone + DeserializeOwned + Debug,
{
    let name = resource.name_any();
    if !resource.finalizers().iter().any(|f| f == finalizer) {
        // Nothing to release; deletion proceeds without us.
        return Ok(Action::await_change());
    }

    if let Err(err) = resource.cleanup(ctx).await {
        error!(%name, error = %err, "cleanup failed, retrying");
        return Ok(Action::requeue(Duration::from_secs(
            ERROR_REQUEUE_DURATION_SECS,
        )));
    }

    remove_finalizer(api, resource.as_ref(), finalizer).await?;
    Ok(Action::await_change())
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;

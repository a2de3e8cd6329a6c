// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Gateway API target resolution.
//!
//! `CloudflareAccessPolicy.spec.targetRefs` entries name Gateway API
//! resources (Gateway, HTTPRoute, GRPCRoute). Each reference is resolved
//! independently through the dynamic API: one bad reference produces one
//! failed resolution entry and never poisons its siblings, and the output
//! list mirrors the input list in order and length.
//!
//! Cross-namespace references are only honored when a `ReferenceGrant` in
//! the target namespace admits them.

use kube::api::{Api, DynamicObject, ListParams};
use kube::core::gvk::GroupVersionKind;
use kube::core::ApiResource;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use crate::constants::{API_GROUP, KIND_CLOUDFLARE_ACCESS_POLICY};
use crate::crd::PolicyTargetReference;

/// Default API group for target references.
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// Outcome of resolving one target reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetResolution {
    /// The reference this entry resolves, unchanged.
    pub reference: PolicyTargetReference,
    /// Whether the target exists and is admissible.
    pub resolved: bool,
    /// Hostnames the target serves, for application domain derivation.
    pub hostnames: Vec<String>,
    /// Failure detail when unresolved.
    pub message: Option<String>,
}

impl TargetResolution {
    fn failed(reference: &PolicyTargetReference, message: String) -> Self {
        Self {
            reference: reference.clone(),
            resolved: false,
            hostnames: Vec::new(),
            message: Some(message),
        }
    }
}

/// Resolve every target reference of a policy.
///
/// `policy_namespace` is the namespace of the `CloudflareAccessPolicy`;
/// it is both the default target namespace and the `from` namespace for
/// `ReferenceGrant` checks. The result is 1:1 with `refs`, in order.
pub async fn resolve_all(
    client: &kube::Client,
    policy_namespace: &str,
    refs: &[PolicyTargetReference],
) -> Vec<TargetResolution> {
    let mut out = Vec::with_capacity(refs.len());
    for reference in refs {
        out.push(resolve_one(client, policy_namespace, reference).await);
    }
    out
}

async fn resolve_one(
    client: &kube::Client,
    policy_namespace: &str,
    reference: &PolicyTargetReference,
) -> TargetResolution {
    let group = reference.group.as_deref().unwrap_or(GATEWAY_API_GROUP);
    let target_namespace = reference
        .namespace
        .as_deref()
        .unwrap_or(policy_namespace);

    if target_namespace != policy_namespace {
        match grant_permits(client, policy_namespace, target_namespace, group, &reference.kind)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return TargetResolution::failed(
                    reference,
                    format!(
                        "no ReferenceGrant in namespace {target_namespace} permits \
                         {KIND_CLOUDFLARE_ACCESS_POLICY} from {policy_namespace}"
                    ),
                );
            }
            Err(err) => {
                return TargetResolution::failed(
                    reference,
                    format!("ReferenceGrant lookup failed: {err}"),
                );
            }
        }
    }

    let gvk = GroupVersionKind::gvk(group, "v1", &reference.kind);
    let resource = ApiResource::from_gvk(&gvk);
    let api: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), target_namespace, &resource);

    let object = match api.get_opt(&reference.name).await {
        Ok(Some(object)) => object,
        Ok(None) => {
            return TargetResolution::failed(
                reference,
                format!(
                    "{}/{} not found in namespace {target_namespace}",
                    reference.kind, reference.name
                ),
            );
        }
        Err(err) => {
            return TargetResolution::failed(reference, format!("target lookup failed: {err}"));
        }
    };

    let hostnames = extract_hostnames(&object, &reference.kind, reference.section_name.as_deref());
    debug!(
        kind = %reference.kind,
        name = %reference.name,
        namespace = %target_namespace,
        hostnames = hostnames.len(),
        "resolved policy target"
    );
    TargetResolution {
        reference: reference.clone(),
        resolved: true,
        hostnames,
        message: None,
    }
}

/// Hostnames a Gateway API object serves.
///
/// Gateways carry them per listener (optionally filtered by section name);
/// routes carry a flat `spec.hostnames` list.
fn extract_hostnames(
    object: &DynamicObject,
    kind: &str,
    section_name: Option<&str>,
) -> Vec<String> {
    let spec = &object.data["spec"];
    let mut hostnames = Vec::new();

    if kind == "Gateway" {
        if let Some(listeners) = spec["listeners"].as_array() {
            for listener in listeners {
                if let Some(section) = section_name {
                    if listener["name"].as_str() != Some(section) {
                        continue;
                    }
                }
                if let Some(hostname) = listener["hostname"].as_str() {
                    hostnames.push(hostname.to_string());
                }
            }
        }
    } else if let Some(list) = spec["hostnames"].as_array() {
        hostnames.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
    }

    // Listeners can repeat a hostname in any order; keep the first of each.
    let mut seen = HashSet::new();
    hostnames.retain(|h| seen.insert(h.clone()));
    hostnames
}

/// Whether a `ReferenceGrant` in the target namespace admits access
/// policies from the policy namespace to the given target kind.
async fn grant_permits(
    client: &kube::Client,
    from_namespace: &str,
    target_namespace: &str,
    target_group: &str,
    target_kind: &str,
) -> Result<bool, kube::Error> {
    let gvk = GroupVersionKind::gvk(GATEWAY_API_GROUP, "v1beta1", "ReferenceGrant");
    let resource = ApiResource::from_gvk(&gvk);
    let api: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), target_namespace, &resource);

    let grants = api.list(&ListParams::default()).await?;
    Ok(grants.items.iter().any(|grant| {
        let spec = &grant.data["spec"];
        let from_ok = spec["from"].as_array().is_some_and(|from| {
            from.iter().any(|f| {
                f["group"].as_str() == Some(API_GROUP)
                    && f["kind"].as_str() == Some(KIND_CLOUDFLARE_ACCESS_POLICY)
                    && f["namespace"].as_str() == Some(from_namespace)
            })
        });
        let to_ok = spec["to"].as_array().is_some_and(|to| {
            to.iter().any(|t| {
                t["group"].as_str().unwrap_or_default() == target_group
                    && t["kind"].as_str() == Some(target_kind)
            })
        });
        from_ok && to_ok
    }))
}

#[cfg(test)]
#[path = "targets_tests.rs"]
mod targets_tests;

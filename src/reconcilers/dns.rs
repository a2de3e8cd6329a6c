// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `CloudflareDNS` reconciler.
//!
//! Resolves the record target (a referenced tunnel's CNAME domain or an
//! external value), discovers zone ids, builds the desired record set with
//! `Toggle` defaulting, observes the remote records together with their
//! ownership markers, and applies the plan from the set-sync planner.
//! Every record gets an individual outcome in status; one failing record
//! never aborts the batch.
//!
//! Ownership is tracked per record as a companion TXT record and/or a
//! record comment. Records carrying someone else's marker are never
//! touched; unmarked records matching a desired hostname are adopted only
//! when their content is equivalent.

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use crate::cloudflare::client::{AccountClient, CloudflareApi, DnsClient};
use crate::cloudflare::error::CloudflareError;
use crate::cloudflare::types::{DnsRecord, DnsRecordParams};
use crate::constants::{
    CONDITION_CREDENTIALS_VALID, CONDITION_RECORDS_SYNCED, CONDITION_TARGET_RESOLVED,
    CONDITION_ZONES_DISCOVERED, DNS_FINALIZER, ERROR_REQUEUE_DURATION_SECS,
    KIND_CLOUDFLARE_DNS, NOT_READY_REQUEUE_DURATION_SECS, READY_REQUEUE_DURATION_SECS,
};
use crate::context::Context;
use crate::crd::{
    CloudflareConfig, CloudflareDNS, CloudflareDNSStatus, CloudflareTunnel, DNSRecordSyncStatus,
    LifecyclePolicy, RecordSyncState,
};
use crate::ownership::{classify, txt_companion_name, Ownership, OwnershipMarker};
use crate::reconcilers::finalizers::{ensure_finalizer, handle_deletion, FinalizerCleanup};
use crate::reconcilers::status::{patch_status, ConditionBatch};
use crate::reconcilers::sync::plan_sync;
use crate::reconcilers::ReconcileError;

const CONTROLLER: &str = "cloudflaredns";

const READY_REQUIREMENTS: &[&str] = &[
    CONDITION_CREDENTIALS_VALID,
    CONDITION_TARGET_RESOLVED,
    CONDITION_ZONES_DISCOVERED,
    CONDITION_RECORDS_SYNCED,
];

/// A record the spec wants to exist, fully defaulted.
#[derive(Clone, Debug, PartialEq, Eq)]
struct DesiredRecord {
    zone_id: String,
    hostname: String,
    r#type: String,
    content: String,
    proxied: bool,
    ttl: i32,
}

/// A remote record paired with its classified ownership.
#[derive(Clone, Debug)]
struct ObservedRecord {
    record: DnsRecord,
    ownership: Ownership,
}

/// Controller entry point.
///
/// # Errors
///
/// Returns a wrapped error for the controller's error policy.
pub async fn reconcile(
    dns: Arc<CloudflareDNS>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_inner(&dns, &ctx).await;
    let outcome = if result.is_ok() { "success" } else { "error" };
    ctx.metrics
        .observe_reconcile(CONTROLLER, outcome, start.elapsed().as_secs_f64());
    result.map_err(ReconcileError::from)
}

/// Requeue policy for reconcile errors.
#[must_use]
pub fn error_policy(dns: Arc<CloudflareDNS>, err: &ReconcileError, _ctx: Arc<Context>) -> Action {
    error!(
        name = %dns.name_any(),
        namespace = dns.namespace().unwrap_or_default(),
        error = %err,
        "dns reconcile failed"
    );
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

#[instrument(skip_all, fields(name = %dns.name_any()))]
async fn reconcile_inner(dns: &Arc<CloudflareDNS>, ctx: &Context) -> anyhow::Result<Action> {
    let namespace = dns
        .namespace()
        .ok_or_else(|| anyhow::anyhow!("CloudflareDNS is namespaced"))?;
    let name = dns.name_any();
    let api: Api<CloudflareDNS> = Api::namespaced(ctx.client.clone(), &namespace);

    if dns.metadata.deletion_timestamp.is_some() {
        return Ok(handle_deletion(&api, dns, DNS_FINALIZER, ctx).await?);
    }
    ensure_finalizer(&api, dns.as_ref(), DNS_FINALIZER).await?;

    let generation = dns.metadata.generation;
    let mut batch = ConditionBatch::new(generation);
    let mut status = dns.status.clone().unwrap_or_default();
    status.observed_generation = generation;

    // Target
    let (record_type, target) = match resolve_target(ctx, dns, &namespace).await {
        Ok(resolved) => {
            batch.set(
                CONDITION_TARGET_RESOLVED,
                true,
                "TargetResolved",
                &format!("records point at {}", resolved.1),
            );
            resolved
        }
        Err(TargetError { reason, message }) => {
            batch.set(CONDITION_TARGET_RESOLVED, false, reason, &message);
            return finish(&api, &name, dns, status, batch).await;
        }
    };
    status.resolved_target = Some(target.clone());

    // Credentials
    let cf = match resolve_credentials(ctx, dns, &namespace).await {
        Ok(cf) => cf,
        Err(err) => {
            batch.set(CONDITION_CREDENTIALS_VALID, false, err.0, &err.1);
            return finish(&api, &name, dns, status, batch).await;
        }
    };
    batch.set(
        CONDITION_CREDENTIALS_VALID,
        true,
        "CredentialsValidated",
        "Cloudflare API token verified",
    );

    // Zones
    let zones = match discover_zones(cf.as_ref(), dns).await {
        Ok(zones) => {
            batch.set(
                CONDITION_ZONES_DISCOVERED,
                true,
                "ZonesDiscovered",
                &format!("{} zone(s) resolved", zones.len()),
            );
            zones
        }
        Err(err) => {
            ctx.metrics
                .cloudflare_errors
                .with_label_values(&[err.status_reason()])
                .inc();
            batch.set(
                CONDITION_ZONES_DISCOVERED,
                false,
                err.status_reason(),
                &err.to_string(),
            );
            return finish(&api, &name, dns, status, batch).await;
        }
    };

    // Desired set
    let marker = owner_marker(dns, &namespace, &name);
    let mut record_statuses: Vec<DNSRecordSyncStatus> = Vec::new();
    let mut desired: Vec<DesiredRecord> = Vec::new();
    for hostname in &dns.spec.hostnames {
        let Some(zone) = zone_for_hostname(&zones, &hostname.hostname) else {
            record_statuses.push(DNSRecordSyncStatus {
                hostname: hostname.hostname.clone(),
                r#type: record_type.clone(),
                target: target.clone(),
                proxied: false,
                ttl: None,
                status: RecordSyncState::Failed,
                record_id: None,
                zone_id: None,
                error: Some("hostname does not belong to any configured zone".to_string()),
            });
            continue;
        };
        let proxied = resolve_proxied(dns, zone, hostname.proxied);
        desired.push(DesiredRecord {
            zone_id: zone.id.clone(),
            hostname: hostname.hostname.clone(),
            r#type: record_type.clone(),
            content: hostname.target.clone().unwrap_or_else(|| target.clone()),
            proxied,
            ttl: hostname.ttl.unwrap_or(dns.spec.defaults.ttl),
        });
    }

    // Observe and apply per zone, so one zone's API trouble does not hide
    // results from the others.
    let mut any_changed = false;
    for zone in &zones {
        let zone_desired: Vec<DesiredRecord> = desired
            .iter()
            .filter(|d| d.zone_id == zone.id)
            .cloned()
            .collect();
        if zone_desired.is_empty() && dns.spec.policy != LifecyclePolicy::Sync {
            continue;
        }
        match sync_zone(ctx, cf.as_ref(), dns, zone, zone_desired, &marker).await {
            Ok((mut statuses, zone_changed)) => {
                any_changed |= zone_changed;
                record_statuses.append(&mut statuses);
            }
            Err(err) => {
                any_changed = true;
                ctx.metrics
                    .cloudflare_errors
                    .with_label_values(&[err.status_reason()])
                    .inc();
                warn!(zone = %zone.name, error = %err, "zone sync failed");
                for d in desired.iter().filter(|d| d.zone_id == zone.id) {
                    record_statuses.push(failed_status(d, &err.to_string()));
                }
            }
        }
    }

    let synced = record_statuses
        .iter()
        .filter(|r| r.status == RecordSyncState::Synced)
        .count();
    let failed = record_statuses
        .iter()
        .filter(|r| r.status == RecordSyncState::Failed)
        .count();
    let pending = record_statuses.len() - synced - failed;
    status.synced_records = i32::try_from(synced).unwrap_or(i32::MAX);
    status.failed_records = i32::try_from(failed).unwrap_or(i32::MAX);
    status.pending_records = i32::try_from(pending).unwrap_or(i32::MAX);
    status.records = record_statuses;
    // A steady-state pass keeps the previous timestamp, so the computed
    // status stays equal to the stored one and no patch is issued.
    if any_changed || status.last_sync_time.is_none() {
        status.last_sync_time = Some(crate::reconcilers::status::now_rfc3339());
    }

    if failed == 0 {
        batch.set(
            CONDITION_RECORDS_SYNCED,
            true,
            "RecordsSynced",
            &format!("{synced} record(s) synced"),
        );
    } else {
        batch.set(
            CONDITION_RECORDS_SYNCED,
            false,
            "RecordSyncFailed",
            &format!("{failed} of {} record(s) failed", synced + failed + pending),
        );
    }

    finish(&api, &name, dns, status, batch).await
}

async fn finish(
    api: &Api<CloudflareDNS>,
    name: &str,
    dns: &CloudflareDNS,
    mut status: CloudflareDNSStatus,
    batch: ConditionBatch,
) -> anyhow::Result<Action> {
    let existing = dns
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    status.conditions = batch.finish(existing, READY_REQUIREMENTS);
    let ready = status
        .conditions
        .iter()
        .any(|c| c.r#type == crate::constants::CONDITION_READY && c.status == "True");

    if dns.status.as_ref() != Some(&status) {
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

struct TargetError {
    reason: &'static str,
    message: String,
}

/// Resolve the record type and content the managed records point at.
async fn resolve_target(
    ctx: &Context,
    dns: &CloudflareDNS,
    namespace: &str,
) -> Result<(String, String), TargetError> {
    match (&dns.spec.tunnel_ref, &dns.spec.external_target) {
        (Some(_), Some(_)) => Err(TargetError {
            reason: "InvalidSpec",
            message: "tunnelRef and externalTarget are mutually exclusive".to_string(),
        }),
        (None, None) => Err(TargetError {
            reason: "InvalidSpec",
            message: "one of tunnelRef or externalTarget is required".to_string(),
        }),
        (None, Some(external)) => Ok((external.r#type.as_str().to_string(), external.value.clone())),
        (Some(tunnel_ref), None) => {
            let tunnel_ns = tunnel_ref.namespace.as_deref().unwrap_or(namespace);
            let tunnels: Api<CloudflareTunnel> =
                Api::namespaced(ctx.client.clone(), tunnel_ns);
            let tunnel = tunnels
                .get_opt(&tunnel_ref.name)
                .await
                .map_err(|e| TargetError {
                    reason: "TunnelLookupFailed",
                    message: e.to_string(),
                })?
                .ok_or_else(|| TargetError {
                    reason: "TunnelNotFound",
                    message: format!(
                        "CloudflareTunnel {tunnel_ns}/{} not found",
                        tunnel_ref.name
                    ),
                })?;
            let domain = tunnel
                .status
                .as_ref()
                .and_then(|s| s.tunnel_domain.clone())
                .ok_or_else(|| TargetError {
                    reason: "TunnelNotReady",
                    message: format!(
                        "CloudflareTunnel {tunnel_ns}/{} has no tunnel domain yet",
                        tunnel_ref.name
                    ),
                })?;
            Ok(("CNAME".to_string(), domain))
        }
    }
}

/// Pick the credentials for this resource: explicit config wins, a
/// referenced tunnel's config is the fallback.
async fn resolve_credentials(
    ctx: &Context,
    dns: &CloudflareDNS,
    namespace: &str,
) -> Result<Arc<dyn CloudflareApi>, (&'static str, String)> {
    let config = if let Some(config) = dns.spec.cloudflare.clone() {
        config
    } else if let Some(tunnel_ref) = dns.spec.tunnel_ref.as_ref() {
        let tunnel_ns = tunnel_ref.namespace.as_deref().unwrap_or(namespace);
        let tunnels: Api<CloudflareTunnel> = Api::namespaced(ctx.client.clone(), tunnel_ns);
        let tunnel = tunnels
            .get_opt(&tunnel_ref.name)
            .await
            .map_err(|e| ("TunnelLookupFailed", e.to_string()))?
            .ok_or_else(|| {
                (
                    "TunnelNotFound",
                    format!("CloudflareTunnel {tunnel_ns}/{} not found", tunnel_ref.name),
                )
            })?;
        let mut inherited = tunnel.spec.cloudflare.clone();
        if inherited.secret_ref.namespace.is_none() {
            // The secret reference was relative to the tunnel's namespace.
            inherited.secret_ref.namespace = Some(tunnel_ns.to_string());
        }
        inherited
    } else {
        return Err((
            "MissingCredentials",
            "spec.cloudflare is required with externalTarget".to_string(),
        ));
    };

    ctx.credentials
        .get_or_create(&ctx.client, &config, namespace)
        .await
        .map_err(|e| (e.status_reason(), e.to_string()))
}

/// A configured zone with its resolved id.
#[derive(Clone, Debug)]
struct ResolvedZone {
    id: String,
    name: String,
    proxied: crate::crd::Toggle,
}

async fn discover_zones(
    cf: &dyn CloudflareApi,
    dns: &CloudflareDNS,
) -> Result<Vec<ResolvedZone>, CloudflareError> {
    let mut zones = Vec::with_capacity(dns.spec.zones.len());
    for zone in &dns.spec.zones {
        let id = match zone.id.clone() {
            Some(id) => id,
            None => {
                cf.find_zone_by_name(&zone.name)
                    .await?
                    .ok_or_else(|| CloudflareError::Configuration {
                        message: format!("zone {} not found in this account", zone.name),
                    })?
                    .id
            }
        };
        zones.push(ResolvedZone {
            id,
            name: zone.name.clone(),
            proxied: zone.proxied,
        });
    }
    Ok(zones)
}

/// The zone a hostname belongs to: the longest zone name that is a suffix
/// of the hostname.
fn zone_for_hostname<'a>(zones: &'a [ResolvedZone], hostname: &str) -> Option<&'a ResolvedZone> {
    zones
        .iter()
        .filter(|z| hostname == z.name || hostname.ends_with(&format!(".{}", z.name)))
        .max_by_key(|z| z.name.len())
}

fn resolve_proxied(
    dns: &CloudflareDNS,
    zone: &ResolvedZone,
    per_hostname: crate::crd::Toggle,
) -> bool {
    per_hostname.resolve(zone.proxied.resolve(dns.spec.defaults.proxied))
}

fn owner_marker(dns: &CloudflareDNS, namespace: &str, name: &str) -> OwnershipMarker {
    let owner_id = dns
        .spec
        .ownership
        .owner_id
        .clone()
        .unwrap_or_else(|| format!("{namespace}/{name}"));
    OwnershipMarker::new(&owner_id, KIND_CLOUDFLARE_DNS, namespace, name)
}

fn txt_enabled(dns: &CloudflareDNS) -> bool {
    dns.spec.ownership.txt_record.enabled.resolve(true)
}

fn txt_prefix(dns: &CloudflareDNS) -> Option<&str> {
    dns.spec.ownership.txt_record.prefix.as_deref()
}

fn comment_enabled(dns: &CloudflareDNS) -> bool {
    dns.spec.ownership.comment.enabled
}

fn failed_status(d: &DesiredRecord, error: &str) -> DNSRecordSyncStatus {
    DNSRecordSyncStatus {
        hostname: d.hostname.clone(),
        r#type: d.r#type.clone(),
        target: d.content.clone(),
        proxied: d.proxied,
        ttl: Some(d.ttl),
        status: RecordSyncState::Failed,
        record_id: None,
        zone_id: Some(d.zone_id.clone()),
        error: Some(error.to_string()),
    }
}

fn synced_status(d: &DesiredRecord, record_id: &str) -> DNSRecordSyncStatus {
    DNSRecordSyncStatus {
        hostname: d.hostname.clone(),
        r#type: d.r#type.clone(),
        target: d.content.clone(),
        proxied: d.proxied,
        ttl: Some(d.ttl),
        status: RecordSyncState::Synced,
        record_id: Some(record_id.to_string()),
        zone_id: Some(d.zone_id.clone()),
        error: None,
    }
}

fn record_params(dns: &CloudflareDNS, d: &DesiredRecord, marker: &OwnershipMarker) -> DnsRecordParams {
    DnsRecordParams {
        r#type: d.r#type.clone(),
        name: d.hostname.clone(),
        content: d.content.clone(),
        proxied: Some(d.proxied),
        ttl: d.ttl,
        comment: comment_enabled(dns).then(|| marker.format()),
    }
}

/// Observe one zone's managed records (with ownership) and apply the plan.
///
/// Every desired record gets a status entry, including converged ones and
/// ones blocked by a foreign owner. The flag reports whether any write was
/// planned, so the caller can tell a steady-state pass from a converging
/// one.
async fn sync_zone(
    ctx: &Context,
    cf: &dyn CloudflareApi,
    dns: &CloudflareDNS,
    zone: &ResolvedZone,
    desired: Vec<DesiredRecord>,
    marker: &OwnershipMarker,
) -> Result<(Vec<DNSRecordSyncStatus>, bool), CloudflareError> {
    let all_records = cf.list_records(&zone.id, None).await?;
    let observed = observe_records(dns, &all_records, marker);

    let plan = plan_sync(
        desired,
        observed,
        dns.spec.policy,
        |d: &DesiredRecord| (d.hostname.clone(), d.r#type.clone()),
        |o: &ObservedRecord| (o.record.name.clone(), o.record.r#type.clone()),
        |d, o| {
            o.record.content != d.content
                || o.record.proxied.unwrap_or(false) != d.proxied
                || o.record.ttl.unwrap_or(1) != d.ttl
        },
        |o| o.ownership.clone(),
    );
    let changed = !plan.is_noop();

    let mut statuses = Vec::new();

    for d in plan.creates {
        let result = create_with_adoption(cf, dns, zone, &d, marker).await;
        match result {
            Ok(record_id) => {
                ensure_companion(cf, dns, zone, &d.hostname, marker, &all_records).await;
                statuses.push(synced_status(&d, &record_id));
            }
            Err(err) => {
                ctx.metrics
                    .cloudflare_errors
                    .with_label_values(&[err.status_reason()])
                    .inc();
                statuses.push(failed_status(&d, &err.to_string()));
            }
        }
    }

    for (o, d) in plan.updates {
        match cf
            .update_record(&zone.id, &o.record.id, &record_params(dns, &d, marker))
            .await
        {
            Ok(record) => {
                ensure_companion(cf, dns, zone, &d.hostname, marker, &all_records).await;
                statuses.push(synced_status(&d, &record.id));
            }
            Err(err) => {
                ctx.metrics
                    .cloudflare_errors
                    .with_label_values(&[err.status_reason()])
                    .inc();
                statuses.push(failed_status(&d, &err.to_string()));
            }
        }
    }

    for (o, d) in plan.adoptions {
        if o.record.r#type == d.r#type && o.record.content == d.content {
            // Equivalent unmanaged record: adopt it by attaching our marker.
            match cf
                .update_record(&zone.id, &o.record.id, &record_params(dns, &d, marker))
                .await
            {
                Ok(record) => {
                    ensure_companion(cf, dns, zone, &d.hostname, marker, &all_records).await;
                    info!(hostname = %d.hostname, "adopted existing record");
                    statuses.push(synced_status(&d, &record.id));
                }
                Err(err) => statuses.push(failed_status(&d, &err.to_string())),
            }
        } else {
            statuses.push(failed_status(
                &d,
                "hostname occupied by an unmanaged record with different content",
            ));
        }
    }

    for (o, d) in plan.unchanged {
        statuses.push(synced_status(&d, &o.record.id));
    }

    for (o, d) in plan.blocked {
        let error = match &o.ownership {
            Ownership::Foreign { owner_id } => {
                format!("hostname is owned by {owner_id}")
            }
            _ => "hostname occupied by an unmanaged record; the policy forbids adoption"
                .to_string(),
        };
        statuses.push(failed_status(&d, &error));
    }

    for o in plan.deletes {
        if let Err(err) = cf.delete_record(&zone.id, &o.record.id).await {
            warn!(record = %o.record.name, error = %err, "failed to delete stale record");
            continue;
        }
        delete_companion(cf, dns, zone, &o.record.name, &all_records).await;
        info!(record = %o.record.name, "deleted stale record");
    }

    Ok((statuses, changed))
}

/// Build the observed set for planning: managed-name records of the
/// managed type classes, each classified by TXT companion and/or comment.
fn observe_records(
    dns: &CloudflareDNS,
    all_records: &[DnsRecord],
    marker: &OwnershipMarker,
) -> Vec<ObservedRecord> {
    // Companion TXT content indexed by the hostname it tracks.
    let mut companions: BTreeMap<String, String> = BTreeMap::new();
    if txt_enabled(dns) {
        for record in all_records.iter().filter(|r| r.r#type == "TXT") {
            if let Some(hostname) =
                crate::ownership::txt_companion_target(&record.name, txt_prefix(dns))
            {
                companions.insert(hostname.to_string(), record.content.clone());
            }
        }
    }

    all_records
        .iter()
        .filter(|r| matches!(r.r#type.as_str(), "CNAME" | "A" | "AAAA"))
        .map(|record| {
            let txt_class = companions
                .get(&record.name)
                .map(|content| classify(Some(content), marker));
            let comment_class = record
                .comment
                .as_deref()
                .filter(|_| comment_enabled(dns))
                .map(|comment| classify(Some(comment), marker));
            // A marker in either channel decides; TXT wins disagreement.
            let ownership = match (txt_class, comment_class) {
                (Some(t), _) if t != Ownership::Unmarked => t,
                (_, Some(c)) if c != Ownership::Unmarked => c,
                _ => Ownership::Unmarked,
            };
            ObservedRecord {
                record: record.clone(),
                ownership,
            }
        })
        .collect()
}

/// Create a record, resolving a duplicate-entity race by re-fetching and
/// adopting an equivalent or unmarked winner.
async fn create_with_adoption(
    cf: &dyn CloudflareApi,
    dns: &CloudflareDNS,
    zone: &ResolvedZone,
    d: &DesiredRecord,
    marker: &OwnershipMarker,
) -> Result<String, CloudflareError> {
    let params = record_params(dns, d, marker);
    match cf.create_record(&zone.id, &params).await {
        Ok(record) => Ok(record.id),
        Err(err) if err.is_conflict() => {
            let existing = cf.list_records(&zone.id, Some(d.hostname.as_str())).await?;
            let winner = existing
                .into_iter()
                .find(|r| r.name == d.hostname && r.r#type == d.r#type)
                .ok_or(err)?;
            let ownership = winner_ownership(cf, dns, zone, &winner, marker).await?;
            if matches!(ownership, Ownership::Foreign { .. }) {
                return Err(CloudflareError::Configuration {
                    message: format!(
                        "record {} is owned by another installation",
                        d.hostname
                    ),
                });
            }
            if winner.content != d.content {
                return Err(CloudflareError::Configuration {
                    message: format!(
                        "record {} already exists with different content",
                        d.hostname
                    ),
                });
            }
            // Equivalent: adopt by rewriting with our marker attached.
            let adopted = cf.update_record(&zone.id, &winner.id, &params).await?;
            info!(hostname = %d.hostname, "adopted record after create race");
            Ok(adopted.id)
        }
        Err(err) => Err(err),
    }
}

/// Ownership of a record discovered after a lost create race.
///
/// The TXT companion channel is authoritative, as in [`observe_records`];
/// the comment is the fallback and is read even when comment tracking is
/// off, so a marker left by another installation is never adopted over.
async fn winner_ownership(
    cf: &dyn CloudflareApi,
    dns: &CloudflareDNS,
    zone: &ResolvedZone,
    winner: &DnsRecord,
    marker: &OwnershipMarker,
) -> Result<Ownership, CloudflareError> {
    if txt_enabled(dns) {
        let companion_name = txt_companion_name(&winner.name, txt_prefix(dns));
        let companions = cf
            .list_records(&zone.id, Some(companion_name.as_str()))
            .await?;
        if let Some(companion) = companions
            .iter()
            .find(|r| r.r#type == "TXT" && r.name == companion_name)
        {
            let ownership = classify(Some(companion.content.as_str()), marker);
            if ownership != Ownership::Unmarked {
                return Ok(ownership);
            }
        }
    }
    Ok(classify(winner.comment.as_deref(), marker))
}

/// Upsert the companion TXT ownership record for a hostname.
async fn ensure_companion(
    cf: &dyn CloudflareApi,
    dns: &CloudflareDNS,
    zone: &ResolvedZone,
    hostname: &str,
    marker: &OwnershipMarker,
    all_records: &[DnsRecord],
) {
    if !txt_enabled(dns) {
        return;
    }
    let companion_name = txt_companion_name(hostname, txt_prefix(dns));
    let params = DnsRecordParams {
        r#type: "TXT".to_string(),
        name: companion_name.clone(),
        content: marker.format(),
        proxied: None,
        ttl: dns.spec.defaults.ttl,
        comment: None,
    };
    let existing = all_records
        .iter()
        .find(|r| r.r#type == "TXT" && r.name == companion_name);
    let result = match existing {
        Some(record) if record.content == params.content => return,
        Some(record) => cf.update_record(&zone.id, &record.id, &params).await,
        None => cf.create_record(&zone.id, &params).await,
    };
    if let Err(err) = result {
        warn!(%companion_name, error = %err, "failed to write ownership TXT record");
    }
}

/// Delete the companion TXT record of a removed hostname.
async fn delete_companion(
    cf: &dyn CloudflareApi,
    dns: &CloudflareDNS,
    zone: &ResolvedZone,
    hostname: &str,
    all_records: &[DnsRecord],
) {
    if !txt_enabled(dns) {
        return;
    }
    let companion_name = txt_companion_name(hostname, txt_prefix(dns));
    if let Some(record) = all_records
        .iter()
        .find(|r| r.r#type == "TXT" && r.name == companion_name)
    {
        if let Err(err) = cf.delete_record(&zone.id, &record.id).await {
            warn!(%companion_name, error = %err, "failed to delete ownership TXT record");
        }
    }
}

#[async_trait]
impl FinalizerCleanup for CloudflareDNS {
    async fn cleanup(&self, ctx: &Context) -> anyhow::Result<()> {
        if !self
            .spec
            .cleanup_policy
            .delete_on_resource_removal
            .resolve(true)
            || !self.spec.policy.allows_delete()
        {
            return Ok(());
        }
        let namespace = self.namespace().unwrap_or_default();
        let name = self.name_any();
        let only_managed = self.spec.cleanup_policy.only_managed.resolve(true);
        let marker = owner_marker(self, &namespace, &name);

        let cf = cleanup_credentials(ctx, self, &namespace).await?;

        let zones = discover_zones(cf.as_ref(), self).await?;
        for zone in &zones {
            let all_records = cf.list_records(&zone.id, None).await?;
            for observed in observe_records(self, &all_records, &marker) {
                let managed_name = self
                    .spec
                    .hostnames
                    .iter()
                    .any(|h| h.hostname == observed.record.name);
                if !managed_name {
                    continue;
                }
                let deletable = match observed.ownership {
                    Ownership::Owned => true,
                    Ownership::Unmarked => !only_managed,
                    Ownership::Foreign { .. } => false,
                };
                if !deletable {
                    continue;
                }
                cf.delete_record(&zone.id, &observed.record.id).await?;
                delete_companion(cf.as_ref(), self, zone, &observed.record.name, &all_records)
                    .await;
                info!(record = %observed.record.name, "deleted record on resource removal");
            }
        }
        Ok(())
    }
}

/// Credentials for deletion: explicit, then tunnel-inherited, then the
/// fallback reference.
async fn cleanup_credentials(
    ctx: &Context,
    dns: &CloudflareDNS,
    namespace: &str,
) -> anyhow::Result<Arc<dyn CloudflareApi>> {
    match resolve_credentials(ctx, dns, namespace).await {
        Ok(cf) => Ok(cf),
        Err((reason, message)) => {
            let Some(fallback) = dns.spec.fallback_credentials_ref.as_ref() else {
                return Err(anyhow::anyhow!("{reason}: {message}"));
            };
            warn!(reason, %message, "primary credentials unavailable, trying fallback");
            let config = CloudflareConfig {
                account_id: None,
                account_name: None,
                secret_ref: fallback.clone(),
                secret_keys: None,
            };
            Ok(ctx
                .credentials
                .get_or_create(&ctx.client, &config, namespace)
                .await?)
        }
    }
}

#[cfg(test)]
#[path = "dns_tests.rs"]
mod dns_tests;

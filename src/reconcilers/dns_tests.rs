// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use super::*;
use crate::cloudflare::testing::FakeCloudflare;
use crate::crd::{
    CloudflareDNSSpec, DNSHostname, DNSZoneConfig, ExternalTarget, RecordType, Toggle,
};
use crate::metrics::Metrics;

fn dummy_context() -> Context {
    let config = kube::Config::new("http://127.0.0.1:9".parse().unwrap());
    let client = kube::Client::try_from(config).unwrap();
    Context::new(client, Arc::new(Metrics::new().unwrap()))
}

fn dns_resource(hostnames: Vec<DNSHostname>, policy: LifecyclePolicy) -> CloudflareDNS {
    let spec = CloudflareDNSSpec {
        tunnel_ref: None,
        external_target: Some(ExternalTarget {
            r#type: RecordType::CNAME,
            value: "tun-1.cfargotunnel.com".to_string(),
        }),
        zones: vec![DNSZoneConfig {
            name: "example.com".to_string(),
            id: Some("z1".to_string()),
            proxied: Toggle::Unset,
        }],
        policy,
        hostnames,
        ..CloudflareDNSSpec::default()
    };
    let mut resource = CloudflareDNS::new("web", spec);
    resource.metadata.namespace = Some("default".to_string());
    resource
}

fn hostname(name: &str) -> DNSHostname {
    DNSHostname {
        hostname: name.to_string(),
        target: None,
        proxied: Toggle::Unset,
        ttl: None,
    }
}

fn zone(id: &str, name: &str) -> ResolvedZone {
    ResolvedZone {
        id: id.to_string(),
        name: name.to_string(),
        proxied: Toggle::Unset,
    }
}

fn desired(hostname: &str, content: &str) -> DesiredRecord {
    DesiredRecord {
        zone_id: "z1".to_string(),
        hostname: hostname.to_string(),
        r#type: "CNAME".to_string(),
        content: content.to_string(),
        proxied: true,
        ttl: 1,
    }
}

fn marker() -> OwnershipMarker {
    OwnershipMarker::new("default/web", KIND_CLOUDFLARE_DNS, "default", "web")
}

fn cname(id: &str, name: &str, content: &str, comment: Option<&str>) -> DnsRecord {
    DnsRecord {
        id: id.to_string(),
        r#type: "CNAME".to_string(),
        name: name.to_string(),
        content: content.to_string(),
        proxied: Some(true),
        ttl: Some(1),
        comment: comment.map(str::to_string),
    }
}

fn txt(id: &str, name: &str, content: &str) -> DnsRecord {
    DnsRecord {
        id: id.to_string(),
        r#type: "TXT".to_string(),
        name: name.to_string(),
        content: content.to_string(),
        proxied: None,
        ttl: Some(1),
        comment: None,
    }
}

#[test]
fn zone_selection_takes_the_longest_matching_suffix() {
    let zones = vec![zone("z1", "example.com"), zone("z2", "internal.example.com")];
    assert_eq!(
        zone_for_hostname(&zones, "app.internal.example.com").unwrap().id,
        "z2"
    );
    assert_eq!(zone_for_hostname(&zones, "app.example.com").unwrap().id, "z1");
    assert_eq!(zone_for_hostname(&zones, "example.com").unwrap().id, "z1");
    // A name that merely contains the zone is not a suffix match.
    assert!(zone_for_hostname(&zones, "example.com.evil.org").is_none());
    assert!(zone_for_hostname(&zones, "myexample.com").is_none());
}

#[test]
fn proxied_resolution_walks_hostname_then_zone_then_defaults() {
    let dns = dns_resource(vec![], LifecyclePolicy::Sync);

    // Everything unset: the defaults (proxied: true) apply.
    assert!(resolve_proxied(&dns, &zone("z1", "example.com"), Toggle::Unset));

    // Zone-level setting overrides the defaults.
    let mut off_zone = zone("z1", "example.com");
    off_zone.proxied = Toggle::False;
    assert!(!resolve_proxied(&dns, &off_zone, Toggle::Unset));

    // Hostname-level setting wins over both.
    assert!(resolve_proxied(&dns, &off_zone, Toggle::True));
}

#[test]
fn txt_companion_markers_win_over_comments() {
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);
    let mine = marker();
    let foreign =
        OwnershipMarker::new("prod/other", KIND_CLOUDFLARE_DNS, "prod", "other").format();

    let records = vec![
        cname("r1", "app.example.com", "x", Some(foreign.as_str())),
        txt("t1", "_cfgate.app.example.com", &mine.format()),
    ];
    let observed = observe_records(&dns, &records, &mine);
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].ownership, Ownership::Owned);
}

#[test]
fn records_without_any_marker_are_unmarked() {
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);
    let records = vec![cname("r1", "app.example.com", "x", Some("migrated 2019"))];
    let observed = observe_records(&dns, &records, &marker());
    assert_eq!(observed[0].ownership, Ownership::Unmarked);
}

#[test]
fn comment_markers_only_count_when_comment_tracking_is_enabled() {
    let mut dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);
    let mine = marker();
    let comment = mine.format();
    let records = vec![cname("r1", "app.example.com", "x", Some(comment.as_str()))];

    // Comment tracking is off by default; the marker in the comment is not
    // read.
    let observed = observe_records(&dns, &records, &mine);
    assert_eq!(observed[0].ownership, Ownership::Unmarked);

    dns.spec.ownership.comment.enabled = true;
    let observed = observe_records(&dns, &records, &mine);
    assert_eq!(observed[0].ownership, Ownership::Owned);
}

#[tokio::test]
async fn sync_creates_records_with_their_txt_companions() {
    let ctx = dummy_context();
    let api = FakeCloudflare::new().with_zone("z1", "example.com");
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);

    let (statuses, changed) = sync_zone(
        &ctx,
        &api,
        &dns,
        &zone("z1", "example.com"),
        vec![desired("app.example.com", "tun-1.cfargotunnel.com")],
        &marker(),
    )
    .await
    .unwrap();

    assert!(changed);
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, RecordSyncState::Synced);

    let records = api.zone_records("z1");
    let cname = records.iter().find(|r| r.r#type == "CNAME").unwrap();
    assert_eq!(cname.name, "app.example.com");
    assert_eq!(cname.content, "tun-1.cfargotunnel.com");
    let companion = records.iter().find(|r| r.r#type == "TXT").unwrap();
    assert_eq!(companion.name, "_cfgate.app.example.com");
    assert_eq!(companion.content, marker().format());
}

#[tokio::test]
async fn sync_updates_drifted_owned_records() {
    let ctx = dummy_context();
    let api = FakeCloudflare::new().with_zone("z1", "example.com");
    api.seed_record("z1", cname("r1", "app.example.com", "old.target", None));
    api.seed_record("z1", txt("t1", "_cfgate.app.example.com", &marker().format()));
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);

    let (statuses, _) = sync_zone(
        &ctx,
        &api,
        &dns,
        &zone("z1", "example.com"),
        vec![desired("app.example.com", "tun-1.cfargotunnel.com")],
        &marker(),
    )
    .await
    .unwrap();

    assert_eq!(statuses[0].status, RecordSyncState::Synced);
    let records = api.zone_records("z1");
    let updated = records.iter().find(|r| r.id == "r1").unwrap();
    assert_eq!(updated.content, "tun-1.cfargotunnel.com");
}

#[tokio::test]
async fn converged_records_keep_their_synced_status() {
    let ctx = dummy_context();
    let api = FakeCloudflare::new().with_zone("z1", "example.com");
    api.seed_record(
        "z1",
        cname("r1", "app.example.com", "tun-1.cfargotunnel.com", None),
    );
    api.seed_record("z1", txt("t1", "_cfgate.app.example.com", &marker().format()));
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);

    let (statuses, changed) = sync_zone(
        &ctx,
        &api,
        &dns,
        &zone("z1", "example.com"),
        vec![desired("app.example.com", "tun-1.cfargotunnel.com")],
        &marker(),
    )
    .await
    .unwrap();

    // No write happens, but the record still reports as synced.
    assert!(!changed);
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, RecordSyncState::Synced);
    assert_eq!(statuses[0].record_id.as_deref(), Some("r1"));
}

#[tokio::test]
async fn a_second_pass_over_created_records_is_a_steady_state() {
    let ctx = dummy_context();
    let api = FakeCloudflare::new().with_zone("z1", "example.com");
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);
    let run = || async {
        sync_zone(
            &ctx,
            &api,
            &dns,
            &zone("z1", "example.com"),
            vec![desired("app.example.com", "tun-1.cfargotunnel.com")],
            &marker(),
        )
        .await
    };

    let (first, first_changed) = run().await.unwrap();
    assert!(first_changed);

    let (second, second_changed) = run().await.unwrap();
    assert!(!second_changed);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].status, RecordSyncState::Synced);
    assert_eq!(second[0].record_id, first[0].record_id);
}

#[tokio::test]
async fn sync_never_touches_foreign_records() {
    let ctx = dummy_context();
    let api = FakeCloudflare::new().with_zone("z1", "example.com");
    let foreign =
        OwnershipMarker::new("prod/other", KIND_CLOUDFLARE_DNS, "prod", "other").format();
    api.seed_record("z1", cname("r1", "app.example.com", "their.target", None));
    api.seed_record("z1", txt("t1", "_cfgate.app.example.com", &foreign));
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);

    let (statuses, changed) = sync_zone(
        &ctx,
        &api,
        &dns,
        &zone("z1", "example.com"),
        vec![desired("app.example.com", "tun-1.cfargotunnel.com")],
        &marker(),
    )
    .await
    .unwrap();

    // The record is untouched, but the blocked hostname still gets a status
    // entry naming the other owner.
    assert!(!changed);
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, RecordSyncState::Failed);
    assert!(statuses[0].error.as_deref().unwrap().contains("prod/other"));
    let records = api.zone_records("z1");
    assert_eq!(
        records.iter().find(|r| r.id == "r1").unwrap().content,
        "their.target"
    );
}

#[tokio::test]
async fn sync_adopts_equivalent_unmarked_records() {
    let ctx = dummy_context();
    let api = FakeCloudflare::new().with_zone("z1", "example.com");
    api.seed_record(
        "z1",
        cname("r1", "app.example.com", "tun-1.cfargotunnel.com", None),
    );
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);

    let (statuses, _) = sync_zone(
        &ctx,
        &api,
        &dns,
        &zone("z1", "example.com"),
        vec![desired("app.example.com", "tun-1.cfargotunnel.com")],
        &marker(),
    )
    .await
    .unwrap();

    assert_eq!(statuses[0].status, RecordSyncState::Synced);
    // Adoption attaches the TXT companion.
    let records = api.zone_records("z1");
    assert!(records
        .iter()
        .any(|r| r.r#type == "TXT" && r.name == "_cfgate.app.example.com"));
}

#[tokio::test]
async fn occupied_hostnames_with_different_content_fail_without_writes() {
    let ctx = dummy_context();
    let api = FakeCloudflare::new().with_zone("z1", "example.com");
    api.seed_record("z1", cname("r1", "app.example.com", "their.target", None));
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);

    let (statuses, _) = sync_zone(
        &ctx,
        &api,
        &dns,
        &zone("z1", "example.com"),
        vec![desired("app.example.com", "tun-1.cfargotunnel.com")],
        &marker(),
    )
    .await
    .unwrap();

    assert_eq!(statuses[0].status, RecordSyncState::Failed);
    assert!(statuses[0].error.as_deref().unwrap().contains("occupied"));
    assert_eq!(
        api.zone_records("z1")
            .iter()
            .find(|r| r.id == "r1")
            .unwrap()
            .content,
        "their.target"
    );
}

#[tokio::test]
async fn stale_owned_records_are_deleted_with_their_companions() {
    let ctx = dummy_context();
    let api = FakeCloudflare::new().with_zone("z1", "example.com");
    api.seed_record("z1", cname("r1", "old.example.com", "tun-1.cfargotunnel.com", None));
    api.seed_record("z1", txt("t1", "_cfgate.old.example.com", &marker().format()));
    let dns = dns_resource(vec![], LifecyclePolicy::Sync);

    sync_zone(&ctx, &api, &dns, &zone("z1", "example.com"), vec![], &marker())
        .await
        .unwrap();

    assert!(api.zone_records("z1").is_empty());
}

#[tokio::test]
async fn upsert_only_keeps_stale_records() {
    let ctx = dummy_context();
    let api = FakeCloudflare::new().with_zone("z1", "example.com");
    api.seed_record("z1", cname("r1", "old.example.com", "tun-1.cfargotunnel.com", None));
    api.seed_record("z1", txt("t1", "_cfgate.old.example.com", &marker().format()));
    let dns = dns_resource(vec![], LifecyclePolicy::UpsertOnly);

    sync_zone(&ctx, &api, &dns, &zone("z1", "example.com"), vec![], &marker())
        .await
        .unwrap();

    assert_eq!(api.zone_records("z1").len(), 2);
}

#[tokio::test]
async fn lost_create_races_adopt_the_equivalent_winner() {
    let api = FakeCloudflare::new().with_zone("z1", "example.com");
    // The "winner" record another writer created just before us.
    api.seed_record(
        "z1",
        cname("r1", "app.example.com", "tun-1.cfargotunnel.com", None),
    );
    api.record_create_conflicts
        .store(1, std::sync::atomic::Ordering::SeqCst);
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);

    let d = desired("app.example.com", "tun-1.cfargotunnel.com");
    let record_id = create_with_adoption(&api, &dns, &zone("z1", "example.com"), &d, &marker())
        .await
        .unwrap();
    assert_eq!(record_id, "r1");
    // No duplicate record was created.
    let cnames: Vec<_> = api
        .zone_records("z1")
        .into_iter()
        .filter(|r| r.r#type == "CNAME")
        .collect();
    assert_eq!(cnames.len(), 1);
}

#[tokio::test]
async fn lost_create_races_with_different_content_stay_failed() {
    let api = FakeCloudflare::new().with_zone("z1", "example.com");
    api.seed_record("z1", cname("r1", "app.example.com", "their.target", None));
    api.record_create_conflicts
        .store(1, std::sync::atomic::Ordering::SeqCst);
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);

    let d = desired("app.example.com", "tun-1.cfargotunnel.com");
    let err = create_with_adoption(&api, &dns, &zone("z1", "example.com"), &d, &marker())
        .await
        .unwrap_err();
    assert!(matches!(err, CloudflareError::Configuration { .. }));
}

#[tokio::test]
async fn lost_create_races_never_adopt_a_winner_with_a_foreign_companion() {
    let api = FakeCloudflare::new().with_zone("z1", "example.com");
    let foreign =
        OwnershipMarker::new("prod/other", KIND_CLOUDFLARE_DNS, "prod", "other").format();
    // Equivalent content, no comment: the foreign ownership lives only in
    // the TXT companion.
    api.seed_record(
        "z1",
        cname("r1", "app.example.com", "tun-1.cfargotunnel.com", None),
    );
    api.seed_record("z1", txt("t1", "_cfgate.app.example.com", &foreign));
    api.record_create_conflicts
        .store(1, std::sync::atomic::Ordering::SeqCst);
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);

    let d = desired("app.example.com", "tun-1.cfargotunnel.com");
    let err = create_with_adoption(&api, &dns, &zone("z1", "example.com"), &d, &marker())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("another installation"));
    // The winner's comment was not rewritten.
    assert!(api
        .zone_records("z1")
        .iter()
        .find(|r| r.id == "r1")
        .unwrap()
        .comment
        .is_none());
}

#[tokio::test]
async fn cleanup_respects_ownership_and_only_managed() {
    let ctx = dummy_context();
    // Cleanup with delete-on-removal disabled never needs credentials.
    let mut dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::Sync);
    dns.spec.cleanup_policy.delete_on_resource_removal = Toggle::False;
    dns.cleanup(&ctx).await.unwrap();

    // Same for policies that never delete.
    let dns = dns_resource(vec![hostname("app.example.com")], LifecyclePolicy::UpsertOnly);
    dns.cleanup(&ctx).await.unwrap();
}

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// These tests only exercise the paths that never reach the API server; a
// client pointed at an unused local address is enough.

use super::*;
use crate::constants::TUNNEL_FINALIZER;
use crate::crd::{CloudflareConfig, CloudflareTunnel, CloudflareTunnelSpec, SecretRef};
use crate::metrics::Metrics;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

fn dummy_client() -> kube::Client {
    let config = kube::Config::new("http://127.0.0.1:9".parse().unwrap());
    kube::Client::try_from(config).unwrap()
}

fn dummy_context() -> Context {
    Context::new(dummy_client(), Arc::new(Metrics::new().unwrap()))
}

fn tunnel(finalizers: Vec<String>, deleted: bool) -> CloudflareTunnel {
    let spec = CloudflareTunnelSpec {
        cloudflare: CloudflareConfig {
            account_id: Some("acct".to_string()),
            secret_ref: SecretRef {
                name: "cf-credentials".to_string(),
                namespace: None,
            },
            ..CloudflareConfig::default()
        },
        ..CloudflareTunnelSpec::default()
    };
    let mut resource = CloudflareTunnel::new("edge", spec);
    resource.metadata.namespace = Some("default".to_string());
    resource.metadata.finalizers = Some(finalizers);
    if deleted {
        let stamp: Time = serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z"))
            .unwrap();
        resource.metadata.deletion_timestamp = Some(stamp);
    }
    resource
}

#[tokio::test]
async fn ensure_finalizer_is_a_noop_when_already_present() {
    let api: Api<CloudflareTunnel> = Api::namespaced(dummy_client(), "default");
    let resource = tunnel(vec![TUNNEL_FINALIZER.to_string()], false);
    // No patch is sent, so the unreachable server is never contacted.
    let written = ensure_finalizer(&api, &resource, TUNNEL_FINALIZER)
        .await
        .unwrap();
    assert!(!written);
}

#[tokio::test]
async fn remove_finalizer_is_a_noop_when_absent() {
    let api: Api<CloudflareTunnel> = Api::namespaced(dummy_client(), "default");
    let resource = tunnel(vec!["other.io/finalizer".to_string()], true);
    remove_finalizer(&api, &resource, TUNNEL_FINALIZER)
        .await
        .unwrap();
}

#[tokio::test]
async fn deletion_without_our_finalizer_releases_immediately() {
    let api: Api<CloudflareTunnel> = Api::namespaced(dummy_client(), "default");
    let ctx = dummy_context();
    let resource = Arc::new(tunnel(vec![], true));
    let action = handle_deletion(&api, &resource, TUNNEL_FINALIZER, &ctx)
        .await
        .unwrap();
    assert_eq!(action, Action::await_change());
}

#[tokio::test]
async fn cleanup_without_recorded_state_is_success() {
    // A tunnel that never got a status has nothing external to remove.
    let ctx = dummy_context();
    let resource = tunnel(vec![TUNNEL_FINALIZER.to_string()], true);
    resource.cleanup(&ctx).await.unwrap();
}

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use super::*;
use crate::crd::{
    AccessApplicationConfig, CloudflareAccessPolicySpec, PolicyTargetReference, Toggle,
};

fn policy(application: AccessApplicationConfig) -> CloudflareAccessPolicy {
    let spec = CloudflareAccessPolicySpec {
        target_refs: vec![],
        cloudflare: None,
        application,
        policies: vec![],
        service_tokens: vec![],
    };
    let mut resource = CloudflareAccessPolicy::new("intranet", spec);
    resource.metadata.namespace = Some("default".to_string());
    resource
}

fn resolution(resolved: bool, hostnames: &[&str]) -> TargetResolution {
    TargetResolution {
        reference: PolicyTargetReference {
            group: None,
            kind: "Gateway".to_string(),
            name: "gw".to_string(),
            namespace: None,
            section_name: None,
        },
        resolved,
        hostnames: hostnames.iter().map(|h| (*h).to_string()).collect(),
        message: if resolved {
            None
        } else {
            Some("Gateway/gw not found".to_string())
        },
    }
}

#[test]
fn explicit_application_domain_wins_over_target_hostnames() {
    let policy = policy(AccessApplicationConfig {
        domain: Some("portal.example.com".to_string()),
        ..AccessApplicationConfig::default()
    });
    let domain = application_domain(&policy, &[resolution(true, &["app.example.com"])]);
    assert_eq!(domain.as_deref(), Some("portal.example.com"));
}

#[test]
fn application_domain_falls_back_to_the_first_resolved_hostname() {
    let policy = policy(AccessApplicationConfig::default());
    let resolutions = vec![
        resolution(false, &[]),
        resolution(true, &["app.example.com", "www.example.com"]),
    ];
    let domain = application_domain(&policy, &resolutions);
    assert_eq!(domain.as_deref(), Some("app.example.com"));
}

#[test]
fn application_domain_appends_the_path() {
    let policy = policy(AccessApplicationConfig {
        domain: Some("app.example.com".to_string()),
        path: Some("/admin".to_string()),
        ..AccessApplicationConfig::default()
    });
    let domain = application_domain(&policy, &[]);
    assert_eq!(domain.as_deref(), Some("app.example.com/admin"));
}

#[test]
fn no_domain_and_no_resolved_target_yields_none() {
    let policy = policy(AccessApplicationConfig::default());
    assert!(application_domain(&policy, &[resolution(false, &[])]).is_none());
}

#[test]
fn application_params_default_from_the_resource() {
    let plain = policy(AccessApplicationConfig::default());
    let params = application_params(&plain, "intranet", "app.example.com");
    assert_eq!(params.name, "intranet");
    assert_eq!(params.r#type, "self_hosted");
    assert!(params.app_launcher_visible);
    assert!(!params.skip_interstitial);

    let customized = policy(AccessApplicationConfig {
        name: Some("Intranet Portal".to_string()),
        app_launcher_visible: Toggle::False,
        skip_interstitial: true,
        session_duration: Some("12h".to_string()),
        ..AccessApplicationConfig::default()
    });
    let params = application_params(&customized, "intranet", "app.example.com");
    assert_eq!(params.name, "Intranet Portal");
    assert!(!params.app_launcher_visible);
    assert!(params.skip_interstitial);
    assert_eq!(params.session_duration.as_deref(), Some("12h"));
}

#[test]
fn ancestor_entries_mirror_resolutions() {
    let ok = ancestor_status(&resolution(true, &["app.example.com"]));
    assert_eq!(ok.controller_name, CONTROLLER_NAME);
    assert!(ok.resolved);
    assert!(ok.message.is_none());

    let failed = ancestor_status(&resolution(false, &[]));
    assert!(!failed.resolved);
    assert_eq!(failed.message.as_deref(), Some("Gateway/gw not found"));
}

#[tokio::test]
async fn error_policy_requeues_with_the_error_interval() {
    let config = kube::Config::new("http://127.0.0.1:9".parse().unwrap());
    let client = kube::Client::try_from(config).unwrap();
    let ctx = Arc::new(Context::new(
        client,
        Arc::new(crate::metrics::Metrics::new().unwrap()),
    ));
    let err = ReconcileError::from(anyhow::anyhow!("boom"));
    let action = error_policy(
        Arc::new(policy(AccessApplicationConfig::default())),
        &err,
        ctx,
    );
    assert_eq!(
        action,
        Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
    );
}

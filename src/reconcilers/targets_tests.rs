// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use super::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(listeners: serde_json::Value) -> DynamicObject {
    serde_json::from_value(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "Gateway",
        "metadata": { "name": "gw", "namespace": "default" },
        "spec": { "gatewayClassName": "cloudflare", "listeners": listeners }
    }))
    .unwrap()
}

fn http_route(hostnames: serde_json::Value) -> DynamicObject {
    serde_json::from_value(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "HTTPRoute",
        "metadata": { "name": "route", "namespace": "default" },
        "spec": { "hostnames": hostnames, "rules": [] }
    }))
    .unwrap()
}

fn target(kind: &str, name: &str, namespace: Option<&str>) -> PolicyTargetReference {
    PolicyTargetReference {
        group: None,
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.map(str::to_string),
        section_name: None,
    }
}

async fn kube_client(server: &MockServer) -> kube::Client {
    let config = kube::Config::new(server.uri().parse().unwrap());
    kube::Client::try_from(config).unwrap()
}

#[test]
fn gateway_hostnames_come_from_listeners() {
    let object = gateway(json!([
        { "name": "https", "hostname": "app.example.com", "port": 443, "protocol": "HTTPS" },
        { "name": "admin", "hostname": "admin.example.com", "port": 443, "protocol": "HTTPS" },
        { "name": "plain", "port": 80, "protocol": "HTTP" }
    ]));
    assert_eq!(
        extract_hostnames(&object, "Gateway", None),
        vec!["app.example.com", "admin.example.com"]
    );
}

#[test]
fn repeated_hostnames_are_deduplicated_across_listeners() {
    let object = gateway(json!([
        { "name": "https", "hostname": "app.example.com", "port": 443, "protocol": "HTTPS" },
        { "name": "admin", "hostname": "admin.example.com", "port": 443, "protocol": "HTTPS" },
        { "name": "alt", "hostname": "app.example.com", "port": 8443, "protocol": "HTTPS" }
    ]));
    assert_eq!(
        extract_hostnames(&object, "Gateway", None),
        vec!["app.example.com", "admin.example.com"]
    );
}

#[test]
fn section_name_narrows_gateway_listeners() {
    let object = gateway(json!([
        { "name": "https", "hostname": "app.example.com", "port": 443, "protocol": "HTTPS" },
        { "name": "admin", "hostname": "admin.example.com", "port": 443, "protocol": "HTTPS" }
    ]));
    assert_eq!(
        extract_hostnames(&object, "Gateway", Some("admin")),
        vec!["admin.example.com"]
    );
    assert!(extract_hostnames(&object, "Gateway", Some("missing")).is_empty());
}

#[test]
fn route_hostnames_come_from_the_spec_list() {
    let object = http_route(json!(["app.example.com", "www.example.com"]));
    assert_eq!(
        extract_hostnames(&object, "HTTPRoute", None),
        vec!["app.example.com", "www.example.com"]
    );

    let object = http_route(json!([]));
    assert!(extract_hostnames(&object, "HTTPRoute", None).is_empty());
}

#[tokio::test]
async fn one_bad_reference_does_not_poison_the_rest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/apis/gateway.networking.k8s.io/v1/namespaces/default/gateways/good",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "Gateway",
            "metadata": { "name": "good", "namespace": "default" },
            "spec": { "listeners": [
                { "name": "https", "hostname": "app.example.com", "port": 443, "protocol": "HTTPS" }
            ] }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/apis/gateway.networking.k8s.io/v1/namespaces/default/gateways/missing",
        ))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "kind": "Status", "apiVersion": "v1", "status": "Failure",
            "reason": "NotFound", "code": 404
        })))
        .mount(&server)
        .await;
    let client = kube_client(&server).await;

    let refs = vec![
        target("Gateway", "good", None),
        target("Gateway", "missing", None),
    ];
    let resolutions = resolve_all(&client, "default", &refs).await;

    assert_eq!(resolutions.len(), 2);
    assert!(resolutions[0].resolved);
    assert_eq!(resolutions[0].hostnames, vec!["app.example.com"]);
    assert!(!resolutions[1].resolved);
    assert!(resolutions[1].message.as_deref().unwrap().contains("not found"));
    // Output order mirrors input order.
    assert_eq!(resolutions[0].reference.name, "good");
    assert_eq!(resolutions[1].reference.name, "missing");
}

#[tokio::test]
async fn cross_namespace_requires_a_reference_grant() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/apis/gateway.networking.k8s.io/v1beta1/namespaces/infra/referencegrants",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apiVersion": "gateway.networking.k8s.io/v1beta1",
            "kind": "ReferenceGrantList",
            "metadata": { "resourceVersion": "1" },
            "items": []
        })))
        .mount(&server)
        .await;
    let client = kube_client(&server).await;

    let resolutions =
        resolve_all(&client, "default", &[target("Gateway", "gw", Some("infra"))]).await;
    assert!(!resolutions[0].resolved);
    assert!(resolutions[0]
        .message
        .as_deref()
        .unwrap()
        .contains("ReferenceGrant"));
}

#[tokio::test]
async fn a_missing_grant_in_the_middle_leaves_its_neighbors_resolved() {
    let server = MockServer::start().await;
    for name in ["first", "third"] {
        Mock::given(method("GET"))
            .and(path(format!(
                "/apis/gateway.networking.k8s.io/v1/namespaces/default/gateways/{name}"
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "gateway.networking.k8s.io/v1",
                "kind": "Gateway",
                "metadata": { "name": name, "namespace": "default" },
                "spec": { "listeners": [
                    { "name": "https", "hostname": format!("{name}.example.com"),
                      "port": 443, "protocol": "HTTPS" }
                ] }
            })))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(
            "/apis/gateway.networking.k8s.io/v1beta1/namespaces/infra/referencegrants",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apiVersion": "gateway.networking.k8s.io/v1beta1",
            "kind": "ReferenceGrantList",
            "metadata": { "resourceVersion": "1" },
            "items": []
        })))
        .mount(&server)
        .await;
    let client = kube_client(&server).await;

    let refs = vec![
        target("Gateway", "first", None),
        target("Gateway", "ungranted", Some("infra")),
        target("Gateway", "third", None),
    ];
    let resolutions = resolve_all(&client, "default", &refs).await;

    assert_eq!(resolutions.len(), 3);
    assert!(resolutions[0].resolved);
    assert_eq!(resolutions[0].hostnames, vec!["first.example.com"]);
    assert!(!resolutions[1].resolved);
    assert!(resolutions[1]
        .message
        .as_deref()
        .unwrap()
        .contains("ReferenceGrant"));
    assert!(resolutions[2].resolved);
    assert_eq!(resolutions[2].hostnames, vec!["third.example.com"]);
}

#[tokio::test]
async fn matching_reference_grant_admits_the_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/apis/gateway.networking.k8s.io/v1beta1/namespaces/infra/referencegrants",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apiVersion": "gateway.networking.k8s.io/v1beta1",
            "kind": "ReferenceGrantList",
            "metadata": { "resourceVersion": "1" },
            "items": [{
                "apiVersion": "gateway.networking.k8s.io/v1beta1",
                "kind": "ReferenceGrant",
                "metadata": { "name": "allow-cfgate", "namespace": "infra" },
                "spec": {
                    "from": [{
                        "group": "cfgate.firestoned.io",
                        "kind": "CloudflareAccessPolicy",
                        "namespace": "default"
                    }],
                    "to": [{ "group": "gateway.networking.k8s.io", "kind": "Gateway" }]
                }
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/apis/gateway.networking.k8s.io/v1/namespaces/infra/gateways/gw",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "Gateway",
            "metadata": { "name": "gw", "namespace": "infra" },
            "spec": { "listeners": [
                { "name": "https", "hostname": "shared.example.com", "port": 443, "protocol": "HTTPS" }
            ] }
        })))
        .mount(&server)
        .await;
    let client = kube_client(&server).await;

    let resolutions =
        resolve_all(&client, "default", &[target("Gateway", "gw", Some("infra"))]).await;
    assert!(resolutions[0].resolved);
    assert_eq!(resolutions[0].hostnames, vec!["shared.example.com"]);
}

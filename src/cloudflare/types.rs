// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Wire types for the Cloudflare v4 API.
//!
//! These mirror the JSON shapes of the endpoints cfgate talks to. All
//! responses arrive in the standard envelope (`success`, `errors`, `result`),
//! handled in the client; the types here are the `result` payloads and
//! request bodies.

use serde::{Deserialize, Serialize};

/// Standard Cloudflare v4 response envelope.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Errors reported by the API.
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
    /// The payload, absent on failure.
    pub result: Option<T>,
}

/// One error or informational message in an API envelope.
#[derive(Debug, Deserialize)]
pub struct ApiMessage {
    /// Cloudflare error code.
    pub code: Option<i64>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// A Cloudflare account.
#[derive(Clone, Debug, Deserialize)]
pub struct Account {
    /// Account id.
    pub id: String,
    /// Account display name.
    pub name: String,
}

/// A Cloudflare DNS zone.
#[derive(Clone, Debug, Deserialize)]
pub struct Zone {
    /// Zone id.
    pub id: String,
    /// Zone domain name.
    pub name: String,
    /// Zone status (`active`, `pending`, ...).
    #[serde(default)]
    pub status: String,
}

/// A Cloudflare (cloudflared) tunnel.
#[derive(Clone, Debug, Deserialize)]
pub struct Tunnel {
    /// Tunnel id.
    pub id: String,
    /// Tunnel name.
    pub name: String,
    /// Health status reported by Cloudflare (`healthy`, `active`, `degraded`,
    /// `down`, `inactive`). Absent for tunnels that never connected.
    #[serde(default)]
    pub status: Option<String>,
    /// Deletion timestamp; set on soft-deleted tunnels, which name listings
    /// may still return.
    #[serde(default)]
    pub deleted_at: Option<String>,
    /// How the tunnel's configuration is managed. cfgate only manages
    /// tunnels with `config_src == "cloudflare"` (remotely managed).
    #[serde(default)]
    pub config_src: Option<String>,
}

impl Tunnel {
    /// Whether this listing entry refers to a live tunnel.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Request body for tunnel creation.
#[derive(Debug, Serialize)]
pub struct CreateTunnelRequest {
    /// Tunnel name.
    pub name: String,
    /// Configuration source; always `cloudflare` for remote management.
    pub config_src: String,
}

/// An active connection of a tunnel (a connected cloudflared replica).
#[derive(Clone, Debug, Deserialize)]
pub struct TunnelConnection {
    /// Connection id.
    pub id: String,
    /// Cloudflare colo the connection terminates at.
    #[serde(default)]
    pub colo_name: Option<String>,
}

/// One ingress rule in a tunnel configuration. Matching is first-match-wins
/// and the final rule must be a catch-all (no hostname, no path).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigIngressRule {
    /// Hostname to match; absent on the catch-all rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Path to match within the hostname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Backend service URL or `http_status:NNN` shorthand.
    pub service: String,
}

impl ConfigIngressRule {
    /// A rule is a catch-all iff it has neither hostname nor path.
    #[must_use]
    pub fn is_catch_all(&self) -> bool {
        self.hostname.as_deref().is_none_or(str::is_empty)
            && self.path.as_deref().is_none_or(str::is_empty)
    }
}

/// Remotely managed tunnel configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Ordered ingress rules.
    #[serde(default)]
    pub ingress: Vec<ConfigIngressRule>,
}

/// Wrapper the configuration endpoints use around [`TunnelConfig`].
#[derive(Debug, Serialize, Deserialize)]
pub struct TunnelConfigResult {
    /// The configuration payload.
    pub config: TunnelConfig,
}

/// A DNS record as returned by the records endpoints.
#[derive(Clone, Debug, Deserialize)]
pub struct DnsRecord {
    /// Record id.
    pub id: String,
    /// Record type (`CNAME`, `A`, `TXT`, ...).
    pub r#type: String,
    /// Fully qualified record name.
    pub name: String,
    /// Record content (target domain, IP, or TXT payload).
    pub content: String,
    /// Whether the Cloudflare proxy is enabled.
    #[serde(default)]
    pub proxied: Option<bool>,
    /// Record TTL (1 = auto).
    #[serde(default)]
    pub ttl: Option<i32>,
    /// Record comment.
    #[serde(default)]
    pub comment: Option<String>,
}

/// Request body for DNS record create and update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DnsRecordParams {
    /// Record type.
    pub r#type: String,
    /// Fully qualified record name.
    pub name: String,
    /// Record content.
    pub content: String,
    /// Cloudflare proxy flag; TXT records must not set it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,
    /// Record TTL (1 = auto).
    pub ttl: i32,
    /// Record comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// A Cloudflare Access application.
#[derive(Clone, Debug, Deserialize)]
pub struct AccessApplication {
    /// Application id.
    pub id: String,
    /// Audience (AUD) tag used by origins to verify JWTs.
    #[serde(default)]
    pub aud: Option<String>,
    /// Display name.
    pub name: String,
    /// Protected domain (hostname plus optional path).
    pub domain: String,
}

/// Request body for Access application create and update.
#[derive(Clone, Debug, Serialize)]
pub struct AccessApplicationParams {
    /// Display name.
    pub name: String,
    /// Protected domain.
    pub domain: String,
    /// Application type; always `self_hosted` for cfgate.
    pub r#type: String,
    /// Session cookie lifetime (e.g. `24h`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<String>,
    /// Visibility in the App Launcher.
    pub app_launcher_visible: bool,
    /// Bypass the login interstitial for API clients.
    pub skip_interstitial: bool,
}

/// A Cloudflare Access policy attached to an application.
#[derive(Clone, Debug, Deserialize)]
pub struct AccessPolicy {
    /// Policy id.
    pub id: String,
    /// Policy display name.
    pub name: String,
    /// Decision (`allow`, `deny`, `bypass`, `non_identity`).
    pub decision: String,
    /// Evaluation order within the application.
    #[serde(default)]
    pub precedence: Option<i32>,
}

/// Request body for Access policy create and update.
///
/// The rule groups use Cloudflare's one-object-per-matcher wire form,
/// produced from the CRD predicates by the access service.
#[derive(Clone, Debug, Serialize)]
pub struct AccessPolicyParams {
    /// Policy display name.
    pub name: String,
    /// Decision string.
    pub decision: String,
    /// Evaluation order within the application.
    pub precedence: i32,
    /// Include matchers (ANY).
    pub include: Vec<serde_json::Value>,
    /// Exclude matchers (ANY negates).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<serde_json::Value>,
    /// Require matchers (ALL).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub require: Vec<serde_json::Value>,
    /// Session duration override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<String>,
}

/// A Cloudflare Access service token.
///
/// `client_secret` is only present in the creation response; listings omit
/// it.
#[derive(Clone, Debug, Deserialize)]
pub struct ServiceToken {
    /// Token id.
    pub id: String,
    /// Token display name.
    pub name: String,
    /// Client id presented in the `CF-Access-Client-Id` header.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret; creation response only.
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Request body for service token creation.
#[derive(Debug, Serialize)]
pub struct CreateServiceTokenRequest {
    /// Token display name.
    pub name: String,
    /// Validity period in whole hours (e.g. `8760h`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for Cloudflare management.
//!
//! This module defines all Kubernetes Custom Resource Definitions used by cfgate
//! to manage Cloudflare Tunnels, DNS records, and zero-trust Access policies
//! declaratively.
//!
//! # Resource Types
//!
//! - [`CloudflareTunnel`] - Lifecycle of a named Cloudflare Tunnel and its
//!   ingress configuration
//! - [`CloudflareDNS`] - DNS record synchronization with ownership tracking
//! - [`CloudflareAccessPolicy`] - Access application and ordered policy rules
//!   attached to Gateway API targets
//!
//! # Example: Declaring a Tunnel
//!
//! ```rust,no_run
//! use cfgate::crd::{CloudflareTunnelSpec, TunnelIdentity, CloudflareConfig, SecretRef};
//!
//! let spec = CloudflareTunnelSpec {
//!     tunnel: TunnelIdentity {
//!         name: "edge-tunnel".to_string(),
//!     },
//!     cloudflare: CloudflareConfig {
//!         account_id: Some("0123456789abcdef".to_string()),
//!         account_name: None,
//!         secret_ref: SecretRef {
//!             name: "cloudflare-api-token".to_string(),
//!             namespace: None,
//!         },
//!         secret_keys: None,
//!     },
//!     ingress: vec![],
//!     fallback_target: None,
//!     fallback_credentials_ref: None,
//! };
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Shared types
// ============================================================================

/// Tri-state boolean for optional CRD fields.
///
/// Distinguishes "not set" from an explicit `True`/`False` so that defaulting
/// is resolved exactly once, at the read boundary, instead of scattering
/// nullable booleans through the reconciliation logic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Toggle {
    /// Field was not specified; the caller-supplied default applies.
    #[default]
    Unset,
    /// Explicitly enabled.
    True,
    /// Explicitly disabled.
    False,
}

impl Toggle {
    /// Resolve the tri-state value against a default.
    ///
    /// `Unset` yields `default`, the explicit variants yield themselves.
    #[must_use]
    pub fn resolve(self, default: bool) -> bool {
        match self {
            Toggle::Unset => default,
            Toggle::True => true,
            Toggle::False => false,
        }
    }
}

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers. The `last_transition_time` only
/// changes when `status` flips value; message-only refreshes preserve it.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
pub struct Condition {
    /// Type of condition. Common types: Ready, CredentialsValid, RecordsSynced.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// The spec generation that was observed when this condition was set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Reference to a Kubernetes Secret containing Cloudflare API credentials.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Name of the secret.
    pub name: String,

    /// Namespace of the secret. Defaults to the referencing resource's namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Key mappings within a credentials secret.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeys {
    /// Key name for the Cloudflare API token. Defaults to `CLOUDFLARE_API_TOKEN`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

/// Cloudflare API credentials configuration.
///
/// Requires either `account_id` or `account_name` to identify the account.
/// When `account_name` is given, the controller resolves the id via an API
/// lookup and caches it in status for subsequent reconciliations.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareConfig {
    /// Cloudflare account ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Cloudflare account name, looked up via API when the id is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,

    /// Secret containing the Cloudflare API token.
    pub secret_ref: SecretRef,

    /// Key mappings within the secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_keys: Option<SecretKeys>,
}

impl CloudflareConfig {
    /// The key under which the API token is stored in the referenced secret.
    #[must_use]
    pub fn api_token_key(&self) -> &str {
        self.secret_keys
            .as_ref()
            .and_then(|k| k.api_token.as_deref())
            .unwrap_or(crate::constants::DEFAULT_API_TOKEN_KEY)
    }
}

// ============================================================================
// CloudflareTunnel
// ============================================================================

/// Tunnel identification configuration.
///
/// A single idempotent pathway: the controller resolves the tunnel by name and
/// creates it if it does not exist. Multiple `CloudflareTunnel` resources with
/// the same tunnel name adopt the same Cloudflare tunnel rather than creating
/// duplicates. The resolved tunnel id is stored in status.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
pub struct TunnelIdentity {
    /// Tunnel name in Cloudflare. Adopted if it exists, created otherwise.
    #[schemars(length(min = 1, max = 63))]
    pub name: String,
}

/// One ordered hostname/path to backend-service mapping in a tunnel's
/// ingress configuration.
///
/// The final rule of a synced configuration is always a catch-all (no
/// hostname, no path); the controller appends one if the declared rules do
/// not already end with it.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TunnelIngressRule {
    /// Hostname this rule matches. Empty matches any hostname (catch-all).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Path prefix this rule matches within the hostname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Backend service URL (e.g. `http://web.default.svc:8080`) or a
    /// status shorthand such as `http_status:404`.
    pub service: String,
}

/// Desired state of a `CloudflareTunnel` resource.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "cfgate.firestoned.io",
    version = "v1alpha1",
    kind = "CloudflareTunnel",
    namespaced,
    status = "CloudflareTunnelStatus",
    shortname = "cft",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Tunnel ID","type":"string","jsonPath":".status.tunnelId"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareTunnelSpec {
    /// Tunnel identity configuration.
    pub tunnel: TunnelIdentity,

    /// Cloudflare API credentials.
    pub cloudflare: CloudflareConfig,

    /// Ordered ingress rules synced to the tunnel configuration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<TunnelIngressRule>,

    /// Service for unmatched requests. Defaults to `http_status:404`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_target: Option<String>,

    /// Fallback Cloudflare API credentials, used during deletion when the
    /// primary credentials secret has already been removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_credentials_ref: Option<SecretRef>,
}

/// Observed state of a `CloudflareTunnel` resource.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareTunnelStatus {
    /// Cloudflare tunnel ID assigned on creation or adoption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<String>,

    /// Cloudflare tunnel name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_name: Option<String>,

    /// CNAME target domain for the tunnel (`{tunnelId}.cfargotunnel.com`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_domain: Option<String>,

    /// Resolved Cloudflare account ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Generation observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the configuration was synced to Cloudflare (RFC3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,

    /// Latest available observations of the tunnel's state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

// ============================================================================
// CloudflareDNS
// ============================================================================

/// Reference to a `CloudflareTunnel` for CNAME target resolution.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DNSTunnelRef {
    /// Name of the `CloudflareTunnel`.
    pub name: String,

    /// Namespace of the `CloudflareTunnel`. Defaults to the `CloudflareDNS`'s
    /// namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// DNS record types supported for external (non-tunnel) targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RecordType {
    /// Alias record pointing at another domain.
    #[default]
    CNAME,
    /// IPv4 address record.
    A,
    /// IPv6 address record.
    AAAA,
}

impl RecordType {
    /// Wire name of the record type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::CNAME => "CNAME",
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
        }
    }
}

/// A non-tunnel DNS target for external CNAME, A, or AAAA records.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTarget {
    /// DNS record type.
    pub r#type: RecordType,

    /// Target value (domain for CNAME, IP address for A/AAAA).
    pub value: String,
}

/// Record lifecycle policy, aligned with external-dns semantics.
///
/// Governs whether reconciliation may delete or update records it does not
/// currently see desired. Deletion additionally always requires a matching
/// ownership marker, regardless of policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum LifecyclePolicy {
    /// Create, update, and delete records to match desired state.
    #[default]
    Sync,
    /// Create and update records but never delete.
    UpsertOnly,
    /// Create records but never update or delete them.
    CreateOnly,
}

impl LifecyclePolicy {
    /// Whether this policy permits updating an existing record.
    #[must_use]
    pub fn allows_update(self) -> bool {
        !matches!(self, LifecyclePolicy::CreateOnly)
    }

    /// Whether this policy permits deleting an undesired record.
    #[must_use]
    pub fn allows_delete(self) -> bool {
        matches!(self, LifecyclePolicy::Sync)
    }
}

/// A DNS zone in which records are managed.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DNSZoneConfig {
    /// Zone domain name (e.g. `example.com`).
    pub name: String,

    /// Explicit zone ID; skips the API lookup when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Default proxied setting for records in this zone.
    /// `Unset` inherits from `spec.defaults.proxied`.
    #[serde(default)]
    pub proxied: Toggle,
}

/// An explicit hostname to sync, with optional per-hostname settings.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DNSHostname {
    /// DNS hostname to create (e.g. `app.example.com`).
    pub hostname: String,

    /// CNAME target override. Defaults to the resolved tunnel domain or
    /// external target value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Cloudflare proxy for this record. `Unset` inherits from the zone or
    /// the record defaults.
    #[serde(default)]
    pub proxied: Toggle,

    /// Record TTL in seconds. 1 means auto (Cloudflare-managed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i32>,
}

/// Default settings applied to all managed DNS records.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DNSRecordDefaults {
    /// Enable the Cloudflare proxy by default.
    pub proxied: bool,

    /// Default record TTL in seconds (1 = auto).
    pub ttl: i32,
}

impl Default for DNSRecordDefaults {
    fn default() -> Self {
        Self {
            proxied: true,
            ttl: crate::constants::DEFAULT_DNS_RECORD_TTL,
        }
    }
}

/// TXT record-based ownership tracking configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TXTOwnershipConfig {
    /// Enable companion TXT ownership records. `Unset` defaults to true.
    #[serde(default)]
    pub enabled: Toggle,

    /// Prefix for TXT record names. Defaults to `_cfgate`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Comment-based ownership tracking configuration.
///
/// Lighter-weight alternative to TXT records using the Cloudflare record
/// comment field.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommentOwnershipConfig {
    /// Enable comment-based ownership tracking.
    #[serde(default)]
    pub enabled: bool,
}

/// How record ownership is tracked and verified.
///
/// The `owner_id` identifies this installation in ownership markers and
/// defaults to the `CloudflareDNS` resource's `namespace/name`. Records whose
/// marker carries a different owner are never mutated or deleted.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DNSOwnershipConfig {
    /// Installation identifier used in ownership markers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    /// TXT record-based ownership.
    #[serde(default)]
    pub txt_record: TXTOwnershipConfig,

    /// Comment-based ownership.
    #[serde(default)]
    pub comment: CommentOwnershipConfig,
}

/// Cleanup behavior when records are no longer needed.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DNSCleanupPolicy {
    /// Delete records when the `CloudflareDNS` resource is deleted.
    /// `Unset` defaults to true.
    #[serde(default)]
    pub delete_on_resource_removal: Toggle,

    /// Only delete records with a verified ownership marker.
    /// `Unset` defaults to true.
    #[serde(default)]
    pub only_managed: Toggle,
}

/// Desired state of a `CloudflareDNS` resource.
///
/// Either `tunnel_ref` or `external_target` must be specified (mutually
/// exclusive); credentials are inherited from the referenced tunnel when
/// `cloudflare` is unset.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "cfgate.firestoned.io",
    version = "v1alpha1",
    kind = "CloudflareDNS",
    namespaced,
    status = "CloudflareDNSStatus",
    shortname = "cfdns",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced","type":"integer","jsonPath":".status.syncedRecords"}"#,
    printcolumn = r#"{"name":"Failed","type":"integer","jsonPath":".status.failedRecords"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareDNSSpec {
    /// Reference to a `CloudflareTunnel` for CNAME target resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_ref: Option<DNSTunnelRef>,

    /// Non-tunnel DNS target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_target: Option<ExternalTarget>,

    /// DNS zones to manage.
    pub zones: Vec<DNSZoneConfig>,

    /// Record lifecycle policy.
    #[serde(default)]
    pub policy: LifecyclePolicy,

    /// Hostnames to sync.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<DNSHostname>,

    /// Default settings for DNS records.
    #[serde(default)]
    pub defaults: DNSRecordDefaults,

    /// Ownership tracking configuration.
    #[serde(default)]
    pub ownership: DNSOwnershipConfig,

    /// Cleanup behavior for records.
    #[serde(default)]
    pub cleanup_policy: DNSCleanupPolicy,

    /// Cloudflare API credentials. Required with `external_target`;
    /// inherited from the referenced tunnel when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloudflare: Option<CloudflareConfig>,

    /// Fallback credentials used during deletion when the primary secret
    /// is unavailable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_credentials_ref: Option<SecretRef>,
}

/// Synchronization state of a single DNS record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RecordSyncState {
    /// Record is converged with the desired state.
    Synced,
    /// Record has not been applied yet.
    #[default]
    Pending,
    /// The last apply attempt failed; see the error field.
    Failed,
}

/// Status of one managed DNS record.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DNSRecordSyncStatus {
    /// DNS hostname.
    pub hostname: String,

    /// Record type (CNAME, A, AAAA).
    pub r#type: String,

    /// Record target/content.
    pub target: String,

    /// Whether the Cloudflare proxy is enabled.
    pub proxied: bool,

    /// Record TTL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i32>,

    /// Sync state of this record.
    pub status: RecordSyncState,

    /// Cloudflare record ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    /// Cloudflare zone ID the record lives in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,

    /// Error message when status is Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Observed state of a `CloudflareDNS` resource.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareDNSStatus {
    /// Number of successfully synced records.
    #[serde(default)]
    pub synced_records: i32,

    /// Number of records pending sync.
    #[serde(default)]
    pub pending_records: i32,

    /// Number of records that failed to sync.
    #[serde(default)]
    pub failed_records: i32,

    /// Per-record sync status.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<DNSRecordSyncStatus>,

    /// Resolved CNAME target (tunnel domain or external value).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_target: Option<String>,

    /// Generation observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time records were synced (RFC3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,

    /// Latest available observations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

// ============================================================================
// CloudflareAccessPolicy
// ============================================================================

/// Identifies a Gateway API resource for Access policy attachment.
///
/// Cross-namespace references require a `ReferenceGrant` in the target
/// namespace permitting `CloudflareAccessPolicy` resources from the policy's
/// namespace.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetReference {
    /// API group of the target resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Kind of the target resource (Gateway, HTTPRoute, GRPCRoute, ...).
    pub kind: String,

    /// Name of the target resource.
    pub name: String,

    /// Namespace of the target resource. Cross-namespace targeting requires
    /// a `ReferenceGrant`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Specific listener (Gateway) or rule (Route) within the target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

/// Policy action taken when a rule matches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    /// Grant access.
    #[default]
    Allow,
    /// Refuse access.
    Deny,
    /// Skip authentication entirely.
    Bypass,
    /// Service-auth (machine-to-machine) access without identity.
    NonIdentity,
}

/// One identity/network matching predicate inside an Access rule group.
///
/// Modeled as a closed sum type: every variant has exactly one evaluation
/// arm, and adding a predicate tier is a new variant rather than another
/// nullable field.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AccessRulePredicate {
    /// Source IP CIDR ranges (IPv4 or IPv6).
    Ip {
        /// CIDR blocks to match.
        ranges: Vec<String>,
    },
    /// Reference to a managed Cloudflare IP list.
    IpList {
        /// IP list id in Cloudflare.
        id: String,
    },
    /// Source country codes (ISO 3166-1 alpha-2).
    Country {
        /// Country codes to match.
        codes: Vec<String>,
    },
    /// Matches all principals.
    Everyone,
    /// A specific service token by id.
    ServiceToken {
        /// Cloudflare service token id.
        token_id: String,
    },
    /// Any valid service token.
    AnyValidServiceToken,
    /// Specific email addresses.
    Email {
        /// Addresses to match.
        addresses: Vec<String>,
    },
    /// Reference to a Cloudflare Access email list.
    EmailList {
        /// Email list id in Cloudflare.
        id: String,
    },
    /// Email domain suffix (e.g. `example.com`).
    EmailDomain {
        /// Domain suffix to match.
        domain: String,
    },
    /// An OIDC token claim value.
    OidcClaim {
        /// Identity provider id in Cloudflare.
        identity_provider_id: String,
        /// Claim name to match.
        claim_name: String,
        /// Expected claim value.
        claim_value: String,
    },
    /// Google Workspace group membership.
    GsuiteGroup {
        /// Identity provider id in Cloudflare.
        identity_provider_id: String,
        /// Group email address.
        email: String,
    },
}

/// An ordered access rule with include/exclude/require predicate groups.
///
/// Rules are evaluated in precedence order (lower first; ties broken by
/// declaration order). A rule applies to a principal iff any Include matches
/// (or Include is empty), no Exclude matches, and all Require match.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicyRule {
    /// Human-readable rule identifier, unique within the policy.
    pub name: String,

    /// Action taken when the rule matches.
    #[serde(default)]
    pub decision: AccessDecision,

    /// Evaluation order; lower numbers are evaluated first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precedence: Option<i32>,

    /// Include predicates (ANY must match for the rule to apply).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<AccessRulePredicate>,

    /// Exclude predicates (if ANY match, the rule does not apply).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<AccessRulePredicate>,

    /// Require predicates (ALL must match for the rule to apply).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require: Vec<AccessRulePredicate>,

    /// Session duration override for this rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<String>,
}

/// Access Application settings for the protected hostnames.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessApplicationConfig {
    /// Display name in the Cloudflare dashboard. Defaults to the CR name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Protected domain. Derived from the resolved targets when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Path prefix the protection is restricted to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Session cookie lifetime (e.g. `24h`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<String>,

    /// Visibility in the Cloudflare App Launcher. `Unset` defaults to
    /// visible.
    #[serde(default)]
    pub app_launcher_visible: Toggle,

    /// Bypass the Access login page for API requests.
    #[serde(default)]
    pub skip_interstitial: bool,
}

/// Configuration for a Cloudflare Access service token.
///
/// The controller creates the token and stores the generated client id and
/// secret in the referenced Kubernetes Secret; the secret material is only
/// visible at creation time.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTokenConfig {
    /// Token display name.
    pub name: String,

    /// Token validity period; Cloudflare only supports whole hours
    /// (e.g. `8760h` for one year).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Secret in which the generated credentials are stored.
    pub secret_ref: SecretRef,
}

/// Desired state of a `CloudflareAccessPolicy` resource.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "cfgate.firestoned.io",
    version = "v1alpha1",
    kind = "CloudflareAccessPolicy",
    namespaced,
    status = "CloudflareAccessPolicyStatus",
    shortname = "cfap",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Application","type":"string","jsonPath":".status.applicationId"}"#,
    printcolumn = r#"{"name":"Targets","type":"integer","jsonPath":".status.attachedTargets"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareAccessPolicySpec {
    /// Targets the policy attaches to.
    pub target_refs: Vec<PolicyTargetReference>,

    /// Cloudflare API credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloudflare: Option<CloudflareConfig>,

    /// Access Application settings.
    #[serde(default)]
    pub application: AccessApplicationConfig,

    /// Ordered access rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<AccessPolicyRule>,

    /// Service tokens for machine-to-machine authentication.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_tokens: Vec<ServiceTokenConfig>,
}

/// Per-target attachment status, mirroring `spec.targetRefs` 1:1.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAncestorStatus {
    /// The target this entry describes.
    pub ancestor_ref: PolicyTargetReference,

    /// Controller managing this attachment.
    pub controller_name: String,

    /// Whether the target was resolved and attached.
    pub resolved: bool,

    /// Error specific to this target when unresolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Observed state of a `CloudflareAccessPolicy` resource.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareAccessPolicyStatus {
    /// Cloudflare Access Application ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,

    /// Application Audience (AUD) tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_aud: Option<String>,

    /// Count of successfully attached targets.
    #[serde(default)]
    pub attached_targets: i32,

    /// Map of token names to Cloudflare service token ids.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_token_ids: BTreeMap<String, String>,

    /// Generation observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Latest available observations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Per-target status for each entry in `spec.targetRefs`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestors: Vec<PolicyAncestorStatus>,
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;

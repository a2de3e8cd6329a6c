// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the cfgate operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all cfgate CRDs
pub const API_GROUP: &str = "cfgate.firestoned.io";

/// API version for all cfgate CRDs
pub const API_VERSION: &str = "v1alpha1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "cfgate.firestoned.io/v1alpha1";

/// Kind name for `CloudflareTunnel` resource
pub const KIND_CLOUDFLARE_TUNNEL: &str = "CloudflareTunnel";

/// Kind name for `CloudflareDNS` resource
pub const KIND_CLOUDFLARE_DNS: &str = "CloudflareDNS";

/// Kind name for `CloudflareAccessPolicy` resource
pub const KIND_CLOUDFLARE_ACCESS_POLICY: &str = "CloudflareAccessPolicy";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer for `CloudflareTunnel` resources
pub const TUNNEL_FINALIZER: &str = "cloudflaretunnel.cfgate.firestoned.io/finalizer";

/// Finalizer for `CloudflareDNS` resources
pub const DNS_FINALIZER: &str = "cloudflaredns.cfgate.firestoned.io/finalizer";

/// Finalizer for `CloudflareAccessPolicy` resources
pub const ACCESS_POLICY_FINALIZER: &str = "cloudflareaccesspolicy.cfgate.firestoned.io/finalizer";

// ============================================================================
// Condition Types
// ============================================================================

/// Overall readiness of a resource
pub const CONDITION_READY: &str = "Ready";

/// Cloudflare API credentials have been validated
pub const CONDITION_CREDENTIALS_VALID: &str = "CredentialsValid";

/// The tunnel exists in Cloudflare (created or adopted)
pub const CONDITION_TUNNEL_CREATED: &str = "TunnelCreated";

/// The tunnel ingress configuration has been synced
pub const CONDITION_CONFIGURATION_SYNCED: &str = "ConfigurationSynced";

/// The DNS target (tunnel or external) has been resolved
pub const CONDITION_TARGET_RESOLVED: &str = "TargetResolved";

/// All configured DNS zones have been discovered
pub const CONDITION_ZONES_DISCOVERED: &str = "ZonesDiscovered";

/// DNS records have been synchronized to Cloudflare
pub const CONDITION_RECORDS_SYNCED: &str = "RecordsSynced";

/// All policy target references have been resolved
pub const CONDITION_TARGETS_RESOLVED: &str = "TargetsResolved";

/// The Access application exists in Cloudflare
pub const CONDITION_APPLICATION_CREATED: &str = "ApplicationCreated";

/// Access policy rules are attached to the application
pub const CONDITION_POLICIES_SYNCED: &str = "PoliciesSynced";

/// All service tokens have been created
pub const CONDITION_SERVICE_TOKENS_READY: &str = "ServiceTokensReady";

// ============================================================================
// Ownership Marker Constants
// ============================================================================

/// Heritage value identifying markers written by this operator
pub const OWNERSHIP_HERITAGE: &str = "cfgate";

/// Default prefix for companion TXT ownership records
pub const DEFAULT_TXT_OWNERSHIP_PREFIX: &str = "_cfgate";

/// Maximum length of a condition message before truncation
pub const MAX_CONDITION_MESSAGE_LEN: usize = 1024;

// ============================================================================
// Cloudflare API Constants
// ============================================================================

/// Base URL for the Cloudflare v4 API
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Suffix of the CNAME target domain derived from a tunnel id
pub const TUNNEL_DOMAIN_SUFFIX: &str = "cfargotunnel.com";

/// Fallback service used for the terminal catch-all ingress rule
pub const CATCH_ALL_SERVICE: &str = "http_status:404";

/// Default key name for the API token within a credentials secret
pub const DEFAULT_API_TOKEN_KEY: &str = "CLOUDFLARE_API_TOKEN";

/// Secret key for the generated service token client id
pub const SERVICE_TOKEN_CLIENT_ID_KEY: &str = "CF_ACCESS_CLIENT_ID";

/// Secret key for the generated service token client secret
pub const SERVICE_TOKEN_CLIENT_SECRET_KEY: &str = "CF_ACCESS_CLIENT_SECRET";

/// Default DNS record TTL (1 = auto, Cloudflare-managed)
pub const DEFAULT_DNS_RECORD_TTL: i32 = 1;

// ============================================================================
// Controller Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue duration while a resource is not yet ready (30 seconds)
pub const NOT_READY_REQUEUE_DURATION_SECS: u64 = 30;

/// Periodic resync interval for ready resources (5 minutes)
pub const READY_REQUEUE_DURATION_SECS: u64 = 300;

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";

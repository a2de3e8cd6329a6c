// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error taxonomy for Cloudflare API operations.
//!
//! Errors are classified so reconcilers can decide, without string matching,
//! whether to retry, re-query, or surface a terminal condition. Not-found is
//! deliberately *not* an error variant: read operations return
//! `Result<Option<T>, CloudflareError>` so callers are forced to handle the
//! absent case explicitly.

use thiserror::Error;

/// Errors from Cloudflare API operations.
#[derive(Error, Debug)]
pub enum CloudflareError {
    /// The API token was rejected (HTTP 401/403).
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// Detail from the API response.
        message: String,
    },

    /// The API rejected the request as invalid (HTTP 400/422).
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Detail from the API response.
        message: String,
    },

    /// An entity with the same identity already exists. Raised on create
    /// races; callers re-query and adopt the existing entity.
    #[error("entity already exists: {message}")]
    AlreadyExists {
        /// Detail from the API response.
        message: String,
    },

    /// The API rate limit was hit (HTTP 429).
    #[error("rate limited by Cloudflare API")]
    RateLimited {
        /// Server-suggested wait, when the response carried one.
        retry_after_secs: Option<u64>,
    },

    /// A server-side failure (HTTP 5xx).
    #[error("Cloudflare API server error (status {status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Detail from the API response.
        message: String,
    },

    /// The request could not reach the API or the response was cut short.
    #[error("network error talking to Cloudflare API: {0}")]
    Network(#[from] reqwest::Error),

    /// The response body did not parse as the expected envelope.
    #[error("unexpected Cloudflare API response: {message}")]
    UnexpectedResponse {
        /// What failed to parse.
        message: String,
    },

    /// A precondition in cfgate's own configuration failed (missing account,
    /// ambiguous zone, unresolvable reference).
    #[error("configuration error: {message}")]
    Configuration {
        /// What is wrong with the configuration.
        message: String,
    },
}

impl CloudflareError {
    /// Whether retrying the same request later can succeed without any
    /// change to the spec.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CloudflareError::RateLimited { .. }
                | CloudflareError::ServerError { .. }
                | CloudflareError::Network(_)
        )
    }

    /// Whether this error signals a create race on an already existing
    /// entity, which callers resolve by re-querying and adopting.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, CloudflareError::AlreadyExists { .. })
    }

    /// Whether the credentials themselves were rejected. Reconcilers
    /// invalidate the cached client for the secret when this is true.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, CloudflareError::AuthenticationFailed { .. })
    }

    /// Short CamelCase reason suitable for a status condition.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            CloudflareError::AuthenticationFailed { .. } => "AuthenticationFailed",
            CloudflareError::InvalidRequest { .. } => "InvalidRequest",
            CloudflareError::AlreadyExists { .. } => "AlreadyExists",
            CloudflareError::RateLimited { .. } => "RateLimited",
            CloudflareError::ServerError { .. } => "ServerError",
            CloudflareError::Network(_) => "NetworkError",
            CloudflareError::UnexpectedResponse { .. } => "UnexpectedResponse",
            CloudflareError::Configuration { .. } => "ConfigurationError",
        }
    }
}

/// Classify an HTTP error status plus the first API error message into a
/// `CloudflareError`.
///
/// Cloudflare reports duplicate-name creates as a 409 or as specific error
/// codes in a 400 envelope; both map to [`CloudflareError::AlreadyExists`].
#[must_use]
pub fn classify_status(status: u16, code: Option<i64>, message: &str) -> CloudflareError {
    // Duplicate-entity error codes observed from the tunnel, DNS and Access
    // endpoints.
    const DUPLICATE_CODES: &[i64] = &[1013, 81053, 81057, 12130];

    match status {
        401 | 403 => CloudflareError::AuthenticationFailed {
            message: message.to_string(),
        },
        409 => CloudflareError::AlreadyExists {
            message: message.to_string(),
        },
        429 => CloudflareError::RateLimited {
            retry_after_secs: None,
        },
        400 | 422 if code.is_some_and(|c| DUPLICATE_CODES.contains(&c)) => {
            CloudflareError::AlreadyExists {
                message: message.to_string(),
            }
        }
        400 | 422 => CloudflareError::InvalidRequest {
            message: message.to_string(),
        },
        s if s >= 500 => CloudflareError::ServerError {
            status: s,
            message: message.to_string(),
        },
        s => CloudflareError::UnexpectedResponse {
            message: format!("unhandled status {s}: {message}"),
        },
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;

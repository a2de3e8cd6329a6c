// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Bounded retry for Kubernetes API calls.
//!
//! Conflicts and transient API server failures are retried with jittered
//! exponential backoff; permanent errors fail on the first attempt. The
//! Cloudflare client carries its own retry loop; this one is only for the
//! kube API.

use rand::RngExt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Maximum attempts per kube API call (1 initial + 2 retries).
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for the exponential backoff.
const BASE_DELAY_MS: u64 = 200;

/// Cap on a single backoff delay.
const MAX_DELAY_MS: u64 = 5_000;

/// Whether a kube API error is worth retrying.
///
/// Conflicts (409) resolve on re-read, 429 and 5xx are server pressure,
/// and service errors cover connection resets.
#[must_use]
pub fn is_retryable(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(e) => matches!(e.code, 409 | 429 | 500 | 502 | 503 | 504),
        kube::Error::Service(_) | kube::Error::HyperError(_) => true,
        _ => false,
    }
}

/// Jittered exponential delay for a retry attempt.
fn backoff_delay(attempt: u32) -> Duration {
    let base = (BASE_DELAY_MS * 2u64.pow(attempt - 1)).min(MAX_DELAY_MS);
    let jitter = rand::rng().random_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

/// Run a kube API call with bounded retry.
///
/// `operation` names the call for logs. The closure is re-invoked for each
/// attempt, so captures must be `Fn`, not `FnOnce`.
///
/// # Errors
///
/// Returns the final error after retries are exhausted, or immediately for
/// non-retryable errors.
pub async fn retry_api_call<T, F, Fut>(operation: &str, mut call: F) -> Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Err(err) if is_retryable(&err) && attempt < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                warn!(
                    operation,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "retryable Kubernetes API error"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Condition aggregation and status patching.
//!
//! Conditions are merged functionally: [`merge_conditions`] takes the
//! existing list and a batch of updates and returns a new list, leaving its
//! inputs untouched. `last_transition_time` only moves when a condition's
//! status actually flips; reason and message refresh every time. Readiness
//! is computed deterministically from the other conditions, so the same
//! inputs always produce the same `Ready` condition.

use chrono::{SecondsFormat, Utc};
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

use crate::constants::{CONDITION_READY, MAX_CONDITION_MESSAGE_LEN};
use crate::crd::Condition;
use crate::reconcilers::retry::retry_api_call;

/// Current time in the RFC3339 form used for condition timestamps.
#[must_use]
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Bound a condition message, marking the cut when one happens.
#[must_use]
pub fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_CONDITION_MESSAGE_LEN {
        return message.to_string();
    }
    let mut cut = MAX_CONDITION_MESSAGE_LEN - 3;
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &message[..cut])
}

/// Build a condition stamped with the current time.
#[must_use]
pub fn new_condition(
    r#type: &str,
    ok: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) -> Condition {
    Condition {
        r#type: r#type.to_string(),
        status: if ok { "True" } else { "False" }.to_string(),
        reason: Some(reason.to_string()),
        message: Some(truncate_message(message)),
        last_transition_time: Some(now_rfc3339()),
        observed_generation,
    }
}

/// Merge condition updates into an existing list without mutating either.
///
/// For a type present in both: an unchanged status keeps the existing
/// `last_transition_time` while reason, message and observed generation
/// refresh from the update; a changed status takes the update whole.
/// Existing types without an update pass through; updates for new types
/// append in update order.
#[must_use]
pub fn merge_conditions(existing: &[Condition], updates: &[Condition]) -> Vec<Condition> {
    let mut merged: Vec<Condition> = existing
        .iter()
        .map(|current| {
            match updates.iter().find(|u| u.r#type == current.r#type) {
                Some(update) if update.status == current.status => Condition {
                    last_transition_time: current.last_transition_time.clone(),
                    ..update.clone()
                },
                Some(update) => update.clone(),
                None => current.clone(),
            }
        })
        .collect();

    for update in updates {
        if !existing.iter().any(|c| c.r#type == update.r#type) {
            merged.push(update.clone());
        }
    }
    merged
}

/// Compute the `Ready` condition from the other conditions.
///
/// True iff every required type is present with status True; otherwise
/// False, naming the first failing required type in declaration order (a
/// missing type counts as failing).
#[must_use]
pub fn compute_readiness(
    conditions: &[Condition],
    required: &[&str],
    observed_generation: Option<i64>,
) -> Condition {
    for req in required {
        let current = conditions.iter().find(|c| c.r#type == *req);
        match current {
            Some(c) if c.status == "True" => {}
            Some(c) => {
                let message = c
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{req} is {}", c.status));
                return new_condition(
                    CONDITION_READY,
                    false,
                    c.reason.as_deref().unwrap_or("NotReady"),
                    &format!("{req}: {message}"),
                    observed_generation,
                );
            }
            None => {
                return new_condition(
                    CONDITION_READY,
                    false,
                    "NotReady",
                    &format!("{req} has not been evaluated"),
                    observed_generation,
                );
            }
        }
    }
    new_condition(
        CONDITION_READY,
        true,
        "ReconciliationSucceeded",
        "all conditions are satisfied",
        observed_generation,
    )
}

/// Collects condition updates during one reconcile pass and folds them,
/// plus a computed `Ready`, into the existing conditions in a single step.
pub struct ConditionBatch {
    observed_generation: Option<i64>,
    updates: Vec<Condition>,
}

impl ConditionBatch {
    /// Start a batch for the given observed generation.
    #[must_use]
    pub fn new(observed_generation: Option<i64>) -> Self {
        Self {
            observed_generation,
            updates: Vec::new(),
        }
    }

    /// Record one condition update.
    pub fn set(&mut self, r#type: &str, ok: bool, reason: &str, message: &str) {
        self.updates
            .push(new_condition(r#type, ok, reason, message, self.observed_generation));
    }

    /// Whether every recorded condition is True.
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.updates.iter().all(|c| c.status == "True")
    }

    /// Merge into the existing conditions, appending `Ready` computed over
    /// `required`.
    #[must_use]
    pub fn finish(self, existing: &[Condition], required: &[&str]) -> Vec<Condition> {
        let merged = merge_conditions(existing, &self.updates);
        let ready = compute_readiness(&merged, required, self.observed_generation);
        merge_conditions(&merged, &[ready])
    }
}

/// Patch a resource's status subresource in one merge patch, with kube API
/// retry.
///
/// # Errors
///
/// Returns the kube API error after retries are exhausted.
pub async fn patch_status<K, S>(api: &Api<K>, name: &str, status: &S) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: Serialize + Sync,
{
    let body = json!({ "status": status });
    retry_api_call("patch_status", || async {
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&body))
            .await
    })
    .await?;
    debug!(%name, "patched status");
    Ok(())
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;

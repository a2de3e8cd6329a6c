// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Pure set-sync planner.
//!
//! Given a desired set and an observed set keyed the same way, produce the
//! operations that converge them while honoring the lifecycle policy and
//! ownership invariants:
//!
//! - a desired key with no observed counterpart is created
//! - an owned pair with content drift is updated (policy permitting)
//! - an owned pair without drift is reported as unchanged
//! - an unmarked pair is an adoption candidate, decided by the executor
//! - a foreign pair blocks its desired entry and is never touched
//! - an observed key with no desired counterpart is deleted only when the
//!   policy is `sync` *and* the record is owned
//!
//! Every desired entry lands in exactly one bucket, so the executor can
//! report a per-entry outcome without losing the blocked ones. Planning is
//! pure; applying the plan (and resolving create races) is the executor's
//! job.

use std::collections::BTreeMap;

use crate::crd::LifecyclePolicy;
use crate::ownership::Ownership;

/// The operations that converge an observed set onto a desired set.
#[derive(Debug)]
pub struct SyncPlan<D, O> {
    /// Desired entries with no observed counterpart.
    pub creates: Vec<D>,
    /// Owned observed entries whose content must change.
    pub updates: Vec<(O, D)>,
    /// Unmarked observed entries a desired entry wants; the executor adopts
    /// equivalent ones and reports the rest as occupied.
    pub adoptions: Vec<(O, D)>,
    /// Owned pairs needing no write: converged, or drifting under a policy
    /// that forbids updates.
    pub unchanged: Vec<(O, D)>,
    /// Desired entries whose observed counterpart cannot be written: held
    /// by a foreign owner, or unmarked under a policy that forbids adoption.
    pub blocked: Vec<(O, D)>,
    /// Owned observed entries nothing desires any more.
    pub deletes: Vec<O>,
    /// Stale foreign or unmarked entries; left untouched.
    pub skipped_foreign: Vec<O>,
}

impl<D, O> Default for SyncPlan<D, O> {
    fn default() -> Self {
        Self {
            creates: Vec::new(),
            updates: Vec::new(),
            adoptions: Vec::new(),
            unchanged: Vec::new(),
            blocked: Vec::new(),
            deletes: Vec::new(),
            skipped_foreign: Vec::new(),
        }
    }
}

impl<D, O> SyncPlan<D, O> {
    /// Whether the plan performs no writes at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.creates.is_empty()
            && self.updates.is_empty()
            && self.adoptions.is_empty()
            && self.deletes.is_empty()
    }
}

/// Plan the sync of `desired` onto `observed`.
///
/// `needs_update` reports content drift for an owned pair; pairs without
/// drift produce no operation at all.
pub fn plan_sync<D, O, K, FD, FO, FN, FW>(
    desired: Vec<D>,
    observed: Vec<O>,
    policy: LifecyclePolicy,
    desired_key: FD,
    observed_key: FO,
    needs_update: FN,
    ownership: FW,
) -> SyncPlan<D, O>
where
    K: Ord,
    FD: Fn(&D) -> K,
    FO: Fn(&O) -> K,
    FN: Fn(&D, &O) -> bool,
    FW: Fn(&O) -> Ownership,
{
    let mut plan = SyncPlan::default();
    let mut remaining: BTreeMap<K, O> = observed
        .into_iter()
        .map(|o| (observed_key(&o), o))
        .collect();

    for d in desired {
        match remaining.remove(&desired_key(&d)) {
            None => plan.creates.push(d),
            Some(o) => match ownership(&o) {
                Ownership::Owned => {
                    if policy.allows_update() && needs_update(&d, &o) {
                        plan.updates.push((o, d));
                    } else {
                        plan.unchanged.push((o, d));
                    }
                }
                Ownership::Unmarked => {
                    if policy.allows_update() {
                        plan.adoptions.push((o, d));
                    } else {
                        plan.blocked.push((o, d));
                    }
                }
                Ownership::Foreign { .. } => plan.blocked.push((o, d)),
            },
        }
    }

    for (_, o) in remaining {
        match ownership(&o) {
            Ownership::Owned if policy.allows_delete() => plan.deletes.push(o),
            Ownership::Owned => {}
            _ => plan.skipped_foreign.push(o),
        }
    }

    plan
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod sync_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconcilers for the cfgate CRDs.
//!
//! One controller per CRD, sharing the finalizer helpers, condition
//! aggregation, kube API retry, the pure set-sync planner, and the Gateway
//! API target resolver.

pub mod access;
pub mod dns;
pub mod finalizers;
pub mod status;
pub mod retry;
pub mod sync;
pub mod targets;
pub mod tunnel;

/// Error type handed to the controller's error policy.
///
/// Reconcilers work in `anyhow::Result` internally; the controller needs a
/// `std::error::Error`, so this transparent wrapper sits at the boundary.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ReconcileError(#[from] pub anyhow::Error);

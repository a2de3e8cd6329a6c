// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! cfgate is a Kubernetes operator for Cloudflare Tunnels, DNS, and Access.
//!
//! It reconciles three CRDs against the Cloudflare API:
//!
//! - [`crd::CloudflareTunnel`]: a named Cloudflare Tunnel with remotely
//!   managed ingress configuration
//! - [`crd::CloudflareDNS`]: DNS records pointing at a tunnel or external
//!   target, with external-dns style ownership tracking
//! - [`crd::CloudflareAccessPolicy`]: a zero-trust Access application with
//!   ordered policy rules, attached to Gateway API targets
//!
//! External state is adopted by name where it already exists and created
//! where it does not; deletion is finalizer-gated so Cloudflare state never
//! outlives the resource that declared it. Status conditions are the single
//! channel for reporting progress and failure.

pub mod cloudflare;
pub mod constants;
pub mod context;
pub mod crd;
pub mod credentials;
pub mod metrics;
pub mod ownership;
pub mod reconcilers;
pub mod rules;

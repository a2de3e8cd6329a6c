// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloudflare API integration.
//!
//! Split into a thin transport layer ([`client`]) behind capability traits,
//! domain services with idempotent semantics ([`tunnel`], [`access`]), the
//! wire types ([`types`]) and the error taxonomy ([`error`]).

pub mod access;
pub mod client;
pub mod error;
#[cfg(test)]
pub mod testing;
pub mod tunnel;
pub mod types;

pub use client::{AccessClient, AccountClient, CloudflareApi, DnsClient, TunnelClient};
pub use error::CloudflareError;

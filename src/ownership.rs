// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! DNS record ownership markers.
//!
//! Managed records carry a marker identifying the owning installation and
//! resource, stored either as a companion TXT record or in the Cloudflare
//! record comment field. Reconciliation only mutates or deletes records whose
//! marker matches; everything else is treated as foreign and left alone.
//!
//! The marker format is a comma-separated key/value list:
//!
//! ```text
//! heritage=cfgate,cfgate/owner=default/my-dns,cfgate/resource=CloudflareDNS/default/my-dns
//! ```

use crate::constants::{DEFAULT_TXT_OWNERSHIP_PREFIX, OWNERSHIP_HERITAGE};

/// Classification of an observed record relative to the reconciling owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Marker present and matches the reconciling owner id.
    Owned,
    /// Marker present but names a different owner.
    Foreign {
        /// The owner id found in the marker.
        owner_id: String,
    },
    /// No recognizable marker.
    Unmarked,
}

impl Ownership {
    /// True when the record may be mutated or deleted by this owner.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        matches!(self, Ownership::Owned)
    }
}

/// An ownership marker identifying the installation and resource that
/// manages a DNS record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnershipMarker {
    /// Installation identifier (defaults to the resource's `namespace/name`).
    pub owner_id: String,
    /// Kind of the owning resource.
    pub resource_kind: String,
    /// Namespace of the owning resource.
    pub resource_namespace: String,
    /// Name of the owning resource.
    pub resource_name: String,
}

impl OwnershipMarker {
    /// Build a marker for the given owner and resource coordinates.
    #[must_use]
    pub fn new(owner_id: &str, kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            resource_kind: kind.to_string(),
            resource_namespace: namespace.to_string(),
            resource_name: name.to_string(),
        }
    }

    /// Serialize the marker to its canonical string form.
    #[must_use]
    pub fn format(&self) -> String {
        format!(
            "heritage={heritage},{heritage}/owner={owner},{heritage}/resource={kind}/{ns}/{name}",
            heritage = OWNERSHIP_HERITAGE,
            owner = self.owner_id,
            kind = self.resource_kind,
            ns = self.resource_namespace,
            name = self.resource_name,
        )
    }

    /// Parse a marker from its string form.
    ///
    /// Returns `None` for strings that are not cfgate markers: a missing or
    /// mismatched heritage key, or a missing owner. Unknown keys are ignored
    /// so that newer controller versions can extend the format.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut heritage = None;
        let mut owner = None;
        let mut resource = None;

        for part in s.split(',') {
            let (key, value) = part.trim().split_once('=')?;
            match key {
                "heritage" => heritage = Some(value),
                k if k == format!("{OWNERSHIP_HERITAGE}/owner") => owner = Some(value),
                k if k == format!("{OWNERSHIP_HERITAGE}/resource") => resource = Some(value),
                _ => {}
            }
        }

        if heritage != Some(OWNERSHIP_HERITAGE) {
            return None;
        }
        let owner_id = owner?.to_string();

        let (kind, namespace, name) = match resource {
            Some(r) => {
                let mut it = r.splitn(3, '/');
                let kind = it.next().unwrap_or_default();
                let ns = it.next().unwrap_or_default();
                let name = it.next().unwrap_or_default();
                (kind.to_string(), ns.to_string(), name.to_string())
            }
            None => (String::new(), String::new(), String::new()),
        };

        Some(Self {
            owner_id,
            resource_kind: kind,
            resource_namespace: namespace,
            resource_name: name,
        })
    }

    /// Whether this marker and `expected` identify the same owner.
    ///
    /// Both the installation id and the full resource addressing must
    /// match; a marker from the same installation but another resource is
    /// still foreign.
    #[must_use]
    pub fn owns(&self, expected: &OwnershipMarker) -> bool {
        self == expected
    }
}

/// Classify an observed marker string against the reconciling owner.
///
/// `None` or unparseable content classifies as [`Ownership::Unmarked`].
#[must_use]
pub fn classify(marker: Option<&str>, expected: &OwnershipMarker) -> Ownership {
    match marker.and_then(OwnershipMarker::parse) {
        Some(m) if m.owns(expected) => Ownership::Owned,
        Some(m) => Ownership::Foreign {
            owner_id: m.owner_id,
        },
        None => Ownership::Unmarked,
    }
}

/// Name of the companion TXT record for a managed hostname.
///
/// The prefix is prepended as an extra leftmost label, e.g.
/// `app.example.com` becomes `_cfgate.app.example.com`.
#[must_use]
pub fn txt_companion_name(hostname: &str, prefix: Option<&str>) -> String {
    let prefix = prefix.unwrap_or(DEFAULT_TXT_OWNERSHIP_PREFIX);
    format!("{prefix}.{hostname}")
}

/// Hostname a companion TXT record tracks, if its name carries the prefix.
#[must_use]
pub fn txt_companion_target<'a>(txt_name: &'a str, prefix: Option<&str>) -> Option<&'a str> {
    let prefix = prefix.unwrap_or(DEFAULT_TXT_OWNERSHIP_PREFIX);
    txt_name
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|rest| !rest.is_empty())
}

#[cfg(test)]
#[path = "ownership_tests.rs"]
mod ownership_tests;

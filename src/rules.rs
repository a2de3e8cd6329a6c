// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Access rule ordering and predicate evaluation.
//!
//! Rules are applied in precedence order and each rule carries three
//! predicate groups with distinct combination semantics:
//!
//! - **include**: the rule applies if ANY include predicate matches
//! - **exclude**: the rule does not apply if ANY exclude predicate matches
//! - **require**: the rule applies only if ALL require predicates match
//!
//! Evaluation here mirrors how Cloudflare Access combines the groups; it is
//! used for dry-run validation and tests, while the authoritative evaluation
//! happens at the Cloudflare edge.

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::crd::{AccessDecision, AccessPolicyRule, AccessRulePredicate};

/// The identity and network attributes of a request principal, as visible
/// to rule predicates.
#[derive(Clone, Debug, Default)]
pub struct Principal {
    /// Verified email address, if authenticated via an identity provider.
    pub email: Option<String>,
    /// Source IP address.
    pub ip: Option<IpAddr>,
    /// Source country code (ISO 3166-1 alpha-2).
    pub country: Option<String>,
    /// Presented service token id, if any.
    pub service_token_id: Option<String>,
    /// OIDC claims keyed by `{identity_provider_id}/{claim_name}`.
    pub oidc_claims: BTreeMap<String, String>,
    /// Google Workspace groups keyed by identity provider id.
    pub gsuite_groups: BTreeMap<String, Vec<String>>,
    /// IP list ids the source address is known to belong to.
    pub ip_list_memberships: Vec<String>,
    /// Email list ids the principal is known to belong to.
    pub email_list_memberships: Vec<String>,
}

/// Order rules for application: ascending precedence, `None` last, ties
/// broken by declaration order.
///
/// The sort is stable, so rules without an explicit precedence keep their
/// declared relative order.
#[must_use]
pub fn order_rules(rules: &[AccessPolicyRule]) -> Vec<&AccessPolicyRule> {
    let mut ordered: Vec<&AccessPolicyRule> = rules.iter().collect();
    ordered.sort_by_key(|r| r.precedence.map_or(i64::from(i32::MAX) + 1, i64::from));
    ordered
}

/// Evaluate the ordered rule list against a principal.
///
/// The first rule that applies decides; when no rule applies the result is
/// [`AccessDecision::Deny`] (deny by default, as at the Cloudflare edge).
#[must_use]
pub fn evaluate(rules: &[AccessPolicyRule], principal: &Principal) -> AccessDecision {
    order_rules(rules)
        .into_iter()
        .find(|rule| rule_applies(rule, principal))
        .map_or(AccessDecision::Deny, |rule| rule.decision)
}

/// Whether a single rule applies to the principal.
#[must_use]
pub fn rule_applies(rule: &AccessPolicyRule, principal: &Principal) -> bool {
    let included =
        rule.include.is_empty() || rule.include.iter().any(|p| matches(p, principal));
    let excluded = rule.exclude.iter().any(|p| matches(p, principal));
    let required = rule.require.iter().all(|p| matches(p, principal));
    included && !excluded && required
}

/// Whether one predicate matches the principal.
#[must_use]
pub fn matches(predicate: &AccessRulePredicate, principal: &Principal) -> bool {
    match predicate {
        AccessRulePredicate::Everyone => true,
        AccessRulePredicate::Ip { ranges } => principal
            .ip
            .is_some_and(|addr| ranges.iter().any(|cidr| cidr_contains(cidr, addr))),
        AccessRulePredicate::IpList { id } => principal.ip_list_memberships.contains(id),
        AccessRulePredicate::Country { codes } => principal
            .country
            .as_deref()
            .is_some_and(|c| codes.iter().any(|code| code.eq_ignore_ascii_case(c))),
        AccessRulePredicate::ServiceToken { token_id } => {
            principal.service_token_id.as_deref() == Some(token_id)
        }
        AccessRulePredicate::AnyValidServiceToken => principal.service_token_id.is_some(),
        AccessRulePredicate::Email { addresses } => principal
            .email
            .as_deref()
            .is_some_and(|e| addresses.iter().any(|a| a.eq_ignore_ascii_case(e))),
        AccessRulePredicate::EmailList { id } => principal.email_list_memberships.contains(id),
        AccessRulePredicate::EmailDomain { domain } => principal
            .email
            .as_deref()
            .and_then(|e| e.rsplit_once('@'))
            .is_some_and(|(_, d)| d.eq_ignore_ascii_case(domain)),
        AccessRulePredicate::OidcClaim {
            identity_provider_id,
            claim_name,
            claim_value,
        } => principal
            .oidc_claims
            .get(&format!("{identity_provider_id}/{claim_name}"))
            .is_some_and(|v| v == claim_value),
        AccessRulePredicate::GsuiteGroup {
            identity_provider_id,
            email,
        } => principal
            .gsuite_groups
            .get(identity_provider_id)
            .is_some_and(|groups| groups.iter().any(|g| g.eq_ignore_ascii_case(email))),
    }
}

/// Whether a CIDR block (or bare address) contains the given address.
///
/// Malformed CIDR strings never match; validation is reported separately
/// at admission time.
#[must_use]
fn cidr_contains(cidr: &str, addr: IpAddr) -> bool {
    let (net, prefix) = match cidr.split_once('/') {
        Some((net, prefix)) => {
            let Ok(prefix) = prefix.parse::<u8>() else {
                return false;
            };
            (net, prefix)
        }
        None => (
            cidr,
            match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            },
        ),
    };
    let Ok(net) = net.parse::<IpAddr>() else {
        return false;
    };

    match (net, addr) {
        (IpAddr::V4(net), IpAddr::V4(addr)) => {
            if prefix > 32 {
                return false;
            }
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix))
            };
            (u32::from(net) & mask) == (u32::from(addr) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(addr)) => {
            if prefix > 128 {
                return false;
            }
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix))
            };
            (u128::from(net) & mask) == (u128::from(addr) & mask)
        }
        _ => false,
    }
}

/// Validate a rule list before sync: duplicate names and empty rules are
/// configuration errors surfaced in conditions rather than sent to the API.
pub fn validate_rules(rules: &[AccessPolicyRule]) -> Result<(), String> {
    let mut seen = std::collections::BTreeSet::new();
    for rule in rules {
        if rule.name.is_empty() {
            return Err("access rule with empty name".to_string());
        }
        if !seen.insert(rule.name.as_str()) {
            return Err(format!("duplicate access rule name: {}", rule.name));
        }
        if rule.include.is_empty() && rule.require.is_empty() {
            return Err(format!(
                "access rule {} has no include or require predicates",
                rule.name
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "rules_tests.rs"]
mod rules_tests;

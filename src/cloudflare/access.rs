// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Access application and policy service.
//!
//! Wraps an [`AccessClient`] with idempotent application adopt-or-create,
//! ordered policy synchronization, and service token provisioning. CRD rule
//! predicates are converted here into Cloudflare's one-object-per-matcher
//! wire form.

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cloudflare::client::AccessClient;
use crate::cloudflare::error::CloudflareError;
use crate::cloudflare::types::{
    AccessApplication, AccessApplicationParams, AccessPolicyParams, CreateServiceTokenRequest,
    ServiceToken,
};
use crate::crd::{AccessDecision, AccessPolicyRule, AccessRulePredicate};
use crate::rules::order_rules;

/// Wire string for a policy decision.
#[must_use]
pub fn decision_str(decision: AccessDecision) -> &'static str {
    match decision {
        AccessDecision::Allow => "allow",
        AccessDecision::Deny => "deny",
        AccessDecision::Bypass => "bypass",
        AccessDecision::NonIdentity => "non_identity",
    }
}

/// Expand one CRD predicate into Cloudflare matcher objects.
///
/// Multi-value predicates (ip ranges, emails, countries) expand to one
/// matcher per value, which is how the API represents OR within a group.
#[must_use]
pub fn predicate_matchers(predicate: &AccessRulePredicate) -> Vec<Value> {
    match predicate {
        AccessRulePredicate::Ip { ranges } => ranges
            .iter()
            .map(|r| json!({ "ip": { "ip": r } }))
            .collect(),
        AccessRulePredicate::IpList { id } => {
            vec![json!({ "ip_list": { "id": id } })]
        }
        AccessRulePredicate::Country { codes } => codes
            .iter()
            .map(|c| json!({ "geo": { "country_code": c } }))
            .collect(),
        AccessRulePredicate::Everyone => vec![json!({ "everyone": {} })],
        AccessRulePredicate::ServiceToken { token_id } => {
            vec![json!({ "service_token": { "token_id": token_id } })]
        }
        AccessRulePredicate::AnyValidServiceToken => {
            vec![json!({ "any_valid_service_token": {} })]
        }
        AccessRulePredicate::Email { addresses } => addresses
            .iter()
            .map(|a| json!({ "email": { "email": a } }))
            .collect(),
        AccessRulePredicate::EmailList { id } => {
            vec![json!({ "email_list": { "id": id } })]
        }
        AccessRulePredicate::EmailDomain { domain } => {
            vec![json!({ "email_domain": { "domain": domain } })]
        }
        AccessRulePredicate::OidcClaim {
            identity_provider_id,
            claim_name,
            claim_value,
        } => vec![json!({
            "oidc": {
                "identity_provider_id": identity_provider_id,
                "claim_name": claim_name,
                "claim_value": claim_value,
            }
        })],
        AccessRulePredicate::GsuiteGroup {
            identity_provider_id,
            email,
        } => vec![json!({
            "gsuite": {
                "identity_provider_id": identity_provider_id,
                "email": email,
            }
        })],
    }
}

fn group_matchers(predicates: &[AccessRulePredicate]) -> Vec<Value> {
    predicates.iter().flat_map(predicate_matchers).collect()
}

/// Build the wire policy for one ordered rule.
///
/// `position` is the rule's index in application order and becomes its
/// precedence when the rule does not carry an explicit one.
#[must_use]
pub fn policy_params(rule: &AccessPolicyRule, position: usize) -> AccessPolicyParams {
    AccessPolicyParams {
        name: rule.name.clone(),
        decision: decision_str(rule.decision).to_string(),
        precedence: rule
            .precedence
            .unwrap_or_else(|| i32::try_from(position + 1).unwrap_or(i32::MAX)),
        include: group_matchers(&rule.include),
        exclude: group_matchers(&rule.exclude),
        require: group_matchers(&rule.require),
        session_duration: rule.session_duration.clone(),
    }
}

/// Result of a policy sync pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PolicySyncOutcome {
    /// Policies created.
    pub created: usize,
    /// Policies updated in place.
    pub updated: usize,
    /// Stale policies removed.
    pub deleted: usize,
}

/// Idempotent Access operations over an [`AccessClient`].
pub struct AccessService<'a> {
    client: &'a dyn AccessClient,
}

impl<'a> AccessService<'a> {
    /// Wrap a client.
    #[must_use]
    pub fn new(client: &'a dyn AccessClient) -> Self {
        Self { client }
    }

    /// Resolve the application for a domain, creating it if absent, and
    /// converge its settings.
    ///
    /// An application already protecting the domain is adopted and updated
    /// in place; a lost create race falls back to re-query-and-adopt.
    ///
    /// # Errors
    ///
    /// Returns the underlying API error.
    pub async fn ensure_application(
        &self,
        account_id: &str,
        params: &AccessApplicationParams,
    ) -> Result<AccessApplication, CloudflareError> {
        if let Some(existing) = self
            .client
            .find_application_by_domain(account_id, &params.domain)
            .await?
        {
            debug!(app_id = %existing.id, domain = %params.domain, "adopted access application");
            return self
                .client
                .update_application(account_id, &existing.id, params)
                .await;
        }

        match self.client.create_application(account_id, params).await {
            Ok(app) => {
                info!(app_id = %app.id, domain = %params.domain, "created access application");
                Ok(app)
            }
            Err(err) if err.is_conflict() => {
                let existing = self
                    .client
                    .find_application_by_domain(account_id, &params.domain)
                    .await?
                    .ok_or(err)?;
                self.client
                    .update_application(account_id, &existing.id, params)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    /// Converge the application's policies with the ordered rule list.
    ///
    /// Policies are matched by name: missing ones are created, existing
    /// ones rewritten (listings do not expose rule groups, so drift is not
    /// detectable without a write), and policies whose name no longer
    /// appears in the rules are deleted.
    ///
    /// # Errors
    ///
    /// Returns the first API error encountered.
    pub async fn sync_policies(
        &self,
        account_id: &str,
        app_id: &str,
        rules: &[AccessPolicyRule],
    ) -> Result<PolicySyncOutcome, CloudflareError> {
        let existing = self.client.list_policies(account_id, app_id).await?;
        let ordered = order_rules(rules);
        let mut outcome = PolicySyncOutcome::default();

        for (position, rule) in ordered.iter().enumerate() {
            let params = policy_params(rule, position);
            match existing.iter().find(|p| p.name == rule.name) {
                Some(current) => {
                    self.client
                        .update_policy(account_id, app_id, &current.id, &params)
                        .await?;
                    outcome.updated += 1;
                }
                None => {
                    self.client
                        .create_policy(account_id, app_id, &params)
                        .await?;
                    outcome.created += 1;
                }
            }
        }

        for stale in existing
            .iter()
            .filter(|p| !rules.iter().any(|r| r.name == p.name))
        {
            self.client
                .delete_policy(account_id, app_id, &stale.id)
                .await?;
            outcome.deleted += 1;
        }

        info!(
            %app_id,
            created = outcome.created,
            updated = outcome.updated,
            deleted = outcome.deleted,
            "synced access policies"
        );
        Ok(outcome)
    }

    /// Resolve a service token by name, creating it if absent.
    ///
    /// Returns the token and whether it was created in this call. Only a
    /// freshly created token carries the client secret; for an adopted
    /// token the caller must already hold the stored credentials.
    ///
    /// # Errors
    ///
    /// Returns the underlying API error.
    pub async fn ensure_service_token(
        &self,
        account_id: &str,
        name: &str,
        duration: Option<&str>,
    ) -> Result<(ServiceToken, bool), CloudflareError> {
        let existing = self.client.list_service_tokens(account_id).await?;
        if let Some(token) = existing.into_iter().find(|t| t.name == name) {
            debug!(token_id = %token.id, %name, "adopted service token");
            return Ok((token, false));
        }

        let request = CreateServiceTokenRequest {
            name: name.to_string(),
            duration: duration.map(str::to_string),
        };
        let token = self
            .client
            .create_service_token(account_id, &request)
            .await?;
        info!(token_id = %token.id, %name, "created service token");
        Ok((token, true))
    }
}

#[cfg(test)]
#[path = "access_tests.rs"]
mod access_tests;

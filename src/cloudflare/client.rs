// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloudflare API client.
//!
//! The API surface is split into capability traits (`AccountClient`,
//! `TunnelClient`, `DnsClient`, `AccessClient`) so services and reconcilers
//! depend only on the operations they use and tests can substitute in-memory
//! fakes per capability. [`HttpCloudflareClient`] implements all four against
//! the v4 REST API with bounded retry for transient failures.
//!
//! Read operations return `Result<Option<T>, CloudflareError>`: a missing
//! entity is `Ok(None)`, never an error.

use async_trait::async_trait;
use rand::RngExt;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::cloudflare::error::{classify_status, CloudflareError};
use crate::cloudflare::types::{
    AccessApplication, AccessApplicationParams, AccessPolicy, AccessPolicyParams, Account,
    ApiEnvelope, CreateServiceTokenRequest, CreateTunnelRequest, DnsRecord, DnsRecordParams,
    ServiceToken, Tunnel, TunnelConfig, TunnelConfigResult, TunnelConnection, Zone,
};
use crate::constants::CLOUDFLARE_API_BASE;

/// Maximum attempts per API request (1 initial + 2 retries).
const MAX_API_ATTEMPTS: u32 = 3;

/// Base delay for the exponential retry backoff.
const RETRY_BASE_DELAY_MS: u64 = 250;

/// Account-level operations: token verification, account and zone lookup.
#[async_trait]
pub trait AccountClient: Send + Sync {
    /// Verify the API token is valid and active.
    async fn verify_token(&self) -> Result<(), CloudflareError>;

    /// Find an account by its display name.
    async fn find_account_by_name(&self, name: &str)
        -> Result<Option<Account>, CloudflareError>;

    /// Find a zone by its exact domain name.
    async fn find_zone_by_name(&self, name: &str) -> Result<Option<Zone>, CloudflareError>;
}

/// Tunnel lifecycle and configuration operations.
#[async_trait]
pub trait TunnelClient: Send + Sync {
    /// Find a live (non-deleted) tunnel by name.
    async fn find_tunnel_by_name(
        &self,
        account_id: &str,
        name: &str,
    ) -> Result<Option<Tunnel>, CloudflareError>;

    /// Fetch a tunnel by id.
    async fn get_tunnel(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<Option<Tunnel>, CloudflareError>;

    /// Create a remotely managed tunnel.
    async fn create_tunnel(
        &self,
        account_id: &str,
        name: &str,
    ) -> Result<Tunnel, CloudflareError>;

    /// Delete a tunnel.
    async fn delete_tunnel(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<(), CloudflareError>;

    /// List active connections of a tunnel.
    async fn list_tunnel_connections(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<Vec<TunnelConnection>, CloudflareError>;

    /// Drop all active connections of a tunnel.
    async fn delete_tunnel_connections(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<(), CloudflareError>;

    /// Fetch the remotely managed configuration of a tunnel.
    async fn get_tunnel_configuration(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<Option<TunnelConfig>, CloudflareError>;

    /// Replace the remotely managed configuration of a tunnel.
    async fn put_tunnel_configuration(
        &self,
        account_id: &str,
        tunnel_id: &str,
        config: &TunnelConfig,
    ) -> Result<(), CloudflareError>;
}

/// DNS record operations within a zone.
#[async_trait]
pub trait DnsClient: Send + Sync {
    /// List records in a zone, optionally filtered by exact name.
    async fn list_records(
        &self,
        zone_id: &str,
        name: Option<&str>,
    ) -> Result<Vec<DnsRecord>, CloudflareError>;

    /// Create a record.
    async fn create_record(
        &self,
        zone_id: &str,
        params: &DnsRecordParams,
    ) -> Result<DnsRecord, CloudflareError>;

    /// Overwrite a record.
    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        params: &DnsRecordParams,
    ) -> Result<DnsRecord, CloudflareError>;

    /// Delete a record.
    async fn delete_record(&self, zone_id: &str, record_id: &str)
        -> Result<(), CloudflareError>;
}

/// Access application, policy, and service token operations.
#[async_trait]
pub trait AccessClient: Send + Sync {
    /// Find an Access application by its protected domain.
    async fn find_application_by_domain(
        &self,
        account_id: &str,
        domain: &str,
    ) -> Result<Option<AccessApplication>, CloudflareError>;

    /// Create an Access application.
    async fn create_application(
        &self,
        account_id: &str,
        params: &AccessApplicationParams,
    ) -> Result<AccessApplication, CloudflareError>;

    /// Update an Access application.
    async fn update_application(
        &self,
        account_id: &str,
        app_id: &str,
        params: &AccessApplicationParams,
    ) -> Result<AccessApplication, CloudflareError>;

    /// Delete an Access application.
    async fn delete_application(
        &self,
        account_id: &str,
        app_id: &str,
    ) -> Result<(), CloudflareError>;

    /// List policies attached to an application.
    async fn list_policies(
        &self,
        account_id: &str,
        app_id: &str,
    ) -> Result<Vec<AccessPolicy>, CloudflareError>;

    /// Create a policy on an application.
    async fn create_policy(
        &self,
        account_id: &str,
        app_id: &str,
        params: &AccessPolicyParams,
    ) -> Result<AccessPolicy, CloudflareError>;

    /// Update a policy on an application.
    async fn update_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy_id: &str,
        params: &AccessPolicyParams,
    ) -> Result<AccessPolicy, CloudflareError>;

    /// Delete a policy from an application.
    async fn delete_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy_id: &str,
    ) -> Result<(), CloudflareError>;

    /// List service tokens in the account.
    async fn list_service_tokens(
        &self,
        account_id: &str,
    ) -> Result<Vec<ServiceToken>, CloudflareError>;

    /// Create a service token. The response carries the client secret,
    /// which is never retrievable again.
    async fn create_service_token(
        &self,
        account_id: &str,
        request: &CreateServiceTokenRequest,
    ) -> Result<ServiceToken, CloudflareError>;

    /// Delete a service token.
    async fn delete_service_token(
        &self,
        account_id: &str,
        token_id: &str,
    ) -> Result<(), CloudflareError>;
}

/// The full Cloudflare API surface cfgate needs, as one object-safe bound.
pub trait CloudflareApi: AccountClient + TunnelClient + DnsClient + AccessClient {}

impl<T: AccountClient + TunnelClient + DnsClient + AccessClient> CloudflareApi for T {}

/// HTTP implementation of the capability traits against the Cloudflare v4
/// REST API.
///
/// Transient failures (network, 5xx, 429) are retried with jittered
/// exponential backoff up to [`MAX_API_ATTEMPTS`]; everything else fails
/// fast with a classified error.
pub struct HttpCloudflareClient {
    http: reqwest::Client,
    base_url: Url,
    api_token: String,
}

impl HttpCloudflareClient {
    /// Build a client for the production API endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(api_token: &str) -> Result<Self, CloudflareError> {
        Self::with_base_url(api_token, CLOUDFLARE_API_BASE)
    }

    /// Build a client against a custom base URL (used by tests).
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn with_base_url(api_token: &str, base_url: &str) -> Result<Self, CloudflareError> {
        // Url::join drops the last path segment unless the base ends in '/'.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&normalized).map_err(|e| CloudflareError::Configuration {
                message: format!("invalid API base URL {base_url}: {e}"),
            })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_token: api_token.to_string(),
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, CloudflareError> {
        let mut url =
            self.base_url
                .join(path.trim_start_matches('/'))
                .map_err(|e| CloudflareError::Configuration {
                    message: format!("invalid API path {path}: {e}"),
                })?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().copied());
        }
        Ok(url)
    }

    /// Send one request with retry, returning the parsed `result` payload.
    ///
    /// `Ok(None)` means HTTP 404: the entity does not exist.
    async fn send<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Option<T>, CloudflareError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let url = self.url(path, query)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(method.clone(), url.clone(), body).await {
                Err(err) if err.is_transient() && attempt < MAX_API_ATTEMPTS => {
                    let delay = retry_delay(attempt, &err);
                    warn!(
                        %url,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "transient Cloudflare API error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn send_once<T, B>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<Option<T>, CloudflareError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.api_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let text = response.text().await?;
        let envelope: ApiEnvelope<T> = serde_json::from_str(&text).map_err(|e| {
            CloudflareError::UnexpectedResponse {
                message: format!("status {status}: {e}"),
            }
        })?;

        if status.is_success() && envelope.success {
            return match envelope.result {
                Some(result) => Ok(Some(result)),
                None => Err(CloudflareError::UnexpectedResponse {
                    message: "success envelope without result".to_string(),
                }),
            };
        }

        let first = envelope.errors.first();
        let code = first.and_then(|e| e.code);
        let message = first.map_or_else(
            || format!("HTTP {status}"),
            |e| e.message.clone(),
        );
        debug!(status = status.as_u16(), ?code, %message, "Cloudflare API error");
        let mut err = classify_status(status.as_u16(), code, &message);
        if let CloudflareError::RateLimited {
            retry_after_secs, ..
        } = &mut err
        {
            *retry_after_secs = retry_after;
        }
        Err(err)
    }

    /// Like [`Self::send`] for DELETE endpoints where a 404 means the work
    /// is already done.
    async fn delete_idempotent(&self, path: &str) -> Result<(), CloudflareError> {
        let _: Option<serde_json::Value> = self
            .send(Method::DELETE, path, &[], None::<&()>)
            .await?;
        Ok(())
    }
}

/// Jittered exponential delay for a retry attempt, honoring a server-sent
/// Retry-After when present.
fn retry_delay(attempt: u32, err: &CloudflareError) -> Duration {
    if let CloudflareError::RateLimited {
        retry_after_secs: Some(secs),
    } = err
    {
        return Duration::from_secs(*secs);
    }
    let base = RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1);
    let jitter = rand::rng().random_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

#[async_trait]
impl AccountClient for HttpCloudflareClient {
    async fn verify_token(&self) -> Result<(), CloudflareError> {
        let _: Option<serde_json::Value> = self
            .send(Method::GET, "user/tokens/verify", &[], None::<&()>)
            .await?;
        Ok(())
    }

    async fn find_account_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Account>, CloudflareError> {
        let accounts: Vec<Account> = self
            .send(Method::GET, "accounts", &[("name", name)], None::<&()>)
            .await?
            .unwrap_or_default();
        Ok(accounts.into_iter().find(|a| a.name == name))
    }

    async fn find_zone_by_name(&self, name: &str) -> Result<Option<Zone>, CloudflareError> {
        let zones: Vec<Zone> = self
            .send(Method::GET, "zones", &[("name", name)], None::<&()>)
            .await?
            .unwrap_or_default();
        Ok(zones.into_iter().find(|z| z.name == name))
    }
}

#[async_trait]
impl TunnelClient for HttpCloudflareClient {
    async fn find_tunnel_by_name(
        &self,
        account_id: &str,
        name: &str,
    ) -> Result<Option<Tunnel>, CloudflareError> {
        // The listing includes soft-deleted tunnels with the same name;
        // is_deleted=false filters server-side, is_live guards client-side.
        let tunnels: Vec<Tunnel> = self
            .send(
                Method::GET,
                &format!("accounts/{account_id}/cfd_tunnel"),
                &[("name", name), ("is_deleted", "false")],
                None::<&()>,
            )
            .await?
            .unwrap_or_default();
        Ok(tunnels.into_iter().find(|t| t.name == name && t.is_live()))
    }

    async fn get_tunnel(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<Option<Tunnel>, CloudflareError> {
        self.send(
            Method::GET,
            &format!("accounts/{account_id}/cfd_tunnel/{tunnel_id}"),
            &[],
            None::<&()>,
        )
        .await
    }

    async fn create_tunnel(
        &self,
        account_id: &str,
        name: &str,
    ) -> Result<Tunnel, CloudflareError> {
        let request = CreateTunnelRequest {
            name: name.to_string(),
            config_src: "cloudflare".to_string(),
        };
        self.send(
            Method::POST,
            &format!("accounts/{account_id}/cfd_tunnel"),
            &[],
            Some(&request),
        )
        .await?
        .ok_or_else(|| CloudflareError::UnexpectedResponse {
            message: "tunnel create returned no tunnel".to_string(),
        })
    }

    async fn delete_tunnel(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<(), CloudflareError> {
        self.delete_idempotent(&format!("accounts/{account_id}/cfd_tunnel/{tunnel_id}"))
            .await
    }

    async fn list_tunnel_connections(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<Vec<TunnelConnection>, CloudflareError> {
        Ok(self
            .send(
                Method::GET,
                &format!("accounts/{account_id}/cfd_tunnel/{tunnel_id}/connections"),
                &[],
                None::<&()>,
            )
            .await?
            .unwrap_or_default())
    }

    async fn delete_tunnel_connections(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<(), CloudflareError> {
        self.delete_idempotent(&format!(
            "accounts/{account_id}/cfd_tunnel/{tunnel_id}/connections"
        ))
        .await
    }

    async fn get_tunnel_configuration(
        &self,
        account_id: &str,
        tunnel_id: &str,
    ) -> Result<Option<TunnelConfig>, CloudflareError> {
        let result: Option<TunnelConfigResult> = self
            .send(
                Method::GET,
                &format!("accounts/{account_id}/cfd_tunnel/{tunnel_id}/configurations"),
                &[],
                None::<&()>,
            )
            .await?;
        Ok(result.map(|r| r.config))
    }

    async fn put_tunnel_configuration(
        &self,
        account_id: &str,
        tunnel_id: &str,
        config: &TunnelConfig,
    ) -> Result<(), CloudflareError> {
        let body = TunnelConfigResult {
            config: config.clone(),
        };
        let _: Option<serde_json::Value> = self
            .send(
                Method::PUT,
                &format!("accounts/{account_id}/cfd_tunnel/{tunnel_id}/configurations"),
                &[],
                Some(&body),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DnsClient for HttpCloudflareClient {
    async fn list_records(
        &self,
        zone_id: &str,
        name: Option<&str>,
    ) -> Result<Vec<DnsRecord>, CloudflareError> {
        let mut query: Vec<(&str, &str)> = vec![("per_page", "5000")];
        if let Some(name) = name {
            query.push(("name", name));
        }
        Ok(self
            .send(
                Method::GET,
                &format!("zones/{zone_id}/dns_records"),
                &query,
                None::<&()>,
            )
            .await?
            .unwrap_or_default())
    }

    async fn create_record(
        &self,
        zone_id: &str,
        params: &DnsRecordParams,
    ) -> Result<DnsRecord, CloudflareError> {
        self.send(
            Method::POST,
            &format!("zones/{zone_id}/dns_records"),
            &[],
            Some(params),
        )
        .await?
        .ok_or_else(|| CloudflareError::UnexpectedResponse {
            message: "record create returned no record".to_string(),
        })
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        params: &DnsRecordParams,
    ) -> Result<DnsRecord, CloudflareError> {
        self.send(
            Method::PUT,
            &format!("zones/{zone_id}/dns_records/{record_id}"),
            &[],
            Some(params),
        )
        .await?
        .ok_or_else(|| CloudflareError::UnexpectedResponse {
            message: "record update returned no record".to_string(),
        })
    }

    async fn delete_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<(), CloudflareError> {
        self.delete_idempotent(&format!("zones/{zone_id}/dns_records/{record_id}"))
            .await
    }
}

#[async_trait]
impl AccessClient for HttpCloudflareClient {
    async fn find_application_by_domain(
        &self,
        account_id: &str,
        domain: &str,
    ) -> Result<Option<AccessApplication>, CloudflareError> {
        let apps: Vec<AccessApplication> = self
            .send(
                Method::GET,
                &format!("accounts/{account_id}/access/apps"),
                &[("domain", domain)],
                None::<&()>,
            )
            .await?
            .unwrap_or_default();
        Ok(apps.into_iter().find(|a| a.domain == domain))
    }

    async fn create_application(
        &self,
        account_id: &str,
        params: &AccessApplicationParams,
    ) -> Result<AccessApplication, CloudflareError> {
        self.send(
            Method::POST,
            &format!("accounts/{account_id}/access/apps"),
            &[],
            Some(params),
        )
        .await?
        .ok_or_else(|| CloudflareError::UnexpectedResponse {
            message: "application create returned no application".to_string(),
        })
    }

    async fn update_application(
        &self,
        account_id: &str,
        app_id: &str,
        params: &AccessApplicationParams,
    ) -> Result<AccessApplication, CloudflareError> {
        self.send(
            Method::PUT,
            &format!("accounts/{account_id}/access/apps/{app_id}"),
            &[],
            Some(params),
        )
        .await?
        .ok_or_else(|| CloudflareError::UnexpectedResponse {
            message: "application update returned no application".to_string(),
        })
    }

    async fn delete_application(
        &self,
        account_id: &str,
        app_id: &str,
    ) -> Result<(), CloudflareError> {
        self.delete_idempotent(&format!("accounts/{account_id}/access/apps/{app_id}"))
            .await
    }

    async fn list_policies(
        &self,
        account_id: &str,
        app_id: &str,
    ) -> Result<Vec<AccessPolicy>, CloudflareError> {
        Ok(self
            .send(
                Method::GET,
                &format!("accounts/{account_id}/access/apps/{app_id}/policies"),
                &[],
                None::<&()>,
            )
            .await?
            .unwrap_or_default())
    }

    async fn create_policy(
        &self,
        account_id: &str,
        app_id: &str,
        params: &AccessPolicyParams,
    ) -> Result<AccessPolicy, CloudflareError> {
        self.send(
            Method::POST,
            &format!("accounts/{account_id}/access/apps/{app_id}/policies"),
            &[],
            Some(params),
        )
        .await?
        .ok_or_else(|| CloudflareError::UnexpectedResponse {
            message: "policy create returned no policy".to_string(),
        })
    }

    async fn update_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy_id: &str,
        params: &AccessPolicyParams,
    ) -> Result<AccessPolicy, CloudflareError> {
        self.send(
            Method::PUT,
            &format!("accounts/{account_id}/access/apps/{app_id}/policies/{policy_id}"),
            &[],
            Some(params),
        )
        .await?
        .ok_or_else(|| CloudflareError::UnexpectedResponse {
            message: "policy update returned no policy".to_string(),
        })
    }

    async fn delete_policy(
        &self,
        account_id: &str,
        app_id: &str,
        policy_id: &str,
    ) -> Result<(), CloudflareError> {
        self.delete_idempotent(&format!(
            "accounts/{account_id}/access/apps/{app_id}/policies/{policy_id}"
        ))
        .await
    }

    async fn list_service_tokens(
        &self,
        account_id: &str,
    ) -> Result<Vec<ServiceToken>, CloudflareError> {
        Ok(self
            .send(
                Method::GET,
                &format!("accounts/{account_id}/access/service_tokens"),
                &[],
                None::<&()>,
            )
            .await?
            .unwrap_or_default())
    }

    async fn create_service_token(
        &self,
        account_id: &str,
        request: &CreateServiceTokenRequest,
    ) -> Result<ServiceToken, CloudflareError> {
        self.send(
            Method::POST,
            &format!("accounts/{account_id}/access/service_tokens"),
            &[],
            Some(request),
        )
        .await?
        .ok_or_else(|| CloudflareError::UnexpectedResponse {
            message: "service token create returned no token".to_string(),
        })
    }

    async fn delete_service_token(
        &self,
        account_id: &str,
        token_id: &str,
    ) -> Result<(), CloudflareError> {
        self.delete_idempotent(&format!(
            "accounts/{account_id}/access/service_tokens/{token_id}"
        ))
        .await
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory fake of the Cloudflare API for tests.
//!
//! Keeps a small world of tunnels, records, applications and tokens behind
//! mutexes, with knobs to inject duplicate-entity races and token
//! verification failures.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::cloudflare::client::{AccessClient, AccountClient, DnsClient, TunnelClient};
use crate::cloudflare::error::CloudflareError;
use crate::cloudflare::types::{
    AccessApplication, AccessApplicationParams, AccessPolicy, AccessPolicyParams, Account,
    CreateServiceTokenRequest, DnsRecord, DnsRecordParams, ServiceToken, Tunnel, TunnelConfig,
    TunnelConnection, Zone,
};

/// Fake Cloudflare world.
#[derive(Default)]
pub struct FakeCloudflare {
    next_id: AtomicU32,
    pub verify_calls: AtomicU32,
    pub fail_verify: Mutex<bool>,
    pub accounts: Mutex<Vec<Account>>,
    pub zones: Mutex<Vec<Zone>>,
    pub tunnels: Mutex<Vec<Tunnel>>,
    pub tunnel_configs: Mutex<HashMap<String, TunnelConfig>>,
    pub tunnel_connections: Mutex<HashMap<String, Vec<TunnelConnection>>>,
    /// Fail the next N tunnel creates with a duplicate-entity error.
    pub tunnel_create_conflicts: AtomicU32,
    pub create_tunnel_calls: AtomicU32,
    pub config_puts: AtomicU32,
    /// Records per zone id.
    pub records: Mutex<HashMap<String, Vec<DnsRecord>>>,
    /// Fail the next N record creates with a duplicate-entity error.
    pub record_create_conflicts: AtomicU32,
    pub applications: Mutex<Vec<AccessApplication>>,
    /// Policies per application id.
    pub policies: Mutex<HashMap<String, Vec<AccessPolicy>>>,
    pub tokens: Mutex<Vec<ServiceToken>>,
}

impl FakeCloudflare {
    pub fn new() -> Self {
        Self::default()
    }

    fn id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn with_zone(self, id: &str, name: &str) -> Self {
        self.zones.lock().unwrap().push(Zone {
            id: id.to_string(),
            name: name.to_string(),
            status: "active".to_string(),
        });
        self
    }

    pub fn seed_record(&self, zone_id: &str, record: DnsRecord) {
        self.records
            .lock()
            .unwrap()
            .entry(zone_id.to_string())
            .or_default()
            .push(record);
    }

    pub fn zone_records(&self, zone_id: &str) -> Vec<DnsRecord> {
        self.records
            .lock()
            .unwrap()
            .get(zone_id)
            .cloned()
            .unwrap_or_default()
    }

    fn conflict(message: &str) -> CloudflareError {
        CloudflareError::AlreadyExists {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl AccountClient for FakeCloudflare {
    async fn verify_token(&self) -> Result<(), CloudflareError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_verify.lock().unwrap() {
            return Err(CloudflareError::AuthenticationFailed {
                message: "invalid token".to_string(),
            });
        }
        Ok(())
    }

    async fn find_account_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Account>, CloudflareError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.name == name)
            .cloned())
    }

    async fn find_zone_by_name(&self, name: &str) -> Result<Option<Zone>, CloudflareError> {
        Ok(self
            .zones
            .lock()
            .unwrap()
            .iter()
            .find(|z| z.name == name)
            .cloned())
    }
}

#[async_trait]
impl TunnelClient for FakeCloudflare {
    async fn find_tunnel_by_name(
        &self,
        _account_id: &str,
        name: &str,
    ) -> Result<Option<Tunnel>, CloudflareError> {
        Ok(self
            .tunnels
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.name == name && t.is_live())
            .cloned())
    }

    async fn get_tunnel(
        &self,
        _account_id: &str,
        tunnel_id: &str,
    ) -> Result<Option<Tunnel>, CloudflareError> {
        Ok(self
            .tunnels
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == tunnel_id)
            .cloned())
    }

    async fn create_tunnel(
        &self,
        _account_id: &str,
        name: &str,
    ) -> Result<Tunnel, CloudflareError> {
        self.create_tunnel_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .tunnel_create_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            // Simulate losing the race: the other creator's tunnel appears.
            let winner = Tunnel {
                id: self.id("tun"),
                name: name.to_string(),
                status: None,
                deleted_at: None,
                config_src: Some("cloudflare".to_string()),
            };
            self.tunnels.lock().unwrap().push(winner);
            return Err(Self::conflict("tunnel with this name already exists"));
        }
        let tunnel = Tunnel {
            id: self.id("tun"),
            name: name.to_string(),
            status: None,
            deleted_at: None,
            config_src: Some("cloudflare".to_string()),
        };
        self.tunnels.lock().unwrap().push(tunnel.clone());
        Ok(tunnel)
    }

    async fn delete_tunnel(
        &self,
        _account_id: &str,
        tunnel_id: &str,
    ) -> Result<(), CloudflareError> {
        self.tunnels.lock().unwrap().retain(|t| t.id != tunnel_id);
        Ok(())
    }

    async fn list_tunnel_connections(
        &self,
        _account_id: &str,
        tunnel_id: &str,
    ) -> Result<Vec<TunnelConnection>, CloudflareError> {
        Ok(self
            .tunnel_connections
            .lock()
            .unwrap()
            .get(tunnel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_tunnel_connections(
        &self,
        _account_id: &str,
        tunnel_id: &str,
    ) -> Result<(), CloudflareError> {
        self.tunnel_connections.lock().unwrap().remove(tunnel_id);
        Ok(())
    }

    async fn get_tunnel_configuration(
        &self,
        _account_id: &str,
        tunnel_id: &str,
    ) -> Result<Option<TunnelConfig>, CloudflareError> {
        Ok(self
            .tunnel_configs
            .lock()
            .unwrap()
            .get(tunnel_id)
            .cloned())
    }

    async fn put_tunnel_configuration(
        &self,
        _account_id: &str,
        tunnel_id: &str,
        config: &TunnelConfig,
    ) -> Result<(), CloudflareError> {
        self.config_puts.fetch_add(1, Ordering::SeqCst);
        self.tunnel_configs
            .lock()
            .unwrap()
            .insert(tunnel_id.to_string(), config.clone());
        Ok(())
    }
}

#[async_trait]
impl DnsClient for FakeCloudflare {
    async fn list_records(
        &self,
        zone_id: &str,
        name: Option<&str>,
    ) -> Result<Vec<DnsRecord>, CloudflareError> {
        let records = self.zone_records(zone_id);
        Ok(match name {
            Some(name) => records.into_iter().filter(|r| r.name == name).collect(),
            None => records,
        })
    }

    async fn create_record(
        &self,
        zone_id: &str,
        params: &DnsRecordParams,
    ) -> Result<DnsRecord, CloudflareError> {
        if self
            .record_create_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Self::conflict("record with this name already exists"));
        }
        let record = DnsRecord {
            id: self.id("rec"),
            r#type: params.r#type.clone(),
            name: params.name.clone(),
            content: params.content.clone(),
            proxied: params.proxied,
            ttl: Some(params.ttl),
            comment: params.comment.clone(),
        };
        self.seed_record(zone_id, record.clone());
        Ok(record)
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        params: &DnsRecordParams,
    ) -> Result<DnsRecord, CloudflareError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(zone_id)
            .and_then(|rs| rs.iter_mut().find(|r| r.id == record_id))
            .ok_or_else(|| CloudflareError::UnexpectedResponse {
                message: format!("no record {record_id}"),
            })?;
        record.r#type = params.r#type.clone();
        record.name = params.name.clone();
        record.content = params.content.clone();
        record.proxied = params.proxied;
        record.ttl = Some(params.ttl);
        record.comment = params.comment.clone();
        Ok(record.clone())
    }

    async fn delete_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<(), CloudflareError> {
        if let Some(records) = self.records.lock().unwrap().get_mut(zone_id) {
            records.retain(|r| r.id != record_id);
        }
        Ok(())
    }
}

#[async_trait]
impl AccessClient for FakeCloudflare {
    async fn find_application_by_domain(
        &self,
        _account_id: &str,
        domain: &str,
    ) -> Result<Option<AccessApplication>, CloudflareError> {
        Ok(self
            .applications
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.domain == domain)
            .cloned())
    }

    async fn create_application(
        &self,
        _account_id: &str,
        params: &AccessApplicationParams,
    ) -> Result<AccessApplication, CloudflareError> {
        if self
            .applications
            .lock()
            .unwrap()
            .iter()
            .any(|a| a.domain == params.domain)
        {
            return Err(Self::conflict("application already exists"));
        }
        let app = AccessApplication {
            id: self.id("app"),
            aud: Some(self.id("aud")),
            name: params.name.clone(),
            domain: params.domain.clone(),
        };
        self.applications.lock().unwrap().push(app.clone());
        Ok(app)
    }

    async fn update_application(
        &self,
        _account_id: &str,
        app_id: &str,
        params: &AccessApplicationParams,
    ) -> Result<AccessApplication, CloudflareError> {
        let mut apps = self.applications.lock().unwrap();
        let app = apps.iter_mut().find(|a| a.id == app_id).ok_or_else(|| {
            CloudflareError::UnexpectedResponse {
                message: format!("no application {app_id}"),
            }
        })?;
        app.name = params.name.clone();
        app.domain = params.domain.clone();
        Ok(app.clone())
    }

    async fn delete_application(
        &self,
        _account_id: &str,
        app_id: &str,
    ) -> Result<(), CloudflareError> {
        self.applications.lock().unwrap().retain(|a| a.id != app_id);
        self.policies.lock().unwrap().remove(app_id);
        Ok(())
    }

    async fn list_policies(
        &self,
        _account_id: &str,
        app_id: &str,
    ) -> Result<Vec<AccessPolicy>, CloudflareError> {
        Ok(self
            .policies
            .lock()
            .unwrap()
            .get(app_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_policy(
        &self,
        _account_id: &str,
        app_id: &str,
        params: &AccessPolicyParams,
    ) -> Result<AccessPolicy, CloudflareError> {
        let policy = AccessPolicy {
            id: self.id("pol"),
            name: params.name.clone(),
            decision: params.decision.clone(),
            precedence: Some(params.precedence),
        };
        self.policies
            .lock()
            .unwrap()
            .entry(app_id.to_string())
            .or_default()
            .push(policy.clone());
        Ok(policy)
    }

    async fn update_policy(
        &self,
        _account_id: &str,
        app_id: &str,
        policy_id: &str,
        params: &AccessPolicyParams,
    ) -> Result<AccessPolicy, CloudflareError> {
        let mut policies = self.policies.lock().unwrap();
        let policy = policies
            .get_mut(app_id)
            .and_then(|ps| ps.iter_mut().find(|p| p.id == policy_id))
            .ok_or_else(|| CloudflareError::UnexpectedResponse {
                message: format!("no policy {policy_id}"),
            })?;
        policy.name = params.name.clone();
        policy.decision = params.decision.clone();
        policy.precedence = Some(params.precedence);
        Ok(policy.clone())
    }

    async fn delete_policy(
        &self,
        _account_id: &str,
        app_id: &str,
        policy_id: &str,
    ) -> Result<(), CloudflareError> {
        if let Some(policies) = self.policies.lock().unwrap().get_mut(app_id) {
            policies.retain(|p| p.id != policy_id);
        }
        Ok(())
    }

    async fn list_service_tokens(
        &self,
        _account_id: &str,
    ) -> Result<Vec<ServiceToken>, CloudflareError> {
        // Listings never expose the client secret.
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .map(|t| ServiceToken {
                client_secret: None,
                ..t.clone()
            })
            .collect())
    }

    async fn create_service_token(
        &self,
        _account_id: &str,
        request: &CreateServiceTokenRequest,
    ) -> Result<ServiceToken, CloudflareError> {
        let token = ServiceToken {
            id: self.id("tok"),
            name: request.name.clone(),
            client_id: Some(format!("{}.access", self.id("client"))),
            client_secret: Some(self.id("secret")),
        };
        self.tokens.lock().unwrap().push(token.clone());
        Ok(token)
    }

    async fn delete_service_token(
        &self,
        _account_id: &str,
        token_id: &str,
    ) -> Result<(), CloudflareError> {
        self.tokens.lock().unwrap().retain(|t| t.id != token_id);
        Ok(())
    }
}

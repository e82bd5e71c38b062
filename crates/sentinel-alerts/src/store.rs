//! Alert persistence
//!
//! The durable store is behind a trait so the backend stays replaceable;
//! the in-memory implementation keys records by the `alert:tenant:id`
//! convention and is what the tests and single-node deployments run on.

use async_trait::async_trait;
use dashmap::DashMap;
use sentinel_core::store::store_key;
use sentinel_core::{Alert, AlertStatus};
use std::net::IpAddr;

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn upsert(&self, alert: Alert);
    async fn get(&self, tenant_id: &str, alert_id: &str) -> Option<Alert>;
    async fn for_tenant(&self, tenant_id: &str) -> Vec<Alert>;
    /// Alerts in a non-terminal state for one origin.
    async fn live_for_source(&self, tenant_id: &str, source_ip: IpAddr) -> Vec<Alert>;
}

#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    alerts: DashMap<String, Alert>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Synchronous variant of the live-alert check for callers that sit
    /// outside the async store contract.
    pub fn has_live_for_source(&self, tenant_id: &str, source_ip: IpAddr) -> bool {
        let prefix = format!("alert:{tenant_id}:");
        self.alerts.iter().any(|entry| {
            entry.key().starts_with(&prefix)
                && entry.value().source_ip == source_ip
                && !entry.value().status.is_terminal()
        })
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn upsert(&self, alert: Alert) {
        let key = store_key("alert", &alert.tenant_id, &alert.alert_id);
        self.alerts.insert(key, alert);
    }

    async fn get(&self, tenant_id: &str, alert_id: &str) -> Option<Alert> {
        self.alerts
            .get(&store_key("alert", tenant_id, alert_id))
            .map(|a| a.clone())
    }

    async fn for_tenant(&self, tenant_id: &str) -> Vec<Alert> {
        let prefix = format!("alert:{tenant_id}:");
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.value().clone())
            .collect();
        alerts.sort_by_key(|a| a.created_at);
        alerts
    }

    async fn live_for_source(&self, tenant_id: &str, source_ip: IpAddr) -> Vec<Alert> {
        self.for_tenant(tenant_id)
            .await
            .into_iter()
            .filter(|a| a.source_ip == source_ip && !a.status.is_terminal())
            .collect()
    }
}

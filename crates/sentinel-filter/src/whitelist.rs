//! Whitelist store with per-tenant reader/writer separation
//!
//! Static entries are operator-managed and live behind one RwLock per tenant:
//! readers never block readers, writers take a short exclusive lock scoped to
//! their tenant. Dynamic entries are earned trust with a TTL and live in a
//! time-evicting cache keyed by the `dwl:tenant:ip` convention.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::sync::Cache;
use sentinel_core::store::store_key;
use sentinel_core::{WhitelistEntry, WhitelistKind, WhitelistTarget};
use sentinel_detection::DynamicWhitelistRequest;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::RwLock;
use tracing::info;

/// Upper bound on live dynamic entries across all tenants.
const DYNAMIC_CACHE_CAPACITY: u64 = 100_000;

pub struct WhitelistStore {
    static_entries: DashMap<String, Arc<RwLock<Vec<WhitelistEntry>>>>,
    dynamic: Cache<String, WhitelistEntry>,
}

impl Default for WhitelistStore {
    fn default() -> Self {
        Self {
            static_entries: DashMap::new(),
            dynamic: Cache::builder()
                .max_capacity(DYNAMIC_CACHE_CAPACITY)
                .time_to_live(StdDuration::from_secs(24 * 3600))
                .build(),
        }
    }
}

impl WhitelistStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tenant_statics(&self, tenant_id: &str) -> Arc<RwLock<Vec<WhitelistEntry>>> {
        self.static_entries
            .entry(tenant_id.to_string())
            .or_default()
            .clone()
    }

    /// Admin surface: add a static entry for a tenant.
    pub async fn add_static(&self, tenant_id: &str, target: WhitelistTarget, reason: &str) {
        let entry = WhitelistEntry {
            kind: WhitelistKind::Static,
            target,
            reason: reason.to_string(),
            created_at: Utc::now(),
            expires_at: None,
        };
        let statics = self.tenant_statics(tenant_id);
        let mut guard = statics.write().await;
        guard.push(entry);
        info!("Static whitelist entry added for tenant {}", tenant_id);
    }

    /// Admin surface: remove static entries matching a target.
    pub async fn remove_static(&self, tenant_id: &str, target: &WhitelistTarget) -> usize {
        let statics = self.tenant_statics(tenant_id);
        let mut guard = statics.write().await;
        let before = guard.len();
        guard.retain(|entry| &entry.target != target);
        before - guard.len()
    }

    pub async fn list_static(&self, tenant_id: &str) -> Vec<WhitelistEntry> {
        let statics = self.tenant_statics(tenant_id);
        let guard = statics.read().await;
        guard.clone()
    }

    /// First static entry covering the source / username pair.
    pub async fn static_match(
        &self,
        tenant_id: &str,
        ip: IpAddr,
        username: Option<&str>,
    ) -> Option<WhitelistEntry> {
        let statics = self.static_entries.get(tenant_id)?.clone();
        let guard = statics.read().await;
        guard.iter().find(|entry| entry.matches(ip, username)).cloned()
    }

    /// Grant an earned, time-bounded entry for a source IP.
    pub fn grant_dynamic(&self, tenant_id: &str, ip: IpAddr, ttl: chrono::Duration, reason: &str) {
        let now = Utc::now();
        let entry = WhitelistEntry {
            kind: WhitelistKind::Dynamic,
            target: WhitelistTarget::Ip(ip),
            reason: reason.to_string(),
            created_at: now,
            expires_at: Some(now + ttl),
        };
        self.dynamic.insert(store_key("dwl", tenant_id, &ip.to_string()), entry);
        info!("Dynamic whitelist granted for {} in tenant {}", ip, tenant_id);
    }

    /// Unexpired dynamic entry for a source IP, if any.
    pub fn dynamic_match(
        &self,
        tenant_id: &str,
        ip: IpAddr,
        now: DateTime<Utc>,
    ) -> Option<WhitelistEntry> {
        let key = store_key("dwl", tenant_id, &ip.to_string());
        let entry = self.dynamic.get(&key)?;
        if entry.is_expired(now) {
            self.dynamic.invalidate(&key);
            return None;
        }
        Some(entry)
    }

    pub fn revoke_dynamic(&self, tenant_id: &str, ip: IpAddr) {
        self.dynamic
            .invalidate(&store_key("dwl", tenant_id, &ip.to_string()));
    }
}

/// Alert lookup consumed when applying an earned-trust request: a source with
/// live alerts does not get whitelisted.
pub trait ConfirmedAlerts: Send + Sync {
    fn has_confirmed_alerts(&self, tenant_id: &str, source_ip: IpAddr) -> bool;
}

/// Apply a dynamic-whitelist request from detection. Returns whether the
/// grant went through.
pub fn apply_whitelist_request(
    request: &DynamicWhitelistRequest,
    store: &WhitelistStore,
    alerts: &dyn ConfirmedAlerts,
) -> bool {
    if alerts.has_confirmed_alerts(&request.tenant_id, request.source_ip) {
        info!(
            "Dynamic whitelist for {} in tenant {} refused: live alerts exist",
            request.source_ip, request.tenant_id
        );
        return false;
    }
    store.grant_dynamic(
        &request.tenant_id,
        request.source_ip,
        request.ttl,
        &request.reason,
    );
    true
}

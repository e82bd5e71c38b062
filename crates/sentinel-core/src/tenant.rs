//! Tenant registry and tenant-scoped scheduling context
//!
//! Tenants are the isolation boundary of the system. The registry is fed by
//! the external admin surface and read on the hot path for attribution and
//! context decisions, so lookups go through a concurrent map.

use crate::config::DetectionParams;
use crate::net::Cidr;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike, Utc, Weekday};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;

/// A daily time window expressed in minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start_minute: u16,
    pub end_minute: u16,
}

impl HourRange {
    pub fn contains(&self, minute_of_day: u16) -> bool {
        minute_of_day >= self.start_minute && minute_of_day < self.end_minute
    }
}

/// Tenant-declared business-hours schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHours {
    pub weekday: Vec<HourRange>,
    pub weekend: Vec<HourRange>,
    /// Fixed UTC offset of the tenant's local time, in minutes.
    pub utc_offset_minutes: i32,
    /// Dates (tenant-local) treated as non-business days.
    pub holidays: Vec<NaiveDate>,
}

impl Default for BusinessHours {
    fn default() -> Self {
        // 08:00-18:00 on weekdays, closed on weekends.
        Self {
            weekday: vec![HourRange {
                start_minute: 8 * 60,
                end_minute: 18 * 60,
            }],
            weekend: Vec::new(),
            utc_offset_minutes: 0,
            holidays: Vec::new(),
        }
    }
}

impl BusinessHours {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let offset = match FixedOffset::east_opt(self.utc_offset_minutes * 60) {
            Some(offset) => offset,
            None => return false,
        };
        let local = at.with_timezone(&offset);
        if self.holidays.contains(&local.date_naive()) {
            return false;
        }
        let minute_of_day = (local.hour() * 60 + local.minute()) as u16;
        let windows = match local.weekday() {
            Weekday::Sat | Weekday::Sun => &self.weekend,
            _ => &self.weekday,
        };
        windows.iter().any(|w| w.contains(minute_of_day))
    }
}

/// A tenant-declared maintenance span pairing a time range with the source
/// addresses authorized to generate noise during it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub authorized_sources: Vec<Cidr>,
}

impl MaintenanceWindow {
    pub fn active_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    pub fn authorizes(&self, ip: IpAddr) -> bool {
        self.authorized_sources.iter().any(|c| c.contains(ip))
    }
}

/// A customer/organization boundary. All state, whitelists and alerts are
/// partitioned by tenant id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub source_cidrs: Vec<Cidr>,
    #[serde(default)]
    pub sni_names: Vec<String>,
    #[serde(default)]
    pub business_hours: BusinessHours,
    #[serde(default)]
    pub maintenance_windows: Vec<MaintenanceWindow>,
    /// Per-tenant overrides of the global detection parameters.
    #[serde(default)]
    pub detection: Option<DetectionParams>,
}

impl Tenant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_cidrs: Vec::new(),
            sni_names: Vec::new(),
            business_hours: BusinessHours::default(),
            maintenance_windows: Vec::new(),
            detection: None,
        }
    }

    pub fn with_cidrs(mut self, cidrs: Vec<Cidr>) -> Self {
        self.source_cidrs = cidrs;
        self
    }

    /// Maintenance window that is active now and authorizes the given source.
    pub fn active_maintenance_for(
        &self,
        ip: IpAddr,
        at: DateTime<Utc>,
    ) -> Option<&MaintenanceWindow> {
        self.maintenance_windows
            .iter()
            .find(|w| w.active_at(at) && w.authorizes(ip))
    }
}

/// Concurrent tenant registry, upserted by the admin surface and read by the
/// ingestion and filter stages.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    tenants: DashMap<String, Arc<Tenant>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, tenant: Tenant) {
        info!("Tenant registry upsert: {}", tenant.id);
        self.tenants.insert(tenant.id.clone(), Arc::new(tenant));
    }

    pub fn remove(&self, tenant_id: &str) -> bool {
        self.tenants.remove(tenant_id).is_some()
    }

    pub fn get(&self, tenant_id: &str) -> Option<Arc<Tenant>> {
        self.tenants.get(tenant_id).map(|t| Arc::clone(t.value()))
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Exact SNI match against the registered names of every tenant.
    pub fn match_sni(&self, sni: &str) -> Option<Arc<Tenant>> {
        self.tenants
            .iter()
            .find(|entry| entry.value().sni_names.iter().any(|n| n == sni))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Longest-prefix match of a peer address against all tenant CIDRs.
    pub fn match_peer(&self, ip: IpAddr) -> Option<Arc<Tenant>> {
        let mut best: Option<(u8, Arc<Tenant>)> = None;
        for entry in self.tenants.iter() {
            for cidr in &entry.value().source_cidrs {
                if cidr.contains(ip) {
                    let longer = match &best {
                        Some((prefix, _)) => cidr.prefix_len() > *prefix,
                        None => true,
                    };
                    if longer {
                        best = Some((cidr.prefix_len(), Arc::clone(entry.value())));
                    }
                }
            }
        }
        best.map(|(_, tenant)| tenant)
    }
}

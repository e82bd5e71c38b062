//! Core domain types for the Sentinel SIEM backend
//!
//! This crate holds the data model shared by every stage of the pipeline:
//! raw and normalized events, tenants, whitelists, threat candidates, alerts,
//! runtime configuration, and the counter registry. Entities are immutable
//! once emitted; mutation is confined to the per-tenant state stores owned by
//! the detection and alerting crates.

pub mod alert;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod net;
pub mod store;
pub mod tenant;
pub mod threat;
pub mod whitelist;

pub use alert::{Alert, AlertStatus, Severity};
pub use config::{DetectionParams, SiemConfig};
pub use error::CoreError;
pub use event::{EventKind, RawEvent, SecurityEvent, Transport};
pub use net::Cidr;
pub use tenant::{BusinessHours, MaintenanceWindow, Tenant, TenantRegistry};
pub use threat::{ThreatCandidate, ThreatKind};
pub use whitelist::{WhitelistEntry, WhitelistKind, WhitelistTarget};

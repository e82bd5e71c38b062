//! False-positive and context filtering for the Sentinel SIEM backend
//!
//! Every `ThreatCandidate` runs through an ordered decision pipeline:
//! static whitelist, maintenance windows, dynamic whitelist, service-account
//! tolerance, business-hours adjustment, impossible-travel escalation. The
//! earliest matching tier wins. Suppression is never silent: each decision is
//! appended to the audit log and counted per tenant and reason.

pub mod audit;
pub mod filter;
pub mod geo;
pub mod whitelist;

pub use audit::{DecisionRecord, SuppressionAudit};
pub use filter::{run_filter, FilterDecision, FpFilter};
pub use geo::{haversine_km, GeoPoint, GeoResolver, StaticGeoResolver, TravelTracker};
pub use whitelist::{apply_whitelist_request, ConfirmedAlerts, WhitelistStore};

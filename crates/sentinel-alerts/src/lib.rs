//! Alert lifecycle management for the Sentinel SIEM backend
//!
//! Candidates that survive filtering are folded into durable `Alert`s:
//! a deterministic fingerprint dedups candidates into one alert per
//! tenant/source/kind/time-bucket, correlation groups cross-kind activity
//! from one origin, and a small state machine governs status transitions.
//! Mutation is serialized per tenant through a single manager task.

pub mod fingerprint;
pub mod manager;
pub mod store;

pub use fingerprint::fingerprint;
pub use manager::{run_alert_manager, AlertError, AlertManager, AlertOutcome, AlertPush, Clock};
pub use store::{AlertStore, MemoryAlertStore};

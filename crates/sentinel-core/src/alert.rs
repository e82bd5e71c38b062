//! Durable alert model and its state machine
//!
//! An alert is the durable domain object produced by dedup/correlation; a
//! notification is the transient delivery of an alert to a channel. This
//! module owns the former.

use crate::threat::ThreatKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Alert severity derived from risk.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_risk(risk: f64) -> Self {
        if risk < 0.4 {
            Severity::Low
        } else if risk < 0.6 {
            Severity::Medium
        } else if risk < 0.85 {
            Severity::High
        } else {
            Severity::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Investigating,
    Resolved,
    Suppressed,
}

impl AlertStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::Suppressed)
    }

    /// Whether a transition to `next` is allowed. Self-transitions are always
    /// allowed so that replayed requests stay idempotent. `Suppressed` is
    /// reachable from any state, but only the alert manager takes that edge
    /// (post-hoc whitelist match).
    pub fn can_transition(&self, next: AlertStatus) -> bool {
        if *self == next {
            return true;
        }
        match (self, next) {
            (_, AlertStatus::Suppressed) => !self.is_terminal(),
            (AlertStatus::Open, AlertStatus::Investigating) => true,
            (AlertStatus::Open, AlertStatus::Resolved) => true,
            (AlertStatus::Investigating, AlertStatus::Resolved) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Deterministic fingerprint of tenant + source + kind + window bucket.
    pub alert_id: String,
    /// Instance id, also used as the correlation group seed.
    pub uuid: Uuid,
    pub tenant_id: String,
    pub source_ip: IpAddr,
    pub kind: ThreatKind,
    pub status: AlertStatus,
    pub severity: Severity,
    pub risk: f64,
    pub evidence: Vec<Uuid>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub correlation_group: Option<Uuid>,
    pub degraded: bool,
    /// Filter tags attached on emission, e.g. `impossible_travel`.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Alert {
    /// Field-level invariants every stored alert must satisfy.
    pub fn is_well_formed(&self) -> bool {
        self.first_seen <= self.last_seen
            && (0.0..=1.0).contains(&self.risk)
            && self.severity == Severity::from_risk(self.risk)
            && !self.tenant_id.is_empty()
    }
}

//! Threat candidates emitted by the detection engines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    BruteForce,
    PortScan,
}

impl ThreatKind {
    /// Stable wire name, also used in alert fingerprints.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatKind::BruteForce => "brute_force",
            ThreatKind::PortScan => "port_scan",
        }
    }
}

impl fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unfiltered detection signal for one `(tenant, source_ip)` origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatCandidate {
    pub tenant_id: String,
    pub source_ip: IpAddr,
    pub kind: ThreatKind,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Event ids backing the signal, in arrival order.
    pub evidence: Vec<Uuid>,
    /// Distinct usernames observed in the window (brute force only).
    pub usernames: Vec<String>,
    pub raw_risk: f64,
    pub confidence: f64,
    /// Set when the signal was computed while hot state was unavailable.
    pub degraded: bool,
    /// A rate-limited re-trigger carrying fresh evidence for an already
    /// signalled incident. Refreshes update an existing alert but never open
    /// a new one and never notify on their own.
    pub refresh: bool,
}

impl ThreatCandidate {
    /// Clamp risk and confidence into [0, 1] after any adjustment.
    pub fn clamp_scores(&mut self) {
        self.raw_risk = self.raw_risk.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
    }
}

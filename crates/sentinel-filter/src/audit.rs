//! Append-only decision audit
//!
//! Every filter decision lands here with kind, reason and timestamp, keeping
//! suppressions discoverable after the fact. The log is capped in memory;
//! older records rotate out from the front.

use chrono::{DateTime, Utc};
use sentinel_core::ThreatKind;
use serde::Serialize;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Mutex;

const MAX_RECORDS: usize = 100_000;

#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub tenant_id: String,
    pub source_ip: IpAddr,
    pub kind: ThreatKind,
    /// `emitted`, `emitted_adjusted`, `emitted_forced` or a suppression
    /// reason such as `static_whitelist`.
    pub decision: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SuppressionAudit {
    records: Mutex<VecDeque<DecisionRecord>>,
}

impl SuppressionAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: DecisionRecord) {
        let mut records = self.records.lock().expect("audit lock poisoned");
        if records.len() >= MAX_RECORDS {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("audit lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records for one tenant, newest last.
    pub fn for_tenant(&self, tenant_id: &str) -> Vec<DecisionRecord> {
        self.records
            .lock()
            .expect("audit lock poisoned")
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

//! Counter registry
//!
//! Drops and suppressions must never be silent: every recoverable error and
//! every filter decision increments a counter here and is visible through the
//! snapshot structs.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Ingestion-side counters shared by the listeners and the normalizer pool.
#[derive(Debug, Default)]
pub struct IngestCounters {
    /// Frames that failed framing or syslog parsing.
    pub malformed: AtomicU64,
    /// Frames that could not be attributed to any tenant.
    pub untenanted: AtomicU64,
    /// Frames dropped because the ingestion queue was full (UDP only).
    pub dropped: AtomicU64,
    /// Frames accepted onto the ingestion queue.
    pub accepted: AtomicU64,
}

impl IngestCounters {
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            malformed: self.malformed.load(Ordering::Relaxed),
            untenanted: self.untenanted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub malformed: u64,
    pub untenanted: u64,
    pub dropped: u64,
    pub accepted: u64,
}

/// Per-tenant, per-reason suppression counters.
#[derive(Debug, Default)]
pub struct SuppressionCounters {
    counts: DashMap<(String, &'static str), u64>,
}

impl SuppressionCounters {
    pub fn increment(&self, tenant_id: &str, reason: &'static str) {
        *self
            .counts
            .entry((tenant_id.to_string(), reason))
            .or_insert(0) += 1;
    }

    pub fn get(&self, tenant_id: &str, reason: &'static str) -> u64 {
        self.counts
            .get(&(tenant_id.to_string(), reason))
            .map(|v| *v)
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<((String, &'static str), u64)> {
        self.counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

/// Notification-side counters.
#[derive(Debug, Default)]
pub struct NotifyCounters {
    /// Messages evicted from a full per-session outbound queue.
    pub session_overflow: AtomicU64,
    pub delivered: AtomicU64,
    pub dead_lettered: AtomicU64,
}

impl NotifyCounters {
    pub fn snapshot(&self) -> NotifySnapshot {
        NotifySnapshot {
            session_overflow: self.session_overflow.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotifySnapshot {
    pub session_overflow: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
}

/// Shared handle bundling every counter family.
#[derive(Debug, Default)]
pub struct Metrics {
    pub ingest: IngestCounters,
    pub suppression: SuppressionCounters,
    pub notify: NotifyCounters,
}

impl Metrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

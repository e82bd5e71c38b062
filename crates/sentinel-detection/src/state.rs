//! Per-origin detection window state
//!
//! One `DetectionState` exists per `(tenant, source_ip)` pair, created lazily
//! on first contact and evicted after the idle TTL. Window eviction keeps the
//! logs bounded in time; a hard cap keeps them bounded in space against
//! pathological event rates.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Hard cap on entries kept per log, independent of the time window.
const MAX_LOG_ENTRIES: usize = 4096;

#[derive(Debug, Clone)]
pub struct AuthRecord {
    pub at: DateTime<Utc>,
    pub username: Option<String>,
    pub event_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct PortHits {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub events: Vec<(DateTime<Utc>, Uuid)>,
}

#[derive(Debug)]
pub struct DetectionState {
    pub failures: VecDeque<AuthRecord>,
    pub successes: VecDeque<AuthRecord>,
    pub ports: HashMap<u16, PortHits>,
    /// Highest event time observed, for late-arrival detection.
    pub latest_seen: Option<DateTime<Utc>>,
    /// Wall-clock time of the last touch, for idle eviction.
    pub last_activity: DateTime<Utc>,
    pub last_bf_emit: Option<DateTime<Utc>>,
    /// Failure count at the last brute-force emission, for escalation re-arm.
    pub last_bf_emit_count: usize,
    pub last_ps_emit: Option<DateTime<Utc>>,
    pub last_whitelist_request: Option<DateTime<Utc>>,
}

impl DetectionState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            failures: VecDeque::new(),
            successes: VecDeque::new(),
            ports: HashMap::new(),
            latest_seen: None,
            last_activity: now,
            last_bf_emit: None,
            last_bf_emit_count: 0,
            last_ps_emit: None,
            last_whitelist_request: None,
        }
    }

    pub fn touch(&mut self, event_time: DateTime<Utc>, now: DateTime<Utc>) {
        self.last_activity = now;
        self.latest_seen = Some(match self.latest_seen {
            Some(latest) => latest.max(event_time),
            None => event_time,
        });
    }

    pub fn record_failure(&mut self, record: AuthRecord) {
        if self.failures.len() >= MAX_LOG_ENTRIES {
            self.failures.pop_front();
        }
        self.failures.push_back(record);
    }

    pub fn record_success(&mut self, record: AuthRecord) {
        if self.successes.len() >= MAX_LOG_ENTRIES {
            self.successes.pop_front();
        }
        self.successes.push_back(record);
    }

    pub fn record_port(&mut self, port: u16, at: DateTime<Utc>, event_id: Uuid) {
        let hits = self.ports.entry(port).or_insert_with(|| PortHits {
            first: at,
            last: at,
            events: Vec::new(),
        });
        hits.first = hits.first.min(at);
        hits.last = hits.last.max(at);
        if hits.events.len() < MAX_LOG_ENTRIES {
            hits.events.push((at, event_id));
        }
    }

    /// Drop failures at or before the window edge. An entry exactly at
    /// `reference - window` is outside the window.
    pub fn evict_failures(&mut self, reference: DateTime<Utc>, window: Duration) {
        let cutoff = reference - window;
        self.failures.retain(|r| r.at > cutoff);
    }

    pub fn evict_successes(&mut self, reference: DateTime<Utc>, window: Duration) {
        let cutoff = reference - window;
        self.successes.retain(|r| r.at > cutoff);
    }

    pub fn evict_ports(&mut self, reference: DateTime<Utc>, window: Duration) {
        let cutoff = reference - window;
        self.ports.retain(|_, hits| {
            hits.events.retain(|(at, _)| *at > cutoff);
            match hits.events.iter().map(|(at, _)| *at).max() {
                Some(last) => {
                    hits.last = last;
                    hits.first = hits.events.iter().map(|(at, _)| *at).min().unwrap_or(last);
                    true
                }
                None => false,
            }
        });
    }

    pub fn distinct_failure_users(&self) -> Vec<String> {
        let mut users: Vec<String> = Vec::new();
        for record in &self.failures {
            if let Some(user) = &record.username {
                if !users.iter().any(|u| u == user) {
                    users.push(user.clone());
                }
            }
        }
        users
    }

    pub fn failure_evidence(&self) -> Vec<Uuid> {
        self.failures.iter().map(|r| r.event_id).collect()
    }

    pub fn port_evidence(&self) -> Vec<Uuid> {
        let mut evidence: Vec<(DateTime<Utc>, Uuid)> = self
            .ports
            .values()
            .flat_map(|hits| hits.events.iter().copied())
            .collect();
        evidence.sort_by_key(|(at, _)| *at);
        evidence.into_iter().map(|(_, id)| id).collect()
    }

    pub fn is_idle(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_activity >= ttl
    }
}

//! Brute-force and port-scan engines
//!
//! Both engines operate on the window state of a single `(tenant, source_ip)`
//! origin and are driven by one shard worker, so nothing here locks. A
//! triggering event past the rate limit still produces a candidate marked
//! `refresh`, which downstream merges into the existing alert without
//! opening or re-notifying one.

use crate::profile::ProfileStore;
use crate::state::{AuthRecord, DetectionState};
use chrono::{DateTime, Duration, Utc};
use sentinel_core::store::HotStateHealth;
use sentinel_core::{
    DetectionParams, EventKind, SecurityEvent, TenantRegistry, ThreatCandidate, ThreatKind,
};
use std::sync::Arc;
use tracing::debug;

/// Successes within this window earn a dynamic whitelist entry.
const WHITELIST_SUCCESS_WINDOW: Duration = Duration::hours(24);
/// Successes required inside the window.
const WHITELIST_SUCCESS_THRESHOLD: usize = 5;
/// TTL of the earned entry.
pub const DYNAMIC_WHITELIST_TTL: Duration = Duration::hours(24);

/// Request to grant a source IP a time-bounded trust entry, emitted after
/// sustained successful authentication. The grant is conditional on the
/// origin having no live alerts, which the pipeline checks at apply time.
#[derive(Debug, Clone)]
pub struct DynamicWhitelistRequest {
    pub tenant_id: String,
    pub source_ip: std::net::IpAddr,
    pub ttl: Duration,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct EngineOutput {
    pub candidate: Option<ThreatCandidate>,
    pub whitelist_request: Option<DynamicWhitelistRequest>,
}

pub struct Engine {
    defaults: DetectionParams,
    registry: Arc<TenantRegistry>,
    profiles: Arc<ProfileStore>,
    hot_health: Arc<HotStateHealth>,
}

impl Engine {
    pub fn new(
        defaults: DetectionParams,
        registry: Arc<TenantRegistry>,
        profiles: Arc<ProfileStore>,
        hot_health: Arc<HotStateHealth>,
    ) -> Self {
        Self {
            defaults,
            registry,
            profiles,
            hot_health,
        }
    }

    pub fn params_for(&self, tenant_id: &str) -> DetectionParams {
        self.registry
            .get(tenant_id)
            .and_then(|t| t.detection)
            .unwrap_or(self.defaults)
    }

    /// Process one event against its origin's state.
    pub fn process(&self, event: &SecurityEvent, state: &mut DetectionState) -> EngineOutput {
        let params = self.params_for(&event.tenant_id);
        let mut output = EngineOutput::default();

        match event.kind {
            EventKind::AuthFailure => {
                output.candidate = self.on_auth_failure(event, state, &params);
            }
            EventKind::AuthSuccess => {
                output.whitelist_request = self.on_auth_success(event, state);
                self.update_profile(event);
            }
            EventKind::PortAccess => {
                output.candidate = self.on_port_access(event, state, &params);
            }
            EventKind::Other => {}
        }

        if let Some(candidate) = &mut output.candidate {
            if !self.hot_health.is_available() {
                candidate.confidence *= 0.5;
                candidate.degraded = true;
            }
            candidate.clamp_scores();
        }
        output
    }

    /// Late events are logged but excluded from scoring.
    fn is_late(
        &self,
        event_time: DateTime<Utc>,
        state: &DetectionState,
        window: Duration,
    ) -> bool {
        match state.latest_seen {
            Some(latest) => event_time <= latest - window,
            None => false,
        }
    }

    fn on_auth_failure(
        &self,
        event: &SecurityEvent,
        state: &mut DetectionState,
        params: &DetectionParams,
    ) -> Option<ThreatCandidate> {
        let window = params.bf_window();
        if self.is_late(event.event_time, state, window) {
            debug!(
                "Late auth failure from {} for tenant {} excluded from scoring",
                event.source_ip, event.tenant_id
            );
            return None;
        }
        state.touch(event.event_time, event.ingest_time);
        state.record_failure(AuthRecord {
            at: event.event_time,
            username: event.username.clone(),
            event_id: event.event_id,
        });
        state.evict_failures(event.event_time, window);

        let failures = state.failures.len();
        if failures < params.bf_threshold {
            return None;
        }

        let users = state.distinct_failure_users();
        let distinct = users.len();
        let raw_risk =
            (failures as f64 / params.bf_threshold as f64 * 0.7 + distinct as f64 * 0.1).min(1.0);
        let confidence = 0.6 + (distinct as f64 * 0.05).min(0.3);

        // One fresh candidate per window/5, re-armed when the count doubles
        // past the threshold.
        let rate_interval = window / 5;
        let fresh = match state.last_bf_emit {
            None => true,
            Some(last) => {
                event.event_time - last >= rate_interval
                    || (failures >= 2 * params.bf_threshold
                        && state.last_bf_emit_count < 2 * params.bf_threshold)
            }
        };
        if fresh {
            state.last_bf_emit = Some(event.event_time);
            state.last_bf_emit_count = failures;
        }

        Some(ThreatCandidate {
            tenant_id: event.tenant_id.clone(),
            source_ip: event.source_ip,
            kind: ThreatKind::BruteForce,
            first_seen: state.failures.front().map(|r| r.at).unwrap_or(event.event_time),
            last_seen: event.event_time,
            evidence: state.failure_evidence(),
            usernames: users,
            raw_risk,
            confidence,
            degraded: false,
            refresh: !fresh,
        })
    }

    fn on_auth_success(
        &self,
        event: &SecurityEvent,
        state: &mut DetectionState,
    ) -> Option<DynamicWhitelistRequest> {
        state.touch(event.event_time, event.ingest_time);
        state.record_success(AuthRecord {
            at: event.event_time,
            username: event.username.clone(),
            event_id: event.event_id,
        });
        state.evict_successes(event.event_time, WHITELIST_SUCCESS_WINDOW);

        if state.successes.len() < WHITELIST_SUCCESS_THRESHOLD {
            return None;
        }
        // One request per success window.
        if let Some(last) = state.last_whitelist_request {
            if event.event_time - last < WHITELIST_SUCCESS_WINDOW {
                return None;
            }
        }
        state.last_whitelist_request = Some(event.event_time);
        Some(DynamicWhitelistRequest {
            tenant_id: event.tenant_id.clone(),
            source_ip: event.source_ip,
            ttl: DYNAMIC_WHITELIST_TTL,
            reason: format!(
                "{} successful logins within 24h",
                state.successes.len()
            ),
        })
    }

    fn on_port_access(
        &self,
        event: &SecurityEvent,
        state: &mut DetectionState,
        params: &DetectionParams,
    ) -> Option<ThreatCandidate> {
        let port = event.dest_port?;
        let window = params.ps_window();
        if self.is_late(event.event_time, state, window) {
            debug!(
                "Late port access from {} for tenant {} excluded from scoring",
                event.source_ip, event.tenant_id
            );
            return None;
        }
        state.touch(event.event_time, event.ingest_time);
        state.record_port(port, event.event_time, event.event_id);
        state.evict_ports(event.event_time, window);

        let distinct_ports = state.ports.len();
        if distinct_ports < params.ps_threshold {
            return None;
        }

        let raw_risk = (distinct_ports as f64 / 50.0).min(1.0);
        let confidence = 0.5 + (distinct_ports as f64 / 100.0).min(0.4);

        // One fresh candidate per window.
        let fresh = match state.last_ps_emit {
            None => true,
            Some(last) => event.event_time - last >= window,
        };
        if fresh {
            state.last_ps_emit = Some(event.event_time);
        }

        let evidence = state.port_evidence();
        let first_seen = state
            .ports
            .values()
            .map(|hits| hits.first)
            .min()
            .unwrap_or(event.event_time);
        Some(ThreatCandidate {
            tenant_id: event.tenant_id.clone(),
            source_ip: event.source_ip,
            kind: ThreatKind::PortScan,
            first_seen,
            last_seen: event.event_time,
            evidence,
            usernames: Vec::new(),
            raw_risk,
            confidence,
            degraded: false,
            refresh: !fresh,
        })
    }

    fn update_profile(&self, event: &SecurityEvent) {
        let in_business_hours = self
            .registry
            .get(&event.tenant_id)
            .map(|tenant| tenant.business_hours.contains(event.event_time))
            .unwrap_or(false);
        self.profiles
            .record_success(&event.tenant_id, &event.principal(), event.event_time, in_business_hours);
    }
}

//! Ordered false-positive decision pipeline
//!
//! Tiers run in a fixed order and the earliest matching tier decides:
//! 1. static whitelist, 2. maintenance window, 3. dynamic whitelist,
//! 4. service-account tolerance, 5. business-hours adjustment,
//! 6. impossible-travel escalation, 7. emit unchanged. While hot state is
//! unavailable the learned tiers (3-6) are skipped and the static tiers
//! still apply.

use crate::audit::{DecisionRecord, SuppressionAudit};
use crate::geo::TravelTracker;
use crate::whitelist::WhitelistStore;
use chrono::{DateTime, Utc};
use sentinel_core::metrics::Metrics;
use sentinel_core::store::HotStateHealth;
use sentinel_core::{DetectionParams, TenantRegistry, ThreatCandidate, ThreatKind};
use sentinel_detection::{Classification, ProfileStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const REASON_STATIC_WHITELIST: &str = "static_whitelist";
pub const REASON_MAINTENANCE_WINDOW: &str = "maintenance_window";
pub const REASON_DYNAMIC_WHITELIST: &str = "dynamic_whitelist";
pub const REASON_SERVICE_ACCOUNT: &str = "service_account_tolerance";
pub const REASON_BUSINESS_HOURS: &str = "business_hours_low_risk";

pub const TAG_IMPOSSIBLE_TRAVEL: &str = "impossible_travel";

/// Candidates adjusted below this risk are suppressed outright.
const EMIT_FLOOR: f64 = 0.3;
/// Service accounts tolerate up to this multiple of the human threshold.
const SERVICE_ACCOUNT_TOLERANCE: usize = 3;

#[derive(Debug)]
pub enum FilterDecision {
    Emit {
        candidate: ThreatCandidate,
        tags: Vec<String>,
    },
    Suppress {
        reason: &'static str,
    },
}

pub struct FpFilter {
    enabled: bool,
    defaults: DetectionParams,
    registry: Arc<TenantRegistry>,
    whitelists: Arc<WhitelistStore>,
    profiles: Arc<ProfileStore>,
    travel: Arc<TravelTracker>,
    hot_health: Arc<HotStateHealth>,
    audit: Arc<SuppressionAudit>,
    metrics: Arc<Metrics>,
}

impl FpFilter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        enabled: bool,
        defaults: DetectionParams,
        registry: Arc<TenantRegistry>,
        whitelists: Arc<WhitelistStore>,
        profiles: Arc<ProfileStore>,
        travel: Arc<TravelTracker>,
        hot_health: Arc<HotStateHealth>,
        audit: Arc<SuppressionAudit>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            enabled,
            defaults,
            registry,
            whitelists,
            profiles,
            travel,
            hot_health,
            audit,
            metrics,
        }
    }

    fn params_for(&self, tenant_id: &str) -> DetectionParams {
        self.registry
            .get(tenant_id)
            .and_then(|t| t.detection)
            .unwrap_or(self.defaults)
    }

    /// Principal the behavioral tiers reason about: the dominant username for
    /// brute force, the source address otherwise.
    fn principal(candidate: &ThreatCandidate) -> String {
        candidate
            .usernames
            .first()
            .cloned()
            .unwrap_or_else(|| candidate.source_ip.to_string())
    }

    pub async fn evaluate(&self, candidate: ThreatCandidate, now: DateTime<Utc>) -> FilterDecision {
        if !self.enabled {
            return self.emit(candidate, Vec::new(), "emitted");
        }

        let username = candidate.usernames.first().map(String::as_str);

        // 1. Static whitelist.
        if self
            .whitelists
            .static_match(&candidate.tenant_id, candidate.source_ip, username)
            .await
            .is_some()
        {
            return self.suppress(&candidate, REASON_STATIC_WHITELIST);
        }

        // 2. Maintenance window.
        if let Some(tenant) = self.registry.get(&candidate.tenant_id) {
            if tenant
                .active_maintenance_for(candidate.source_ip, now)
                .is_some()
            {
                return self.suppress(&candidate, REASON_MAINTENANCE_WINDOW);
            }
        }

        // Learned tiers need hot state.
        let degraded = candidate.degraded || !self.hot_health.is_available();
        if degraded {
            debug!(
                "Hot state unavailable, skipping learned tiers for {} in tenant {}",
                candidate.source_ip, candidate.tenant_id
            );
            return self.emit(candidate, Vec::new(), "emitted");
        }

        // 3. Dynamic whitelist.
        if self
            .whitelists
            .dynamic_match(&candidate.tenant_id, candidate.source_ip, now)
            .is_some()
        {
            return self.suppress(&candidate, REASON_DYNAMIC_WHITELIST);
        }

        let principal = Self::principal(&candidate);
        let profile = self.profiles.get(&candidate.tenant_id, &principal);
        let classification = profile
            .as_ref()
            .map(|p| p.classification)
            .unwrap_or(Classification::Unknown);

        // 4. Service-account tolerance.
        if classification == Classification::ServiceAccount
            && candidate.kind == ThreatKind::BruteForce
        {
            let tolerance =
                SERVICE_ACCOUNT_TOLERANCE * self.params_for(&candidate.tenant_id).bf_threshold;
            if candidate.evidence.len() < tolerance {
                return self.suppress(&candidate, REASON_SERVICE_ACCOUNT);
            }
        }

        // 5. Business-hours context.
        let in_business_hours = self
            .registry
            .get(&candidate.tenant_id)
            .map(|t| t.business_hours.contains(candidate.last_seen))
            .unwrap_or(false);
        if candidate.raw_risk < 0.5
            && !in_business_hours
            && classification == Classification::Human
        {
            let mut adjusted = candidate;
            adjusted.raw_risk *= 0.5;
            adjusted.confidence *= 0.7;
            adjusted.clamp_scores();
            if adjusted.raw_risk < EMIT_FLOOR {
                return self.suppress(&adjusted, REASON_BUSINESS_HOURS);
            }
            return self.emit(adjusted, Vec::new(), "emitted_adjusted");
        }

        // 6. Impossible travel forces emission at elevated risk.
        if self.travel.impossible_travel(
            &candidate.tenant_id,
            &candidate.usernames,
            candidate.source_ip,
            now,
        ) {
            let mut escalated = candidate;
            escalated.raw_risk = escalated.raw_risk.max(0.8);
            return self.emit(
                escalated,
                vec![TAG_IMPOSSIBLE_TRAVEL.to_string()],
                "emitted_forced",
            );
        }

        // 7. Default.
        self.emit(candidate, Vec::new(), "emitted")
    }

    fn suppress(&self, candidate: &ThreatCandidate, reason: &'static str) -> FilterDecision {
        // A refresh repeats an already-counted signal.
        if !candidate.refresh {
            self.metrics
                .suppression
                .increment(&candidate.tenant_id, reason);
        }
        self.audit.record(DecisionRecord {
            tenant_id: candidate.tenant_id.clone(),
            source_ip: candidate.source_ip,
            kind: candidate.kind,
            decision: reason.to_string(),
            at: Utc::now(),
        });
        info!(
            "Suppressed {} candidate from {} in tenant {}: {}",
            candidate.kind, candidate.source_ip, candidate.tenant_id, reason
        );
        FilterDecision::Suppress { reason }
    }

    fn emit(
        &self,
        candidate: ThreatCandidate,
        tags: Vec<String>,
        decision: &str,
    ) -> FilterDecision {
        self.audit.record(DecisionRecord {
            tenant_id: candidate.tenant_id.clone(),
            source_ip: candidate.source_ip,
            kind: candidate.kind,
            decision: decision.to_string(),
            at: Utc::now(),
        });
        FilterDecision::Emit { candidate, tags }
    }
}

/// Filter task: candidates in, emitted candidates (with tags) out.
pub async fn run_filter(
    filter: Arc<FpFilter>,
    mut candidate_rx: mpsc::Receiver<ThreatCandidate>,
    emit_tx: mpsc::Sender<(ThreatCandidate, Vec<String>)>,
) {
    while let Some(candidate) = candidate_rx.recv().await {
        match filter.evaluate(candidate, Utc::now()).await {
            FilterDecision::Emit { candidate, tags } => {
                if emit_tx.send((candidate, tags)).await.is_err() {
                    break;
                }
            }
            FilterDecision::Suppress { .. } => {}
        }
    }
    debug!("Filter task stopped");
}

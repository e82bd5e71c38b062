//! Alert manager: dedup, correlation, state machine
//!
//! One manager task owns all alert mutation, which serializes writes per
//! tenant and keeps fingerprint dedup ordered. Dedup is monotone: merging a
//! candidate into an existing alert can only extend its window, grow its
//! evidence and raise its risk, never lower severity.

use crate::fingerprint::fingerprint;
use crate::store::AlertStore;
use chrono::{Duration, Utc};
use sentinel_core::{Alert, AlertStatus, Severity, ThreatCandidate, WhitelistEntry};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert {alert_id} not found for tenant {tenant_id}")]
    NotFound { tenant_id: String, alert_id: String },

    #[error("transition {from:?} -> {to:?} violates the alert state machine")]
    PolicyViolation { from: AlertStatus, to: AlertStatus },
}

/// What happened to a candidate at the dedup layer.
#[derive(Debug)]
pub enum AlertOutcome {
    Created(Alert),
    Updated { alert: Alert, escalated: bool },
    /// A refresh arrived with no live alert to update.
    Ignored,
}

/// An alert headed for the notification hub.
#[derive(Debug, Clone)]
pub struct AlertPush {
    pub alert: Alert,
    pub escalated: bool,
}

/// Wall-clock source for `created_at`/`updated_at` stamps. Injectable so
/// tests can decouple processing time from event time.
pub type Clock = Box<dyn Fn() -> chrono::DateTime<Utc> + Send + Sync>;

pub struct AlertManager {
    store: Arc<dyn AlertStore>,
    dedup_bucket_seconds: u64,
    correlation_window: Duration,
    clock: Clock,
}

impl AlertManager {
    pub fn new(
        store: Arc<dyn AlertStore>,
        dedup_bucket_seconds: u64,
        correlation_window: Duration,
    ) -> Self {
        Self::with_clock(store, dedup_bucket_seconds, correlation_window, Box::new(Utc::now))
    }

    pub fn with_clock(
        store: Arc<dyn AlertStore>,
        dedup_bucket_seconds: u64,
        correlation_window: Duration,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            dedup_bucket_seconds,
            correlation_window,
            clock,
        }
    }

    /// Stored risk blends the engine's raw risk with its confidence.
    fn blended_risk(candidate: &ThreatCandidate) -> f64 {
        (0.45 * (candidate.raw_risk + candidate.confidence)).clamp(0.0, 1.0)
    }

    /// Fold a filtered candidate into the alert set.
    pub async fn ingest(&self, candidate: ThreatCandidate, tags: Vec<String>) -> AlertOutcome {
        let alert_id = fingerprint(
            &candidate.tenant_id,
            candidate.source_ip,
            candidate.kind.as_str(),
            candidate.last_seen,
            self.dedup_bucket_seconds,
        );
        let now = (self.clock)();

        if let Some(mut alert) = self.store.get(&candidate.tenant_id, &alert_id).await {
            let previous_severity = alert.severity;
            alert.first_seen = alert.first_seen.min(candidate.first_seen);
            alert.last_seen = alert.last_seen.max(candidate.last_seen);
            for event_id in &candidate.evidence {
                if !alert.evidence.contains(event_id) {
                    alert.evidence.push(*event_id);
                }
            }
            alert.risk = alert.risk.max(Self::blended_risk(&candidate));
            alert.severity = Severity::from_risk(alert.risk);
            alert.degraded |= candidate.degraded;
            for tag in tags {
                if !alert.tags.contains(&tag) {
                    alert.tags.push(tag);
                }
            }
            alert.updated_at = now;
            let escalated =
                alert.severity > previous_severity && alert.status != AlertStatus::Suppressed;
            self.store.upsert(alert.clone()).await;
            debug!(
                "Alert {} updated for tenant {} ({} evidence)",
                alert.alert_id,
                alert.tenant_id,
                alert.evidence.len()
            );
            return AlertOutcome::Updated { alert, escalated };
        }

        if candidate.refresh {
            debug!(
                "Refresh for unknown alert bucket from {} in tenant {} ignored",
                candidate.source_ip, candidate.tenant_id
            );
            return AlertOutcome::Ignored;
        }

        let risk = Self::blended_risk(&candidate);
        let mut alert = Alert {
            alert_id,
            uuid: Uuid::new_v4(),
            tenant_id: candidate.tenant_id.clone(),
            source_ip: candidate.source_ip,
            kind: candidate.kind,
            status: AlertStatus::Open,
            severity: Severity::from_risk(risk),
            risk,
            evidence: candidate.evidence.clone(),
            first_seen: candidate.first_seen,
            last_seen: candidate.last_seen,
            created_at: now,
            updated_at: now,
            correlation_group: None,
            degraded: candidate.degraded,
            tags,
        };
        self.correlate(&mut alert).await;
        self.store.upsert(alert.clone()).await;
        info!(
            "Alert {} opened: {} from {} in tenant {} ({:?})",
            alert.alert_id, alert.kind, alert.source_ip, alert.tenant_id, alert.severity
        );
        AlertOutcome::Created(alert)
    }

    /// Group cross-kind alerts from one origin whose event windows fall
    /// within the correlation window, under the UUID of the earliest alert.
    /// The comparison runs on event time: backlog replay must still group
    /// activity that happened together, and alerts merely dequeued together
    /// must not group.
    async fn correlate(&self, alert: &mut Alert) {
        let peers = self
            .store
            .live_for_source(&alert.tenant_id, alert.source_ip)
            .await;
        for peer in peers {
            if peer.kind == alert.kind {
                continue;
            }
            if Self::window_gap(alert, &peer) > self.correlation_window {
                continue;
            }
            let group = peer.correlation_group.unwrap_or(peer.uuid);
            alert.correlation_group = Some(group);
            if peer.correlation_group.is_none() {
                let mut peer = peer;
                peer.correlation_group = Some(group);
                peer.updated_at = (self.clock)();
                self.store.upsert(peer).await;
            }
            break;
        }
    }

    /// Event-time distance between two alerts' `[first_seen, last_seen]`
    /// windows; zero when they overlap.
    fn window_gap(a: &Alert, b: &Alert) -> Duration {
        if a.first_seen > b.last_seen {
            a.first_seen - b.last_seen
        } else if b.first_seen > a.last_seen {
            b.first_seen - a.last_seen
        } else {
            Duration::zero()
        }
    }

    /// Admin surface: acknowledge or resolve an alert. Transitions are
    /// idempotent; suppression is not reachable this way.
    pub async fn set_status(
        &self,
        tenant_id: &str,
        alert_id: &str,
        status: AlertStatus,
    ) -> Result<Alert, AlertError> {
        let mut alert =
            self.store
                .get(tenant_id, alert_id)
                .await
                .ok_or_else(|| AlertError::NotFound {
                    tenant_id: tenant_id.to_string(),
                    alert_id: alert_id.to_string(),
                })?;
        if alert.status == status {
            return Ok(alert);
        }
        if status == AlertStatus::Suppressed || !alert.status.can_transition(status) {
            return Err(AlertError::PolicyViolation {
                from: alert.status,
                to: status,
            });
        }
        alert.status = status;
        alert.updated_at = (self.clock)();
        self.store.upsert(alert.clone()).await;
        info!(
            "Alert {} in tenant {} moved to {:?}",
            alert_id, tenant_id, status
        );
        Ok(alert)
    }

    /// A whitelist entry added after the fact suppresses every live alert it
    /// covers. Returns the suppressed alert ids.
    pub async fn apply_whitelist(&self, tenant_id: &str, entry: &WhitelistEntry) -> Vec<String> {
        let mut suppressed = Vec::new();
        for mut alert in self.store.for_tenant(tenant_id).await {
            if !alert.status.can_transition(AlertStatus::Suppressed)
                || alert.status == AlertStatus::Suppressed
            {
                continue;
            }
            if entry.matches(alert.source_ip, None) {
                alert.status = AlertStatus::Suppressed;
                alert.updated_at = (self.clock)();
                suppressed.push(alert.alert_id.clone());
                self.store.upsert(alert).await;
            }
        }
        if !suppressed.is_empty() {
            info!(
                "Whitelist suppressed {} alert(s) in tenant {}",
                suppressed.len(),
                tenant_id
            );
        }
        suppressed
    }
}

/// Manager task: filtered candidates in, push-worthy alerts out. New alerts
/// and severity escalations notify; plain merges stay quiet.
pub async fn run_alert_manager(
    manager: Arc<AlertManager>,
    mut emit_rx: mpsc::Receiver<(ThreatCandidate, Vec<String>)>,
    push_tx: mpsc::Sender<AlertPush>,
) {
    while let Some((candidate, tags)) = emit_rx.recv().await {
        match manager.ingest(candidate, tags).await {
            AlertOutcome::Created(alert) => {
                if push_tx
                    .send(AlertPush {
                        alert,
                        escalated: false,
                    })
                    .await
                    .is_err()
                {
                    warn!("Notification channel closed");
                    break;
                }
            }
            AlertOutcome::Updated { alert, escalated } => {
                if escalated
                    && push_tx
                        .send(AlertPush {
                            alert,
                            escalated: true,
                        })
                        .await
                        .is_err()
                {
                    warn!("Notification channel closed");
                    break;
                }
            }
            AlertOutcome::Ignored => {}
        }
    }
    debug!("Alert manager task stopped");
}

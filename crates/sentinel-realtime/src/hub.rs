//! Notification hub
//!
//! Fans freshly opened or escalated alerts out to every push session of the
//! owning tenant and forwards the payload to the async notifier sinks. The
//! serialized message is built once per alert; `serde_json` keeps object
//! keys ordered, so the same alert always serializes to the same bytes.

use crate::session::PushSession;
use dashmap::DashMap;
use sentinel_alerts::AlertPush;
use sentinel_core::metrics::Metrics;
use sentinel_core::Alert;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Compact push message for one alert.
pub fn alert_message(alert: &Alert) -> String {
    let value = serde_json::json!({
        "type": "security_alert",
        "id": alert.alert_id,
        "kind": alert.kind.as_str(),
        "severity": alert.severity.as_str(),
        "risk": alert.risk,
        "source_ip": alert.source_ip.to_string(),
        "first_seen": alert.first_seen.to_rfc3339(),
        "last_seen": alert.last_seen.to_rfc3339(),
        "correlation_group": alert.correlation_group.map(|g| g.to_string()),
    });
    value.to_string()
}

#[derive(Default)]
pub struct NotificationHub {
    sessions: DashMap<(String, Uuid), Arc<PushSession>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<PushSession>) {
        info!(
            "Registered push session {} for tenant {}",
            session.session_id, session.tenant_id
        );
        self.sessions
            .insert((session.tenant_id.clone(), session.session_id), session);
    }

    pub fn unregister(&self, tenant_id: &str, session_id: Uuid) {
        if self
            .sessions
            .remove(&(tenant_id.to_string(), session_id))
            .is_some()
        {
            debug!("Unregistered push session {}", session_id);
        }
    }

    pub fn session_count(&self, tenant_id: &str) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.key().0 == tenant_id)
            .count()
    }

    /// Enqueue an alert for every session of its tenant.
    pub fn broadcast(&self, push: &AlertPush, metrics: &Metrics) -> usize {
        let message = alert_message(&push.alert);
        let mut delivered = 0;
        for entry in self.sessions.iter() {
            if entry.key().0 == push.alert.tenant_id {
                entry.value().enqueue(message.clone(), metrics);
                delivered += 1;
            }
        }
        if delivered > 0 {
            metrics
                .notify
                .delivered
                .fetch_add(delivered as u64, Ordering::Relaxed);
        }
        debug!(
            "Alert {} fanned out to {} session(s) of tenant {}",
            push.alert.alert_id, delivered, push.alert.tenant_id
        );
        delivered
    }
}

/// Hub task: alerts in, session fan-out plus notifier dispatch out.
pub async fn run_hub(
    hub: Arc<NotificationHub>,
    metrics: Arc<Metrics>,
    mut push_rx: mpsc::Receiver<AlertPush>,
    dispatch_tx: Option<mpsc::Sender<String>>,
) {
    while let Some(push) = push_rx.recv().await {
        hub.broadcast(&push, &metrics);
        if let Some(dispatch_tx) = &dispatch_tx {
            if dispatch_tx.send(alert_message(&push.alert)).await.is_err() {
                debug!("Notifier dispatch queue closed");
            }
        }
    }
    debug!("Notification hub task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sentinel_core::{AlertStatus, Severity, ThreatKind};

    fn alert(tenant: &str) -> Alert {
        let t = chrono::Utc.with_ymd_and_hms(2025, 6, 4, 12, 0, 0).unwrap();
        Alert {
            alert_id: "fp1".to_string(),
            uuid: Uuid::nil(),
            tenant_id: tenant.to_string(),
            source_ip: "10.0.0.100".parse().unwrap(),
            kind: ThreatKind::BruteForce,
            status: AlertStatus::Open,
            severity: Severity::High,
            risk: 0.7875,
            evidence: Vec::new(),
            first_seen: t,
            last_seen: t,
            created_at: t,
            updated_at: t,
            correlation_group: None,
            degraded: false,
            tags: Vec::new(),
        }
    }

    #[test]
    fn message_schema_is_stable() {
        let message = alert_message(&alert("acme-corp"));
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "security_alert");
        assert_eq!(value["id"], "fp1");
        assert_eq!(value["kind"], "brute_force");
        assert_eq!(value["severity"], "high");
        assert_eq!(value["source_ip"], "10.0.0.100");
        assert!(value["correlation_group"].is_null());
        // Serialization is deterministic for the same alert.
        assert_eq!(message, alert_message(&alert("acme-corp")));
    }

    #[test]
    fn broadcast_reaches_only_matching_tenant_sessions() {
        let metrics = Metrics::shared();
        let hub = NotificationHub::new();
        let acme = PushSession::new("acme-corp", 8);
        let beta = PushSession::new("beta-industries", 8);
        hub.register(Arc::clone(&acme));
        hub.register(Arc::clone(&beta));

        let push = AlertPush {
            alert: alert("acme-corp"),
            escalated: false,
        };
        let delivered = hub.broadcast(&push, &metrics);
        assert_eq!(delivered, 1);
        assert_eq!(acme.queued(), 1);
        assert_eq!(beta.queued(), 0);
    }

    #[test]
    fn unregister_removes_session() {
        let hub = NotificationHub::new();
        let session = PushSession::new("acme-corp", 8);
        let id = session.session_id;
        hub.register(session);
        assert_eq!(hub.session_count("acme-corp"), 1);
        hub.unregister("acme-corp", id);
        assert_eq!(hub.session_count("acme-corp"), 0);
    }
}

//! End-to-end pipeline scenarios
//!
//! Each test assembles the full pipeline (normalizer pool, detection shards,
//! false-positive filter, alert manager, notification hub) without binding
//! OS listeners, injects syslog frames through the raw queue and observes
//! alerts, counters and push messages.

use sentinel_alerts::AlertStore;
use sentinel_core::{
    Alert, RawEvent, Severity, SiemConfig, Tenant, TenantRegistry, ThreatKind, Transport,
    WhitelistTarget,
};
use sentinel_detection::Classification;
use sentinel_filter::GeoPoint;
use sentinel_realtime::{alert_message, PushSession};
use sentinel_server::{Pipeline, PipelineOptions};
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

fn test_config() -> SiemConfig {
    SiemConfig {
        jwt_secret: "integration-test-secret-integration".to_string(),
        shutdown_drain_seconds: 5,
        ..SiemConfig::default()
    }
}

fn test_registry() -> Arc<TenantRegistry> {
    let registry = TenantRegistry::new();
    registry.upsert(Tenant::new("acme-corp").with_cidrs(vec!["10.0.0.0/8".parse().unwrap()]));
    registry
        .upsert(Tenant::new("beta-industries").with_cidrs(vec!["172.16.0.0/12".parse().unwrap()]));
    Arc::new(registry)
}

fn pipeline() -> Pipeline {
    Pipeline::build(test_config(), test_registry(), PipelineOptions::default())
}

/// Base event time: a five-minute boundary so a scenario's events stay in
/// one dedup bucket.
fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 4, 12, 0, 0).unwrap()
}

fn stamp(seconds: i64) -> String {
    (base() + ChronoDuration::seconds(seconds)).to_rfc3339()
}

fn raw(frame: String, peer: &str) -> RawEvent {
    RawEvent::new(frame.into_bytes(), peer.parse().unwrap(), Transport::Udp)
}

fn auth_failure_frame(seconds: i64, user: &str, source: &str) -> String {
    format!(
        "<38>1 {} bastion sshd 2187 - - Failed password for {} from {} port 51000 ssh2",
        stamp(seconds),
        user,
        source
    )
}

fn auth_success_frame(seconds: i64, user: &str, source: &str) -> String {
    format!(
        "<38>1 {} bastion sshd 2187 - - Accepted password for {} from {} port 51000 ssh2",
        stamp(seconds),
        user,
        source
    )
}

fn port_access_frame(seconds: i64, source: &str, port: u16) -> String {
    format!(
        "<134>1 {} fw01 kernel - - - DENY IN=eth0 SRC={} DST=192.0.2.10 PROTO=TCP dpt={}",
        stamp(seconds),
        source,
        port
    )
}

const ACME_DEVICE: &str = "10.0.0.2:514";
const BETA_DEVICE: &str = "172.16.0.2:514";

async fn send_all(pipeline: &Pipeline, frames: Vec<String>, peer: &str) {
    let tx = pipeline.raw_sender();
    for frame in frames {
        tx.send(raw(frame, peer)).await.expect("raw queue closed");
    }
}

async fn wait_for_alerts(pipeline: &Pipeline, tenant: &str, count: usize) -> Vec<Alert> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let alerts = pipeline.alert_store.for_tenant(tenant).await;
        if alerts.len() >= count {
            return alerts;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "expected {count} alert(s) for {tenant}, found {} in time",
                alerts.len()
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Let the pipeline settle for negative assertions.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn classic_brute_force_raises_one_high_alert_with_full_evidence() {
    let pipeline = pipeline();
    let session = PushSession::new("acme-corp", 64);
    pipeline.hub.register(Arc::clone(&session));

    let users = ["alice", "alice", "bob", "alice", "bob", "root", "root", "root"];
    let frames = users
        .iter()
        .enumerate()
        .map(|(i, user)| auth_failure_frame(i as i64 * 15, user, "10.0.0.100"))
        .collect();
    send_all(&pipeline, frames, ACME_DEVICE).await;

    let alerts = wait_for_alerts(&pipeline, "acme-corp", 1).await;
    // Wait until all eight failures are merged in.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let alert = loop {
        let alerts = pipeline.alert_store.for_tenant("acme-corp").await;
        if alerts[0].evidence.len() == 8 {
            break alerts.into_iter().next().unwrap();
        }
        assert!(tokio::time::Instant::now() < deadline, "evidence never reached 8");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(alerts.len(), 1);
    assert_eq!(alert.kind, ThreatKind::BruteForce);
    assert_eq!(alert.source_ip, "10.0.0.100".parse::<std::net::IpAddr>().unwrap());
    assert_eq!(alert.severity, Severity::High);
    assert!(alert.risk >= 0.75, "risk was {}", alert.risk);
    assert!(alert.is_well_formed());

    // The push session sees the alert once; merges without escalation stay
    // quiet.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while session.queued() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "push message never arrived");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    settle().await;
    let messages = session.take_queued();
    assert_eq!(messages.len(), 1);
    let value: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
    assert_eq!(value["type"], "security_alert");
    assert_eq!(value["kind"], "brute_force");
    assert_eq!(value["source_ip"], "10.0.0.100");
}

#[tokio::test]
async fn below_threshold_stays_silent() {
    let pipeline = pipeline();
    let frames = (0..4)
        .map(|i| auth_failure_frame(i * 50, "alice", "10.0.0.101"))
        .collect();
    send_all(&pipeline, frames, ACME_DEVICE).await;
    settle().await;
    assert!(pipeline.alert_store.for_tenant("acme-corp").await.is_empty());
    assert_eq!(pipeline.metrics.ingest.snapshot().malformed, 0);
}

#[tokio::test]
async fn port_scan_raises_medium_alert_with_all_probes_as_evidence() {
    let pipeline = pipeline();
    let frames = (0..15u16)
        .map(|i| port_access_frame(i64::from(i) * 20, "10.0.0.50", 20 + i))
        .collect();
    send_all(&pipeline, frames, BETA_DEVICE).await;

    wait_for_alerts(&pipeline, "beta-industries", 1).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let alert = loop {
        let alerts = pipeline.alert_store.for_tenant("beta-industries").await;
        if alerts[0].evidence.len() == 15 {
            break alerts.into_iter().next().unwrap();
        }
        assert!(tokio::time::Instant::now() < deadline, "evidence never reached 15");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(alert.kind, ThreatKind::PortScan);
    assert_eq!(alert.severity, Severity::Medium);
    assert!(alert.is_well_formed());
}

#[tokio::test]
async fn service_account_noise_is_suppressed_and_counted_once() {
    let pipeline = pipeline();
    pipeline.profiles.set_classification(
        "acme-corp",
        "svc-backup",
        Classification::ServiceAccount,
        0.9,
    );

    let frames = (0..6)
        .map(|i| auth_failure_frame(i * 10, "svc-backup", "10.1.1.7"))
        .collect();
    send_all(&pipeline, frames, ACME_DEVICE).await;
    settle().await;

    assert!(pipeline.alert_store.for_tenant("acme-corp").await.is_empty());
    assert_eq!(
        pipeline
            .metrics
            .suppression
            .get("acme-corp", "service_account_tolerance"),
        1
    );
    assert!(!pipeline.audit.for_tenant("acme-corp").is_empty());
}

#[tokio::test]
async fn maintenance_window_suppresses_until_it_ends() {
    let pipeline = pipeline();
    let now = Utc::now();
    let mut tenant =
        Tenant::new("acme-corp").with_cidrs(vec!["10.0.0.0/8".parse().unwrap()]);
    tenant.maintenance_windows = vec![sentinel_core::MaintenanceWindow {
        start: now - ChronoDuration::minutes(30),
        end: now + ChronoDuration::minutes(30),
        authorized_sources: vec!["10.2.0.0/24".parse().unwrap()],
    }];
    pipeline.registry.upsert(tenant);

    let frames = (0..12u16)
        .map(|i| port_access_frame(i64::from(i) * 10, "10.2.0.9", 20 + i))
        .collect();
    send_all(&pipeline, frames, ACME_DEVICE).await;
    settle().await;

    assert!(pipeline.alert_store.for_tenant("acme-corp").await.is_empty());
    assert_eq!(
        pipeline
            .metrics
            .suppression
            .get("acme-corp", "maintenance_window"),
        1
    );

    // The window ends; the same scan two hours later raises an alert.
    let mut tenant =
        Tenant::new("acme-corp").with_cidrs(vec!["10.0.0.0/8".parse().unwrap()]);
    tenant.maintenance_windows = vec![sentinel_core::MaintenanceWindow {
        start: now - ChronoDuration::hours(3),
        end: now - ChronoDuration::hours(2),
        authorized_sources: vec!["10.2.0.0/24".parse().unwrap()],
    }];
    pipeline.registry.upsert(tenant);

    let later = 2 * 3600;
    let frames = (0..12u16)
        .map(|i| port_access_frame(later + i64::from(i) * 10, "10.2.0.9", 20 + i))
        .collect();
    send_all(&pipeline, frames, ACME_DEVICE).await;

    let alerts = wait_for_alerts(&pipeline, "acme-corp", 1).await;
    assert_eq!(alerts[0].kind, ThreatKind::PortScan);
}

#[tokio::test]
async fn brute_force_and_scan_from_one_origin_correlate() {
    let pipeline = pipeline();

    let bf_frames = (0..6)
        .map(|i| auth_failure_frame(i * 10, "root", "203.0.113.7"))
        .collect();
    send_all(&pipeline, bf_frames, ACME_DEVICE).await;
    wait_for_alerts(&pipeline, "acme-corp", 1).await;

    let scan_frames = (0..12u16)
        .map(|i| port_access_frame(120 + i64::from(i) * 5, "203.0.113.7", 20 + i))
        .collect();
    send_all(&pipeline, scan_frames, ACME_DEVICE).await;
    let alerts = wait_for_alerts(&pipeline, "acme-corp", 2).await;

    let bf = alerts.iter().find(|a| a.kind == ThreatKind::BruteForce).unwrap();
    let scan = alerts.iter().find(|a| a.kind == ThreatKind::PortScan).unwrap();
    assert!(bf.correlation_group.is_some());
    assert_eq!(bf.correlation_group, scan.correlation_group);
}

#[tokio::test]
async fn statically_whitelisted_source_never_alerts() {
    let pipeline = pipeline();
    pipeline
        .add_static_whitelist(
            "acme-corp",
            WhitelistTarget::Ip("10.9.9.9".parse().unwrap()),
            "vulnerability scanner",
        )
        .await;

    let frames = (0..20)
        .map(|i| auth_failure_frame(i * 5, "alice", "10.9.9.9"))
        .collect();
    send_all(&pipeline, frames, ACME_DEVICE).await;
    settle().await;

    assert!(pipeline.alert_store.for_tenant("acme-corp").await.is_empty());
    assert!(
        pipeline
            .metrics
            .suppression
            .get("acme-corp", "static_whitelist")
            >= 1
    );
}

#[tokio::test]
async fn replaying_input_yields_identical_alert_ids() {
    let pipeline = pipeline();
    let frames: Vec<String> = (0..5)
        .map(|i| auth_failure_frame(i * 10, "alice", "10.0.0.77"))
        .collect();
    send_all(&pipeline, frames.clone(), ACME_DEVICE).await;
    let first = wait_for_alerts(&pipeline, "acme-corp", 1).await;

    send_all(&pipeline, frames, ACME_DEVICE).await;
    settle().await;
    let second = pipeline.alert_store.for_tenant("acme-corp").await;

    assert_eq!(second.len(), 1);
    assert_eq!(first[0].alert_id, second[0].alert_id);
}

#[tokio::test]
async fn earned_trust_suppresses_later_brute_force() {
    let pipeline = pipeline();
    let success_frames = (0..5)
        .map(|i| auth_success_frame(i * 60, "deploy", "10.0.0.88"))
        .collect();
    send_all(&pipeline, success_frames, ACME_DEVICE).await;

    // Wait for the earned entry to land.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while pipeline
        .whitelists
        .dynamic_match("acme-corp", "10.0.0.88".parse().unwrap(), Utc::now())
        .is_none()
    {
        assert!(tokio::time::Instant::now() < deadline, "dynamic grant never landed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let failure_frames = (0..6)
        .map(|i| auth_failure_frame(400 + i * 10, "deploy", "10.0.0.88"))
        .collect();
    send_all(&pipeline, failure_frames, ACME_DEVICE).await;
    settle().await;

    assert!(pipeline.alert_store.for_tenant("acme-corp").await.is_empty());
    assert_eq!(
        pipeline
            .metrics
            .suppression
            .get("acme-corp", "dynamic_whitelist"),
        1
    );
}

#[tokio::test]
async fn impossible_travel_escalates_risk() {
    let pipeline = pipeline();
    pipeline
        .geo_resolver
        .insert("10.0.0.60".parse().unwrap(), GeoPoint { lat: 52.52, lon: 13.405 });
    pipeline
        .geo_resolver
        .insert("203.0.113.99".parse().unwrap(), GeoPoint { lat: -33.87, lon: 151.21 });

    // Recent successful login from Berlin. The travel trail keys on event
    // time, so keep it near the wall clock.
    let login_offset = (Utc::now() - base()).num_seconds() - 600;
    let success = auth_success_frame(login_offset, "alice", "10.0.0.60");
    send_all(&pipeline, vec![success], ACME_DEVICE).await;
    settle().await;

    // Brute force for the same user from Sydney minutes later.
    let attack_offset = login_offset + 300;
    let frames = (0..5)
        .map(|i| auth_failure_frame(attack_offset + i * 10, "alice", "203.0.113.99"))
        .collect();
    send_all(&pipeline, frames, ACME_DEVICE).await;

    let alerts = wait_for_alerts(&pipeline, "acme-corp", 1).await;
    assert!(alerts[0].risk >= 0.45 * (0.8 + 0.65) - 1e-9, "risk was {}", alerts[0].risk);
    assert!(alerts[0].tags.contains(&"impossible_travel".to_string()));
}

#[tokio::test]
async fn degraded_hot_state_tags_alerts() {
    let pipeline = pipeline();
    pipeline.hot_health.set_available(false);

    let frames = (0..5)
        .map(|i| auth_failure_frame(i * 10, "alice", "10.0.0.66"))
        .collect();
    send_all(&pipeline, frames, ACME_DEVICE).await;

    let alerts = wait_for_alerts(&pipeline, "acme-corp", 1).await;
    assert!(alerts[0].degraded);
}

#[tokio::test]
async fn persisted_alert_reserializes_to_identical_push_message() {
    let pipeline = pipeline();
    let frames = (0..5)
        .map(|i| auth_failure_frame(i * 10, "alice", "10.0.0.55"))
        .collect();
    send_all(&pipeline, frames, ACME_DEVICE).await;
    wait_for_alerts(&pipeline, "acme-corp", 1).await;

    let stored = pipeline.alert_store.for_tenant("acme-corp").await;
    let reloaded = pipeline
        .alert_store
        .get("acme-corp", &stored[0].alert_id)
        .await
        .unwrap();
    assert_eq!(alert_message(&stored[0]), alert_message(&reloaded));
}

#[tokio::test]
async fn malformed_and_untenanted_frames_are_counted_not_fatal() {
    let pipeline = pipeline();
    let bad = vec![
        "not syslog at all".to_string(),
        "<999>1 2025-06-04T12:00:00Z h a - - - bad pri".to_string(),
        format!("<38>1 {} h sshd - - - Failed password for x from 10.0.0.1", stamp(0)),
    ];
    // The third frame is fine but arrives from a peer no tenant owns.
    send_all(&pipeline, bad, "198.51.100.1:514").await;
    settle().await;

    let snapshot = pipeline.metrics.ingest.snapshot();
    assert_eq!(snapshot.malformed, 2);
    assert_eq!(snapshot.untenanted, 1);

    // Ingestion still works afterwards.
    let frames = (0..5)
        .map(|i| auth_failure_frame(i * 10, "alice", "10.0.0.44"))
        .collect();
    send_all(&pipeline, frames, ACME_DEVICE).await;
    wait_for_alerts(&pipeline, "acme-corp", 1).await;
}

#[tokio::test]
async fn shutdown_flushes_in_flight_alerts() {
    let pipeline = pipeline();
    let frames = (0..5)
        .map(|i| auth_failure_frame(i * 10, "alice", "10.0.0.33"))
        .collect();
    send_all(&pipeline, frames, ACME_DEVICE).await;

    let store = Arc::clone(&pipeline.alert_store);
    pipeline.shutdown().await;
    assert_eq!(store.for_tenant("acme-corp").await.len(), 1);
}

//! Event normalization (raw syslog → `SecurityEvent`)
//!
//! A small worker pool pulls `RawEvent`s off the ingestion queue, parses
//! them, attributes them to a tenant and emits typed events toward the
//! detection shards. Normalization is a pure function of the raw event plus
//! the tenant registry, so the pool parallelizes trivially.

use crate::parser::{parse_syslog, ParseError, SyslogMessage};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sentinel_core::metrics::Metrics;
use sentinel_core::{EventKind, RawEvent, SecurityEvent, TenantRegistry};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

static RE_INVALID_USER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)invalid user ([\w.-]+)").expect("static regex"));
static RE_FOR_USER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"for (?:invalid user )?([\w.-]+) from").expect("static regex"));
static RE_USER_EQ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\buser=([\w.-]+)").expect("static regex"));
static RE_RHOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\brhost=([0-9a-fA-F.:]+)").expect("static regex"));
static RE_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bSRC=([0-9a-fA-F.:]+)").expect("static regex"));
static RE_FROM_IP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bfrom ([0-9]{1,3}(?:\.[0-9]{1,3}){3})").expect("static regex"));
static RE_DST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bDST=([0-9a-fA-F.:]+)").expect("static regex"));
static RE_DPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdpt=([0-9]+)").expect("static regex"));
static RE_TO_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bto port ([0-9]+)").expect("static regex"));
static RE_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bport ([0-9]+)").expect("static regex"));
static RE_EXIT_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"exit (?:code|status) ([0-9]+)").expect("static regex"));

/// Why a raw event was dropped instead of normalized.
#[derive(Debug)]
pub enum NormalizeFailure {
    Malformed(ParseError),
    Untenanted,
}

pub struct Normalizer {
    registry: Arc<TenantRegistry>,
}

impl Normalizer {
    pub fn new(registry: Arc<TenantRegistry>) -> Self {
        Self { registry }
    }

    pub fn normalize(&self, raw: &RawEvent) -> Result<SecurityEvent, NormalizeFailure> {
        let parsed =
            parse_syslog(&raw.bytes, raw.received_at).map_err(NormalizeFailure::Malformed)?;

        let tenant_id = self
            .attribute(raw, &parsed)
            .ok_or(NormalizeFailure::Untenanted)?;

        let (kind, dest_port) = classify(&parsed);
        let username = extract_username(&parsed.msg);
        let source_ip = extract_source_ip(&parsed.msg).unwrap_or_else(|| raw.peer.ip());
        let dest_ip = RE_DST
            .captures(&parsed.msg)
            .and_then(|c| c[1].parse::<IpAddr>().ok());

        let (event_time, clamped) =
            SecurityEvent::clamp_event_time(parsed.timestamp, raw.received_at);

        Ok(SecurityEvent {
            event_id: Uuid::new_v4(),
            tenant_id,
            event_time,
            ingest_time: raw.received_at,
            source_ip,
            dest_ip,
            dest_port,
            username,
            kind,
            protocol: raw.transport,
            facility: parsed.facility,
            severity: parsed.severity,
            raw_message: String::from_utf8_lossy(&raw.bytes).into_owned(),
            clamped,
        })
    }

    /// Attribution order: structured-data tenant key, then SNI, then
    /// longest-prefix CIDR match of the peer.
    fn attribute(&self, raw: &RawEvent, parsed: &SyslogMessage) -> Option<String> {
        if let Some(tenant) = parsed.tenant_param() {
            if self.registry.get(tenant).is_some() {
                return Some(tenant.to_string());
            }
        }
        if let Some(sni) = &raw.sni_tenant {
            if let Some(tenant) = self.registry.match_sni(sni) {
                return Some(tenant.id.clone());
            }
        }
        self.registry
            .match_peer(raw.peer.ip())
            .map(|tenant| tenant.id.clone())
    }
}

/// Classify the message and extract the destination port when relevant.
fn classify(parsed: &SyslogMessage) -> (EventKind, Option<u16>) {
    let msg = &parsed.msg;

    if msg.contains("Failed password")
        || msg.contains("authentication failure")
        || msg.contains("Invalid user")
        || msg.contains("invalid user")
        || sshd_nonzero_exit(parsed)
    {
        return (EventKind::AuthFailure, None);
    }

    if msg.contains("Accepted password")
        || msg.contains("Accepted publickey")
        || msg.contains("session opened")
    {
        return (EventKind::AuthSuccess, None);
    }

    let dest_port = extract_dest_port(msg);
    if dest_port.is_some() {
        let lowered = msg.to_lowercase();
        let firewall_deny = lowered.contains("deny")
            || lowered.contains("drop")
            || lowered.contains("reject")
            || lowered.contains("blocked");
        if firewall_deny || lowered.contains("connection attempt") {
            return (EventKind::PortAccess, dest_port);
        }
    }

    (EventKind::Other, dest_port)
}

fn sshd_nonzero_exit(parsed: &SyslogMessage) -> bool {
    if parsed.app_name.as_deref() != Some("sshd") {
        return false;
    }
    RE_EXIT_CODE
        .captures(&parsed.msg)
        .and_then(|c| c[1].parse::<u32>().ok())
        .is_some_and(|code| code != 0)
}

fn extract_username(msg: &str) -> Option<String> {
    for re in [&*RE_INVALID_USER, &*RE_FOR_USER, &*RE_USER_EQ] {
        if let Some(captures) = re.captures(msg) {
            return Some(captures[1].to_string());
        }
    }
    None
}

fn extract_source_ip(msg: &str) -> Option<IpAddr> {
    for re in [&*RE_RHOST, &*RE_SRC, &*RE_FROM_IP] {
        if let Some(captures) = re.captures(msg) {
            if let Ok(ip) = captures[1].parse() {
                return Some(ip);
            }
        }
    }
    None
}

/// First integer in 1..=65535 following `dpt=`, `to port` or `port`.
/// Port 0 and anything above 65535 are rejected outright.
fn extract_dest_port(msg: &str) -> Option<u16> {
    for re in [&*RE_DPT, &*RE_TO_PORT, &*RE_PORT] {
        if let Some(captures) = re.captures(msg) {
            let port: u64 = match captures[1].parse() {
                Ok(p) => p,
                Err(_) => continue,
            };
            if (1..=65535).contains(&port) {
                return Some(port as u16);
            }
            return None;
        }
    }
    None
}

/// Run `worker_count` normalizer workers. Frames are distributed by peer
/// address hash so events from one device keep their arrival order, which in
/// turn preserves per-`(tenant, source_ip)` ordering downstream.
pub async fn run_normalizer_pool(
    worker_count: usize,
    mut raw_rx: mpsc::Receiver<RawEvent>,
    event_tx: mpsc::Sender<SecurityEvent>,
    registry: Arc<TenantRegistry>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let worker_count = worker_count.max(1);
    let mut worker_txs = Vec::with_capacity(worker_count);
    let mut workers = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let (worker_tx, mut worker_rx) = mpsc::channel::<RawEvent>(1024);
        worker_txs.push(worker_tx);
        let event_tx = event_tx.clone();
        let normalizer = Normalizer::new(Arc::clone(&registry));
        let metrics = Arc::clone(&metrics);
        workers.push(tokio::spawn(async move {
            while let Some(raw) = worker_rx.recv().await {
                match normalizer.normalize(&raw) {
                    Ok(event) => {
                        if event_tx.send(event).await.is_err() {
                            warn!("Normalizer {}: detection queue closed", worker_id);
                            break;
                        }
                    }
                    Err(NormalizeFailure::Malformed(e)) => {
                        metrics
                            .ingest
                            .malformed
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        debug!("Dropping malformed frame from {}: {}", raw.peer, e);
                    }
                    Err(NormalizeFailure::Untenanted) => {
                        metrics
                            .ingest
                            .untenanted
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        debug!("Dropping untenanted frame from {}", raw.peer);
                    }
                }
            }
        }));
    }
    drop(event_tx);

    let route = |raw: &RawEvent| {
        let mut hasher = DefaultHasher::new();
        raw.peer.ip().hash(&mut hasher);
        (hasher.finish() % worker_count as u64) as usize
    };
    let mut draining = false;
    loop {
        let raw = if draining {
            // Shutdown was signalled: distribute what is already queued.
            match raw_rx.try_recv() {
                Ok(raw) => Some(raw),
                Err(_) => break,
            }
        } else {
            tokio::select! {
                raw = raw_rx.recv() => raw,
                _ = shutdown.changed() => {
                    draining = true;
                    continue;
                }
            }
        };
        let raw = match raw {
            Some(raw) => raw,
            None => break,
        };
        let worker = route(&raw);
        if worker_txs[worker].send(raw).await.is_err() {
            warn!("Normalizer worker {} gone, stopping distribution", worker);
            break;
        }
    }
    drop(worker_txs);
    for worker in workers {
        let _ = worker.await;
    }
    info!("Normalizer pool stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{Tenant, Transport};
    use std::net::SocketAddr;

    fn registry_with(tenant: &str, cidr: &str) -> Arc<TenantRegistry> {
        let registry = TenantRegistry::new();
        registry.upsert(Tenant::new(tenant).with_cidrs(vec![cidr.parse().unwrap()]));
        Arc::new(registry)
    }

    fn raw(frame: &str, peer: &str) -> RawEvent {
        let peer: SocketAddr = peer.parse().unwrap();
        RawEvent::new(frame.as_bytes().to_vec(), peer, Transport::Udp)
    }

    #[test]
    fn failed_password_becomes_auth_failure_with_username() {
        let normalizer = Normalizer::new(registry_with("acme-corp", "10.0.0.0/8"));
        let event = normalizer
            .normalize(&raw(
                "<38>Jun  4 11:55:01 bastion sshd[2187]: Failed password for alice from 10.0.0.100 port 51000 ssh2",
                "10.0.0.100:514",
            ))
            .unwrap();
        assert_eq!(event.kind, EventKind::AuthFailure);
        assert_eq!(event.username.as_deref(), Some("alice"));
        assert_eq!(event.tenant_id, "acme-corp");
        assert_eq!(event.source_ip, "10.0.0.100".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn invalid_user_is_auth_failure() {
        let normalizer = Normalizer::new(registry_with("acme-corp", "10.0.0.0/8"));
        let event = normalizer
            .normalize(&raw(
                "<38>Jun  4 11:55:01 bastion sshd[2187]: Invalid user admin from 10.0.0.100",
                "10.0.0.100:514",
            ))
            .unwrap();
        assert_eq!(event.kind, EventKind::AuthFailure);
        assert_eq!(event.username.as_deref(), Some("admin"));
    }

    #[test]
    fn accepted_password_is_auth_success() {
        let normalizer = Normalizer::new(registry_with("acme-corp", "10.0.0.0/8"));
        let event = normalizer
            .normalize(&raw(
                "<38>Jun  4 11:55:01 bastion sshd[2187]: Accepted password for bob from 10.0.0.7 port 22 ssh2",
                "10.0.0.7:514",
            ))
            .unwrap();
        assert_eq!(event.kind, EventKind::AuthSuccess);
        assert_eq!(event.username.as_deref(), Some("bob"));
    }

    #[test]
    fn firewall_deny_with_dpt_is_port_access() {
        let normalizer = Normalizer::new(registry_with("beta-industries", "10.0.0.0/8"));
        let event = normalizer
            .normalize(&raw(
                "<134>Jun  4 11:55:01 fw01 kernel: DENY IN=eth0 SRC=10.0.0.50 DST=192.0.2.10 PROTO=TCP dpt=23",
                "10.0.0.50:514",
            ))
            .unwrap();
        assert_eq!(event.kind, EventKind::PortAccess);
        assert_eq!(event.dest_port, Some(23));
        assert_eq!(event.source_ip, "10.0.0.50".parse::<IpAddr>().unwrap());
        assert_eq!(event.dest_ip, Some("192.0.2.10".parse().unwrap()));
    }

    #[test]
    fn connection_attempt_phrasing_is_port_access() {
        let normalizer = Normalizer::new(registry_with("beta-industries", "10.0.0.0/8"));
        let event = normalizer
            .normalize(&raw(
                "<134>Jun  4 11:55:01 fw01 fw: connection attempt to port 8443 from external",
                "10.0.0.50:514",
            ))
            .unwrap();
        assert_eq!(event.kind, EventKind::PortAccess);
        assert_eq!(event.dest_port, Some(8443));
    }

    #[test]
    fn port_zero_and_overflow_are_rejected() {
        let normalizer = Normalizer::new(registry_with("beta-industries", "10.0.0.0/8"));
        let zero = normalizer
            .normalize(&raw(
                "<134>Jun  4 11:55:01 fw01 kernel: DROP SRC=10.0.0.50 dpt=0",
                "10.0.0.50:514",
            ))
            .unwrap();
        assert_eq!(zero.kind, EventKind::Other);
        assert_eq!(zero.dest_port, None);

        let overflow = normalizer
            .normalize(&raw(
                "<134>Jun  4 11:55:01 fw01 kernel: DROP SRC=10.0.0.50 dpt=65536",
                "10.0.0.50:514",
            ))
            .unwrap();
        assert_eq!(overflow.kind, EventKind::Other);
        assert_eq!(overflow.dest_port, None);
    }

    #[test]
    fn structured_data_tenant_wins_over_cidr() {
        let registry = TenantRegistry::new();
        registry.upsert(Tenant::new("acme-corp").with_cidrs(vec!["10.0.0.0/8".parse().unwrap()]));
        registry.upsert(Tenant::new("beta-industries"));
        let normalizer = Normalizer::new(Arc::new(registry));
        let event = normalizer
            .normalize(&raw(
                r#"<165>1 2025-06-04T11:14:15.003Z fw01 app - - [meta tenant="beta-industries"] something"#,
                "10.0.0.100:514",
            ))
            .unwrap();
        assert_eq!(event.tenant_id, "beta-industries");
    }

    #[test]
    fn unattributable_peer_is_untenanted() {
        let normalizer = Normalizer::new(registry_with("acme-corp", "10.0.0.0/8"));
        let result = normalizer.normalize(&raw(
            "<38>Jun  4 11:55:01 host sshd: Failed password for alice from 203.0.113.5",
            "203.0.113.5:514",
        ));
        assert!(matches!(result, Err(NormalizeFailure::Untenanted)));
    }

    #[test]
    fn sshd_nonzero_exit_is_auth_failure() {
        let normalizer = Normalizer::new(registry_with("acme-corp", "10.0.0.0/8"));
        let event = normalizer
            .normalize(&raw(
                "<38>Jun  4 11:55:01 bastion sshd[99]: Disconnected, exit code 255",
                "10.0.0.100:514",
            ))
            .unwrap();
        assert_eq!(event.kind, EventKind::AuthFailure);
    }
}

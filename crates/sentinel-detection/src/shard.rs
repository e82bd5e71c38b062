//! Shard routing and worker loops
//!
//! Events are routed by `hash(tenant_id, source_ip) mod N`. Each worker owns
//! the detection state for its slice exclusively, so per-origin processing is
//! single-threaded and FIFO while shards run in parallel. Workers exit when
//! the event queue closes, which drains naturally during shutdown.

use crate::engine::{DynamicWhitelistRequest, Engine};
use crate::profile::ProfileStore;
use crate::state::DetectionState;
use chrono::Utc;
use sentinel_core::store::HotStateHealth;
use sentinel_core::{DetectionParams, SecurityEvent, TenantRegistry, ThreatCandidate};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration as StdDuration};
use tracing::{debug, info, warn};

const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(60);

/// Routes events to the shard owning their `(tenant, source_ip)` slice.
#[derive(Clone)]
pub struct DetectionRouter {
    senders: Vec<mpsc::Sender<SecurityEvent>>,
}

impl DetectionRouter {
    fn shard_for(&self, tenant_id: &str, source_ip: IpAddr) -> usize {
        let mut hasher = DefaultHasher::new();
        tenant_id.hash(&mut hasher);
        source_ip.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    pub async fn route(&self, event: SecurityEvent) -> Result<(), ()> {
        let shard = self.shard_for(&event.tenant_id, event.source_ip);
        self.senders[shard].send(event).await.map_err(|_| ())
    }

    pub fn shard_count(&self) -> usize {
        self.senders.len()
    }
}

pub struct ShardHandles {
    pub router: DetectionRouter,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Spawn `shard_count` detection workers.
#[allow(clippy::too_many_arguments)]
pub fn spawn_shards(
    shard_count: usize,
    queue_capacity: usize,
    defaults: DetectionParams,
    registry: Arc<TenantRegistry>,
    profiles: Arc<ProfileStore>,
    hot_health: Arc<HotStateHealth>,
    candidate_tx: mpsc::Sender<ThreatCandidate>,
    whitelist_tx: mpsc::Sender<DynamicWhitelistRequest>,
) -> ShardHandles {
    let mut senders = Vec::with_capacity(shard_count);
    let mut tasks = Vec::with_capacity(shard_count);
    for shard_id in 0..shard_count {
        let (tx, rx) = mpsc::channel(queue_capacity);
        senders.push(tx);
        let engine = Engine::new(
            defaults,
            Arc::clone(&registry),
            Arc::clone(&profiles),
            Arc::clone(&hot_health),
        );
        let candidate_tx = candidate_tx.clone();
        let whitelist_tx = whitelist_tx.clone();
        tasks.push(tokio::spawn(shard_worker(
            shard_id,
            rx,
            engine,
            candidate_tx,
            whitelist_tx,
        )));
    }
    info!("Spawned {} detection shards", shard_count);
    ShardHandles {
        router: DetectionRouter { senders },
        tasks,
    }
}

async fn shard_worker(
    shard_id: usize,
    mut rx: mpsc::Receiver<SecurityEvent>,
    engine: Engine,
    candidate_tx: mpsc::Sender<ThreatCandidate>,
    whitelist_tx: mpsc::Sender<DynamicWhitelistRequest>,
) {
    let mut states: HashMap<(String, IpAddr), DetectionState> = HashMap::new();
    let mut sweep = interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                let event = match maybe_event {
                    Some(event) => event,
                    None => break,
                };
                let key = (event.tenant_id.clone(), event.source_ip);
                let state = states
                    .entry(key)
                    .or_insert_with(|| DetectionState::new(event.ingest_time));
                let output = engine.process(&event, state);
                if let Some(candidate) = output.candidate {
                    if candidate_tx.send(candidate).await.is_err() {
                        warn!("Shard {}: candidate queue closed", shard_id);
                        break;
                    }
                }
                if let Some(request) = output.whitelist_request {
                    if whitelist_tx.send(request).await.is_err() {
                        debug!("Shard {}: whitelist request queue closed", shard_id);
                    }
                }
            }
            _ = sweep.tick() => {
                let now = Utc::now();
                let before = states.len();
                // Idle TTL follows each tenant's own windows.
                states.retain(|(tenant_id, _), state| {
                    let ttl = engine.params_for(tenant_id).idle_ttl();
                    !state.is_idle(now, ttl)
                });
                let evicted = before - states.len();
                if evicted > 0 {
                    debug!("Shard {}: evicted {} idle origins", shard_id, evicted);
                }
            }
        }
    }
    debug!("Shard {} stopped with {} live origins", shard_id, states.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sentinel_core::{EventKind, Tenant, Transport};
    use uuid::Uuid;

    fn event(tenant: &str, ip: &str, seconds: i64) -> SecurityEvent {
        SecurityEvent {
            event_id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            event_time: chrono::Utc.with_ymd_and_hms(2025, 6, 4, 12, 0, 0).unwrap()
                + chrono::Duration::seconds(seconds),
            ingest_time: chrono::Utc.with_ymd_and_hms(2025, 6, 4, 12, 0, 0).unwrap()
                + chrono::Duration::seconds(seconds),
            source_ip: ip.parse().unwrap(),
            dest_ip: None,
            dest_port: None,
            username: Some("alice".to_string()),
            kind: EventKind::AuthFailure,
            protocol: Transport::Udp,
            facility: 4,
            severity: 6,
            raw_message: String::new(),
            clamped: false,
        }
    }

    #[test]
    fn routing_is_stable_per_origin() {
        let (tx, _rx) = mpsc::channel(1);
        let router = DetectionRouter {
            senders: vec![tx.clone(), tx.clone(), tx.clone(), tx],
        };
        let first = router.shard_for("acme-corp", "10.0.0.100".parse().unwrap());
        for _ in 0..10 {
            assert_eq!(first, router.shard_for("acme-corp", "10.0.0.100".parse().unwrap()));
        }
    }

    #[tokio::test]
    async fn shard_worker_emits_candidates_end_to_end() {
        let registry = Arc::new(TenantRegistry::new());
        registry.upsert(Tenant::new("acme-corp"));
        let (candidate_tx, mut candidate_rx) = mpsc::channel(64);
        let (whitelist_tx, _whitelist_rx) = mpsc::channel(64);
        let handles = spawn_shards(
            2,
            64,
            DetectionParams::default(),
            registry,
            Arc::new(ProfileStore::new()),
            HotStateHealth::shared(),
            candidate_tx,
            whitelist_tx,
        );
        for i in 0..5 {
            handles
                .router
                .route(event("acme-corp", "10.0.0.100", i))
                .await
                .unwrap();
        }
        let candidate = tokio::time::timeout(StdDuration::from_secs(2), candidate_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.tenant_id, "acme-corp");
        assert_eq!(candidate.evidence.len(), 5);
    }
}

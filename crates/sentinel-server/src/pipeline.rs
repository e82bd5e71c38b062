//! End-to-end pipeline wiring
//!
//! Shutdown is a cascade: the watch signal stops the listeners, dropping the
//! last raw-queue senders; each downstream stage drains its queue and exits
//! when its input closes. The drain runs under the configured budget, after
//! which remaining tasks are aborted.

use sentinel_alerts::{run_alert_manager, AlertManager, AlertStore, MemoryAlertStore};
use sentinel_core::metrics::Metrics;
use sentinel_core::store::HotStateHealth;
use sentinel_core::{
    EventKind, RawEvent, SecurityEvent, SiemConfig, TenantRegistry, WhitelistTarget,
};
use sentinel_detection::{spawn_shards, ProfileStore};
use sentinel_filter::{
    apply_whitelist_request, run_filter, ConfirmedAlerts, FpFilter, GeoResolver,
    StaticGeoResolver, SuppressionAudit, TravelTracker, WhitelistStore,
};
use sentinel_ingest::{
    load_tls_config, run_normalizer_pool, run_tcp_listener, run_tls_listener, run_udp_listener,
};
use sentinel_realtime::{
    run_dispatcher, run_hub, run_push_server, NotificationHub, NotifyDispatcher, SessionConfig,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Alert lookup handed to the dynamic-whitelist grant path.
struct AlertIndex(Arc<MemoryAlertStore>);

impl ConfirmedAlerts for AlertIndex {
    fn has_confirmed_alerts(&self, tenant_id: &str, source_ip: IpAddr) -> bool {
        self.0.has_live_for_source(tenant_id, source_ip)
    }
}

/// Optional collaborators the binary configures and tests stub out.
#[derive(Default)]
pub struct PipelineOptions {
    /// Email/webhook dispatcher; push sessions always go through the hub.
    pub dispatcher: Option<Arc<NotifyDispatcher>>,
}

pub struct Pipeline {
    pub config: SiemConfig,
    pub registry: Arc<TenantRegistry>,
    pub metrics: Arc<Metrics>,
    pub whitelists: Arc<WhitelistStore>,
    pub profiles: Arc<ProfileStore>,
    pub alert_store: Arc<MemoryAlertStore>,
    pub manager: Arc<AlertManager>,
    pub hub: Arc<NotificationHub>,
    pub audit: Arc<SuppressionAudit>,
    pub geo_resolver: Arc<StaticGeoResolver>,
    pub hot_health: Arc<HotStateHealth>,
    raw_tx: mpsc::Sender<RawEvent>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn build(
        config: SiemConfig,
        registry: Arc<TenantRegistry>,
        options: PipelineOptions,
    ) -> Self {
        let metrics = Metrics::shared();
        let whitelists = Arc::new(WhitelistStore::new());
        let profiles = Arc::new(ProfileStore::new());
        let alert_store = Arc::new(MemoryAlertStore::new());
        let hub = Arc::new(NotificationHub::new());
        let audit = Arc::new(SuppressionAudit::new());
        let geo_resolver = Arc::new(StaticGeoResolver::new());
        let travel = Arc::new(TravelTracker::new(
            Arc::clone(&geo_resolver) as Arc<dyn GeoResolver>
        ));
        let hot_health = HotStateHealth::shared();
        let manager = Arc::new(AlertManager::new(
            Arc::clone(&alert_store) as Arc<dyn AlertStore>,
            config.dedup_bucket_seconds,
            config.correlation_window(),
        ));

        let (raw_tx, raw_rx) = mpsc::channel(config.listener_queue_capacity);
        let (event_tx, mut event_rx) = mpsc::channel::<SecurityEvent>(8192);
        let (candidate_tx, candidate_rx) = mpsc::channel(1024);
        let (emit_tx, emit_rx) = mpsc::channel(1024);
        let (push_tx, push_rx) = mpsc::channel(1024);
        let (whitelist_req_tx, mut whitelist_req_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks = Vec::new();

        // Normalizer pool.
        let worker_count = 4.min(num_workers());
        tasks.push(tokio::spawn(run_normalizer_pool(
            worker_count,
            raw_rx,
            event_tx,
            Arc::clone(&registry),
            Arc::clone(&metrics),
            shutdown_rx.clone(),
        )));

        // Detection shards behind the router task.
        let shard_handles = spawn_shards(
            config.effective_shard_count(),
            1024,
            config.detection,
            Arc::clone(&registry),
            Arc::clone(&profiles),
            Arc::clone(&hot_health),
            candidate_tx,
            whitelist_req_tx,
        );
        let router = shard_handles.router;
        tasks.extend(shard_handles.tasks);
        let travel_for_router = Arc::clone(&travel);
        tasks.push(tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                // Successful logins feed the impossible-travel trail.
                if event.kind == EventKind::AuthSuccess {
                    if let Some(user) = &event.username {
                        travel_for_router.record_success(
                            &event.tenant_id,
                            user,
                            event.source_ip,
                            event.event_time,
                        );
                    }
                }
                if router.route(event).await.is_err() {
                    warn!("Detection shards closed, router stopping");
                    break;
                }
            }
        }));

        // Dynamic whitelist grants, gated on the origin having no live alerts.
        let whitelists_for_grants = Arc::clone(&whitelists);
        let alert_index = AlertIndex(Arc::clone(&alert_store));
        tasks.push(tokio::spawn(async move {
            while let Some(request) = whitelist_req_rx.recv().await {
                apply_whitelist_request(&request, &whitelists_for_grants, &alert_index);
            }
        }));

        // False-positive filter.
        let filter = Arc::new(FpFilter::new(
            config.fp_enabled,
            config.detection,
            Arc::clone(&registry),
            Arc::clone(&whitelists),
            Arc::clone(&profiles),
            Arc::clone(&travel),
            Arc::clone(&hot_health),
            Arc::clone(&audit),
            Arc::clone(&metrics),
        ));
        tasks.push(tokio::spawn(run_filter(filter, candidate_rx, emit_tx)));

        // Alert manager and notification hub.
        tasks.push(tokio::spawn(run_alert_manager(
            Arc::clone(&manager),
            emit_rx,
            push_tx,
        )));
        let dispatch_tx = options.dispatcher.as_ref().map(|dispatcher| {
            let (dispatch_tx, dispatch_rx) = mpsc::channel(1024);
            let dispatcher = Arc::clone(dispatcher);
            tasks.push(tokio::spawn(run_dispatcher(dispatcher, dispatch_rx, 4)));
            dispatch_tx
        });
        tasks.push(tokio::spawn(run_hub(
            Arc::clone(&hub),
            Arc::clone(&metrics),
            push_rx,
            dispatch_tx,
        )));

        info!(
            "Pipeline assembled: {} normalizers, {} shards",
            worker_count,
            config.effective_shard_count()
        );

        Self {
            config,
            registry,
            metrics,
            whitelists,
            profiles,
            alert_store,
            manager,
            hub,
            audit,
            geo_resolver,
            hot_health,
            raw_tx,
            shutdown_tx,
            tasks,
        }
    }

    /// Sender for raw frames; listeners and tests feed this queue.
    pub fn raw_sender(&self) -> mpsc::Sender<RawEvent> {
        self.raw_tx.clone()
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Bind the syslog listeners and the push endpoint.
    pub fn spawn_listeners(&mut self) -> anyhow::Result<()> {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let raw_tx = self.raw_tx.clone();
        let metrics = Arc::clone(&self.metrics);
        let udp_bind = self.config.udp_bind.clone();
        let max_frame = self.config.max_frame_bytes;
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) =
                run_udp_listener(&udp_bind, max_frame, raw_tx, metrics, shutdown_rx).await
            {
                warn!("UDP listener failed: {}", e);
            }
        }));

        let shutdown_rx = self.shutdown_tx.subscribe();
        let raw_tx = self.raw_tx.clone();
        let metrics = Arc::clone(&self.metrics);
        let tcp_bind = self.config.tcp_bind.clone();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) =
                run_tcp_listener(&tcp_bind, max_frame, raw_tx, metrics, shutdown_rx).await
            {
                warn!("TCP listener failed: {}", e);
            }
        }));

        if let (Some(cert), Some(key)) = (
            self.config.tls_cert_path.clone(),
            self.config.tls_key_path.clone(),
        ) {
            let tls_config = load_tls_config(&cert, &key)?;
            let shutdown_rx = self.shutdown_tx.subscribe();
            let raw_tx = self.raw_tx.clone();
            let metrics = Arc::clone(&self.metrics);
            let tls_bind = self.config.tls_bind.clone();
            self.tasks.push(tokio::spawn(async move {
                if let Err(e) = run_tls_listener(
                    &tls_bind, tls_config, max_frame, raw_tx, metrics, shutdown_rx,
                )
                .await
                {
                    warn!("TLS listener failed: {}", e);
                }
            }));
        } else {
            info!("TLS listener disabled: no certificate configured");
        }

        let shutdown_rx = self.shutdown_tx.subscribe();
        let hub = Arc::clone(&self.hub);
        let ws_bind = self.config.ws_bind.clone();
        let jwt_secret = self.config.jwt_secret.clone();
        let session_config = SessionConfig {
            heartbeat_interval: Duration::from_secs(self.config.heartbeat_interval_seconds),
            idle_timeout: Duration::from_secs(self.config.session_idle_timeout_seconds),
            queue_capacity: self.config.session_queue_capacity,
        };
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) =
                run_push_server(&ws_bind, jwt_secret, hub, session_config, shutdown_rx).await
            {
                warn!("Push server failed: {}", e);
            }
        }));
        Ok(())
    }

    /// Admin surface: add a static whitelist entry and suppress every live
    /// alert it already covers.
    pub async fn add_static_whitelist(
        &self,
        tenant_id: &str,
        target: WhitelistTarget,
        reason: &str,
    ) -> Vec<String> {
        self.whitelists
            .add_static(tenant_id, target.clone(), reason)
            .await;
        let entry = sentinel_core::WhitelistEntry {
            kind: sentinel_core::WhitelistKind::Static,
            target,
            reason: reason.to_string(),
            created_at: chrono::Utc::now(),
            expires_at: None,
        };
        self.manager.apply_whitelist(tenant_id, &entry).await
    }

    /// Graceful stop: signal the listeners, let the queues drain, abort
    /// whatever is left after the budget.
    pub async fn shutdown(self) {
        let drain_budget = Duration::from_secs(self.config.shutdown_drain_seconds);
        let _ = self.shutdown_tx.send(true);
        drop(self.raw_tx);
        info!("Draining pipeline (budget {:?})", drain_budget);
        let abort_handles: Vec<_> = self.tasks.iter().map(|task| task.abort_handle()).collect();
        let drain = async {
            for task in self.tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(drain_budget, drain).await.is_err() {
            warn!("Drain budget exceeded, aborting remaining tasks");
            for handle in abort_handles {
                handle.abort();
            }
        }
        info!("Pipeline stopped");
    }
}

fn num_workers() -> usize {
    num_cpus::get().max(1)
}

//! Push session lifecycle
//!
//! Each connected client owns a bounded outbound queue (drop-oldest on
//! overflow) and a select loop multiplexing client frames, queued messages,
//! keepalive pings and the idle check. A session silent past the idle
//! timeout closes with code 1001; client reconnect is the client's contract.

use futures_util::{SinkExt, StreamExt};
use sentinel_core::metrics::Metrics;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::{Notify, RwLock};
use tokio::time::{interval, Duration, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type WebSocket = WebSocketStream<TcpStream>;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            queue_capacity: 256,
        }
    }
}

/// One connected push client.
pub struct PushSession {
    pub tenant_id: String,
    pub session_id: Uuid,
    outbound: Mutex<VecDeque<String>>,
    outbound_ready: Notify,
    capacity: usize,
    last_activity: RwLock<Instant>,
}

impl PushSession {
    pub fn new(tenant_id: &str, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            tenant_id: tenant_id.to_string(),
            session_id: Uuid::new_v4(),
            outbound: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            outbound_ready: Notify::new(),
            capacity,
            last_activity: RwLock::new(Instant::now()),
        })
    }

    /// Queue a message for delivery, evicting the oldest when full.
    pub fn enqueue(&self, message: String, metrics: &Metrics) {
        let mut outbound = self.outbound.lock().expect("outbound lock poisoned");
        if outbound.len() >= self.capacity {
            outbound.pop_front();
            metrics.notify.session_overflow.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Session {} outbound queue full, dropped oldest message",
                self.session_id
            );
        }
        outbound.push_back(message);
        drop(outbound);
        self.outbound_ready.notify_one();
    }

    fn pop(&self) -> Option<String> {
        self.outbound.lock().expect("outbound lock poisoned").pop_front()
    }

    pub fn queued(&self) -> usize {
        self.outbound.lock().expect("outbound lock poisoned").len()
    }

    /// Drain everything currently queued. Used when handing a backlog to a
    /// reconnecting client and by consumers observing delivery.
    pub fn take_queued(&self) -> Vec<String> {
        self.outbound
            .lock()
            .expect("outbound lock poisoned")
            .drain(..)
            .collect()
    }

    pub async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_activity.read().await.elapsed()
    }

    /// Drive the session until the peer disconnects or goes idle.
    pub async fn run(self: Arc<Self>, mut websocket: WebSocket, config: SessionConfig) {
        let mut ping_timer = interval(config.heartbeat_interval);
        // The first tick fires immediately; skip it so pings are spaced.
        ping_timer.tick().await;
        let mut idle_timer = interval(Duration::from_secs(5));

        info!(
            "Push session {} open for tenant {}",
            self.session_id, self.tenant_id
        );
        loop {
            tokio::select! {
                frame = websocket.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.touch().await;
                            // The only client message in the contract is the
                            // keepalive reply.
                            if !text.contains("pong") {
                                debug!("Session {} sent: {}", self.session_id, text);
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.touch().await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            self.touch().await;
                            if websocket.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Session {} closed by peer", self.session_id);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!("Session {} transport error: {}", self.session_id, e);
                            break;
                        }
                    }
                }

                _ = self.outbound_ready.notified() => {
                    while let Some(message) = self.pop() {
                        if websocket.send(Message::Text(message)).await.is_err() {
                            debug!("Session {} send failed", self.session_id);
                            return;
                        }
                    }
                }

                _ = ping_timer.tick() => {
                    let ping = r#"{"type":"ping"}"#.to_string();
                    if websocket.send(Message::Text(ping)).await.is_err() {
                        break;
                    }
                }

                _ = idle_timer.tick() => {
                    if self.idle_for().await >= config.idle_timeout {
                        info!(
                            "Session {} idle for {:?}, closing",
                            self.session_id, config.idle_timeout
                        );
                        let _ = websocket
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::Away,
                                reason: "idle timeout".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        }
        info!("Push session {} ended", self.session_id);
    }
}

//! Notifier sinks with bounded retries
//!
//! The transports themselves (SMTP, webhook HTTP) are external collaborators;
//! this module owns the delivery contract: at-least-once dispatch to each
//! configured sink, exponential backoff with jitter between attempts, and a
//! dead-letter log once attempts are exhausted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_core::metrics::Metrics;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Per-delivery call deadline.
const DELIVERY_DEADLINE: Duration = Duration::from_secs(10);
/// Jitter applied to each backoff step: +-20%.
const BACKOFF_JITTER: f64 = 0.2;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Failed(String),

    #[error("delivery timed out")]
    Timeout,
}

/// Where a notification goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyTarget {
    /// Push sessions of a tenant; the hub delivers these inline.
    Push { tenant_id: String },
    Email(Vec<String>),
    Webhook(String),
}

/// Delivery transport contract.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, target: &NotifyTarget, payload: &str) -> Result<(), NotifyError>;
}

/// A payload that exhausted its attempts.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub target: NotifyTarget,
    pub payload: String,
    pub attempts: u32,
    pub last_error: String,
    pub at: DateTime<Utc>,
}

pub struct NotifyDispatcher {
    notifier: Arc<dyn Notifier>,
    targets: Vec<NotifyTarget>,
    backoff: Vec<Duration>,
    max_attempts: u32,
    dead_letters: Mutex<Vec<DeadLetter>>,
    metrics: Arc<Metrics>,
}

impl NotifyDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        targets: Vec<NotifyTarget>,
        backoff_seconds: &[u64],
        max_attempts: u32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            notifier,
            targets,
            backoff: backoff_seconds
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            max_attempts: max_attempts.max(1),
            dead_letters: Mutex::new(Vec::new()),
            metrics,
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().expect("dead letter lock poisoned").clone()
    }

    fn jittered(&self, attempt: usize) -> Duration {
        let base = self
            .backoff
            .get(attempt)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::from_secs(1));
        let factor = 1.0 - BACKOFF_JITTER + rand::random::<f64>() * 2.0 * BACKOFF_JITTER;
        base.mul_f64(factor)
    }

    /// Deliver one payload to one target, retrying on failure.
    async fn deliver_with_retry(&self, target: &NotifyTarget, payload: &str) {
        let mut last_error = String::new();
        for attempt in 0..self.max_attempts {
            let result = timeout(DELIVERY_DEADLINE, self.notifier.deliver(target, payload)).await;
            match result {
                Ok(Ok(())) => {
                    self.metrics.notify.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Delivered notification via {} (attempt {})",
                        self.notifier.name(),
                        attempt + 1
                    );
                    return;
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                }
                Err(_) => {
                    last_error = NotifyError::Timeout.to_string();
                }
            }
            if attempt + 1 < self.max_attempts {
                let delay = self.jittered(attempt as usize);
                warn!(
                    "Notification attempt {} via {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    self.notifier.name(),
                    last_error,
                    delay
                );
                sleep(delay).await;
            }
        }
        self.metrics
            .notify
            .dead_lettered
            .fetch_add(1, Ordering::Relaxed);
        warn!(
            "Notification dead-lettered after {} attempts via {}: {}",
            self.max_attempts,
            self.notifier.name(),
            last_error
        );
        self.dead_letters
            .lock()
            .expect("dead letter lock poisoned")
            .push(DeadLetter {
                target: target.clone(),
                payload: payload.to_string(),
                attempts: self.max_attempts,
                last_error,
                at: Utc::now(),
            });
    }

    /// Deliver a payload to every configured sink.
    pub async fn dispatch(&self, payload: &str) {
        for target in &self.targets {
            // Push targets are the hub's job.
            if matches!(target, NotifyTarget::Push { .. }) {
                continue;
            }
            self.deliver_with_retry(target, payload).await;
        }
    }
}

/// Dispatcher task pool. Each worker drains payloads so one slow sink does
/// not stall the rest of the stream.
pub async fn run_dispatcher(
    dispatcher: Arc<NotifyDispatcher>,
    rx: mpsc::Receiver<String>,
    workers: usize,
) {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let mut handles = Vec::with_capacity(workers.max(1));
    for _ in 0..workers.max(1) {
        let rx = Arc::clone(&rx);
        let dispatcher = Arc::clone(&dispatcher);
        handles.push(tokio::spawn(async move {
            loop {
                let payload = { rx.lock().await.recv().await };
                match payload {
                    Some(payload) => dispatcher.dispatch(&payload).await,
                    None => break,
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
    info!("Notifier dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Fails a fixed number of times, then succeeds.
    struct Flaky {
        failures: AtomicU32,
        delivered: Mutex<Vec<String>>,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, _target: &NotifyTarget, payload: &str) -> Result<(), NotifyError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1))
                .is_ok()
            {
                return Err(NotifyError::Failed("still warming up".to_string()));
            }
            self.delivered.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    fn dispatcher(notifier: Arc<dyn Notifier>) -> NotifyDispatcher {
        NotifyDispatcher::new(
            notifier,
            vec![NotifyTarget::Webhook("https://soc.example/hook".to_string())],
            &[0, 0, 0],
            3,
            Metrics::shared(),
        )
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let flaky = Arc::new(Flaky::new(2));
        let dispatcher = dispatcher(Arc::clone(&flaky) as Arc<dyn Notifier>);
        dispatcher.dispatch("payload-1").await;
        assert_eq!(flaky.delivered.lock().unwrap().len(), 1);
        assert!(dispatcher.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn exhausted_attempts_dead_letter() {
        let flaky = Arc::new(Flaky::new(10));
        let dispatcher = dispatcher(Arc::clone(&flaky) as Arc<dyn Notifier>);
        dispatcher.dispatch("payload-2").await;
        let dead = dispatcher.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, "payload-2");
        assert_eq!(dead[0].attempts, 3);
    }

    #[tokio::test]
    async fn push_targets_are_skipped() {
        let flaky = Arc::new(Flaky::new(0));
        let dispatcher = NotifyDispatcher::new(
            Arc::clone(&flaky) as Arc<dyn Notifier>,
            vec![NotifyTarget::Push {
                tenant_id: "acme-corp".to_string(),
            }],
            &[0],
            3,
            Metrics::shared(),
        );
        dispatcher.dispatch("payload-3").await;
        assert!(flaky.delivered.lock().unwrap().is_empty());
    }

    #[test]
    fn jitter_stays_within_twenty_percent_of_schedule() {
        let dispatcher = NotifyDispatcher::new(
            Arc::new(Flaky::new(0)) as Arc<dyn Notifier>,
            Vec::new(),
            &[1, 5, 25],
            3,
            Metrics::shared(),
        );
        for (attempt, base) in [(0usize, 1.0f64), (1, 5.0), (2, 25.0), (7, 25.0)] {
            for _ in 0..50 {
                let d = dispatcher.jittered(attempt).as_secs_f64();
                assert!(d >= base * 0.8 - 1e-9 && d <= base * 1.2 + 1e-9, "got {d} for base {base}");
            }
        }
    }
}

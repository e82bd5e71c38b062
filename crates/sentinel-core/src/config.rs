//! Runtime configuration
//!
//! Defaults follow the documented operating values; every knob can be
//! overridden by a `SIEM_*` environment variable or a TOML file layered
//! through the `config` crate (defaults, then file, then environment).

use crate::error::CoreError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;

/// Detection engine parameters, overridable per tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Brute-force sliding window in seconds.
    pub bf_window_seconds: u64,
    /// Failures inside the window that trigger a candidate.
    pub bf_threshold: usize,
    /// Port-scan sliding window in seconds.
    pub ps_window_seconds: u64,
    /// Distinct destination ports that trigger a candidate.
    pub ps_threshold: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            bf_window_seconds: 300,
            bf_threshold: 5,
            ps_window_seconds: 600,
            ps_threshold: 10,
        }
    }
}

impl DetectionParams {
    pub fn bf_window(&self) -> Duration {
        Duration::seconds(self.bf_window_seconds as i64)
    }

    pub fn ps_window(&self) -> Duration {
        Duration::seconds(self.ps_window_seconds as i64)
    }

    /// Detection state for an idle origin is evicted after twice the longest
    /// window.
    pub fn idle_ttl(&self) -> Duration {
        Duration::seconds(2 * self.bf_window_seconds.max(self.ps_window_seconds) as i64)
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiemConfig {
    pub detection: DetectionParams,
    /// Alert dedup bucket in seconds.
    pub dedup_bucket_seconds: u64,
    /// Cross-kind correlation window in seconds.
    pub correlation_window_seconds: u64,
    /// Push channel idle timeout in seconds.
    pub session_idle_timeout_seconds: u64,
    /// Server-side keepalive ping interval in seconds.
    pub heartbeat_interval_seconds: u64,
    /// Per-session outbound queue capacity.
    pub session_queue_capacity: usize,
    /// Syslog frame cap in bytes.
    pub max_frame_bytes: usize,
    /// Per-listener ingestion queue capacity.
    pub listener_queue_capacity: usize,
    /// Detection shard count; 0 means one shard per CPU.
    pub shard_count: usize,
    /// Master switch for the false-positive filter tiers.
    pub fp_enabled: bool,
    pub udp_bind: String,
    pub tcp_bind: String,
    pub tls_bind: String,
    pub ws_bind: String,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub jwt_secret: String,
    /// Delivery attempts per email/webhook notification before dead-letter.
    pub notify_max_attempts: u32,
    /// Base backoff schedule between notification attempts, in seconds.
    pub notify_backoff_seconds: Vec<u64>,
    /// Queue drain budget during graceful shutdown, in seconds.
    pub shutdown_drain_seconds: u64,
}

impl Default for SiemConfig {
    fn default() -> Self {
        Self {
            detection: DetectionParams::default(),
            dedup_bucket_seconds: 300,
            correlation_window_seconds: 1800,
            session_idle_timeout_seconds: 90,
            heartbeat_interval_seconds: 30,
            session_queue_capacity: 256,
            max_frame_bytes: 8192,
            listener_queue_capacity: 65536,
            shard_count: 0,
            fp_enabled: true,
            udp_bind: "0.0.0.0:514".to_string(),
            tcp_bind: "0.0.0.0:601".to_string(),
            tls_bind: "0.0.0.0:6514".to_string(),
            ws_bind: "0.0.0.0:8443".to_string(),
            tls_cert_path: None,
            tls_key_path: None,
            jwt_secret: String::new(),
            notify_max_attempts: 3,
            notify_backoff_seconds: vec![1, 5, 25],
            shutdown_drain_seconds: 30,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

impl SiemConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            detection: DetectionParams {
                bf_window_seconds: env_parse(
                    "SIEM_BF_WINDOW_SECONDS",
                    defaults.detection.bf_window_seconds,
                ),
                bf_threshold: env_parse("SIEM_BF_THRESHOLD", defaults.detection.bf_threshold),
                ps_window_seconds: env_parse(
                    "SIEM_PS_WINDOW_SECONDS",
                    defaults.detection.ps_window_seconds,
                ),
                ps_threshold: env_parse("SIEM_PS_THRESHOLD", defaults.detection.ps_threshold),
            },
            dedup_bucket_seconds: env_parse(
                "SIEM_DEDUP_BUCKET_SECONDS",
                defaults.dedup_bucket_seconds,
            ),
            correlation_window_seconds: env_parse(
                "SIEM_CORRELATION_WINDOW_SECONDS",
                defaults.correlation_window_seconds,
            ),
            session_idle_timeout_seconds: env_parse(
                "SIEM_SESSION_IDLE_TIMEOUT_SECONDS",
                defaults.session_idle_timeout_seconds,
            ),
            heartbeat_interval_seconds: env_parse(
                "SIEM_HEARTBEAT_INTERVAL_SECONDS",
                defaults.heartbeat_interval_seconds,
            ),
            session_queue_capacity: env_parse(
                "SIEM_SESSION_QUEUE_CAPACITY",
                defaults.session_queue_capacity,
            ),
            max_frame_bytes: env_parse("SIEM_MAX_FRAME_BYTES", defaults.max_frame_bytes),
            listener_queue_capacity: env_parse(
                "SIEM_LISTENER_QUEUE_CAPACITY",
                defaults.listener_queue_capacity,
            ),
            shard_count: env_parse("SIEM_SHARD_COUNT", defaults.shard_count),
            fp_enabled: env_parse("SIEM_FP_ENABLED", defaults.fp_enabled),
            udp_bind: env::var("SIEM_UDP_BIND").unwrap_or(defaults.udp_bind),
            tcp_bind: env::var("SIEM_TCP_BIND").unwrap_or(defaults.tcp_bind),
            tls_bind: env::var("SIEM_TLS_BIND").unwrap_or(defaults.tls_bind),
            ws_bind: env::var("SIEM_WS_BIND").unwrap_or(defaults.ws_bind),
            tls_cert_path: env::var("SIEM_TLS_CERT_PATH").ok(),
            tls_key_path: env::var("SIEM_TLS_KEY_PATH").ok(),
            jwt_secret: env::var("SIEM_JWT_SECRET").unwrap_or(defaults.jwt_secret),
            notify_max_attempts: env_parse("SIEM_NOTIFY_MAX_ATTEMPTS", defaults.notify_max_attempts),
            notify_backoff_seconds: defaults.notify_backoff_seconds,
            shutdown_drain_seconds: env_parse(
                "SIEM_SHUTDOWN_DRAIN_SECONDS",
                defaults.shutdown_drain_seconds,
            ),
        }
    }

    /// Layered load: defaults, then an optional TOML file, then `SIEM_*`
    /// environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, CoreError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix("SIEM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.detection.bf_threshold == 0 {
            return Err(CoreError::InvalidConfig {
                key: "bf_threshold".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.detection.ps_threshold == 0 {
            return Err(CoreError::InvalidConfig {
                key: "ps_threshold".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_frame_bytes == 0 {
            return Err(CoreError::InvalidConfig {
                key: "max_frame_bytes".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        if self.session_queue_capacity == 0 {
            return Err(CoreError::InvalidConfig {
                key: "session_queue_capacity".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Effective shard count: the configured value, or one per CPU.
    pub fn effective_shard_count(&self) -> usize {
        if self.shard_count > 0 {
            self.shard_count
        } else {
            num_cpus::get().max(1)
        }
    }

    pub fn dedup_bucket(&self) -> Duration {
        Duration::seconds(self.dedup_bucket_seconds as i64)
    }

    pub fn correlation_window(&self) -> Duration {
        Duration::seconds(self.correlation_window_seconds as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_operating_values() {
        let config = SiemConfig::default();
        assert_eq!(config.detection.bf_window_seconds, 300);
        assert_eq!(config.detection.bf_threshold, 5);
        assert_eq!(config.detection.ps_window_seconds, 600);
        assert_eq!(config.detection.ps_threshold, 10);
        assert_eq!(config.dedup_bucket_seconds, 300);
        assert_eq!(config.correlation_window_seconds, 1800);
        assert_eq!(config.session_idle_timeout_seconds, 90);
        assert_eq!(config.max_frame_bytes, 8192);
        assert_eq!(config.listener_queue_capacity, 65536);
        assert!(config.fp_enabled);
    }

    #[test]
    fn idle_ttl_is_twice_the_longest_window() {
        let params = DetectionParams::default();
        assert_eq!(params.idle_ttl(), Duration::seconds(1200));
    }

    #[test]
    fn validation_rejects_zero_thresholds() {
        let mut config = SiemConfig::default();
        config.detection.bf_threshold = 0;
        assert!(config.validate().is_err());
    }
}

//! Hot-state store conventions
//!
//! The TTL'd hot state (detection windows, profile counters, dynamic
//! whitelists) may be backed by an external cache. This module carries the
//! shared key convention and the health handle the pipeline consults to
//! degrade gracefully instead of halting when that store is unavailable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Key convention for hot and durable stores: `kind:tenant:subject`.
pub fn store_key(kind: &str, tenant_id: &str, subject: &str) -> String {
    format!("{kind}:{tenant_id}:{subject}")
}

/// Shared availability flag for the hot state store. While unavailable,
/// detection emits degraded candidates and the filter skips its dynamic
/// tiers; the static tier still applies.
#[derive(Debug)]
pub struct HotStateHealth {
    available: AtomicBool,
}

impl Default for HotStateHealth {
    fn default() -> Self {
        Self {
            available: AtomicBool::new(true),
        }
    }
}

impl HotStateHealth {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_convention() {
        assert_eq!(store_key("bf", "acme-corp", "10.0.0.5"), "bf:acme-corp:10.0.0.5");
    }

    #[test]
    fn health_toggles() {
        let health = HotStateHealth::default();
        assert!(health.is_available());
        health.set_available(false);
        assert!(!health.is_available());
    }
}

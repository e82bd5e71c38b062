//! Behavioral profiles
//!
//! One rolling profile per `(tenant, principal)`, fed by successful logins.
//! The inter-arrival statistics use Welford's online algorithm so the
//! coefficient of variation is available without keeping samples around. A
//! principal promotes to `service_account` once its cadence is regular
//! (CV < 0.1), it works off-hours (> 40%) and enough samples accumulated.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

const PROMOTION_MIN_SAMPLES: u64 = 20;
const PROMOTION_MAX_CV: f64 = 0.1;
const PROMOTION_MIN_OFF_HOURS_RATIO: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Human,
    ServiceAccount,
    System,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralProfile {
    pub successes: u64,
    pub last_success: Option<DateTime<Utc>>,
    /// Welford running state over inter-arrival gaps, in seconds.
    pub interarrival_mean: f64,
    interarrival_m2: f64,
    interarrival_samples: u64,
    pub off_hours_successes: u64,
    pub classification: Classification,
    pub confidence: f64,
}

impl Default for BehavioralProfile {
    fn default() -> Self {
        Self {
            successes: 0,
            last_success: None,
            interarrival_mean: 0.0,
            interarrival_m2: 0.0,
            interarrival_samples: 0,
            off_hours_successes: 0,
            classification: Classification::Unknown,
            confidence: 0.0,
        }
    }
}

impl BehavioralProfile {
    pub fn record_success(&mut self, at: DateTime<Utc>, in_business_hours: bool) {
        if let Some(last) = self.last_success {
            let gap = (at - last).num_milliseconds() as f64 / 1000.0;
            if gap >= 0.0 {
                self.interarrival_samples += 1;
                let delta = gap - self.interarrival_mean;
                self.interarrival_mean += delta / self.interarrival_samples as f64;
                let delta2 = gap - self.interarrival_mean;
                self.interarrival_m2 += delta * delta2;
            }
        }
        self.successes += 1;
        if !in_business_hours {
            self.off_hours_successes += 1;
        }
        self.last_success = Some(self.last_success.map_or(at, |last| last.max(at)));
        self.reclassify();
    }

    pub fn interarrival_stddev(&self) -> f64 {
        if self.interarrival_samples < 2 {
            return 0.0;
        }
        (self.interarrival_m2 / (self.interarrival_samples - 1) as f64).sqrt()
    }

    /// Coefficient of variation of the inter-arrival gaps.
    pub fn interarrival_cv(&self) -> f64 {
        if self.interarrival_mean <= 0.0 || self.interarrival_samples < 2 {
            return f64::MAX;
        }
        self.interarrival_stddev() / self.interarrival_mean
    }

    pub fn off_hours_ratio(&self) -> f64 {
        if self.successes == 0 {
            return 0.0;
        }
        self.off_hours_successes as f64 / self.successes as f64
    }

    fn reclassify(&mut self) {
        if self.successes >= PROMOTION_MIN_SAMPLES
            && self.interarrival_cv() < PROMOTION_MAX_CV
            && self.off_hours_ratio() > PROMOTION_MIN_OFF_HOURS_RATIO
        {
            self.classification = Classification::ServiceAccount;
            self.confidence = (self.successes as f64 / 40.0).min(1.0);
        } else if self.successes >= 5 {
            self.classification = Classification::Human;
            self.confidence = (self.successes as f64 / 50.0).min(0.8);
        } else {
            self.classification = Classification::Unknown;
            self.confidence = 0.0;
        }
    }
}

/// Concurrent profile store keyed by `(tenant, principal)`, written by the
/// detection shards and read by the false-positive filter.
#[derive(Debug, Default)]
pub struct ProfileStore {
    profiles: DashMap<(String, String), BehavioralProfile>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(
        &self,
        tenant_id: &str,
        principal: &str,
        at: DateTime<Utc>,
        in_business_hours: bool,
    ) {
        self.profiles
            .entry((tenant_id.to_string(), principal.to_string()))
            .or_default()
            .record_success(at, in_business_hours);
    }

    pub fn get(&self, tenant_id: &str, principal: &str) -> Option<BehavioralProfile> {
        self.profiles
            .get(&(tenant_id.to_string(), principal.to_string()))
            .map(|p| p.clone())
    }

    pub fn classification(&self, tenant_id: &str, principal: &str) -> Classification {
        self.get(tenant_id, principal)
            .map(|p| p.classification)
            .unwrap_or(Classification::Unknown)
    }

    /// Force a profile into a given classification. Used by the admin surface
    /// and tests; organic promotion goes through `record_success`.
    pub fn set_classification(
        &self,
        tenant_id: &str,
        principal: &str,
        classification: Classification,
        confidence: f64,
    ) {
        let mut profile = self
            .profiles
            .entry((tenant_id.to_string(), principal.to_string()))
            .or_default();
        profile.classification = classification;
        profile.confidence = confidence.clamp(0.0, 1.0);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

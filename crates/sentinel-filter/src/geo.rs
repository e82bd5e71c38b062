//! Impossible-travel detection
//!
//! Successful logins leave a `(time, location)` trail per `(tenant, user)`.
//! When a candidate's source address implies a travel velocity above what a
//! commercial flight can do relative to a recent login, the signal is
//! escalated rather than suppressed.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Velocity above this is not physically plausible.
pub const MAX_TRAVEL_VELOCITY_KMH: f64 = 900.0;
/// Only logins this recent are compared.
const TRAVEL_LOOKBACK: Duration = Duration::hours(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Source of IP geolocation. The production backend is an external
/// collaborator; tests and small deployments use the static table.
pub trait GeoResolver: Send + Sync {
    fn locate(&self, ip: IpAddr) -> Option<GeoPoint>;
}

#[derive(Debug, Default)]
pub struct StaticGeoResolver {
    table: DashMap<IpAddr, GeoPoint>,
}

impl StaticGeoResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ip: IpAddr, point: GeoPoint) {
        self.table.insert(ip, point);
    }
}

impl GeoResolver for StaticGeoResolver {
    fn locate(&self, ip: IpAddr) -> Option<GeoPoint> {
        self.table.get(&ip).map(|p| *p)
    }
}

/// Great-circle distance in kilometers.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Tracks the most recent successful login location per `(tenant, user)`.
pub struct TravelTracker {
    resolver: Arc<dyn GeoResolver>,
    last_logins: DashMap<(String, String), (DateTime<Utc>, GeoPoint)>,
}

impl TravelTracker {
    pub fn new(resolver: Arc<dyn GeoResolver>) -> Self {
        Self {
            resolver,
            last_logins: DashMap::new(),
        }
    }

    pub fn record_success(&self, tenant_id: &str, user: &str, ip: IpAddr, at: DateTime<Utc>) {
        if let Some(point) = self.resolver.locate(ip) {
            self.last_logins
                .insert((tenant_id.to_string(), user.to_string()), (at, point));
        }
    }

    /// Whether moving from any user's recent login location to the candidate
    /// source would require implausible velocity.
    pub fn impossible_travel(
        &self,
        tenant_id: &str,
        users: &[String],
        source_ip: IpAddr,
        now: DateTime<Utc>,
    ) -> bool {
        let here = match self.resolver.locate(source_ip) {
            Some(point) => point,
            None => return false,
        };
        for user in users {
            let key = (tenant_id.to_string(), user.clone());
            if let Some(entry) = self.last_logins.get(&key) {
                let (at, there) = *entry;
                let age = now - at;
                if age > TRAVEL_LOOKBACK || age < Duration::zero() {
                    continue;
                }
                let distance = haversine_km(there, here);
                // Clamp tiny gaps so velocity stays finite.
                let hours = (age.num_seconds().max(60)) as f64 / 3600.0;
                if distance / hours > MAX_TRAVEL_VELOCITY_KMH {
                    return true;
                }
            }
        }
        false
    }
}

//! Deterministic alert fingerprints
//!
//! `SHA1(tenant | source_ip | kind | floor(event_time / bucket))`, hex
//! encoded. Candidates for the same origin and kind inside one bucket share
//! a fingerprint and therefore one alert; replaying the same input yields
//! identical fingerprints.

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use std::net::IpAddr;

pub fn fingerprint(
    tenant_id: &str,
    source_ip: IpAddr,
    kind: &str,
    event_time: DateTime<Utc>,
    bucket_seconds: u64,
) -> String {
    let bucket = event_time.timestamp().div_euclid(bucket_seconds as i64);
    let mut hasher = Sha1::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b"|");
    hasher.update(source_ip.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(kind.as_bytes());
    hasher.update(b"|");
    hasher.update(bucket.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

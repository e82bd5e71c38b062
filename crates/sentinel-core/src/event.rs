//! Raw and normalized event types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use uuid::Uuid;

/// Maximum accepted gap between a device-reported timestamp and our receipt
/// time before the event time is clamped to the ingest time.
pub const CLOCK_SKEW_ALLOWANCE_SECS: i64 = 300;

/// Transport a frame arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
    Tls,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Udp => write!(f, "udp"),
            Transport::Tcp => write!(f, "tcp"),
            Transport::Tls => write!(f, "tls"),
        }
    }
}

/// A syslog frame as received off the wire, before parsing.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub received_at: DateTime<Utc>,
    pub bytes: Vec<u8>,
    pub peer: SocketAddr,
    pub transport: Transport,
    /// Tenant hint from TLS SNI, when the listener saw one.
    pub sni_tenant: Option<String>,
}

impl RawEvent {
    pub fn new(bytes: Vec<u8>, peer: SocketAddr, transport: Transport) -> Self {
        Self {
            received_at: Utc::now(),
            bytes,
            peer,
            transport,
            sni_tenant: None,
        }
    }

    pub fn with_sni(mut self, sni: Option<String>) -> Self {
        self.sni_tenant = sni;
        self
    }
}

/// What a normalized event represents for detection purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AuthSuccess,
    AuthFailure,
    PortAccess,
    Other,
}

/// A canonicalized security event flowing through detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_id: Uuid,
    pub tenant_id: String,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
    pub source_ip: IpAddr,
    pub dest_ip: Option<IpAddr>,
    pub dest_port: Option<u16>,
    pub username: Option<String>,
    pub kind: EventKind,
    pub protocol: Transport,
    pub facility: u8,
    pub severity: u8,
    pub raw_message: String,
    /// Set when the device-reported time exceeded the skew allowance and was
    /// clamped to the ingest time.
    pub clamped: bool,
}

impl SecurityEvent {
    /// Applies the clock-skew invariant: a device timestamp more than the
    /// allowance ahead of the ingest time is replaced by the ingest time.
    pub fn clamp_event_time(
        event_time: DateTime<Utc>,
        ingest_time: DateTime<Utc>,
    ) -> (DateTime<Utc>, bool) {
        if event_time > ingest_time + Duration::seconds(CLOCK_SKEW_ALLOWANCE_SECS) {
            (ingest_time, true)
        } else {
            (event_time, false)
        }
    }

    /// Principal used for behavioral profiling: the username when present,
    /// the source address otherwise.
    pub fn principal(&self) -> String {
        match &self.username {
            Some(user) => user.clone(),
            None => self.source_ip.to_string(),
        }
    }
}

//! Whitelist entry model shared by the filter tiers

use crate::net::Cidr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// How an entry came to exist. Static entries are operator-managed; dynamic
/// entries are earned by sustained successful authentication; learned entries
/// come from behavioral profiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistKind {
    Static,
    Dynamic,
    Learned,
}

/// What an entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistTarget {
    Ip(IpAddr),
    Cidr(Cidr),
    User(String),
    UserAtIp { user: String, ip: IpAddr },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub kind: WhitelistKind,
    pub target: WhitelistTarget,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    /// None for static entries, which never expire.
    pub expires_at: Option<DateTime<Utc>>,
}

impl WhitelistEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => now >= expiry,
            None => false,
        }
    }

    /// Whether this entry covers the given source address / username pair.
    pub fn matches(&self, ip: IpAddr, username: Option<&str>) -> bool {
        match &self.target {
            WhitelistTarget::Ip(entry_ip) => *entry_ip == ip,
            WhitelistTarget::Cidr(cidr) => cidr.contains(ip),
            WhitelistTarget::User(user) => username == Some(user.as_str()),
            WhitelistTarget::UserAtIp { user, ip: entry_ip } => {
                *entry_ip == ip && username == Some(user.as_str())
            }
        }
    }
}

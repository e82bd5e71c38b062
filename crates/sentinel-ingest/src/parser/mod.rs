//! RFC5424 / RFC3164 syslog parsing
//!
//! RFC5424 is preferred; RFC3164 is the fallback for legacy devices. Invalid
//! PRI, a missing timestamp or a truncated frame all fail the parse and the
//! frame is dropped upstream with a counter increment.

mod rfc3164;
mod rfc5424;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid PRI field")]
    InvalidPri,

    #[error("missing timestamp")]
    MissingTimestamp,

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("truncated frame")]
    Truncated,

    #[error("frame is not valid UTF-8")]
    NotUtf8,

    #[error("malformed structured data")]
    MalformedStructuredData,
}

/// One structured-data element: `[id key="value" ...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdElement {
    pub id: String,
    pub params: Vec<(String, String)>,
}

impl SdElement {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed syslog message, format-agnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogMessage {
    pub facility: u8,
    pub severity: u8,
    /// Some for RFC5424, None for RFC3164.
    pub version: Option<u8>,
    pub timestamp: DateTime<Utc>,
    pub hostname: Option<String>,
    pub app_name: Option<String>,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    pub structured_data: Vec<SdElement>,
    pub msg: String,
}

impl SyslogMessage {
    pub fn pri(&self) -> u8 {
        self.facility * 8 + self.severity
    }

    /// First `tenant` parameter found in any structured-data element.
    pub fn tenant_param(&self) -> Option<&str> {
        self.structured_data.iter().find_map(|sd| sd.param("tenant"))
    }
}

/// Parse PRI at the head of a frame, returning (facility, severity, rest).
fn parse_pri(input: &str) -> Result<(u8, u8, &str), ParseError> {
    let rest = input.strip_prefix('<').ok_or(ParseError::InvalidPri)?;
    let close = rest.find('>').ok_or(ParseError::InvalidPri)?;
    if close == 0 || close > 3 {
        return Err(ParseError::InvalidPri);
    }
    let pri: u16 = rest[..close].parse().map_err(|_| ParseError::InvalidPri)?;
    if pri > 191 {
        return Err(ParseError::InvalidPri);
    }
    Ok(((pri / 8) as u8, (pri % 8) as u8, &rest[close + 1..]))
}

/// Parse a syslog frame, trying RFC5424 first and falling back to RFC3164.
///
/// `now` anchors RFC3164 year inference and must be the ingest time.
pub fn parse_syslog(bytes: &[u8], now: DateTime<Utc>) -> Result<SyslogMessage, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
    let (facility, severity, rest) = parse_pri(text.trim_end_matches(['\r', '\n']))?;

    // RFC5424 mandates a version digit followed by a space right after PRI.
    let mut chars = rest.chars();
    match (chars.next(), chars.next()) {
        (Some(v), Some(' ')) if v.is_ascii_digit() && v != '0' => {
            rfc5424::parse(facility, severity, rest)
        }
        _ => rfc3164::parse(facility, severity, rest, now),
    }
}

pub use rfc5424::serialize as serialize_rfc5424;

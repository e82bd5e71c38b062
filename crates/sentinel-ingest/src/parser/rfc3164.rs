//! RFC3164 (legacy BSD syslog) fallback parser
//!
//! Layout: `<PRI>Mmm dd hh:mm:ss HOSTNAME TAG[pid]: MSG`. The timestamp
//! carries no year: we assume the current one and subtract a year when the
//! result lands more than an hour in the future (messages queued across a
//! year boundary).

use super::{ParseError, SyslogMessage};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

fn month_number(name: &str) -> Option<u32> {
    match name {
        "Jan" => Some(1),
        "Feb" => Some(2),
        "Mar" => Some(3),
        "Apr" => Some(4),
        "May" => Some(5),
        "Jun" => Some(6),
        "Jul" => Some(7),
        "Aug" => Some(8),
        "Sep" => Some(9),
        "Oct" => Some(10),
        "Nov" => Some(11),
        "Dec" => Some(12),
        _ => None,
    }
}

/// Parse the portion after PRI.
pub(super) fn parse(
    facility: u8,
    severity: u8,
    rest: &str,
    now: DateTime<Utc>,
) -> Result<SyslogMessage, ParseError> {
    // Timestamp: "Mmm dd hh:mm:ss", day space-padded for 1-9.
    if rest.len() < 15 {
        return Err(ParseError::Truncated);
    }
    let (stamp, remainder) = rest.split_at(15);
    let month = month_number(&stamp[0..3]).ok_or(ParseError::MissingTimestamp)?;
    let day: u32 = stamp[4..6]
        .trim_start()
        .parse()
        .map_err(|_| ParseError::InvalidTimestamp(stamp.to_string()))?;
    let hour: u32 = stamp[7..9]
        .parse()
        .map_err(|_| ParseError::InvalidTimestamp(stamp.to_string()))?;
    let minute: u32 = stamp[10..12]
        .parse()
        .map_err(|_| ParseError::InvalidTimestamp(stamp.to_string()))?;
    let second: u32 = stamp[13..15]
        .parse()
        .map_err(|_| ParseError::InvalidTimestamp(stamp.to_string()))?;
    if &stamp[3..4] != " " || &stamp[6..7] != " " || &stamp[9..10] != ":" || &stamp[12..13] != ":" {
        return Err(ParseError::InvalidTimestamp(stamp.to_string()));
    }

    let timestamp = resolve_year(month, day, hour, minute, second, now)
        .ok_or_else(|| ParseError::InvalidTimestamp(stamp.to_string()))?;

    let remainder = remainder.strip_prefix(' ').ok_or(ParseError::Truncated)?;
    let (hostname, remainder) = remainder.split_once(' ').ok_or(ParseError::Truncated)?;

    // TAG is up to 32 alphanumerics terminated by ':' or '['.
    let (app_name, proc_id, msg) = split_tag(remainder);

    Ok(SyslogMessage {
        facility,
        severity,
        version: None,
        timestamp,
        hostname: Some(hostname.to_string()),
        app_name,
        proc_id,
        msg_id: None,
        structured_data: Vec::new(),
        msg,
    })
}

/// Pick the year that keeps the timestamp out of the future.
fn resolve_year(
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let build = |year: i32| {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .and_then(|dt| Utc.from_local_datetime(&dt).single())
    };
    let candidate = build(now.year())?;
    if candidate > now + Duration::hours(1) {
        build(now.year() - 1)
    } else {
        Some(candidate)
    }
}

fn split_tag(remainder: &str) -> (Option<String>, Option<String>, String) {
    let tag_end = remainder
        .find(|c: char| c == ':' || c == '[' || c == ' ')
        .unwrap_or(remainder.len());
    let tag = &remainder[..tag_end];
    if tag.is_empty() || tag.len() > 32 {
        return (None, None, remainder.to_string());
    }
    let mut rest = &remainder[tag_end..];
    let mut proc_id = None;
    if let Some(after) = rest.strip_prefix('[') {
        match after.split_once(']') {
            Some((pid, tail)) => {
                proc_id = Some(pid.to_string());
                rest = tail;
            }
            None => return (None, None, remainder.to_string()),
        }
    }
    let msg = rest
        .strip_prefix(':')
        .map(|m| m.strip_prefix(' ').unwrap_or(m))
        .unwrap_or(rest.trim_start());
    (Some(tag.to_string()), proc_id, msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::super::parse_syslog;
    use super::*;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 4, 12, 0, 0).unwrap()
    }

    #[test]
    fn classic_sshd_line() {
        let frame = b"<38>Jun  4 11:55:01 bastion sshd[2187]: Failed password for root from 203.0.113.7 port 51000 ssh2";
        let msg = parse_syslog(frame, now()).unwrap();
        assert_eq!(msg.version, None);
        assert_eq!(msg.facility, 4);
        assert_eq!(msg.severity, 6);
        assert_eq!(
            msg.timestamp,
            Utc.with_ymd_and_hms(2025, 6, 4, 11, 55, 1).unwrap()
        );
        assert_eq!(msg.hostname.as_deref(), Some("bastion"));
        assert_eq!(msg.app_name.as_deref(), Some("sshd"));
        assert_eq!(msg.proc_id.as_deref(), Some("2187"));
        assert!(msg.msg.starts_with("Failed password for root"));
    }

    #[test]
    fn year_inference_subtracts_across_boundary() {
        // Receiving a December message on January 2nd.
        let january = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let frame = b"<38>Dec 31 23:59:59 host app: tail of last year";
        let msg = parse_syslog(frame, january).unwrap();
        assert_eq!(msg.timestamp.year(), 2024);
    }

    #[test]
    fn slight_future_within_an_hour_keeps_current_year() {
        let frame = b"<38>Jun  4 12:30:00 host app: clock drift";
        let msg = parse_syslog(frame, now()).unwrap();
        assert_eq!(msg.timestamp.year(), 2025);
    }

    #[test]
    fn missing_timestamp_is_rejected() {
        let frame = b"<38>no timestamp here at all";
        assert!(matches!(
            parse_syslog(frame, now()),
            Err(ParseError::MissingTimestamp) | Err(ParseError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn tag_without_pid() {
        let frame = b"<13>Jun  4 10:00:00 host su: pam_unix authentication failure";
        let msg = parse_syslog(frame, now()).unwrap();
        assert_eq!(msg.app_name.as_deref(), Some("su"));
        assert_eq!(msg.proc_id, None);
        assert_eq!(msg.msg, "pam_unix authentication failure");
    }
}

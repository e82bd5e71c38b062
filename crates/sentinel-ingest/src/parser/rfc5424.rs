//! RFC5424 parsing and canonical serialization
//!
//! Header layout: `<PRI>VERSION SP TIMESTAMP SP HOSTNAME SP APP-NAME SP
//! PROCID SP MSGID SP STRUCTURED-DATA [SP MSG]`. The nil value `-` maps to
//! `None`. Serialization emits the canonical subset (UTC timestamp with
//! millisecond precision), and parse(serialize(m)) == m for messages built
//! from that subset.

use super::{ParseError, SdElement, SyslogMessage};
use chrono::{DateTime, SecondsFormat, Utc};

fn nil_or(field: &str) -> Option<String> {
    if field == "-" {
        None
    } else {
        Some(field.to_string())
    }
}

/// Parse the portion after PRI. `rest` starts at the version digit.
pub(super) fn parse(
    facility: u8,
    severity: u8,
    rest: &str,
) -> Result<SyslogMessage, ParseError> {
    let (version_str, rest) = rest.split_once(' ').ok_or(ParseError::Truncated)?;
    let version: u8 = version_str.parse().map_err(|_| ParseError::Truncated)?;

    let (timestamp_str, rest) = rest.split_once(' ').ok_or(ParseError::Truncated)?;
    if timestamp_str == "-" {
        return Err(ParseError::MissingTimestamp);
    }
    let timestamp = DateTime::parse_from_rfc3339(timestamp_str)
        .map_err(|_| ParseError::InvalidTimestamp(timestamp_str.to_string()))?
        .with_timezone(&Utc);

    let (hostname, rest) = rest.split_once(' ').ok_or(ParseError::Truncated)?;
    let (app_name, rest) = rest.split_once(' ').ok_or(ParseError::Truncated)?;
    let (proc_id, rest) = rest.split_once(' ').ok_or(ParseError::Truncated)?;
    let (msg_id, rest) = rest.split_once(' ').ok_or(ParseError::Truncated)?;

    let (structured_data, msg) = parse_structured_data(rest)?;

    Ok(SyslogMessage {
        facility,
        severity,
        version: Some(version),
        timestamp,
        hostname: nil_or(hostname),
        app_name: nil_or(app_name),
        proc_id: nil_or(proc_id),
        msg_id: nil_or(msg_id),
        structured_data,
        msg,
    })
}

/// Parse the SD field plus the optional trailing MSG.
fn parse_structured_data(input: &str) -> Result<(Vec<SdElement>, String), ParseError> {
    if let Some(rest) = input.strip_prefix('-') {
        let msg = rest.strip_prefix(' ').unwrap_or(rest);
        return Ok((Vec::new(), msg.to_string()));
    }
    let mut elements = Vec::new();
    let mut rest = input;
    while rest.starts_with('[') {
        let (element, remaining) = parse_sd_element(rest)?;
        elements.push(element);
        rest = remaining;
    }
    if elements.is_empty() {
        return Err(ParseError::MalformedStructuredData);
    }
    let msg = rest.strip_prefix(' ').unwrap_or(rest);
    Ok((elements, msg.to_string()))
}

fn parse_sd_element(input: &str) -> Result<(SdElement, &str), ParseError> {
    let mut rest = input
        .strip_prefix('[')
        .ok_or(ParseError::MalformedStructuredData)?;
    let id_end = rest
        .find([' ', ']'])
        .ok_or(ParseError::MalformedStructuredData)?;
    let id = rest[..id_end].to_string();
    if id.is_empty() {
        return Err(ParseError::MalformedStructuredData);
    }
    rest = &rest[id_end..];

    let mut params = Vec::new();
    loop {
        if let Some(after) = rest.strip_prefix(']') {
            return Ok((SdElement { id, params }, after));
        }
        rest = rest
            .strip_prefix(' ')
            .ok_or(ParseError::MalformedStructuredData)?;
        let eq = rest.find('=').ok_or(ParseError::MalformedStructuredData)?;
        let name = rest[..eq].to_string();
        rest = rest[eq + 1..]
            .strip_prefix('"')
            .ok_or(ParseError::MalformedStructuredData)?;

        // Param values escape `"`, `\` and `]` with a backslash.
        let mut value = String::new();
        let mut chars = rest.char_indices();
        let mut end = None;
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => value.push(escaped),
                    None => return Err(ParseError::MalformedStructuredData),
                },
                '"' => {
                    end = Some(i);
                    break;
                }
                _ => value.push(c),
            }
        }
        let end = end.ok_or(ParseError::MalformedStructuredData)?;
        rest = &rest[end + 1..];
        params.push((name, value));
    }
}

fn escape_sd_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn nil_str(field: &Option<String>) -> &str {
    field.as_deref().unwrap_or("-")
}

/// Serialize to the canonical RFC5424 form.
pub fn serialize(msg: &SyslogMessage) -> String {
    let mut out = format!(
        "<{}>{} {} {} {} {} {} ",
        msg.pri(),
        msg.version.unwrap_or(1),
        msg.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        nil_str(&msg.hostname),
        nil_str(&msg.app_name),
        nil_str(&msg.proc_id),
        nil_str(&msg.msg_id),
    );
    if msg.structured_data.is_empty() {
        out.push('-');
    } else {
        for element in &msg.structured_data {
            out.push('[');
            out.push_str(&element.id);
            for (name, value) in &element.params {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape_sd_value(value));
                out.push('"');
            }
            out.push(']');
        }
    }
    if !msg.msg.is_empty() {
        out.push(' ');
        out.push_str(&msg.msg);
    }
    out
}

//! Byte and UUID helpers shared by both session roles
//!
//! The hex rendering produced here is the format used in every log line that
//! carries a payload, so it is kept exact: `{ 0A , FF }`.

use chrono::{DateTime, TimeZone};

/// Layout of the payload pushed on the time characteristic.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render bytes as upper-case hex, e.g. `{ 0A , FF }`.
///
/// An empty slice renders as `{  }`.
pub fn hex_format(bytes: &[u8]) -> String {
    let body = bytes
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" , ");
    format!("{{ {} }}", body)
}

/// Reverse the byte order of a payload. Used to build the echo response.
pub fn reverse(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().rev().copied().collect()
}

/// UTF-8 encode a message for the wire.
pub fn bytes_from_string(message: &str) -> Vec<u8> {
    message.as_bytes().to_vec()
}

/// Decode a received payload as UTF-8 text.
///
/// Returns `None` if the bytes are not valid UTF-8.
pub fn string_from_bytes(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes).ok().map(str::to_owned)
}

/// Case-insensitive exact match of a UUID string against any accepted string.
pub fn uuid_matches(candidate: &str, accepted: &[&str]) -> bool {
    accepted.iter().any(|a| candidate.eq_ignore_ascii_case(a))
}

/// Match the 4-character short id (characters 4..8) of a canonical UUID
/// string against any accepted short id.
///
/// Strings too short to carry a short id never match.
pub fn short_uuid_matches(candidate: &str, accepted: &[&str]) -> bool {
    candidate
        .get(4..8)
        .map_or(false, |short| uuid_matches(short, accepted))
}

/// Render a timestamp as the UTF-8 payload of the time characteristic.
pub fn timestamp_bytes<Tz>(now: &DateTime<Tz>) -> Vec<u8>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    bytes_from_string(&now.format(TIMESTAMP_FORMAT).to_string())
}

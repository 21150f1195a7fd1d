//! Trailer block codec.
//!
//! The gRPC-Web wire format carries the terminal status of a call as an
//! HTTP/1-style header block, either as the payload of the trailer envelope
//! (streaming / body trailers) or directly in the HTTP response headers
//! ("trailers-only"). This module encodes/decodes that block and validates
//! it against the `grpc-status` family of entries.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{Code, ErrorDetail, Status};

/// Header name carrying the gRPC status code (decimal).
pub const GRPC_STATUS: &str = "grpc-status";
/// Header name carrying the percent-encoded status message.
pub const GRPC_MESSAGE: &str = "grpc-message";
/// Header name carrying base64-encoded structured error details.
pub const GRPC_STATUS_DETAILS_BIN: &str = "grpc-status-details-bin";

/// An ordered trailer block: case-insensitive name to list of values,
/// preserving insertion order of distinct names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrailerMap {
    entries: Vec<(String, Vec<String>)>,
}

impl TrailerMap {
    /// Create an empty trailer block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value under `name`, appending to any existing values.
    ///
    /// `name` is lowercased for storage, matching gRPC's case-insensitive
    /// trailer names.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_ascii_lowercase();
        let value = value.into();
        if let Some((_, values)) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            values.push(value);
        } else {
            self.entries.push((name, vec![value]));
        }
    }

    /// Get the first value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    /// Get all values for `name`.
    pub fn get_all(&self, name: &str) -> &[String] {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// Iterate over `(name, value)` pairs in insertion order, one per value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the block has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for TrailerMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = TrailerMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

/// Serialize a trailer block as an HTTP/1-style header block:
/// `name: value\r\n` per entry, stable by insertion order.
pub fn serialize_trailer(map: &TrailerMap) -> Bytes {
    let mut out = Vec::new();
    for (name, value) in map.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    Bytes::from(out)
}

/// Parse a trailer block payload into a [`TrailerMap`].
///
/// Tolerant of CRLF or bare LF line endings; duplicate names are collected
/// as a list. Lines without a `:` separator are ignored.
pub fn parse_trailer(bytes: &[u8]) -> TrailerMap {
    let text = String::from_utf8_lossy(bytes);
    let mut map = TrailerMap::new();

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        map.insert(name.trim(), value.trim());
    }

    map
}

/// Percent-decode a `grpc-message` value into UTF-8, per the gRPC-Web wire
/// format (servers percent-encode non-ASCII / control bytes).
pub fn decode_grpc_message(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Validate a trailer block and turn it into a call outcome.
///
/// `grpc-status` must be present and parse as a non-negative integer.
/// A value of `0` is success (returned as `Ok(())`); any other value
/// (including unrecognized codes, mapped to [`Code::Unknown`]) produces
/// an `Err(Status)` carrying the decoded message and details. A `0` status
/// accompanied by a `grpc-message` is still success — the message is
/// ignored, per the gRPC-Web wire contract.
pub fn validate_trailer(map: &TrailerMap) -> Result<(), Status> {
    let Some(raw_status) = map.get(GRPC_STATUS) else {
        return Err(Status::invalid_argument("missing trailer"));
    };

    let Ok(status_value) = raw_status.parse::<i64>() else {
        return Err(Status::invalid_argument(format!(
            "invalid grpc-status value: {raw_status}"
        )));
    };

    if status_value == 0 {
        return Ok(());
    }

    let code = if (0..=u32::MAX as i64).contains(&status_value) {
        Code::from_grpc_status(status_value as u32)
    } else {
        Code::Unknown
    };

    let message = map
        .get(GRPC_MESSAGE)
        .map(decode_grpc_message)
        .unwrap_or_default();

    let mut status = Status::new(code, message);

    if let Some(details_b64) = map.get(GRPC_STATUS_DETAILS_BIN) {
        if let Some(detail) = decode_status_details(details_b64) {
            status = status.add_error_detail(detail);
        }
    }

    Err(status)
}

/// Decode a base64-encoded `grpc-status-details-bin` payload into an
/// [`ErrorDetail`]. The payload is opaque to this codec (a `google.rpc.Status`
/// protobuf in the wild); it is wrapped whole under a synthetic type URL so
/// callers that need the structured fields can decode it with their own
/// protobuf descriptors.
fn decode_status_details(b64: &str) -> Option<ErrorDetail> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(b64.trim_end_matches('='))
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(b64))
        .ok()?;
    Some(ErrorDetail::new("google.rpc.Status", bytes))
}

/// Build a [`HashMap`] view of a trailer block for callers that just want
/// the raw name/value data without `TrailerMap`'s ordering guarantees.
pub fn to_hash_map(map: &TrailerMap) -> HashMap<String, Vec<String>> {
    map.entries.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_trailer_stable_order() {
        let mut map = TrailerMap::new();
        map.insert("grpc-status", "0");
        map.insert("x-custom", "a");

        let bytes = serialize_trailer(&map);
        assert_eq!(bytes.as_ref(), b"grpc-status: 0\r\nx-custom: a\r\n");
    }

    #[test]
    fn test_parse_trailer_roundtrip() {
        let mut map = TrailerMap::new();
        map.insert("grpc-status", "0");
        map.insert("grpc-message", "ok");

        let bytes = serialize_trailer(&map);
        let parsed = parse_trailer(&bytes);

        assert_eq!(parsed.get("grpc-status"), Some("0"));
        assert_eq!(parsed.get("grpc-message"), Some("ok"));
    }

    #[test]
    fn test_parse_trailer_tolerates_lf_only() {
        let parsed = parse_trailer(b"grpc-status: 0\ngrpc-message: done\n");
        assert_eq!(parsed.get("grpc-status"), Some("0"));
        assert_eq!(parsed.get("grpc-message"), Some("done"));
    }

    #[test]
    fn test_parse_trailer_duplicate_names() {
        let parsed = parse_trailer(b"x-trace: a\r\nx-trace: b\r\n");
        assert_eq!(parsed.get_all("x-trace"), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_parse_trailer_case_insensitive() {
        let parsed = parse_trailer(b"Grpc-Status: 0\r\n");
        assert_eq!(parsed.get("grpc-status"), Some("0"));
    }

    #[test]
    fn test_decode_grpc_message_percent_decoding() {
        assert_eq!(decode_grpc_message("not%20found"), "not found");
        assert_eq!(decode_grpc_message("plain"), "plain");
    }

    #[test]
    fn test_validate_trailer_success() {
        let mut map = TrailerMap::new();
        map.insert("grpc-status", "0");
        assert!(validate_trailer(&map).is_ok());
    }

    #[test]
    fn test_validate_trailer_success_ignores_message() {
        let mut map = TrailerMap::new();
        map.insert("grpc-status", "0");
        map.insert("grpc-message", "ignored");
        assert!(validate_trailer(&map).is_ok());
    }

    #[test]
    fn test_validate_trailer_missing_status() {
        let map = TrailerMap::new();
        let err = validate_trailer(&map).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_validate_trailer_error_with_message() {
        let mut map = TrailerMap::new();
        map.insert("grpc-status", "5");
        map.insert("grpc-message", "not%20found");

        let err = validate_trailer(&map).unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), Some("not found"));
    }

    #[test]
    fn test_validate_trailer_unknown_code_escape() {
        let mut map = TrailerMap::new();
        map.insert("grpc-status", "9001");

        let err = validate_trailer(&map).unwrap_err();
        assert_eq!(err.code(), Code::Unknown);
    }

    #[test]
    fn test_validate_trailer_non_numeric_status() {
        let mut map = TrailerMap::new();
        map.insert("grpc-status", "not-a-number");

        let err = validate_trailer(&map).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}

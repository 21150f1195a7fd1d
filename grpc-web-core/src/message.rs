//! Typed message serialization.
//!
//! Each gRPC-Web call carries messages in one of two wire formats, selected
//! once at transport construction (`useBinaryFormat`) and shared by every
//! call on that transport: binary protobuf (`application/grpc-web+proto`)
//! or textual JSON (`application/grpc-web+json`). This module is the
//! two-way lookup the call runner uses to turn a typed message into bytes
//! and back, independent of which format was negotiated.

use bytes::Bytes;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Status;

/// Wire format for message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `application/grpc-web+proto` — binary protobuf encoding.
    Binary,
    /// `application/grpc-web+json` — textual JSON encoding.
    Text,
}

impl WireFormat {
    /// Select a format from `useBinaryFormat`.
    pub fn from_use_binary(use_binary_format: bool) -> Self {
        if use_binary_format {
            WireFormat::Binary
        } else {
            WireFormat::Text
        }
    }

    /// The `+proto` / `+json` content-type suffix for this format.
    pub fn content_type_suffix(&self) -> &'static str {
        match self {
            WireFormat::Binary => "proto",
            WireFormat::Text => "json",
        }
    }

    /// Parse a content-type format suffix back into a `WireFormat`.
    pub fn from_content_type_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "proto" => Some(WireFormat::Binary),
            "json" => Some(WireFormat::Text),
            _ => None,
        }
    }
}

/// Serialize a typed message to bytes in the given wire format.
///
/// Binary encoding uses the message's protobuf representation directly;
/// textual encoding uses its `serde::Serialize` implementation (typically
/// derived from the same protobuf descriptor via prost-build's serde
/// companion, or hand-written for the JSON mapping).
pub fn serialize<T>(message: &T, format: WireFormat) -> Result<Bytes, Status>
where
    T: Message + Serialize,
{
    match format {
        WireFormat::Binary => {
            let mut buf = Vec::with_capacity(message.encoded_len());
            message
                .encode(&mut buf)
                .map_err(|e| Status::internal(format!("protobuf encode failed: {e}")))?;
            Ok(Bytes::from(buf))
        }
        WireFormat::Text => serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| Status::internal(format!("json encode failed: {e}"))),
    }
}

/// Parse bytes into a typed message, in the given wire format.
pub fn parse<T>(bytes: &[u8], format: WireFormat) -> Result<T, Status>
where
    T: Message + Default + DeserializeOwned,
{
    match format {
        WireFormat::Binary => T::decode(bytes)
            .map_err(|e| Status::internal(format!("protobuf decode failed: {e}"))),
        WireFormat::Text => serde_json::from_slice(bytes)
            .map_err(|e| Status::internal(format!("json decode failed: {e}"))),
    }
}

//! gRPC-Web envelope framing.
//!
//! Every message and the final trailer block travel on the wire as an
//! envelope:
//!
//! ```text
//! [flags:1][length:4][payload:length]
//! ```
//!
//! Bit 0 marks a compressed payload, bit 7 marks the trailer envelope.
//! All other bits must be zero on send and are rejected on receive.

use bytes::Bytes;

use crate::codec::BoxedCodec;
use crate::compression::CompressionEncoding;
use crate::error::{Code, EnvelopeError, Status};

/// gRPC-Web envelope flags.
pub mod envelope_flags {
    /// Payload is compressed.
    pub const COMPRESSED: u8 = 0x01;
    /// Envelope carries the trailer block instead of a message.
    pub const TRAILER: u8 = 0x80;

    /// All flag bits this implementation understands.
    pub const KNOWN: u8 = COMPRESSED | TRAILER;
}

/// Envelope header size (flags + 4-byte big-endian length).
pub const ENVELOPE_HEADER_SIZE: usize = 5;

/// Wrap a message payload in a gRPC-Web envelope.
///
/// # Arguments
/// - `payload`: the message bytes to wrap
/// - `compressed`: whether the payload is already compressed (sets bit 0)
pub fn wrap_envelope(payload: &[u8], compressed: bool) -> Vec<u8> {
    let flags = if compressed {
        envelope_flags::COMPRESSED
    } else {
        0
    };
    wrap_envelope_with_flags(payload, flags)
}

/// Wrap a serialized trailer block in a trailer envelope (bit 7 set).
pub fn wrap_trailer_envelope(payload: &[u8]) -> Vec<u8> {
    wrap_envelope_with_flags(payload, envelope_flags::TRAILER)
}

fn wrap_envelope_with_flags(payload: &[u8], flags: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ENVELOPE_HEADER_SIZE + payload.len());
    frame.push(flags);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Parse an envelope header, returning `(flags, length)`.
///
/// # Errors
/// Returns [`EnvelopeError::IncompleteHeader`] if fewer than
/// [`ENVELOPE_HEADER_SIZE`] bytes are available.
pub fn parse_envelope_header(data: &[u8]) -> Result<(u8, u32), EnvelopeError> {
    if data.len() < ENVELOPE_HEADER_SIZE {
        return Err(EnvelopeError::IncompleteHeader {
            expected: ENVELOPE_HEADER_SIZE,
            actual: data.len(),
        });
    }

    let flags = data[0];
    let length = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);

    Ok((flags, length))
}

/// Whether the envelope flags mark a trailer block.
pub fn is_trailer(flags: u8) -> bool {
    flags & envelope_flags::TRAILER != 0
}

/// Whether the envelope flags mark a compressed payload.
pub fn is_compressed(flags: u8) -> bool {
    flags & envelope_flags::COMPRESSED != 0
}

/// Reject any flag bit this implementation does not understand.
pub fn validate_flags(flags: u8) -> Result<(), EnvelopeError> {
    if flags & !envelope_flags::KNOWN != 0 {
        return Err(EnvelopeError::InvalidFlags(flags));
    }
    Ok(())
}

/// Decompress an envelope payload if its flags mark it compressed.
pub fn decompress_payload(payload: Bytes, encoding: CompressionEncoding) -> Result<Bytes, EnvelopeError> {
    let Some(codec) = encoding.codec() else {
        return Ok(payload); // identity: passthrough
    };

    codec
        .decompress(&payload)
        .map_err(|e| EnvelopeError::Decompression(e.to_string()))
}

/// Compress payload bytes with the given codec, if any.
///
/// Returns `(bytes, was_compressed)`.
pub fn compress_payload(
    payload: Bytes,
    codec: Option<&BoxedCodec>,
) -> Result<(Bytes, bool), EnvelopeError> {
    let Some(codec) = codec else {
        return Ok((payload, false)); // identity
    };

    let compressed = codec
        .compress(&payload)
        .map_err(|e| EnvelopeError::Compression(e.to_string()))?;

    Ok((compressed, true))
}

/// Map a generic envelope-level protocol error onto the call-level status.
impl From<EnvelopeError> for Status {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::IncompleteHeader { .. } => {
                Status::new(Code::InvalidArgument, err.to_string())
            }
            EnvelopeError::InvalidFlags(_) => Status::new(Code::InvalidArgument, err.to_string()),
            EnvelopeError::Decompression(_) => Status::new(Code::Internal, err.to_string()),
            EnvelopeError::Compression(_) => Status::new(Code::Internal, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_envelope_uncompressed() {
        let payload = b"hello";
        let frame = wrap_envelope(payload, false);

        assert_eq!(frame[0], 0);
        assert_eq!(
            u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]),
            5
        );
        assert_eq!(&frame[5..], b"hello");
    }

    #[test]
    fn test_wrap_envelope_compressed() {
        let payload = b"hello";
        let frame = wrap_envelope(payload, true);

        assert_eq!(frame[0], envelope_flags::COMPRESSED);
        assert_eq!(&frame[5..], b"hello");
    }

    #[test]
    fn test_wrap_trailer_envelope() {
        let payload = b"grpc-status: 0\r\n";
        let frame = wrap_trailer_envelope(payload);

        assert_eq!(frame[0], envelope_flags::TRAILER);
        assert!(is_trailer(frame[0]));
        assert!(!is_compressed(frame[0]));
    }

    #[test]
    fn test_parse_envelope_header() {
        let data = [0x00, 0x00, 0x00, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let (flags, length) = parse_envelope_header(&data).unwrap();

        assert_eq!(flags, 0);
        assert_eq!(length, 5);
    }

    #[test]
    fn test_parse_envelope_header_incomplete() {
        let data = [0x00, 0x00, 0x00]; // only 3 bytes
        let result = parse_envelope_header(&data);

        assert!(matches!(
            result,
            Err(EnvelopeError::IncompleteHeader {
                expected: 5,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_validate_flags_rejects_unknown_bits() {
        assert!(validate_flags(0xFF & !envelope_flags::KNOWN).is_err());
        assert!(validate_flags(envelope_flags::COMPRESSED | envelope_flags::TRAILER).is_ok());
    }

    #[test]
    fn test_compress_payload_identity() {
        let payload = Bytes::from_static(b"hello");
        let (result, compressed) = compress_payload(payload.clone(), None).unwrap();

        assert_eq!(result, payload);
        assert!(!compressed);
    }
}

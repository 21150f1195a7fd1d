//! gRPC-Web envelope stream adapters.
//!
//! This module provides:
//! - [`FrameDecoder`]: a stream adapter that parses gRPC-Web envelopes from a
//!   byte stream, yielding decoded messages and surfacing the trailer block
//!   as the terminal item.
//! - [`FrameEncoder`]: a stream adapter that encodes a stream of typed
//!   messages into gRPC-Web envelopes suitable for a request body.

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

use grpc_web_core::{
    compress_payload, decompress_payload, envelope_flags, is_trailer, parse_envelope_header,
    parse_trailer, validate_flags, validate_trailer, wrap_envelope, Code, CompressionConfig,
    CompressionEncoding, TrailerMap, WireFormat, ENVELOPE_HEADER_SIZE,
};

use crate::ClientError;

/// A frame yielded by [`FrameDecoder`]: either a decoded message, or the
/// terminal trailer block (already validated against `grpc-status`).
enum DecodedFrame<T> {
    Message(T),
    Trailer(TrailerMap),
}

/// Stream adapter that decodes gRPC-Web envelopes from a byte stream.
///
/// Wraps a transport-level byte stream and yields decoded protobuf or JSON
/// messages. The trailer envelope ends the stream: its contents are
/// validated against `grpc-status` and surfaced as the final `Err` if the
/// call did not end in `Ok`, or consumed silently on success.
pub struct FrameDecoder<S, T> {
    stream: S,
    buffer: BytesMut,
    format: WireFormat,
    encoding: CompressionEncoding,
    read_max_bytes: Option<usize>,
    trailer: Option<TrailerMap>,
    finished: bool,
    pending_error: Option<ClientError>,
    _marker: PhantomData<T>,
}

impl<S, T> FrameDecoder<S, T> {
    /// Create a new frame decoder.
    ///
    /// `read_max_bytes`, when set, bounds the decompressed size of any
    /// single envelope payload (`readMaxBytes`); envelopes over the cap
    /// fail with [`Code::ResourceExhausted`].
    pub fn new(
        stream: S,
        format: WireFormat,
        encoding: CompressionEncoding,
        read_max_bytes: Option<usize>,
    ) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
            format,
            encoding,
            read_max_bytes,
            trailer: None,
            finished: false,
            pending_error: None,
            _marker: PhantomData,
        }
    }

    /// The trailer block received at the end of the stream, if any.
    pub fn trailer(&self) -> Option<&TrailerMap> {
        self.trailer.as_ref()
    }

    /// Take the trailer block, leaving `None` in its place.
    pub fn take_trailer(&mut self) -> Option<TrailerMap> {
        self.trailer.take()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn try_parse_frame(&mut self) -> Result<Option<DecodedFrame<T>>, ClientError>
    where
        T: Message + DeserializeOwned + Default,
    {
        if self.buffer.len() < ENVELOPE_HEADER_SIZE {
            return Ok(None);
        }

        let (flags, length) = parse_envelope_header(&self.buffer).map_err(ClientError::from)?;
        validate_flags(flags).map_err(ClientError::from)?;

        // Reject the declared length before buffering the body: waiting for
        // `decompressed.len()` below lets a server's 5-byte prefix alone
        // commit us to buffering an arbitrarily large frame first.
        if let Some(max) = self.read_max_bytes {
            if length as usize > max {
                return Err(ClientError::resource_exhausted(format!(
                    "envelope of {length} bytes exceeds readMaxBytes of {max}"
                )));
            }
        }

        let frame_size = ENVELOPE_HEADER_SIZE + length as usize;
        if self.buffer.len() < frame_size {
            return Ok(None);
        }

        let frame_bytes = self.buffer.split_to(frame_size);
        let payload = Bytes::copy_from_slice(&frame_bytes[ENVELOPE_HEADER_SIZE..]);

        if is_trailer(flags) {
            let trailer = parse_trailer(&payload);
            return Ok(Some(DecodedFrame::Trailer(trailer)));
        }

        let decompressed = decompress_payload(payload, self.encoding).map_err(ClientError::from)?;

        if let Some(max) = self.read_max_bytes {
            if decompressed.len() > max {
                return Err(ClientError::resource_exhausted(format!(
                    "message of {} bytes exceeds readMaxBytes of {}",
                    decompressed.len(),
                    max
                )));
            }
        }

        let message: T = grpc_web_core::parse(&decompressed, self.format)
            .map_err(ClientError::from)?;

        Ok(Some(DecodedFrame::Message(message)))
    }
}

impl<S, T> Unpin for FrameDecoder<S, T> where S: Unpin {}

impl<S, T> Stream for FrameDecoder<S, T>
where
    S: Stream<Item = Result<Bytes, ClientError>> + Unpin,
    T: Message + DeserializeOwned + Default,
{
    type Item = Result<T, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(err) = this.pending_error.take() {
                this.finished = true;
                return Poll::Ready(Some(Err(err)));
            }

            if this.finished {
                return Poll::Ready(None);
            }

            match this.try_parse_frame() {
                Ok(Some(DecodedFrame::Message(msg))) => {
                    return Poll::Ready(Some(Ok(msg)));
                }
                Ok(Some(DecodedFrame::Trailer(trailer))) => {
                    // A well-formed stream has nothing buffered past the trailer.
                    // Anything already sitting in the buffer arrived in the same
                    // read as the trailer and is therefore malformed framing
                    // rather than a later, legitimately-async write.
                    match this.try_parse_frame() {
                        Ok(Some(DecodedFrame::Trailer(_))) => {
                            this.finished = true;
                            this.trailer = Some(trailer);
                            #[cfg(feature = "tracing")]
                            tracing::warn!("received extra trailer after the terminal trailer");
                            return Poll::Ready(Some(Err(ClientError::invalid_argument(
                                "received extra trailer",
                            ))));
                        }
                        Ok(Some(DecodedFrame::Message(_))) => {
                            this.finished = true;
                            this.trailer = Some(trailer);
                            #[cfg(feature = "tracing")]
                            tracing::warn!("received a message after the terminal trailer");
                            return Poll::Ready(Some(Err(ClientError::invalid_argument(
                                "received extra message after trailer",
                            ))));
                        }
                        Ok(None) => {
                            this.finished = true;
                            let outcome = validate_trailer(&trailer);
                            this.trailer = Some(trailer);
                            if let Err(status) = outcome {
                                return Poll::Ready(Some(Err(ClientError::from(status))));
                            }
                            return Poll::Ready(None);
                        }
                        Err(e) => {
                            this.finished = true;
                            this.trailer = Some(trailer);
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                }
                Ok(None) => {
                    // Need more bytes before another frame can be parsed.
                }
                Err(e) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
            }

            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    if !this.buffer.is_empty() {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            buffered_bytes = this.buffer.len(),
                            "response stream ended with an incomplete envelope",
                        );
                        return Poll::Ready(Some(Err(ClientError::new(
                            Code::DataLoss,
                            format!(
                                "stream ended with {} bytes of incomplete envelope data",
                                this.buffer.len()
                            ),
                        ))));
                    }
                    #[cfg(feature = "tracing")]
                    tracing::warn!("response stream ended without a terminal trailer");
                    return Poll::Ready(Some(Err(ClientError::new(
                        Code::InvalidArgument,
                        "missing trailer",
                    ))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Stream adapter that encodes a message stream into gRPC-Web envelopes for
/// a request body. Unlike the response side, the request never carries a
/// trailer envelope — the client signals the end of the stream by closing
/// the request body.
pub struct FrameEncoder<S, T> {
    stream: S,
    format: WireFormat,
    encoding: CompressionEncoding,
    compression: CompressionConfig,
    write_max_bytes: Option<usize>,
    done: bool,
    _marker: PhantomData<T>,
}

impl<S, T> FrameEncoder<S, T> {
    pub fn new(
        stream: S,
        format: WireFormat,
        encoding: CompressionEncoding,
        compression: CompressionConfig,
        write_max_bytes: Option<usize>,
    ) -> Self {
        Self {
            stream,
            format,
            encoding,
            compression,
            write_max_bytes,
            done: false,
            _marker: PhantomData,
        }
    }

    pub fn encoding(&self) -> CompressionEncoding {
        self.encoding
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    fn encode_frame(&self, msg: &T) -> Result<Bytes, ClientError>
    where
        T: Message + Serialize,
    {
        let payload = grpc_web_core::serialize(msg, self.format).map_err(ClientError::from)?;

        if let Some(max) = self.write_max_bytes {
            if payload.len() > max {
                return Err(ClientError::resource_exhausted(format!(
                    "message of {} bytes exceeds writeMaxBytes of {}",
                    payload.len(),
                    max
                )));
            }
        }

        let codec = if !self.encoding.is_identity()
            && !self.compression.is_disabled()
            && payload.len() >= self.compression.min_bytes
        {
            self.encoding.codec_with_level(self.compression.level)
        } else {
            None
        };

        let (payload, compressed) =
            compress_payload(payload, codec.as_ref()).map_err(ClientError::from)?;

        Ok(Bytes::from(wrap_envelope(&payload, compressed)))
    }
}

impl<S, T> Unpin for FrameEncoder<S, T> where S: Unpin {}

impl<S, T> Stream for FrameEncoder<S, T>
where
    S: Stream<Item = T> + Unpin,
    T: Message + Serialize,
{
    type Item = Result<Bytes, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(msg)) => match this.encode_frame(&msg) {
                Ok(frame) => Poll::Ready(Some(Ok(frame))),
                Err(e) => {
                    this.done = true;
                    Poll::Ready(Some(Err(e)))
                }
            },
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The minimal gRPC-Web frame flag vocabulary, for tests and callers
/// assembling raw wire bytes directly.
pub use envelope_flags as frame_flags;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::stream;

    fn make_frame(flags: u8, payload: &[u8]) -> Bytes {
        let mut frame = Vec::with_capacity(5 + payload.len());
        frame.push(flags);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        Bytes::from(frame)
    }

    #[derive(Clone, PartialEq, Message, Serialize, serde::Deserialize)]
    struct TestMessage {
        #[prost(string, tag = "1")]
        #[serde(default)]
        value: String,
    }

    fn trailer_frame(grpc_status: &str, grpc_message: Option<&str>) -> Bytes {
        let mut payload = format!("grpc-status: {grpc_status}\r\n");
        if let Some(msg) = grpc_message {
            payload.push_str(&format!("grpc-message: {msg}\r\n"));
        }
        make_frame(envelope_flags::TRAILER, payload.as_bytes())
    }

    #[tokio::test]
    async fn test_decode_single_message_then_ok_trailer() {
        let frame = make_frame(0x00, br#"{"value":"hello"}"#);
        let trailer = trailer_frame("0", None);

        let mut all = frame.to_vec();
        all.extend_from_slice(&trailer);

        let byte_stream = stream::iter(vec![Ok::<_, ClientError>(Bytes::from(all))]);
        let mut decoder = FrameDecoder::<_, TestMessage>::new(
            byte_stream,
            WireFormat::Text,
            CompressionEncoding::Identity,
            None,
        );

        let msg = decoder.next().await.unwrap().unwrap();
        assert_eq!(msg.value, "hello");
        assert!(decoder.next().await.is_none());
        assert_eq!(decoder.trailer().unwrap().get("grpc-status"), Some("0"));
    }

    #[tokio::test]
    async fn test_decode_multiple_messages() {
        let frame1 = make_frame(0x00, br#"{"value":"one"}"#);
        let frame2 = make_frame(0x00, br#"{"value":"two"}"#);
        let trailer = trailer_frame("0", None);

        let mut all = frame1.to_vec();
        all.extend_from_slice(&frame2);
        all.extend_from_slice(&trailer);

        let byte_stream = stream::iter(vec![Ok::<_, ClientError>(Bytes::from(all))]);
        let mut decoder = FrameDecoder::<_, TestMessage>::new(
            byte_stream,
            WireFormat::Text,
            CompressionEncoding::Identity,
            None,
        );

        assert_eq!(decoder.next().await.unwrap().unwrap().value, "one");
        assert_eq!(decoder.next().await.unwrap().unwrap().value, "two");
        assert!(decoder.next().await.is_none());
    }

    #[tokio::test]
    async fn test_decode_error_trailer() {
        let frame = make_frame(0x00, br#"{"value":"hello"}"#);
        let trailer = trailer_frame("5", Some("not%20found"));

        let mut all = frame.to_vec();
        all.extend_from_slice(&trailer);

        let byte_stream = stream::iter(vec![Ok::<_, ClientError>(Bytes::from(all))]);
        let mut decoder = FrameDecoder::<_, TestMessage>::new(
            byte_stream,
            WireFormat::Text,
            CompressionEncoding::Identity,
            None,
        );

        assert_eq!(decoder.next().await.unwrap().unwrap().value, "hello");

        let err = decoder.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), Some("not found"));
    }

    #[tokio::test]
    async fn test_decode_missing_trailer_is_protocol_error() {
        let frame = make_frame(0x00, br#"{"value":"hello"}"#);
        let byte_stream = stream::iter(vec![Ok::<_, ClientError>(frame)]);
        let mut decoder = FrameDecoder::<_, TestMessage>::new(
            byte_stream,
            WireFormat::Text,
            CompressionEncoding::Identity,
            None,
        );

        assert_eq!(decoder.next().await.unwrap().unwrap().value, "hello");
        let err = decoder.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_decode_chunked_data() {
        let frame = make_frame(0x00, br#"{"value":"hello"}"#);
        let trailer = trailer_frame("0", None);

        let mut all = frame.to_vec();
        all.extend_from_slice(&trailer);

        let chunk1 = Bytes::copy_from_slice(&all[..3]);
        let chunk2 = Bytes::copy_from_slice(&all[3..10]);
        let chunk3 = Bytes::copy_from_slice(&all[10..]);

        let byte_stream = stream::iter(vec![
            Ok::<_, ClientError>(chunk1),
            Ok(chunk2),
            Ok(chunk3),
        ]);
        let mut decoder = FrameDecoder::<_, TestMessage>::new(
            byte_stream,
            WireFormat::Text,
            CompressionEncoding::Identity,
            None,
        );

        assert_eq!(decoder.next().await.unwrap().unwrap().value, "hello");
        assert!(decoder.next().await.is_none());
    }

    #[tokio::test]
    async fn test_decode_read_max_bytes_exceeded() {
        let big_payload = format!(r#"{{"value":"{}"}}"#, "x".repeat(100));
        let frame = make_frame(0x00, big_payload.as_bytes());
        let byte_stream = stream::iter(vec![Ok::<_, ClientError>(frame)]);

        let mut decoder = FrameDecoder::<_, TestMessage>::new(
            byte_stream,
            WireFormat::Text,
            CompressionEncoding::Identity,
            Some(16),
        );

        let err = decoder.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
    }

    #[tokio::test]
    async fn test_decode_read_max_bytes_rejects_declared_length_before_buffering_body() {
        // Only the 5-byte header is ever delivered; a server that lied about
        // a huge payload and then stalled must still be rejected immediately
        // rather than hanging the decoder waiting for bytes that never come.
        let mut header = Vec::with_capacity(5);
        header.push(0x00);
        header.extend_from_slice(&(1_000_000u32).to_be_bytes());

        let byte_stream = stream::iter(vec![Ok::<_, ClientError>(Bytes::from(header))]);
        let mut decoder = FrameDecoder::<_, TestMessage>::new(
            byte_stream,
            WireFormat::Text,
            CompressionEncoding::Identity,
            Some(16),
        );

        let err = decoder.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
    }

    #[tokio::test]
    async fn test_decode_rejects_unknown_flags() {
        let frame = make_frame(0x04, br#"{"value":"hello"}"#);
        let byte_stream = stream::iter(vec![Ok::<_, ClientError>(frame)]);
        let mut decoder = FrameDecoder::<_, TestMessage>::new(
            byte_stream,
            WireFormat::Text,
            CompressionEncoding::Identity,
            None,
        );

        let err = decoder.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_encode_single_message() {
        let messages = stream::iter(vec![TestMessage {
            value: "hello".to_string(),
        }]);

        let mut encoder = FrameEncoder::new(
            messages,
            WireFormat::Text,
            CompressionEncoding::Identity,
            CompressionConfig::disabled(),
            None,
        );

        let frame = encoder.next().await.unwrap().unwrap();
        assert_eq!(frame[0], 0x00);
        let length = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        assert_eq!(&frame[5..5 + length], br#"{"value":"hello"}"#);

        assert!(encoder.next().await.is_none());
        assert!(encoder.is_finished());
    }

    #[tokio::test]
    async fn test_encode_proto_message() {
        let messages = stream::iter(vec![TestMessage {
            value: "hello".to_string(),
        }]);

        let mut encoder = FrameEncoder::new(
            messages,
            WireFormat::Binary,
            CompressionEncoding::Identity,
            CompressionConfig::disabled(),
            None,
        );

        let frame = encoder.next().await.unwrap().unwrap();
        assert_eq!(frame[0], 0x00);
        let length = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        let decoded = TestMessage::decode(&frame[5..5 + length]).unwrap();
        assert_eq!(decoded.value, "hello");
    }

    #[tokio::test]
    async fn test_encode_empty_stream() {
        let messages = stream::iter(Vec::<TestMessage>::new());
        let mut encoder = FrameEncoder::new(
            messages,
            WireFormat::Text,
            CompressionEncoding::Identity,
            CompressionConfig::disabled(),
            None,
        );

        assert!(encoder.next().await.is_none());
        assert!(encoder.is_finished());
    }

    #[tokio::test]
    async fn test_encode_write_max_bytes_exceeded() {
        let messages = stream::iter(vec![TestMessage {
            value: "x".repeat(100),
        }]);
        let mut encoder = FrameEncoder::new(
            messages,
            WireFormat::Text,
            CompressionEncoding::Identity,
            CompressionConfig::disabled(),
            Some(16),
        );

        let err = encoder.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
    }

    #[tokio::test]
    async fn test_roundtrip_multiple_messages() {
        let originals = vec![
            TestMessage { value: "first".into() },
            TestMessage { value: "second".into() },
            TestMessage { value: "third".into() },
        ];

        let encoder = FrameEncoder::new(
            stream::iter(originals.clone()),
            WireFormat::Text,
            CompressionEncoding::Identity,
            CompressionConfig::disabled(),
            None,
        );

        let frames: Vec<Bytes> = encoder
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let mut all_bytes: Vec<u8> = frames.iter().flat_map(|f| f.to_vec()).collect();
        all_bytes.extend_from_slice(&trailer_frame("0", None));

        let byte_stream = stream::iter(vec![Ok::<_, ClientError>(Bytes::from(all_bytes))]);
        let mut decoder = FrameDecoder::<_, TestMessage>::new(
            byte_stream,
            WireFormat::Text,
            CompressionEncoding::Identity,
            None,
        );

        for original in &originals {
            let decoded = decoder.next().await.unwrap().unwrap();
            assert_eq!(decoded.value, original.value);
        }
        assert!(decoder.next().await.is_none());
    }

    #[test]
    fn test_frame_flags_reexport() {
        assert_eq!(frame_flags::TRAILER, 0x80);
        assert_eq!(frame_flags::COMPRESSED, 0x01);
    }
}

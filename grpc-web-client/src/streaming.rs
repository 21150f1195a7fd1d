//! Bidirectional streaming connection object for gRPC-Web calls.
//!
//! This module provides [`Streaming`], a read-side wrapper around a
//! [`FrameDecoder`] that exposes the trailer block once the stream ends, and
//! [`Connection`], the full `send`/`close`/`read` object used for
//! client-streaming and bidirectional calls. A server-streaming call only
//! ever reads; a client-streaming call degenerates to a single `read`.
//!
//! # Cancellation
//!
//! Dropping a [`Streaming`] or [`Connection`] cancels the call: the
//! underlying HTTP connection is closed, which signals cancellation to the
//! server via TCP RST or an HTTP/2 `RST_STREAM` frame.
//!
//! For cooperative cancellation with a deadline, use [`CallOptions::timeout`]
//! which sends the `Grpc-Timeout` header to the server.
//!
//! [`CallOptions::timeout`]: crate::CallOptions::timeout

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use http::HeaderMap;
use tokio::sync::{mpsc, oneshot};

use crate::ClientError;
use crate::frame::FrameDecoder;
use grpc_web_core::TrailerMap;

/// Wrapper for streaming response messages.
///
/// `Streaming<S>` wraps a [`FrameDecoder`] and provides access to the
/// trailer block after the stream is fully consumed.
///
/// # Example
///
/// ```ignore
/// while let Some(result) = stream.next().await {
///     match result {
///         Ok(msg) => println!("Got message: {:?}", msg),
///         Err(e) => eprintln!("Error: {:?}", e),
///     }
/// }
///
/// if let Some(trailer) = stream.trailer() {
///     println!("grpc-status: {:?}", trailer.get("grpc-status"));
/// }
/// ```
pub struct Streaming<S> {
    /// The underlying frame decoder.
    inner: S,
}

impl<S> Streaming<S> {
    /// Create a new `Streaming` wrapping the given stream.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Get a reference to the inner stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the inner stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consume the wrapper and return the inner stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, T> Streaming<FrameDecoder<S, T>> {
    /// The trailer block received at the end of the stream.
    ///
    /// Returns `None` until the stream has reached its terminal frame.
    pub fn trailer(&self) -> Option<&TrailerMap> {
        self.inner.trailer()
    }

    /// Take the trailer block, leaving `None` in its place.
    pub fn take_trailer(&mut self) -> Option<TrailerMap> {
        self.inner.take_trailer()
    }

    /// Whether the stream has reached its terminal frame.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// Graceful shutdown methods for streaming responses.
impl<S, T> Streaming<S>
where
    S: Stream<Item = Result<T, ClientError>> + Unpin,
{
    /// Drain all remaining messages from the stream without processing
    /// them, leaving the trailer available via
    /// [`trailer()`](Streaming::trailer) if the inner stream is a
    /// [`FrameDecoder`].
    ///
    /// Returns the number of messages drained (not counting errors).
    pub async fn drain(&mut self) -> usize {
        use futures::StreamExt;
        let mut count = 0;
        while let Some(result) = self.inner.next().await {
            if result.is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Like [`drain()`](Self::drain), but bounded by a timeout.
    ///
    /// Returns `Ok(count)` if the stream was fully drained, or `Err(count)`
    /// with the partial count if the timeout expired first.
    pub async fn drain_timeout(&mut self, timeout: Duration) -> Result<usize, usize> {
        use futures::StreamExt;
        let mut count = 0;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline) => {
                    return Err(count);
                }

                item = self.inner.next() => {
                    match item {
                        Some(Ok(_)) => count += 1,
                        Some(Err(_)) => {}
                        None => return Ok(count),
                    }
                }
            }
        }
    }
}

impl<S, T> Stream for Streaming<S>
where
    S: Stream<Item = Result<T, ClientError>> + Unpin,
{
    type Item = Result<T, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// The full bidirectional call object: `send`/`close` on the outbound side,
/// `read` plus the `response_header`/`response_trailer` signals on the
/// inbound side.
///
/// `response_header` resolves no later than the first successful `read`.
/// `response_trailer` becomes available after the last successful `read`
/// (i.e. once `read` has returned `None`), or at the same instant as a
/// failing `read` if the call ended in error.
pub struct Connection<T, S, U> {
    outbound: Option<mpsc::UnboundedSender<T>>,
    inbound: Streaming<FrameDecoder<S, U>>,
    response_header: Option<oneshot::Receiver<Result<HeaderMap, ClientError>>>,
    cached_header: Option<HeaderMap>,
}

impl<T, S, U> Connection<T, S, U>
where
    S: Stream<Item = Result<bytes::Bytes, ClientError>> + Unpin,
    U: prost::Message + serde::de::DeserializeOwned + Default,
{
    /// Build a connection from its moving parts: the outbound message
    /// sender feeding the request body's
    /// [`FrameEncoder`](crate::frame::FrameEncoder), the inbound frame
    /// decoder, and a one-shot that resolves with the response headers as
    /// soon as they arrive.
    pub fn new(
        outbound: mpsc::UnboundedSender<T>,
        inbound: FrameDecoder<S, U>,
        response_header: oneshot::Receiver<Result<HeaderMap, ClientError>>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            inbound: Streaming::new(inbound),
            response_header: Some(response_header),
            cached_header: None,
        }
    }

    /// Send a message on the outbound side.
    ///
    /// Fails with [`Code::Canceled`](grpc_web_core::Code::Canceled) if the
    /// call has already been closed or the request body has been dropped by
    /// the transport.
    pub fn send(&self, message: T) -> Result<(), ClientError> {
        match &self.outbound {
            Some(tx) => tx
                .send(message)
                .map_err(|_| ClientError::canceled("cannot send: outbound stream already closed")),
            None => Err(ClientError::canceled(
                "cannot send: outbound stream already closed",
            )),
        }
    }

    /// Half-close the outbound side. Idempotent. The server observes
    /// end-of-request-stream once the underlying HTTP request body
    /// finishes.
    pub fn close(&mut self) {
        self.outbound = None;
    }

    /// Read the next inbound message, or `None` once the stream has reached
    /// its terminal trailer frame on a successful call. A non-OK trailer
    /// status surfaces as `Some(Err(_))`.
    pub async fn read(&mut self) -> Option<Result<U, ClientError>> {
        use futures::StreamExt;
        self.inbound.next().await
    }

    /// Await the response headers.
    ///
    /// Fails with [`Code::Canceled`](grpc_web_core::Code::Canceled) if the
    /// call was aborted before headers arrived.
    pub async fn response_header(&mut self) -> Result<HeaderMap, ClientError> {
        if let Some(headers) = &self.cached_header {
            return Ok(headers.clone());
        }

        let receiver = self
            .response_header
            .take()
            .ok_or_else(|| ClientError::canceled("response headers already consumed"))?;

        let result = receiver
            .await
            .unwrap_or_else(|_| Err(ClientError::canceled("call aborted before headers arrived")));

        if let Ok(headers) = &result {
            self.cached_header = Some(headers.clone());
        }
        result
    }

    /// The trailer block, available once `read` has returned `None` or
    /// `Some(Err(_))`.
    pub fn response_trailer(&self) -> Option<&TrailerMap> {
        self.inbound.trailer()
    }

    /// Whether the inbound side has reached its terminal frame.
    pub fn is_finished(&self) -> bool {
        self.inbound.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;
    use futures::stream;
    use grpc_web_core::{Code, CompressionEncoding, WireFormat, envelope_flags};
    use serde::{Deserialize, Serialize};

    fn make_frame(flags: u8, payload: &[u8]) -> Bytes {
        let mut frame = Vec::with_capacity(5 + payload.len());
        frame.push(flags);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        Bytes::from(frame)
    }

    fn trailer_frame(grpc_status: &str, grpc_message: Option<&str>) -> Bytes {
        let mut payload = format!("grpc-status: {grpc_status}\r\n");
        if let Some(msg) = grpc_message {
            payload.push_str(&format!("grpc-message: {msg}\r\n"));
        }
        make_frame(envelope_flags::TRAILER, payload.as_bytes())
    }

    #[derive(Clone, PartialEq, Default, prost::Message, Serialize, Deserialize)]
    struct TestMessage {
        #[prost(string, tag = "1")]
        #[serde(default)]
        value: String,
    }

    type ByteStream = stream::Iter<std::vec::IntoIter<Result<Bytes, ClientError>>>;

    fn decoder_from(bytes: Vec<u8>) -> FrameDecoder<ByteStream, TestMessage> {
        let byte_stream = stream::iter(vec![Ok::<_, ClientError>(Bytes::from(bytes))]);
        FrameDecoder::new(
            byte_stream,
            WireFormat::Text,
            CompressionEncoding::Identity,
            None,
        )
    }

    #[tokio::test]
    async fn test_streaming_wraps_decoder() {
        let mut bytes = make_frame(0x00, br#"{"value":"hello"}"#).to_vec();
        bytes.extend_from_slice(&trailer_frame("0", None));

        let mut streaming = Streaming::new(decoder_from(bytes));

        let msg = streaming.next().await.unwrap().unwrap();
        assert_eq!(msg.value, "hello");

        assert!(streaming.next().await.is_none());
        assert!(streaming.is_finished());
    }

    #[tokio::test]
    async fn test_streaming_trailer() {
        let mut bytes = make_frame(0x00, br#"{"value":"test"}"#).to_vec();
        bytes.extend_from_slice(&trailer_frame("0", None));

        let mut streaming = Streaming::new(decoder_from(bytes));
        while streaming.next().await.is_some() {}

        let trailer = streaming.trailer().unwrap();
        assert_eq!(trailer.get("grpc-status"), Some("0"));
    }

    #[tokio::test]
    async fn test_streaming_drain() {
        let mut bytes = make_frame(0x00, br#"{"value":"msg1"}"#).to_vec();
        bytes.extend_from_slice(&make_frame(0x00, br#"{"value":"msg2"}"#));
        bytes.extend_from_slice(&make_frame(0x00, br#"{"value":"msg3"}"#));
        bytes.extend_from_slice(&trailer_frame("0", None));

        let mut streaming = Streaming::new(decoder_from(bytes));

        let msg = streaming.next().await.unwrap().unwrap();
        assert_eq!(msg.value, "msg1");

        let drained = streaming.drain().await;
        assert_eq!(drained, 2);
        assert!(streaming.is_finished());
    }

    #[tokio::test]
    async fn test_streaming_drain_timeout() {
        let mut bytes = make_frame(0x00, br#"{"value":"msg1"}"#).to_vec();
        bytes.extend_from_slice(&trailer_frame("0", None));

        let mut streaming = Streaming::new(decoder_from(bytes));

        let result = streaming.drain_timeout(Duration::from_secs(5)).await;
        assert_eq!(result, Ok(1));
        assert!(streaming.is_finished());
    }

    #[tokio::test]
    async fn test_connection_send_read_close() {
        let mut bytes = make_frame(0x00, br#"{"value":"reply"}"#).to_vec();
        bytes.extend_from_slice(&trailer_frame("0", None));

        let (tx, mut rx) = mpsc::unbounded_channel::<TestMessage>();
        let (header_tx, header_rx) = oneshot::channel();
        header_tx.send(Ok(HeaderMap::new())).unwrap();

        let mut conn = Connection::new(tx, decoder_from(bytes), header_rx);

        conn.send(TestMessage {
            value: "request".into(),
        })
        .unwrap();
        assert_eq!(rx.recv().await.unwrap().value, "request");

        conn.close();
        assert!(conn.send(TestMessage::default()).is_err());

        let headers = conn.response_header().await.unwrap();
        assert!(headers.is_empty());

        let reply = conn.read().await.unwrap().unwrap();
        assert_eq!(reply.value, "reply");
        assert!(conn.read().await.is_none());
        assert_eq!(
            conn.response_trailer().unwrap().get("grpc-status"),
            Some("0")
        );
    }

    #[tokio::test]
    async fn test_connection_response_header_canceled() {
        let bytes = trailer_frame("0", None).to_vec();
        let (tx, _rx) = mpsc::unbounded_channel::<TestMessage>();
        let (header_tx, header_rx) = oneshot::channel();
        drop(header_tx);

        let mut conn = Connection::new(tx, decoder_from(bytes), header_rx);
        let err = conn.response_header().await.unwrap_err();
        assert_eq!(err.code(), Code::Canceled);
    }

    #[tokio::test]
    async fn test_connection_read_error_trailer() {
        let mut bytes = make_frame(0x00, br#"{"value":"partial"}"#).to_vec();
        bytes.extend_from_slice(&trailer_frame("5", Some("not%20found")));

        let (tx, _rx) = mpsc::unbounded_channel::<TestMessage>();
        let (header_tx, header_rx) = oneshot::channel();
        header_tx.send(Ok(HeaderMap::new())).unwrap();

        let mut conn = Connection::new(tx, decoder_from(bytes), header_rx);
        assert_eq!(conn.read().await.unwrap().unwrap().value, "partial");

        let err = conn.read().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(
            conn.response_trailer().unwrap().get("grpc-status"),
            Some("5")
        );
    }
}

//! The call runner: turns typed messages into gRPC-Web HTTP exchanges.
//!
//! [`GrpcWebClient`] hosts the unary call state machine (`Init` → `Sending`
//! → `ReceivingHeaders` → `ReceivingBody` → `Done`) and the three streaming
//! call shapes, all built on the envelope codec in [`crate::frame`] and the
//! connection object in [`crate::streaming`].

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{HeaderMap, Method, StatusCode};
use http_body::Body as _;
use hyper::body::Incoming;
use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower::ServiceExt;

#[cfg(feature = "tracing")]
use tracing::info_span;

use grpc_web_core::{
    serialize_trailer, wrap_envelope, wrap_trailer_envelope, Code, CompressionConfig,
    CompressionEncoding, TrailerMap, WireFormat,
};

use crate::error::ClientError;
use crate::frame::{FrameDecoder, FrameEncoder};
use crate::header::{build_headers, validate_response};
use crate::interceptor::{InterceptorChain, UnaryFunc};
use crate::options::CallOptions;
use crate::streaming::{Connection, Streaming};
use crate::transport::TransportBody;

/// A response-side byte stream, type-erased so the decoder can be fed either
/// a live HTTP body or a synthesized trailers-only envelope.
type ResponseByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// A decoded unary response: the message, the response headers, and the
/// trailer block the call ended on.
#[derive(Debug, Clone)]
pub struct UnaryResponse<O> {
    /// The decoded response message.
    pub message: O,
    /// HTTP response headers.
    pub headers: HeaderMap,
    /// The trailer block (`grpc-status` and friends) the call ended on.
    pub trailers: TrailerMap,
}

/// Adapts a [`hyper::body::Incoming`] into the plain `Bytes` chunk stream
/// the frame codec operates on, discarding HTTP trailer frames (these are
/// unrelated to the gRPC-Web trailer *envelope*, which travels in the body).
struct IncomingStream {
    inner: Incoming,
}

impl IncomingStream {
    fn new(inner: Incoming) -> Self {
        Self { inner }
    }
}

impl Stream for IncomingStream {
    type Item = Result<Bytes, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                    Ok(data) => return Poll::Ready(Some(Ok(data))),
                    Err(_trailer_frame) => continue,
                },
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(ClientError::Transport(e.to_string()))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Race `fut` against `timeout`, mapping expiry to `DeadlineExceeded`.
///
/// With `timeout: None`, the future runs unbounded — `merged_timeout` only
/// yields `None` when neither the call nor the client configured one.
async fn with_deadline<F, T>(
    timeout: Option<Duration>,
    fut: F,
) -> Result<T, ClientError>
where
    F: std::future::Future<Output = Result<T, ClientError>>,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
            Err(ClientError::deadline_exceeded(format!(
                "call did not complete within {timeout:?}"
            )))
        }),
        None => fut.await,
    }
}

/// Maps a non-`200` HTTP status to the `ClientError` it represents, per the
/// HTTP→gRPC status table.
fn map_non_ok_status(status: StatusCode) -> ClientError {
    let code = Code::from_http_status(status.as_u16());
    let message = status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string());
    ClientError::new(code, message)
}

/// Rebuilds the trailer block a trailers-only response carried in its HTTP
/// headers, as a standalone trailer envelope, so it can flow through the
/// same [`FrameDecoder`] a body-carried trailer would.
fn trailers_only_envelope(headers: &HeaderMap) -> Bytes {
    let mut map = TrailerMap::new();
    for name in [
        grpc_web_core::GRPC_STATUS,
        grpc_web_core::GRPC_MESSAGE,
        grpc_web_core::GRPC_STATUS_DETAILS_BIN,
    ] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            map.insert(name, value);
        }
    }
    Bytes::from(wrap_trailer_envelope(&serialize_trailer(&map)).to_vec())
}

/// Encodes a single message into one gRPC-Web envelope, applying
/// `writeMaxBytes` and the send-compression policy.
fn encode_unary_envelope<I: Message + Serialize>(
    message: &I,
    format: WireFormat,
    send_encoding: CompressionEncoding,
    compression: &CompressionConfig,
    write_max_bytes: Option<usize>,
) -> Result<Bytes, ClientError> {
    let payload = grpc_web_core::serialize(message, format)?;

    if let Some(max) = write_max_bytes {
        if payload.len() > max {
            return Err(ClientError::resource_exhausted(format!(
                "message of {} bytes exceeds writeMaxBytes of {}",
                payload.len(),
                max
            )));
        }
    }

    let codec = if !send_encoding.is_identity()
        && !compression.is_disabled()
        && payload.len() >= compression.min_bytes
    {
        send_encoding.codec_with_level(compression.level)
    } else {
        None
    };

    #[cfg(feature = "tracing")]
    tracing::trace!(
        encoding = %send_encoding.as_str(),
        will_compress = codec.is_some(),
        payload_bytes = payload.len(),
        "compression negotiation for outbound message",
    );

    let (payload, compressed) = grpc_web_core::compress_payload(payload, codec.as_ref())?;
    Ok(Bytes::from(wrap_envelope(&payload, compressed)))
}

/// The unary and streaming call runner.
///
/// Holds everything that stays constant across calls: the transport, the
/// base URL, the wire format, the compression policy, size limits, the
/// default timeout, and the interceptor chain. Built by
/// [`ClientBuilder`](crate::ClientBuilder).
#[derive(Clone)]
pub struct GrpcWebClient<T> {
    transport: T,
    base_url: String,
    format: WireFormat,
    send_encoding: CompressionEncoding,
    accept_encoding: Vec<CompressionEncoding>,
    compression: CompressionConfig,
    read_max_bytes: Option<usize>,
    write_max_bytes: Option<usize>,
    default_timeout: Option<Duration>,
    interceptors: InterceptorChain,
}

impl<T> GrpcWebClient<T>
where
    T: tower_service::Service<
            http::Request<TransportBody>,
            Response = http::Response<Incoming>,
            Error = ClientError,
        > + Clone
        + Send
        + Sync
        + 'static,
    T::Future: Send,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: T,
        base_url: String,
        format: WireFormat,
        send_encoding: CompressionEncoding,
        accept_encoding: Vec<CompressionEncoding>,
        compression: CompressionConfig,
        read_max_bytes: Option<usize>,
        write_max_bytes: Option<usize>,
        default_timeout: Option<Duration>,
        interceptors: InterceptorChain,
    ) -> Self {
        Self {
            transport,
            base_url,
            format,
            send_encoding,
            accept_encoding,
            compression,
            read_max_bytes,
            write_max_bytes,
            default_timeout,
            interceptors,
        }
    }

    fn call_uri(&self, procedure: &str) -> Result<http::Uri, ClientError> {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            procedure.trim_start_matches('/')
        )
        .parse()
        .map_err(|e| ClientError::invalid_argument(format!("invalid procedure path: {e}")))
    }

    fn merged_timeout(&self, options: &CallOptions) -> Option<Duration> {
        options.get_timeout().or(self.default_timeout)
    }

    /// Issue a unary call: exactly one request message, exactly one response
    /// message, following the `Init → Sending → ReceivingHeaders →
    /// ReceivingBody → Done` state machine.
    pub async fn unary<I, O>(
        &self,
        procedure: &str,
        message: &I,
        options: CallOptions,
    ) -> Result<UnaryResponse<O>, ClientError>
    where
        I: Message + Serialize,
        O: Message + Default + DeserializeOwned,
    {
        #[cfg(feature = "tracing")]
        let _span = info_span!(
            "grpc_web.call",
            rpc.procedure = %procedure,
            rpc.type = "unary",
            rpc.format = ?self.format,
            otel.kind = "client",
        )
        .entered();

        let timeout = self.merged_timeout(&options);
        let headers = build_headers(
            self.format,
            timeout,
            self.send_encoding,
            &self.accept_encoding,
            options.get_headers(),
        );

        let envelope = encode_unary_envelope(
            message,
            self.format,
            self.send_encoding,
            &self.compression,
            self.write_max_bytes,
        )?;

        let uri = self.call_uri(procedure)?;
        let transport = self.transport.clone();

        // Interceptors see and can rewrite the raw request/response bytes,
        // not the typed messages — this is the boundary the chain is meant
        // to operate at (auth, logging), not message codec details.
        let next: UnaryFunc = std::sync::Arc::new(move |request: crate::interceptor::UnaryRequest| {
            let mut transport = transport.clone();
            let uri = uri.clone();
            Box::pin(async move {
                let http_request = http::Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .body(TransportBody::full(request.body))
                    .map_err(|e| ClientError::Protocol(format!("invalid request: {e}")))?;
                let (mut parts, body) = http_request.into_parts();
                parts.headers = request.headers;
                let http_request = http::Request::from_parts(parts, body);

                let response = transport.ready().await?.call(http_request).await?;
                let (resp_parts, incoming) = response.into_parts();

                if resp_parts.status != StatusCode::OK {
                    return Err(map_non_ok_status(resp_parts.status));
                }

                let collected = http_body_util::BodyExt::collect(incoming)
                    .await
                    .map_err(|e| ClientError::Transport(e.to_string()))?;

                Ok(crate::interceptor::UnaryResponse::new(
                    resp_parts.headers,
                    collected.to_bytes(),
                ))
            })
        });

        let call = self.interceptors.wrap_unary(next);
        let request = crate::interceptor::UnaryRequest::new(procedure, headers, envelope);
        let response = match with_deadline(timeout, call(request)).await {
            Ok(response) => response,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "unary call transport failed");
                return Err(e);
            }
        };

        let validated = validate_response(
            StatusCode::OK,
            &response.headers,
            self.format == WireFormat::Binary,
            &self.accept_encoding,
        )?;

        #[cfg(feature = "tracing")]
        tracing::trace!(
            encoding = %validated.encoding.as_str(),
            trailers_only = validated.trailers_only.is_some(),
            "unary response headers validated",
        );

        if let Some(outcome) = validated.trailers_only {
            outcome?;
            return Err(ClientError::invalid_argument(
                "missing output message for unary method",
            ));
        }

        let byte_stream: ResponseByteStream =
            Box::pin(futures::stream::once(async move { Ok(response.body) }));
        let mut decoder = FrameDecoder::<_, O>::new(
            byte_stream,
            validated.format,
            validated.encoding,
            self.read_max_bytes,
        );

        let message = match decoder.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return Err(e),
            None => {
                return Err(ClientError::invalid_argument(
                    "missing output message for unary method",
                ));
            }
        };

        match decoder.next().await {
            None => {}
            Some(Ok(_)) => {
                return Err(ClientError::invalid_argument(
                    "received extra output message for unary method",
                ));
            }
            Some(Err(e)) => return Err(e),
        }

        Ok(UnaryResponse {
            message,
            headers: response.headers,
            trailers: decoder.take_trailer().unwrap_or_else(TrailerMap::new),
        })
    }

    /// Issue a server-streaming call: one request message, a stream of
    /// response messages terminated by a trailer.
    pub async fn server_streaming<I, O>(
        &self,
        procedure: &str,
        message: &I,
        options: CallOptions,
    ) -> Result<Streaming<FrameDecoder<ResponseByteStream, O>>, ClientError>
    where
        I: Message + Serialize,
        O: Message + Default + DeserializeOwned,
    {
        #[cfg(feature = "tracing")]
        let _span = info_span!(
            "grpc_web.call",
            rpc.procedure = %procedure,
            rpc.type = "server_streaming",
            rpc.format = ?self.format,
            otel.kind = "client",
        )
        .entered();

        let envelope = encode_unary_envelope(
            message,
            self.format,
            self.send_encoding,
            &self.compression,
            self.write_max_bytes,
        )?;

        let (_headers, decoder) = self
            .open_response_stream::<O>(procedure, &options, TransportBody::full(envelope))
            .await?;

        Ok(Streaming::new(decoder))
    }

    /// Issue a client-streaming call: a stream of request messages, one
    /// response message delivered once the client half-closes.
    ///
    /// Returns a [`Connection`] so the caller can `send` messages, `close`
    /// the request stream, then `read` the single reply. Degenerates from
    /// [`bidi_streaming`](Self::bidi_streaming) only in how the caller is
    /// expected to use it (send, then close, then read once).
    pub async fn client_streaming<I, O>(
        &self,
        procedure: &str,
        options: CallOptions,
    ) -> Result<Connection<I, ResponseByteStream, O>, ClientError>
    where
        I: Message + Serialize + Send + 'static,
        O: Message + Default + DeserializeOwned,
    {
        self.bidi_streaming(procedure, options).await
    }

    /// Issue a bidirectional streaming call: independent request and
    /// response message streams over one HTTP/2 request.
    pub async fn bidi_streaming<I, O>(
        &self,
        procedure: &str,
        options: CallOptions,
    ) -> Result<Connection<I, ResponseByteStream, O>, ClientError>
    where
        I: Message + Serialize + Send + 'static,
        O: Message + Default + DeserializeOwned,
    {
        #[cfg(feature = "tracing")]
        let _span = info_span!(
            "grpc_web.call",
            rpc.procedure = %procedure,
            rpc.type = "bidi_streaming",
            rpc.format = ?self.format,
            otel.kind = "client",
        )
        .entered();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<I>();
        let outbound_stream = UnboundedReceiverStream::new(outbound_rx);
        let encoder = FrameEncoder::new(
            outbound_stream,
            self.format,
            self.send_encoding,
            self.compression.clone(),
            self.write_max_bytes,
        );
        let body = TransportBody::streaming(encoder);

        let (headers, decoder) = self.open_response_stream::<O>(procedure, &options, body).await?;

        let (header_tx, header_rx) = oneshot::channel();
        let _ = header_tx.send(Ok(headers));

        Ok(Connection::new(outbound_tx, decoder, header_rx))
    }

    /// Shared plumbing for every streaming call shape: build headers, send
    /// the request with `body`, validate the response, and hand back the
    /// response headers plus a decoder over the response body (or a
    /// synthesized one-envelope stream for a trailers-only response).
    async fn open_response_stream<O>(
        &self,
        procedure: &str,
        options: &CallOptions,
        body: TransportBody,
    ) -> Result<(HeaderMap, FrameDecoder<ResponseByteStream, O>), ClientError>
    where
        O: Message + Default + DeserializeOwned,
    {
        let timeout = self.merged_timeout(options);
        let mut headers = build_headers(
            self.format,
            timeout,
            self.send_encoding,
            &self.accept_encoding,
            options.get_headers(),
        );
        self.interceptors.apply_streaming_headers(&mut headers);

        let uri = self.call_uri(procedure)?;
        let http_request = http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(body)
            .map_err(|e| ClientError::Protocol(format!("invalid request: {e}")))?;
        let (mut parts, body) = http_request.into_parts();
        parts.headers = headers;
        let http_request = http::Request::from_parts(parts, body);

        let mut transport = self.transport.clone();
        let response = with_deadline(timeout, async {
            transport.ready().await?.call(http_request).await
        })
        .await?;
        let (resp_parts, incoming) = response.into_parts();

        if resp_parts.status != StatusCode::OK {
            return Err(map_non_ok_status(resp_parts.status));
        }

        let validated = validate_response(
            resp_parts.status,
            &resp_parts.headers,
            self.format == WireFormat::Binary,
            &self.accept_encoding,
        )?;

        let byte_stream: ResponseByteStream = if let Some(outcome) = validated.trailers_only {
            outcome?;
            let envelope = trailers_only_envelope(&resp_parts.headers);
            Box::pin(futures::stream::once(async move { Ok(envelope) }))
        } else {
            Box::pin(IncomingStream::new(incoming))
        };

        let decoder = FrameDecoder::new(
            byte_stream,
            validated.format,
            validated.encoding,
            self.read_max_bytes,
        );

        Ok((resp_parts.headers, decoder))
    }
}

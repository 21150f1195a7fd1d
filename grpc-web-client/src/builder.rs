//! Client builder for the gRPC-Web client.
//!
//! Provides a fluent API for configuring and validating the option set a
//! [`GrpcWebClient`](crate::GrpcWebClient) is built from, then constructing
//! either a default `hyper`-based client or wiring a caller-supplied
//! transport.

use std::sync::Arc;
use std::time::Duration;

use grpc_web_core::{CompressionConfig, CompressionEncoding, CompressionLevel, WireFormat};
use hyper::body::Incoming;

use crate::client::GrpcWebClient;
use crate::error::ClientError;
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::transport::{HyperTransport, HyperTransportBuilder, TlsClientConfig, TransportBody};

/// Builds a [`GrpcWebClient`].
///
/// Owns the option set a gRPC-Web transport is configured from once, at
/// construction time: the base URL, wire format, compression policy, size
/// limits, interceptor chain, default timeout, and the knobs of the
/// underlying `hyper` transport. `build()` validates all of it and returns
/// a client backed by [`HyperTransport`]; `build_with_transport` skips the
/// transport construction step for callers supplying their own.
pub struct ClientBuilder {
    base_url: String,
    use_binary_format: bool,
    interceptors: InterceptorChain,
    accept_compression: Vec<CompressionEncoding>,
    send_compression: Option<CompressionEncoding>,
    compress_min_bytes: usize,
    compress_level: CompressionLevel,
    read_max_bytes: Option<usize>,
    write_max_bytes: Option<usize>,
    default_timeout: Option<Duration>,
    transport: HyperTransportBuilder,
}

impl ClientBuilder {
    /// Start a builder for the given base URL.
    ///
    /// Defaults: binary (protobuf) wire format, identity compression on
    /// both send and accept sides, no size limits, no default timeout, no
    /// interceptors.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            use_binary_format: true,
            interceptors: InterceptorChain::default(),
            accept_compression: vec![CompressionEncoding::Identity],
            send_compression: None,
            compress_min_bytes: 0,
            compress_level: CompressionLevel::default(),
            read_max_bytes: None,
            write_max_bytes: None,
            default_timeout: None,
            transport: HyperTransportBuilder::new(),
        }
    }

    /// Use the binary protobuf wire format (`application/grpc-web+proto`).
    /// This is the default.
    pub fn use_proto(mut self) -> Self {
        self.use_binary_format = true;
        self
    }

    /// Use the textual JSON wire format (`application/grpc-web+json`).
    pub fn use_json(mut self) -> Self {
        self.use_binary_format = false;
        self
    }

    /// Set `useBinaryFormat` directly.
    pub fn use_binary_format(mut self, use_binary_format: bool) -> Self {
        self.use_binary_format = use_binary_format;
        self
    }

    /// Append an interceptor to the chain. The first interceptor pushed
    /// runs outermost.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Set the encodings this client is willing to receive, in the order
    /// sent in `Grpc-Accept-Encoding`. Defaults to `[Identity]`.
    pub fn accept_compression(mut self, encodings: Vec<CompressionEncoding>) -> Self {
        self.accept_compression = encodings;
        self
    }

    /// Compress outgoing request envelopes with the given encoding. Must be
    /// a member of [`accept_compression`](Self::accept_compression) by the
    /// time [`build`](Self::build) is called, since a client that cannot
    /// decode its own send encoding could never decode an echoed response.
    pub fn send_compression(mut self, encoding: CompressionEncoding) -> Self {
        self.send_compression = Some(encoding);
        self
    }

    /// Minimum payload size, in bytes, before an outgoing envelope is
    /// compressed (`compressMinBytes`). Smaller payloads are sent
    /// uncompressed regardless of `send_compression`.
    pub fn compress_min_bytes(mut self, min_bytes: usize) -> Self {
        self.compress_min_bytes = min_bytes;
        self
    }

    /// Compression level/quality used when compressing outgoing envelopes.
    pub fn compress_level(mut self, level: CompressionLevel) -> Self {
        self.compress_level = level;
        self
    }

    /// Reject any decompressed response message larger than this many
    /// bytes with `ResourceExhausted`. Must be greater than zero.
    pub fn read_max_bytes(mut self, max_bytes: usize) -> Self {
        self.read_max_bytes = Some(max_bytes);
        self
    }

    /// Reject any outgoing message larger than this many bytes. Must be
    /// greater than zero.
    pub fn write_max_bytes(mut self, max_bytes: usize) -> Self {
        self.write_max_bytes = Some(max_bytes);
        self
    }

    /// Default per-call timeout, used when a call's [`CallOptions`](crate::CallOptions)
    /// doesn't set its own.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Use HTTP/2 prior knowledge (h2c) instead of negotiating via ALPN.
    /// Forwarded to [`HyperTransportBuilder::http2_only`].
    pub fn http2_prior_knowledge(mut self, enabled: bool) -> Self {
        self.transport = self.transport.http2_only(enabled);
        self
    }

    /// TCP-level keep-alive, expressed here as the HTTP/2 keep-alive ping
    /// interval and timeout. Forwarded to
    /// [`HyperTransportBuilder::h2_keep_alive_interval`] /
    /// [`HyperTransportBuilder::h2_keep_alive_timeout`].
    pub fn tcp_keepalive(mut self, interval: Duration) -> Self {
        self.transport = self
            .transport
            .h2_keep_alive_interval(interval)
            .h2_keep_alive_timeout(interval);
        self
    }

    /// Use a custom TLS client configuration instead of the default
    /// root certificate source (native OS roots, or the bundled Mozilla
    /// set, depending on which `tls-*-roots` feature is enabled).
    pub fn tls_config(mut self, config: TlsClientConfig) -> Self {
        self.transport = self.transport.tls_config(config);
        self
    }

    /// Accept any server certificate, including invalid or self-signed
    /// ones. Development and testing only.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.transport = self.transport.danger_accept_invalid_certs();
        self
    }

    fn compression_config(&self) -> CompressionConfig {
        CompressionConfig::new(self.compress_min_bytes).level(self.compress_level)
    }

    fn validate(&self) -> Result<(), ClientBuildError> {
        let uri: http::Uri = self
            .base_url
            .parse()
            .map_err(|e| ClientBuildError::InvalidBaseUrl(format!("{e}")))?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(ClientBuildError::InvalidBaseUrl(format!(
                "base URL must be absolute (scheme and host required): {}",
                self.base_url
            )));
        }

        if let Some(send) = self.send_compression {
            if !self.accept_compression.contains(&send) {
                return Err(ClientBuildError::SendCompressionNotAccepted {
                    send,
                    accepted: self.accept_compression.clone(),
                });
            }
        }

        if self.read_max_bytes == Some(0) {
            return Err(ClientBuildError::InvalidMaxBytes(
                "read_max_bytes must be greater than zero",
            ));
        }
        if self.write_max_bytes == Some(0) {
            return Err(ClientBuildError::InvalidMaxBytes(
                "write_max_bytes must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Validate the option set and build a client backed by the default
    /// `hyper` transport.
    pub fn build(self) -> Result<GrpcWebClient<HyperTransport>, ClientBuildError> {
        self.validate()?;
        let transport = self.transport.build().map_err(ClientBuildError::Transport)?;
        Ok(self.finish(transport))
    }

    /// Validate the option set and build a client over a caller-supplied
    /// transport, instead of the default `hyper` one. Transport-level knobs
    /// set on this builder (`http2_prior_knowledge`, `tcp_keepalive`,
    /// `tls_config`, `danger_accept_invalid_certs`) are ignored, since they
    /// only apply to [`HyperTransport`].
    pub fn build_with_transport<T>(
        self,
        transport: T,
    ) -> Result<GrpcWebClient<T>, ClientBuildError>
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
        self.validate()?;
        Ok(self.finish(transport))
    }

    fn finish<T>(self, transport: T) -> GrpcWebClient<T>
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
        let format = WireFormat::from_use_binary(self.use_binary_format);
        let send_encoding = self.send_compression.unwrap_or(CompressionEncoding::Identity);
        GrpcWebClient::new(
            transport,
            self.base_url,
            format,
            send_encoding,
            self.accept_compression,
            self.compression_config(),
            self.read_max_bytes,
            self.write_max_bytes,
            self.default_timeout,
            self.interceptors,
        )
    }
}

/// Errors that can occur while validating or building a [`ClientBuilder`].
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    /// `baseUrl` did not parse as an absolute URL (scheme and host required).
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    /// `sendCompression` was set to an encoding absent from
    /// `acceptCompression`.
    #[error("send compression {send:?} is not in the accepted encoding list {accepted:?}")]
    SendCompressionNotAccepted {
        send: CompressionEncoding,
        accepted: Vec<CompressionEncoding>,
    },
    /// `readMaxBytes` or `writeMaxBytes` was set to zero.
    #[error("{0}")]
    InvalidMaxBytes(&'static str),
    /// The underlying `hyper` transport failed to construct (e.g. no TLS
    /// crypto provider installed).
    #[error("failed to build HTTP transport: {0}")]
    Transport(#[source] ClientError),
}

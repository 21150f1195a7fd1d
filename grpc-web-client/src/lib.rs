//! gRPC-Web client transport.
//!
//! This crate turns a typed unary or streaming remote procedure call into
//! gRPC-Web wire-format HTTP request/response exchanges and turns the
//! response stream back into typed messages plus a validated trailer
//! block, over a [`hyper`]-based HTTP/1.1 and HTTP/2 transport.
//!
//! ## Modules
//!
//! - [`builder`]: [`ClientBuilder`] — validated client construction
//! - [`client`]: [`GrpcWebClient`] — the unary and streaming call runner
//! - [`error`]: [`ClientError`]
//! - [`frame`]: envelope stream adapters ([`FrameDecoder`], [`FrameEncoder`])
//! - [`header`]: request header construction and response validation
//! - [`interceptor`]: the interceptor chain
//! - [`options`]: [`CallOptions`]
//! - [`streaming`]: [`Streaming`] and [`Connection`]
//! - [`transport`]: the hyper-based HTTP transport

mod builder;
mod client;
mod error;
mod frame;
mod header;
mod interceptor;
mod options;
mod streaming;
pub mod transport;

pub use builder::{ClientBuildError, ClientBuilder};
pub use client::{GrpcWebClient, UnaryResponse};
pub use error::ClientError;
pub use frame::{FrameDecoder, FrameEncoder};
pub use header::ValidatedResponse;
pub use interceptor::{
    FnInterceptor, HeaderInterceptor, Interceptor, InterceptorChain, UnaryFunc, UnaryNext,
    UnaryRequest,
};
pub use options::CallOptions;
pub use streaming::{Connection, Streaming};
pub use transport::{HyperTransport, HyperTransportBuilder, TlsClientConfig, TransportBody};

pub use grpc_web_core::{
    Code, CompressionConfig, CompressionEncoding, CompressionLevel, ErrorDetail, Status,
    TrailerMap, WireFormat,
};

pub use bytes::Bytes;

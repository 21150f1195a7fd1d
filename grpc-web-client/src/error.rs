//! Client-side gRPC-Web error types.
//!
//! This module provides [`ClientError`], the error type for gRPC-Web client operations.

use grpc_web_core::{Code, EnvelopeError, ErrorDetail, Status};

/// Client-side gRPC-Web error variants.
///
/// This enum represents the different types of errors that can occur
/// during client-side RPC communication.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// RPC status error from the server.
    ///
    /// This variant wraps the core [`Status`] type which contains
    /// the error code, message, and optional details.
    #[error("{0}")]
    Rpc(Status),

    /// Transport-level error (connection failed, timeout, etc.).
    #[error("transport error: {0}")]
    Transport(String),

    /// Message encoding error.
    #[error("encode error: {0}")]
    Encode(String),

    /// Message decoding error.
    #[error("decode error: {0}")]
    Decode(String),

    /// Protocol error (malformed frames, unexpected data, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Create a new status error with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        ClientError::Rpc(Status::new(code, message))
    }

    /// Create a new status error with just a code.
    pub fn from_code(code: Code) -> Self {
        ClientError::Rpc(Status::from_code(code))
    }

    /// Get the error code.
    ///
    /// For non-Rpc variants, returns an appropriate code:
    /// - Transport: `Unavailable`
    /// - Encode/Decode: `Internal`
    /// - Protocol: `InvalidArgument`
    pub fn code(&self) -> Code {
        match self {
            ClientError::Rpc(status) => status.code(),
            ClientError::Transport(_) => Code::Unavailable,
            ClientError::Encode(_) | ClientError::Decode(_) => Code::Internal,
            ClientError::Protocol(_) => Code::InvalidArgument,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> Option<&str> {
        match self {
            ClientError::Rpc(status) => status.message(),
            ClientError::Transport(msg)
            | ClientError::Encode(msg)
            | ClientError::Decode(msg)
            | ClientError::Protocol(msg) => Some(msg),
        }
    }

    /// Get the error details (only for Rpc variant).
    pub fn details(&self) -> &[ErrorDetail] {
        match self {
            ClientError::Rpc(status) => status.details(),
            _ => &[],
        }
    }

    /// Add an error detail with type URL and protobuf-encoded bytes.
    pub fn add_detail<S: Into<String>>(self, type_url: S, value: Vec<u8>) -> Self {
        match self {
            ClientError::Rpc(status) => ClientError::Rpc(status.add_detail(type_url, value)),
            other => other,
        }
    }

    /// Add a pre-constructed ErrorDetail.
    pub fn add_error_detail(self, detail: ErrorDetail) -> Self {
        match self {
            ClientError::Rpc(status) => ClientError::Rpc(status.add_error_detail(detail)),
            other => other,
        }
    }

    /// Get the inner Status if this is an Rpc error.
    pub fn status(&self) -> Option<&Status> {
        match self {
            ClientError::Rpc(status) => Some(status),
            _ => None,
        }
    }

    /// Convert into the inner Status if this is an Rpc error.
    pub fn into_status(self) -> Option<Status> {
        match self {
            ClientError::Rpc(status) => Some(status),
            _ => None,
        }
    }

    // Convenience constructors

    /// Create a canceled error.
    pub fn canceled<S: Into<String>>(message: S) -> Self {
        ClientError::Rpc(Status::canceled(message))
    }

    /// Create a deadline-exceeded error.
    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        ClientError::Rpc(Status::deadline_exceeded(message))
    }

    /// Create an unknown error.
    pub fn unknown<S: Into<String>>(message: S) -> Self {
        ClientError::Rpc(Status::unknown(message))
    }

    /// Create an unimplemented error.
    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        ClientError::Rpc(Status::unimplemented(message))
    }

    /// Create an invalid argument error.
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        ClientError::Rpc(Status::invalid_argument(message))
    }

    /// Create a not found error.
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        ClientError::Rpc(Status::not_found(message))
    }

    /// Create a permission denied error.
    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        ClientError::Rpc(Status::permission_denied(message))
    }

    /// Create an unauthenticated error.
    pub fn unauthenticated<S: Into<String>>(message: S) -> Self {
        ClientError::Rpc(Status::unauthenticated(message))
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        ClientError::Rpc(Status::internal(message))
    }

    /// Create an unavailable error.
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        ClientError::Rpc(Status::unavailable(message))
    }

    /// Create a resource exhausted error.
    pub fn resource_exhausted<S: Into<String>>(message: S) -> Self {
        ClientError::Rpc(Status::resource_exhausted(message))
    }

    /// Create a data loss error.
    pub fn data_loss<S: Into<String>>(message: S) -> Self {
        ClientError::Rpc(Status::data_loss(message))
    }

    /// Returns whether this error indicates a transient condition that may
    /// be resolved by retrying.
    ///
    /// This is a convenience wrapper for [`Code::is_retryable()`].
    ///
    /// # Example
    ///
    /// ```
    /// use grpc_web_client::ClientError;
    ///
    /// let err = ClientError::unavailable("service overloaded");
    /// assert!(err.is_retryable());
    ///
    /// let err = ClientError::not_found("resource missing");
    /// assert!(!err.is_retryable());
    ///
    /// // Transport errors are also retryable (they map to Unavailable)
    /// let err = ClientError::Transport("connection reset".into());
    /// assert!(err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        ClientError::Rpc(status)
    }
}

impl From<EnvelopeError> for ClientError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::IncompleteHeader { expected, actual } => {
                ClientError::Protocol(format!(
                    "incomplete envelope header: expected {} bytes, got {}",
                    expected, actual
                ))
            }
            EnvelopeError::InvalidFlags(flags) => {
                ClientError::Protocol(format!("invalid frame flags: 0x{:02x}", flags))
            }
            EnvelopeError::Decompression(msg) => {
                ClientError::Decode(format!("decompression failed: {}", msg))
            }
            EnvelopeError::Compression(msg) => {
                ClientError::Encode(format!("compression failed: {}", msg))
            }
        }
    }
}

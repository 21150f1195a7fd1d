//! gRPC status codes and the call-level error type.
//!
//! This module provides the core error types shared by every layer of the
//! client:
//! - [`Code`]: the 17 standard gRPC status codes
//! - [`ErrorDetail`]: a structured detail payload attached to a non-OK status
//! - [`Status`]: the call-level error, carrying a code, message and details
//! - [`EnvelopeError`]: low-level framing errors raised by the envelope codec

use serde::{Serialize, Serializer};

/// gRPC status codes, matching the standard gRPC status code table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Get the string representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }

    /// Returns whether this status code indicates a transient condition that
    /// may be resolved by retrying.
    ///
    /// The following codes are considered retryable:
    /// - [`Unavailable`](Code::Unavailable): service is temporarily unavailable
    /// - [`ResourceExhausted`](Code::ResourceExhausted): rate limited or quota exceeded
    /// - [`Aborted`](Code::Aborted): transaction aborted, can be retried
    ///
    /// This core never retries on its own (retry policy is the caller's
    /// concern); the flag exists so callers can build their own policy on it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Code::Unavailable | Code::ResourceExhausted | Code::Aborted
        )
    }

    /// Parse a code from its string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Code::Ok),
            "canceled" | "cancelled" => Some(Code::Canceled),
            "unknown" => Some(Code::Unknown),
            "invalid_argument" => Some(Code::InvalidArgument),
            "deadline_exceeded" => Some(Code::DeadlineExceeded),
            "not_found" => Some(Code::NotFound),
            "already_exists" => Some(Code::AlreadyExists),
            "permission_denied" => Some(Code::PermissionDenied),
            "resource_exhausted" => Some(Code::ResourceExhausted),
            "failed_precondition" => Some(Code::FailedPrecondition),
            "aborted" => Some(Code::Aborted),
            "out_of_range" => Some(Code::OutOfRange),
            "unimplemented" => Some(Code::Unimplemented),
            "internal" => Some(Code::Internal),
            "unavailable" => Some(Code::Unavailable),
            "data_loss" => Some(Code::DataLoss),
            "unauthenticated" => Some(Code::Unauthenticated),
            _ => None,
        }
    }

    /// Parse a gRPC status code from its decimal wire representation
    /// (the value of a `grpc-status` trailer entry).
    ///
    /// Values outside the known range of 0-16 map to [`Code::Unknown`],
    /// per the "Unknown escape" required for forward compatibility.
    pub fn from_grpc_status(value: u32) -> Self {
        match value {
            0 => Code::Ok,
            1 => Code::Canceled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }

    /// Map an HTTP status code onto a gRPC status code, per the gRPC-Web
    /// HTTP-status-to-gRPC-status table used when the server fails before
    /// ever producing a `grpc-status` trailer.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::Unimplemented,
            429 | 502 | 503 | 504 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }
}

/// A self-describing error detail attached to a non-OK [`Status`].
///
/// Details are structured messages conveyed out-of-band from the primary
/// error message, identified by a type URL (mirroring `google.protobuf.Any`
/// as carried inside `grpc-status-details-bin`).
#[derive(Clone, Debug)]
pub struct ErrorDetail {
    /// Fully-qualified type name (e.g., "google.rpc.RetryInfo").
    type_url: String,
    /// Encoded message bytes.
    value: Vec<u8>,
}

impl ErrorDetail {
    /// Create a new error detail with a type URL and encoded bytes.
    pub fn new<S: Into<String>>(type_url: S, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }

    /// Get the fully-qualified type name.
    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    /// Get the encoded value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl Serialize for ErrorDetail {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use base64::Engine;
        use serde::ser::SerializeStruct;

        let mut s = serializer.serialize_struct("ErrorDetail", 2)?;

        let type_name = self
            .type_url
            .strip_prefix("type.googleapis.com/")
            .unwrap_or(&self.type_url);
        s.serialize_field("type", type_name)?;

        let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(&self.value);
        s.serialize_field("value", &encoded)?;

        s.end()
    }
}

/// The call-level error type.
///
/// Every failure a call can surface — protocol violation, transport failure,
/// or a non-zero `grpc-status` from the server — is represented as a
/// `Status` carrying a [`Code`] (never `Ok`), a human-readable message, and
/// an ordered list of structured details.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{}", self.display_message())]
pub struct Status {
    code: Code,
    message: Option<String>,
    details: Vec<ErrorDetail>,
}

impl Status {
    /// Create a new status with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Status {
            code,
            message: Some(message.into()),
            details: vec![],
        }
    }

    /// Create a new status with just a code.
    pub fn from_code(code: Code) -> Self {
        Status {
            code,
            message: None,
            details: vec![],
        }
    }

    /// Get the status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the status message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Get the structured error details.
    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    /// Add an error detail with type URL and encoded bytes.
    pub fn add_detail<S: Into<String>>(mut self, type_url: S, value: Vec<u8>) -> Self {
        self.details.push(ErrorDetail::new(type_url, value));
        self
    }

    /// Add a pre-constructed [`ErrorDetail`].
    pub fn add_error_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    fn display_message(&self) -> String {
        match &self.message {
            Some(msg) => format!("{}: {}", self.code.as_str(), msg),
            None => self.code.as_str().to_string(),
        }
    }

    // Convenience constructors, one per status code used by the call runner
    // and response validator.

    /// Create a canceled error.
    pub fn canceled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Canceled, message)
    }

    /// Create a deadline-exceeded error.
    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// Create an unimplemented error.
    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// Create an invalid argument error.
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Create a not found error.
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// Create a permission denied error.
    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    /// Create an unauthenticated error.
    pub fn unauthenticated<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Create an unavailable error.
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// Create a resource exhausted error.
    pub fn resource_exhausted<S: Into<String>>(message: S) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    /// Create a data loss error.
    pub fn data_loss<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DataLoss, message)
    }

    /// Create an unknown error.
    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unknown, message)
    }

    /// Returns whether this status indicates a transient condition that may
    /// be resolved by retrying.
    ///
    /// This is a convenience wrapper for [`Code::is_retryable()`].
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// Errors raised by the envelope codec while framing or parsing the wire
/// format, before a call-level [`Status`] has been determined.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Fewer than 5 bytes were available to parse an envelope header.
    #[error("incomplete envelope header: expected {expected} bytes, got {actual}")]
    IncompleteHeader { expected: usize, actual: usize },

    /// An envelope carried a flag bit this implementation does not
    /// understand.
    #[error("invalid envelope flags: 0x{0:02x}")]
    InvalidFlags(u8),

    /// Decompressing an envelope payload failed.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Compressing an envelope payload failed.
    #[error("compression failed: {0}")]
    Compression(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_as_str() {
        assert_eq!(Code::Ok.as_str(), "ok");
        assert_eq!(Code::InvalidArgument.as_str(), "invalid_argument");
        assert_eq!(Code::Unauthenticated.as_str(), "unauthenticated");
    }

    #[test]
    fn test_code_from_str() {
        assert_eq!(Code::from_str("ok"), Some(Code::Ok));
        assert_eq!(Code::from_str("invalid_argument"), Some(Code::InvalidArgument));
        assert_eq!(Code::from_str("canceled"), Some(Code::Canceled));
        assert_eq!(Code::from_str("cancelled"), Some(Code::Canceled));
        assert_eq!(Code::from_str("unknown_code"), None);
    }

    #[test]
    fn test_code_from_grpc_status() {
        assert_eq!(Code::from_grpc_status(0), Code::Ok);
        assert_eq!(Code::from_grpc_status(5), Code::NotFound);
        assert_eq!(Code::from_grpc_status(16), Code::Unauthenticated);
        assert_eq!(Code::from_grpc_status(999), Code::Unknown);
    }

    #[test]
    fn test_code_from_http_status() {
        assert_eq!(Code::from_http_status(401), Code::Unauthenticated);
        assert_eq!(Code::from_http_status(403), Code::PermissionDenied);
        assert_eq!(Code::from_http_status(404), Code::Unimplemented);
        assert_eq!(Code::from_http_status(429), Code::Unavailable);
        assert_eq!(Code::from_http_status(502), Code::Unavailable);
        assert_eq!(Code::from_http_status(503), Code::Unavailable);
        assert_eq!(Code::from_http_status(504), Code::Unavailable);
        assert_eq!(Code::from_http_status(418), Code::Unknown);
    }

    #[test]
    fn test_status_new() {
        let status = Status::new(Code::NotFound, "resource not found");
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), Some("resource not found"));
        assert!(status.details().is_empty());
    }

    #[test]
    fn test_status_from_code() {
        let status = Status::from_code(Code::Internal);
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().is_none());
    }

    #[test]
    fn test_status_add_detail() {
        let status = Status::new(Code::Internal, "error").add_detail("test.Type", vec![1, 2, 3]);

        assert_eq!(status.details().len(), 1);
        assert_eq!(status.details()[0].type_url(), "test.Type");
        assert_eq!(status.details()[0].value(), &[1, 2, 3]);
    }

    #[test]
    fn test_error_detail_serialize() {
        let detail = ErrorDetail::new("google.rpc.RetryInfo", vec![1, 2, 3]);
        let json = serde_json::to_string(&detail).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["type"], "google.rpc.RetryInfo");
        assert_eq!(parsed["value"], "AQID");
    }

    #[test]
    fn test_error_detail_serialize_strips_prefix() {
        let detail = ErrorDetail::new("type.googleapis.com/google.rpc.ErrorInfo", vec![1, 2]);
        let json = serde_json::to_string(&detail).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["type"], "google.rpc.ErrorInfo");
    }

    #[test]
    fn test_code_is_retryable() {
        assert!(Code::Unavailable.is_retryable());
        assert!(Code::ResourceExhausted.is_retryable());
        assert!(Code::Aborted.is_retryable());

        assert!(!Code::Ok.is_retryable());
        assert!(!Code::Canceled.is_retryable());
        assert!(!Code::Unknown.is_retryable());
        assert!(!Code::InvalidArgument.is_retryable());
        assert!(!Code::DeadlineExceeded.is_retryable());
        assert!(!Code::NotFound.is_retryable());
        assert!(!Code::AlreadyExists.is_retryable());
        assert!(!Code::PermissionDenied.is_retryable());
        assert!(!Code::FailedPrecondition.is_retryable());
        assert!(!Code::OutOfRange.is_retryable());
        assert!(!Code::Unimplemented.is_retryable());
        assert!(!Code::Internal.is_retryable());
        assert!(!Code::DataLoss.is_retryable());
        assert!(!Code::Unauthenticated.is_retryable());
    }

    #[test]
    fn test_status_is_retryable() {
        assert!(Status::unavailable("service down").is_retryable());
        assert!(Status::resource_exhausted("rate limited").is_retryable());
        assert!(Status::new(Code::Aborted, "retry please").is_retryable());

        assert!(!Status::not_found("missing").is_retryable());
        assert!(!Status::invalid_argument("bad input").is_retryable());
        assert!(!Status::internal("server error").is_retryable());
    }

    #[test]
    fn test_status_display() {
        let status = Status::new(Code::NotFound, "user missing");
        assert_eq!(status.to_string(), "not_found: user missing");

        let status = Status::from_code(Code::Internal);
        assert_eq!(status.to_string(), "internal");
    }
}

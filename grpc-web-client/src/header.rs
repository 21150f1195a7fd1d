//! Request header construction and response validation.
//!
//! This module builds the fixed gRPC-Web request header set and classifies
//! an HTTP response into a wire format, compression encoding, and (for
//! trailers-only responses) a call outcome, per the gRPC-Web header
//! contract.

use http::{HeaderMap, HeaderValue, StatusCode};

use grpc_web_core::{
    negotiate_response_encoding, validate_trailer, Code, CompressionEncoding, TrailerMap,
    WireFormat, GRPC_ACCEPT_ENCODING, GRPC_ENCODING, GRPC_MESSAGE, GRPC_STATUS,
    GRPC_STATUS_DETAILS_BIN,
};

use crate::ClientError;
use crate::options::duration_to_timeout_header;

/// Build the fixed gRPC-Web request headers for a call, merging in `extra`
/// (caller-supplied headers win on conflict).
///
/// `send_encoding` is omitted (and `Grpc-Encoding` left unset) when it is
/// [`CompressionEncoding::Identity`]. `accept_encodings`, when non-empty,
/// becomes a comma-joined `Grpc-Accept-Encoding` list.
pub fn build_headers(
    format: WireFormat,
    timeout: Option<std::time::Duration>,
    send_encoding: CompressionEncoding,
    accept_encodings: &[CompressionEncoding],
    extra: &HeaderMap,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let content_type = format!("application/grpc-web+{}", format.content_type_suffix());
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type).expect("content-type is ASCII"),
    );
    headers.insert("x-grpc-web", HeaderValue::from_static("1"));
    headers.insert(http::header::TE, HeaderValue::from_static("trailers"));

    if let Some(timeout) = timeout {
        if let Some(value) = duration_to_timeout_header(timeout) {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert("grpc-timeout", value);
            }
        }
    }

    if !send_encoding.is_identity() {
        headers.insert(
            GRPC_ENCODING,
            HeaderValue::from_static(send_encoding.as_str()),
        );
    }

    if !accept_encodings.is_empty() {
        let joined = accept_encodings
            .iter()
            .map(CompressionEncoding::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if let Ok(value) = HeaderValue::from_str(&joined) {
            headers.insert(GRPC_ACCEPT_ENCODING, value);
        }
    }

    for (name, value) in extra {
        headers.insert(name.clone(), value.clone());
    }

    headers
}

/// Outcome of validating an HTTP response against the gRPC-Web header
/// contract, before any body bytes are read.
pub struct ValidatedResponse {
    /// Wire format the body is encoded in.
    pub format: WireFormat,
    /// Compression encoding applied to body envelopes.
    pub encoding: CompressionEncoding,
    /// Set when the response is trailers-only: the call's outcome is
    /// already fully known from headers and the body must be empty.
    pub trailers_only: Option<Result<(), ClientError>>,
}

/// Validate an HTTP status + header block against the gRPC-Web contract.
///
/// Returns the classified [`ValidatedResponse`] on success, or a
/// [`ClientError`] if the status, content-type, or encoding is invalid.
pub fn validate_response(
    status: StatusCode,
    headers: &HeaderMap,
    use_binary_format: bool,
    accept_compression: &[CompressionEncoding],
) -> Result<ValidatedResponse, ClientError> {
    if status != StatusCode::OK {
        let code = Code::from_http_status(status.as_u16());
        let message = status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string());
        return Err(ClientError::new(code, message));
    }

    let format = content_type_format(headers)?;
    if WireFormat::from_use_binary(use_binary_format) != format {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            expected = %WireFormat::from_use_binary(use_binary_format).content_type_suffix(),
            got = %format.content_type_suffix(),
            "response content-type format mismatch",
        );
        return Err(ClientError::invalid_argument(format!(
            "response content-type format mismatch: expected {}, got {}",
            WireFormat::from_use_binary(use_binary_format).content_type_suffix(),
            format.content_type_suffix()
        )));
    }

    let encoding = match headers.get(GRPC_ENCODING).and_then(|v| v.to_str().ok()) {
        None => CompressionEncoding::Identity,
        Some(value) => {
            let encoding = CompressionEncoding::from_header(Some(value)).ok_or_else(|| {
                ClientError::unimplemented(format!("unsupported grpc-encoding: {value}"))
            })?;
            if !encoding.is_identity() && !accept_compression.contains(&encoding) {
                #[cfg(feature = "tracing")]
                tracing::warn!(encoding = %value, "server used grpc-encoding outside of acceptCompression");
                return Err(ClientError::invalid_argument(format!(
                    "server used grpc-encoding {value} outside of acceptCompression"
                )));
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(encoding = %encoding.as_str(), "negotiated response compression");
            encoding
        }
    };

    let trailers_only = if headers.get(GRPC_STATUS).is_some() {
        Some(trailers_only_outcome(headers))
    } else {
        None
    };

    Ok(ValidatedResponse {
        format,
        encoding,
        trailers_only,
    })
}

fn content_type_format(headers: &HeaderMap) -> Result<WireFormat, ClientError> {
    let content_type = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ClientError::unimplemented("missing response content-type"))?;

    let mime = content_type.split(';').next().unwrap_or(content_type).trim();

    if mime == "application/grpc-web" {
        return Ok(WireFormat::Binary);
    }

    mime.strip_prefix("application/grpc-web+")
        .and_then(WireFormat::from_content_type_suffix)
        .ok_or_else(|| {
            ClientError::unimplemented(format!("unsupported response content-type: {content_type}"))
        })
}

/// Build the trailers-only call outcome directly from response headers.
fn trailers_only_outcome(headers: &HeaderMap) -> Result<(), ClientError> {
    let mut map = TrailerMap::new();
    if let Some(status) = headers.get(GRPC_STATUS).and_then(|v| v.to_str().ok()) {
        map.insert(GRPC_STATUS, status);
    }
    if let Some(message) = headers.get(GRPC_MESSAGE).and_then(|v| v.to_str().ok()) {
        map.insert(GRPC_MESSAGE, message);
    }
    if let Some(details) = headers
        .get(GRPC_STATUS_DETAILS_BIN)
        .and_then(|v| v.to_str().ok())
    {
        map.insert(GRPC_STATUS_DETAILS_BIN, details);
    }

    validate_trailer(&map).map_err(ClientError::from)
}

/// Negotiate the server's response compression preference from
/// `Grpc-Accept-Encoding`, as used on the server side of a transport that
/// also terminates calls; kept here for symmetry with [`build_headers`].
pub fn negotiate_encoding(accept: Option<&str>) -> CompressionEncoding {
    negotiate_response_encoding(accept)
}

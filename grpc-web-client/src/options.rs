//! Call options for per-request configuration.
//!
//! This module provides [`CallOptions`] for configuring individual RPC calls
//! with timeouts, custom headers, and other per-call settings.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// Options for configuring individual RPC calls.
///
/// Use this to set per-call timeouts, custom headers, or other request-specific
/// configuration that differs from the client defaults.
///
/// # Example
///
/// ```ignore
/// use grpc_web_client::CallOptions;
/// use std::time::Duration;
///
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .header("authorization", "Bearer token123")
///     .header("x-request-id", "abc-123");
///
/// let response = client.unary_with_options::<Req, Res>(
///     "my.service/Method",
///     &request,
///     options,
/// ).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Timeout for this specific call.
    /// If set, overrides the client's default timeout.
    pub(crate) timeout: Option<Duration>,
    /// Custom headers for this specific call.
    pub(crate) headers: HeaderMap,
}

impl CallOptions {
    /// Create new default call options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout for this call.
    ///
    /// This timeout is propagated to the server via the `Grpc-Timeout` header,
    /// allowing the server to cancel processing if the deadline will be exceeded.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use grpc_web_client::CallOptions;
    /// use std::time::Duration;
    ///
    /// let options = CallOptions::new()
    ///     .timeout(Duration::from_secs(30));
    /// ```
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the configured timeout, if any.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Add a custom header for this call.
    ///
    /// Headers beginning with "Grpc-" are reserved for use by the gRPC-Web
    /// protocol. Applications may read them but should not write them.
    ///
    /// # Panics
    ///
    /// Panics if the header name or value is invalid.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use grpc_web_client::CallOptions;
    ///
    /// let options = CallOptions::new()
    ///     .header("authorization", "Bearer token123")
    ///     .header("x-request-id", "abc-123");
    /// ```
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: std::fmt::Debug,
        V: TryInto<HeaderValue>,
        V::Error: std::fmt::Debug,
    {
        let name = name.try_into().expect("invalid header name");
        let value = value.try_into().expect("invalid header value");
        self.headers.insert(name, value);
        self
    }

    /// Try to add a custom header for this call.
    ///
    /// Returns `None` if the header name or value is invalid.
    ///
    /// Headers beginning with "Grpc-" are reserved for use by the gRPC-Web
    /// protocol. Applications may read them but should not write them.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use grpc_web_client::CallOptions;
    ///
    /// let options = CallOptions::new()
    ///     .try_header("authorization", "Bearer token123")?
    ///     .try_header("x-request-id", "abc-123")?;
    /// ```
    pub fn try_header<K, V>(mut self, name: K, value: V) -> Option<Self>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        let name = name.try_into().ok()?;
        let value = value.try_into().ok()?;
        self.headers.insert(name, value);
        Some(self)
    }

    /// Set all custom headers for this call, replacing any existing headers.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use grpc_web_client::CallOptions;
    /// use http::HeaderMap;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("authorization", "Bearer token123".parse().unwrap());
    ///
    /// let options = CallOptions::new().headers(headers);
    /// ```
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Get a reference to the custom headers.
    pub fn get_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a mutable reference to the custom headers.
    ///
    /// This allows direct manipulation of the header map.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use grpc_web_client::CallOptions;
    ///
    /// let mut options = CallOptions::new();
    /// options.headers_mut().insert("x-custom", "value".parse().unwrap());
    /// ```
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}

/// Largest numeric value the `Grpc-Timeout` header may carry in any unit,
/// per the gRPC-Web wire format (the digit count must stay under 8).
const MAX_TIMEOUT_DIGITS: u64 = 99_999_999;

/// Convert a [`Duration`] to a `Grpc-Timeout` header value.
///
/// The header is `<n><unit>`, where `unit` is one of `m` (milliseconds),
/// `S` (seconds), `M` (minutes), or `H` (hours), chosen as the coarsest
/// unit that still keeps `n` under 8 digits. Each coarser conversion
/// rounds up, so the encoded deadline never expires before `duration`
/// does. Returns `None` for a zero duration, or one so large it would
/// overflow even the hours encoding.
pub(crate) fn duration_to_timeout_header(duration: Duration) -> Option<String> {
    if duration.is_zero() {
        return None;
    }

    let millis = duration.as_millis();
    if millis <= MAX_TIMEOUT_DIGITS as u128 {
        return Some(format!("{millis}m"));
    }

    let seconds = div_ceil_u128(millis, 1000);
    if seconds <= MAX_TIMEOUT_DIGITS as u128 {
        return Some(format!("{seconds}S"));
    }

    let minutes = div_ceil_u128(seconds, 60);
    if minutes <= MAX_TIMEOUT_DIGITS as u128 {
        return Some(format!("{minutes}M"));
    }

    let hours = div_ceil_u128(minutes, 60);
    if hours <= MAX_TIMEOUT_DIGITS as u128 {
        return Some(format!("{hours}H"));
    }

    None
}

fn div_ceil_u128(value: u128, divisor: u128) -> u128 {
    (value + divisor - 1) / divisor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_options_default() {
        let options = CallOptions::new();
        assert!(options.timeout.is_none());
    }

    #[test]
    fn test_call_options_timeout() {
        let options = CallOptions::new().timeout(Duration::from_secs(30));
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_call_options_header() {
        let options = CallOptions::new()
            .header("authorization", "Bearer token123")
            .header("x-request-id", "abc-123");

        assert_eq!(
            options.headers.get("authorization").unwrap(),
            "Bearer token123"
        );
        assert_eq!(options.headers.get("x-request-id").unwrap(), "abc-123");
    }

    #[test]
    fn test_call_options_try_header() {
        let options = CallOptions::new()
            .try_header("authorization", "Bearer token")
            .unwrap()
            .try_header("x-custom", "value")
            .unwrap();

        assert_eq!(options.headers.get("authorization").unwrap(), "Bearer token");
        assert_eq!(options.headers.get("x-custom").unwrap(), "value");
    }

    #[test]
    fn test_call_options_try_header_invalid() {
        // Invalid header name (contains invalid characters)
        let result = CallOptions::new().try_header("invalid\0name", "value");
        assert!(result.is_none());
    }

    #[test]
    fn test_call_options_headers_map() {
        use http::HeaderMap;

        let mut headers = HeaderMap::new();
        headers.insert("x-custom", "value".parse().unwrap());

        let options = CallOptions::new().headers(headers);
        assert_eq!(options.headers.get("x-custom").unwrap(), "value");
    }

    #[test]
    fn test_call_options_headers_mut() {
        let mut options = CallOptions::new();
        options
            .headers_mut()
            .insert("x-custom", "value".parse().unwrap());
        assert_eq!(options.headers.get("x-custom").unwrap(), "value");
    }

    #[test]
    fn test_call_options_combined() {
        let options = CallOptions::new()
            .timeout(Duration::from_secs(30))
            .header("authorization", "Bearer token");

        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert_eq!(
            options.headers.get("authorization").unwrap(),
            "Bearer token"
        );
    }

    #[test]
    fn test_duration_to_timeout_header_milliseconds() {
        assert_eq!(
            duration_to_timeout_header(Duration::from_millis(1)),
            Some("1m".to_string())
        );
        assert_eq!(
            duration_to_timeout_header(Duration::from_secs(30)),
            Some("30000m".to_string())
        );
        // Exactly at the 8-digit ceiling stays milliseconds.
        assert_eq!(
            duration_to_timeout_header(Duration::from_millis(99_999_999)),
            Some("99999999m".to_string())
        );
    }

    #[test]
    fn test_duration_to_timeout_header_seconds() {
        // One millisecond over the cap rolls over to seconds, rounding up.
        assert_eq!(
            duration_to_timeout_header(Duration::from_millis(100_000_000)),
            Some("100000S".to_string())
        );
        assert_eq!(
            duration_to_timeout_header(Duration::from_millis(100_000_001)),
            Some("100001S".to_string())
        );
    }

    #[test]
    fn test_duration_to_timeout_header_minutes_and_hours() {
        let huge_seconds = (MAX_TIMEOUT_DIGITS as u128 + 1) * 1000;
        let header = duration_to_timeout_header(Duration::from_millis(huge_seconds as u64)).unwrap();
        assert!(header.ends_with('M'), "expected minutes encoding, got {header}");

        let huge_minutes_ms = (MAX_TIMEOUT_DIGITS as u128 + 1) * 60 * 1000;
        let header =
            duration_to_timeout_header(Duration::from_millis(huge_minutes_ms as u64)).unwrap();
        assert!(header.ends_with('M') || header.ends_with('H'));
    }

    #[test]
    fn test_duration_to_timeout_header_zero() {
        assert_eq!(duration_to_timeout_header(Duration::ZERO), None);
    }
}

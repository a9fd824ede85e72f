use thiserror::Error;

/// Failure of a single request/response round trip against the backend.
///
/// Transport-specific shapes (`reqwest::Error`, raw status codes) never
/// escape this crate; callers only ever match on these variants.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The backend could not be reached (DNS, refused connection, reset).
    #[error("Backend unreachable at {url}: {reason}")]
    NetworkUnreachable { url: String, reason: String },

    /// The backend answered with a non-success status.
    #[error("Backend rejected the request (HTTP {status}): {body}")]
    BackendRejected { status: u16, body: String },

    /// The request did not complete within the configured timeout.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// A success response whose body could not be decoded.
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String, body: String },

    /// An endpoint URL could not be built from the configured base.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl GatewayError {
    /// Returns `true` if retrying the same request later might succeed.
    ///
    /// The gateway never retries by itself; this only informs callers.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkUnreachable { .. } | Self::Timeout { .. } => true,
            Self::BackendRejected { status, .. } => *status >= 500,
            Self::MalformedResponse { .. } | Self::InvalidUrl(_) => false,
        }
    }

    /// Returns `true` for a 404 from the backend.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BackendRejected { status: 404, .. })
    }

    /// Translate a `reqwest` failure into the gateway taxonomy.
    pub(crate) fn from_reqwest(err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            return Self::Timeout { timeout_secs };
        }
        if let Some(status) = err.status() {
            return Self::BackendRejected {
                status: status.as_u16(),
                body: String::new(),
            };
        }
        if err.is_decode() {
            return Self::MalformedResponse {
                message: err.to_string(),
                body: String::new(),
            };
        }
        Self::NetworkUnreachable {
            url: err
                .url()
                .map_or_else(|| "<unknown>".into(), ToString::to_string),
            reason: err.to_string(),
        }
    }
}

/// Connection-level failure of the telemetry stream.
///
/// Never surfaced to subscribers directly: these drive the reconnect
/// state machine in [`crate::connection`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Stream connection failed: {0}")]
    Connect(String),

    #[error("Stream closed abnormally (code {code}): {reason}")]
    AbnormalClose { code: u16, reason: String },

    #[error("Stream frame error: {0}")]
    Frame(String),

    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),
}

/// A stream message that is not a valid telemetry batch.
///
/// Recovered locally: the batch is dropped and the connection stays up.
#[derive(Debug, Error)]
#[error("Malformed batch ({payload_len} bytes): {message}")]
pub struct ParseError {
    pub message: String,
    pub payload_len: usize,
}

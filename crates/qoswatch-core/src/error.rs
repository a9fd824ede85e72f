// ── Core error types ──
//
// User-facing errors from qoswatch-core. Consumers never see HTTP status
// codes or JSON decode failures directly; the `From<GatewayError>` impl
// translates wire-level failures into these variants.

use qoswatch_api::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach backend at {url}: {reason}")]
    BackendUnreachable { url: String, reason: String },

    #[error("Backend request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The telemetry stream gave up reconnecting.
    #[error("Telemetry stream disconnected")]
    Disconnected,

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Backend rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// HTTP status of a backend rejection, if that is what this is.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// ── Conversion from wire-level errors ────────────────────────────────

impl From<GatewayError> for CoreError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NetworkUnreachable { url, reason } => {
                CoreError::BackendUnreachable { url, reason }
            }
            GatewayError::BackendRejected { status, body } => CoreError::Rejected {
                status,
                message: if body.trim().is_empty() {
                    "no response body".into()
                } else {
                    body
                },
            },
            GatewayError::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            GatewayError::MalformedResponse { message, body: _ } => {
                CoreError::Internal(format!("Unexpected backend response: {message}"))
            }
            GatewayError::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_keeps_status_and_body() {
        let err = CoreError::from(GatewayError::BackendRejected {
            status: 422,
            body: "priority out of range".into(),
        });
        assert_eq!(err.status(), Some(422));
        assert_eq!(
            err.to_string(),
            "Backend rejected the request (HTTP 422): priority out of range"
        );
    }

    #[test]
    fn empty_rejection_body_gets_placeholder() {
        let err = CoreError::from(GatewayError::BackendRejected {
            status: 500,
            body: "  ".into(),
        });
        assert!(matches!(err, CoreError::Rejected { ref message, .. } if message == "no response body"));
    }
}

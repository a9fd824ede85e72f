// Shared HTTP transport configuration.
//
// The rule gateway and any ad-hoc callers build their `reqwest::Client`
// through this module so timeout and user-agent settings stay in one place.

use std::time::Duration;

use crate::error::GatewayError;

const USER_AGENT: &str = concat!("qoswatch/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request timeout enforced by the HTTP client.
    pub timeout: Duration,
    /// Optional TCP connect timeout; falls back to `timeout` when `None`.
    pub connect_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connect_timeout: None,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, GatewayError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);

        if let Some(connect) = self.connect_timeout {
            builder = builder.connect_timeout(connect);
        }

        builder
            .build()
            .map_err(|e| GatewayError::NetworkUnreachable {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })
    }

    /// Timeout in whole seconds, for error reporting.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs().max(1)
    }
}

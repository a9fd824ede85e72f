// ── Runtime monitor configuration ──
//
// Describes *where* the backend lives and how the client side retains and
// derives telemetry. Never touches disk: `qoswatch-config` (or a test)
// builds a `MonitorConfig` and hands it to `Monitor`.

use std::ops::RangeInclusive;
use std::time::Duration;

use qoswatch_api::ReconnectConfig;
use url::Url;

use crate::error::CoreError;

/// Path of the telemetry stream relative to the backend root.
pub const STREAM_PATH: &str = "ws/traffic";

/// Packets retained in local history by default.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// QoS priorities the backend accepts, 10 being the most important.
pub const DEFAULT_QOS_PRIORITY_RANGE: RangeInclusive<u8> = 1..=10;

/// Trend derivation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendConfig {
    /// Bucket width `W`. Default: 2s.
    pub bucket_width: Duration,
    /// Most recent buckets kept (`K`). Default: 20.
    pub max_buckets: usize,
    /// Estimated size ratio applied to each packet for the optimized series.
    /// Default: 0.8.
    pub optimization_ratio: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            bucket_width: Duration::from_secs(2),
            max_buckets: 20,
            optimization_ratio: 0.8,
        }
    }
}

/// Configuration for a single backend.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base address for the rule and metrics endpoints (e.g. `http://localhost:8000`).
    pub api_url: Url,
    /// Telemetry stream address (e.g. `ws://localhost:8000/ws/traffic`).
    pub stream_url: Url,
    /// Per-request timeout for gateway calls.
    pub timeout: Duration,
    /// Retention bound `N` for packet history.
    pub history_capacity: usize,
    pub reconnect: ReconnectConfig,
    pub trend: TrendConfig,
    /// Valid QoS priorities, higher is more important. The lowest value is
    /// the default priority.
    pub qos_priority_range: RangeInclusive<u8>,
}

impl MonitorConfig {
    /// Config for the given endpoints with every tunable at its default.
    pub fn new(api_url: Url, stream_url: Url) -> Self {
        Self {
            api_url,
            stream_url,
            timeout: Duration::from_secs(5),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            reconnect: ReconnectConfig::default(),
            trend: TrendConfig::default(),
            qos_priority_range: DEFAULT_QOS_PRIORITY_RANGE,
        }
    }

    /// Config for a backend whose stream is served next to its API.
    pub fn for_backend(api_url: Url) -> Result<Self, CoreError> {
        let stream_url = derive_stream_url(&api_url)?;
        Ok(Self::new(api_url, stream_url))
    }

    /// Lowest valid priority, used when a write omits one.
    pub fn default_priority(&self) -> u8 {
        *self.qos_priority_range.start()
    }

    /// Reject settings the store and bucketer cannot operate with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.history_capacity == 0 {
            return Err(CoreError::Config {
                message: "history capacity must be at least 1".into(),
            });
        }
        if self.trend.bucket_width.as_millis() == 0 {
            return Err(CoreError::Config {
                message: "trend bucket width must be at least 1ms".into(),
            });
        }
        if self.trend.max_buckets == 0 {
            return Err(CoreError::Config {
                message: "trend bucket count must be at least 1".into(),
            });
        }
        if !self.trend.optimization_ratio.is_finite() || self.trend.optimization_ratio < 0.0 {
            return Err(CoreError::Config {
                message: format!(
                    "optimization ratio must be a non-negative number, got {}",
                    self.trend.optimization_ratio
                ),
            });
        }
        if self.qos_priority_range.is_empty() {
            return Err(CoreError::Config {
                message: "QoS priority range is empty".into(),
            });
        }
        if !matches!(self.stream_url.scheme(), "ws" | "wss") {
            return Err(CoreError::Config {
                message: format!("stream URL must use ws:// or wss://, got {}", self.stream_url),
            });
        }
        Ok(())
    }
}

/// `http(s)://host[:port]/prefix` → `ws(s)://host[:port]/prefix/ws/traffic`.
pub fn derive_stream_url(api_url: &Url) -> Result<Url, CoreError> {
    let scheme = match api_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(CoreError::Config {
                message: format!("unsupported API URL scheme '{other}'"),
            });
        }
    };

    let rest = &api_url.as_str()[api_url.scheme().len()..];
    let joined = format!("{scheme}{}/{STREAM_PATH}", rest.trim_end_matches('/'));
    Url::parse(&joined).map_err(|e| CoreError::Config {
        message: format!("cannot derive stream URL from {api_url}: {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn api(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    #[test]
    fn stream_url_follows_api_scheme_and_prefix() {
        let plain = derive_stream_url(&api("http://localhost:8000")).unwrap();
        assert_eq!(plain.as_str(), "ws://localhost:8000/ws/traffic");

        let tls = derive_stream_url(&api("https://gw.example.net/backend/")).unwrap();
        assert_eq!(tls.as_str(), "wss://gw.example.net/backend/ws/traffic");
    }

    #[test]
    fn stream_url_rejects_unknown_scheme() {
        assert!(derive_stream_url(&api("ftp://files.example.net")).is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let config = MonitorConfig::for_backend(api("http://localhost:8000")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.history_capacity, 100);
        assert_eq!(config.default_priority(), 1);
        assert!(config.qos_priority_range.contains(&10));
        assert_eq!(config.trend.max_buckets, 20);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = MonitorConfig::for_backend(api("http://localhost:8000")).unwrap();
        config.history_capacity = 0;
        assert!(matches!(config.validate(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn http_stream_url_is_rejected() {
        let mut config = MonitorConfig::for_backend(api("http://localhost:8000")).unwrap();
        config.stream_url = api("http://localhost:8000/ws/traffic");
        assert!(config.validate().is_err());
    }
}

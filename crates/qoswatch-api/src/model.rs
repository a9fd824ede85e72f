// ── Wire data model ──
//
// Serde types for everything the backend sends or accepts: telemetry
// batches pushed over the stream, metrics snapshots, and QoS / SDN rules.
// Field names follow the backend's JSON exactly.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Packet ──────────────────────────────────────────────────────────

/// One observed network frame.
///
/// Immutable once received; the store shares packets as `Arc<Packet>`
/// between history, aggregation and trend derivations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Source address. `None` for frames without an IP layer.
    #[serde(default)]
    pub src: Option<String>,

    /// Destination address. `None` for frames without an IP layer.
    #[serde(default)]
    pub dst: Option<String>,

    /// Protocol layer names, outermost first (e.g. `["Ethernet", "IP", "TCP"]`).
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Frame length in bytes.
    pub length: u64,

    /// Capture time. Frames that arrive without one are stamped on receipt.
    #[serde(default = "Utc::now", deserialize_with = "flexible_time::required")]
    pub timestamp: DateTime<Utc>,

    /// Human-readable one-line summary.
    #[serde(default)]
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_info: Option<TcpInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_info: Option<UdpInfo>,

    /// QoS classification applied by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<QosAnnotation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizationAnnotation>,
}

impl Packet {
    /// The outermost protocol layer, used as the aggregation key.
    pub fn outer_protocol(&self) -> Option<&str> {
        self.protocols.first().map(String::as_str)
    }

    /// Whether any layer of this frame matches `protocol` (case-insensitive).
    pub fn has_protocol(&self, protocol: &str) -> bool {
        self.protocols
            .iter()
            .any(|p| p.eq_ignore_ascii_case(protocol))
    }

    /// Capture time as milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpInfo {
    pub sport: u16,
    pub dport: u16,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub window: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpInfo {
    pub sport: u16,
    pub dport: u16,
    #[serde(default)]
    pub len: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QosAnnotation {
    pub priority: u8,
    #[serde(default, deserialize_with = "flexible_time::optional")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Optimizer output attached to a frame. `patterns` is backend-defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationAnnotation {
    #[serde(default)]
    pub patterns: serde_json::Value,
    #[serde(default, deserialize_with = "flexible_time::optional")]
    pub timestamp: Option<DateTime<Utc>>,
}

// ── MetricsSnapshot ─────────────────────────────────────────────────

/// Point-in-time aggregate computed by the backend.
///
/// Always replaced wholesale; never merged field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(default)]
    pub statistics: SummaryStatistics,

    /// Bytes per protocol over the backend's window.
    #[serde(default)]
    pub bandwidth_utilization: BTreeMap<String, f64>,

    #[serde(default)]
    pub latency_metrics: LatencyMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    #[serde(default)]
    pub total_packets: u64,
    #[serde(default)]
    pub avg_packet_size: f64,
    #[serde(default)]
    pub max_packet_size: f64,
    #[serde(default)]
    pub min_packet_size: f64,
    #[serde(default)]
    pub std_packet_size: f64,
    /// Bytes per second.
    #[serde(default)]
    pub throughput: f64,
    /// Packet counts keyed by protocol name.
    #[serde(default)]
    pub protocol_distribution: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moving_avg_size: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    #[serde(default)]
    pub avg_latency: f64,
    #[serde(default)]
    pub max_latency: f64,
    #[serde(default)]
    pub min_latency: f64,
    #[serde(default)]
    pub p95_latency: f64,
    #[serde(default)]
    pub p99_latency: f64,
}

// ── Batch ───────────────────────────────────────────────────────────

/// One push message from the telemetry stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(default)]
    pub packets: Vec<Arc<Packet>>,
    pub metrics: Arc<MetricsSnapshot>,
}

// ── QoS rules ───────────────────────────────────────────────────────

/// A per-protocol QoS rule. `protocol` is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosRule {
    pub protocol: String,
    pub priority: u8,
    /// Bandwidth cap in bytes per second. `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_limit: Option<u64>,
}

// ── SDN rules ───────────────────────────────────────────────────────

/// Backend-assigned SDN rule identifier.
///
/// The backend may emit either integer or string ids; both are carried
/// verbatim and rendered identically in request paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleId {
    Numeric(u64),
    Text(String),
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for RuleId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<u64> for RuleId {
    fn from(n: u64) -> Self {
        Self::Numeric(n)
    }
}

impl From<&str> for RuleId {
    fn from(s: &str) -> Self {
        s.parse::<u64>()
            .map_or_else(|_| Self::Text(s.to_owned()), Self::Numeric)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SdnAction {
    #[serde(alias = "allow", alias = "ALLOW")]
    Allow,
    #[serde(alias = "drop", alias = "DROP")]
    Drop,
    #[serde(alias = "forward", alias = "FORWARD")]
    Forward,
}

impl fmt::Display for SdnAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "Allow",
            Self::Drop => "Drop",
            Self::Forward => "Forward",
        })
    }
}

impl FromStr for SdnAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "drop" => Ok(Self::Drop),
            "forward" => Ok(Self::Forward),
            other => Err(format!("unknown SDN action '{other}' (expected allow, drop or forward)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SdnStatus {
    #[default]
    #[serde(alias = "active", alias = "Active")]
    Active,
    #[serde(alias = "inactive", alias = "Inactive")]
    Inactive,
}

impl fmt::Display for SdnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        })
    }
}

/// An SDN flow rule as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdnRule {
    pub id: RuleId,
    pub source_ip: String,
    pub destination_ip: String,
    pub action: SdnAction,
    #[serde(default)]
    pub status: SdnStatus,
    #[serde(default, deserialize_with = "flexible_time::optional")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_time::optional")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Body for creating an SDN rule. The backend assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSdnRule {
    pub source_ip: String,
    pub destination_ip: String,
    pub action: SdnAction,
}

// ── Timestamp decoding ──────────────────────────────────────────────

/// Timestamps arrive as RFC 3339, as naive ISO-8601 (assumed UTC), or as
/// fractional epoch seconds depending on which backend component wrote them.
mod flexible_time {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Epoch(f64),
        Text(String),
    }

    fn decode<E: serde::de::Error>(raw: Raw) -> Result<DateTime<Utc>, E> {
        match raw {
            Raw::Epoch(secs) => {
                #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
                let millis = (secs * 1000.0).round() as i64;
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| E::custom(format!("epoch timestamp out of range: {secs}")))
            }
            Raw::Text(text) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
                    return Ok(dt.with_timezone(&Utc));
                }
                NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
                    .or_else(|_| NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f"))
                    .map(|naive| naive.and_utc())
                    .map_err(|e| E::custom(format!("invalid timestamp '{text}': {e}")))
            }
        }
    }

    pub(super) fn required<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        decode(Raw::deserialize(de)?)
    }

    pub(super) fn optional<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<Raw>::deserialize(de)? {
            Some(raw) => decode(raw).map(Some),
            None => Ok(None),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

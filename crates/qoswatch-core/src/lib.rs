//! Telemetry state and rule reconciliation between `qoswatch-api` and its
//! consumers (the CLI, or any other view).
//!
//! - **[`Monitor`]**: explicit context object for one backend.
//!   [`create()`](Monitor::create) attaches it to the shared telemetry
//!   stream; [`teardown()`](Monitor::teardown) detaches it. Rule actions
//!   serialise per key, call the gateway, then re-list from the backend.
//!   [`Monitor::oneshot()`](Monitor::oneshot) skips the stream for single
//!   request/response commands.
//!
//! - **[`TelemetryStore`]**: bounded packet history, latest metrics,
//!   per-protocol aggregation and confirmed rule sets, all published
//!   through `tokio::sync::watch` channels. Reads are `Arc` clones.
//!
//! - **[`StateStream<T>`]**: subscription handle with `current()` /
//!   `latest()` / `changed()` and a `Stream` adapter.
//!
//! - **[`bucketize`]**: pure trend derivation over packet history.

pub mod config;
pub mod error;
pub mod monitor;
pub mod store;
pub mod stream;
pub mod trend;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{MonitorConfig, TrendConfig, derive_stream_url};
pub use error::CoreError;
pub use monitor::Monitor;
pub use store::{
    LinkStatus, PendingEntry, PendingWrite, ProtocolAggregation, ProtocolStats,
    TelemetrySnapshot, TelemetryStore,
};
pub use stream::{StateStream, StateWatchStream};
pub use trend::{TrendPoint, bucketize};

// Wire types consumers need alongside the monitor.
pub use qoswatch_api::{
    Batch, ConnectionState, MetricsSnapshot, NewSdnRule, Packet, QosRule, ReconnectConfig,
    RuleId, SdnAction, SdnRule, SdnStatus,
};

// ── Central telemetry store ──
//
// Single source of truth for everything the views read. Batch state
// (history, aggregation, metrics) lives in one watch channel so a reader
// never sees a history paired with another history's aggregation.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use qoswatch_api::{Batch, MetricsSnapshot, NewSdnRule, Packet, QosRule, SdnRule};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::aggregation::ProtocolAggregation;
use super::rule_set::RuleSet;

/// Freshness of the telemetry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LinkStatus {
    /// No batch received yet.
    Waiting,
    /// Batches are flowing.
    Live,
    /// The stream gave up reconnecting; data is frozen at its last state.
    Stale,
}

/// Consistent view of batch-derived state.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    /// Most recent packets by arrival, oldest first.
    pub packets: Arc<Vec<Arc<Packet>>>,
    /// Derived from exactly `packets`.
    pub aggregation: Arc<ProtocolAggregation>,
    /// Last snapshot from a batch or an explicit refresh.
    pub metrics: Option<Arc<MetricsSnapshot>>,
    /// Batches applied since creation.
    pub batches_applied: u64,
    pub last_batch_at: Option<DateTime<Utc>>,
}

/// Reactive storage behind [`Monitor`](crate::Monitor).
///
/// Reads are wait-free `Arc` clones. Writes come from the stream handler
/// and from monitor actions only.
pub struct TelemetryStore {
    capacity: usize,
    telemetry: watch::Sender<Arc<TelemetrySnapshot>>,
    link: watch::Sender<LinkStatus>,
    protocol_filter: ArcSwapOption<String>,
    pub(crate) qos: RuleSet<QosRule, QosRule>,
    pub(crate) sdn: RuleSet<SdnRule, NewSdnRule>,
}

impl TelemetryStore {
    /// `capacity` is the history bound `N`; values below 1 are raised to 1.
    pub fn new(capacity: usize) -> Self {
        let (telemetry, _) = watch::channel(Arc::new(TelemetrySnapshot::default()));
        let (link, _) = watch::channel(LinkStatus::Waiting);
        Self {
            capacity: capacity.max(1),
            telemetry,
            link,
            protocol_filter: ArcSwapOption::empty(),
            qos: RuleSet::new("qos"),
            sdn: RuleSet::new("sdn"),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // ── Batch ingestion ──────────────────────────────────────────────

    /// Merge one stream batch: append its packets, trim to the most
    /// recent `capacity`, replace metrics, recompute aggregation.
    pub fn apply_batch(&self, batch: &Batch) {
        let capacity = self.capacity;
        self.telemetry.send_modify(|snap| {
            let total = snap.packets.len() + batch.packets.len();
            let skip = total.saturating_sub(capacity);
            let packets: Vec<Arc<Packet>> = snap
                .packets
                .iter()
                .chain(batch.packets.iter())
                .skip(skip)
                .cloned()
                .collect();
            let aggregation = ProtocolAggregation::from_history(&packets);

            *snap = Arc::new(TelemetrySnapshot {
                packets: Arc::new(packets),
                aggregation: Arc::new(aggregation),
                metrics: Some(Arc::clone(&batch.metrics)),
                batches_applied: snap.batches_applied + 1,
                last_batch_at: Some(Utc::now()),
            });
        });
        self.link.send_if_modified(|status| {
            let changed = *status != LinkStatus::Live;
            *status = LinkStatus::Live;
            changed
        });
        debug!(packets = batch.packets.len(), "applied telemetry batch");
    }

    /// Replace the metrics snapshot without touching history.
    pub fn set_metrics(&self, metrics: MetricsSnapshot) {
        let metrics = Arc::new(metrics);
        self.telemetry.send_modify(|snap| {
            let mut next = TelemetrySnapshot::clone(snap);
            next.metrics = Some(metrics);
            *snap = Arc::new(next);
        });
    }

    /// Drop local history and aggregation. Metrics are kept.
    pub fn clear_packets(&self) {
        self.telemetry.send_modify(|snap| {
            let mut next = TelemetrySnapshot::clone(snap);
            next.packets = Arc::new(Vec::new());
            next.aggregation = Arc::new(ProtocolAggregation::default());
            *snap = Arc::new(next);
        });
        debug!("cleared local packet history");
    }

    /// The stream is gone for good until the next manual reconnect.
    pub fn mark_stale(&self) {
        self.link.send_replace(LinkStatus::Stale);
        warn!("telemetry stream terminated; data is stale");
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn telemetry(&self) -> Arc<TelemetrySnapshot> {
        self.telemetry.borrow().clone()
    }

    pub fn packets(&self) -> Arc<Vec<Arc<Packet>>> {
        Arc::clone(&self.telemetry.borrow().packets)
    }

    pub fn aggregation(&self) -> Arc<ProtocolAggregation> {
        Arc::clone(&self.telemetry.borrow().aggregation)
    }

    pub fn metrics(&self) -> Option<Arc<MetricsSnapshot>> {
        self.telemetry.borrow().metrics.clone()
    }

    pub fn link_status(&self) -> LinkStatus {
        *self.link.borrow()
    }

    pub fn qos_rules(&self) -> Arc<Vec<Arc<QosRule>>> {
        self.qos.snapshot()
    }

    pub fn sdn_rules(&self) -> Arc<Vec<Arc<SdnRule>>> {
        self.sdn.snapshot()
    }

    // ── Protocol filter ──────────────────────────────────────────────

    /// Restrict [`filtered_packets`](Self::filtered_packets) to packets
    /// carrying `protocol` at any layer. `None` clears the filter.
    pub fn set_protocol_filter(&self, protocol: Option<String>) {
        let protocol = protocol.filter(|p| !p.trim().is_empty());
        self.protocol_filter.store(protocol.map(Arc::new));
    }

    pub fn protocol_filter(&self) -> Option<String> {
        self.protocol_filter.load_full().map(|p| String::clone(&p))
    }

    pub fn filtered_packets(&self) -> Vec<Arc<Packet>> {
        let packets = self.packets();
        match self.protocol_filter.load_full() {
            Some(protocol) => packets
                .iter()
                .filter(|p| p.has_protocol(&protocol))
                .cloned()
                .collect(),
            None => packets.to_vec(),
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub(crate) fn subscribe_telemetry(&self) -> watch::Receiver<Arc<TelemetrySnapshot>> {
        self.telemetry.subscribe()
    }

    pub(crate) fn subscribe_link(&self) -> watch::Receiver<LinkStatus> {
        self.link.subscribe()
    }
}

impl std::fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.telemetry();
        f.debug_struct("TelemetryStore")
            .field("capacity", &self.capacity)
            .field("packets", &snap.packets.len())
            .field("batches_applied", &snap.batches_applied)
            .field("link", &self.link_status())
            .finish_non_exhaustive()
    }
}

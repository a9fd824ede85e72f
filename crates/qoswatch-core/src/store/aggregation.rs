// ── Per-protocol aggregation ──
//
// Rebuilt from the bounded history after every change, so it can never
// drift from the packets it describes.

use std::collections::BTreeMap;
use std::sync::Arc;

use qoswatch_api::Packet;

/// Totals for one outer protocol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtocolStats {
    pub count: usize,
    /// Sum of packet lengths in bytes.
    pub total_size: u64,
    /// Constituent packets, in arrival order.
    pub packets: Vec<Arc<Packet>>,
}

impl ProtocolStats {
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn avg_size(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_size as f64 / self.count as f64
        }
    }
}

/// Outer protocol → totals over the current history.
///
/// Packets with an empty layer list have no key and are not counted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtocolAggregation {
    by_protocol: BTreeMap<String, ProtocolStats>,
}

impl ProtocolAggregation {
    pub fn from_history(packets: &[Arc<Packet>]) -> Self {
        let mut by_protocol: BTreeMap<String, ProtocolStats> = BTreeMap::new();
        for packet in packets {
            let Some(protocol) = packet.outer_protocol() else {
                continue;
            };
            let stats = by_protocol.entry(protocol.to_owned()).or_default();
            stats.count += 1;
            stats.total_size = stats.total_size.saturating_add(packet.length);
            stats.packets.push(Arc::clone(packet));
        }
        Self { by_protocol }
    }

    pub fn get(&self, protocol: &str) -> Option<&ProtocolStats> {
        self.by_protocol.get(protocol)
    }

    /// Protocols in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProtocolStats)> {
        self.by_protocol.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.by_protocol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_protocol.is_empty()
    }

    /// Packets counted across all protocols.
    pub fn total_packets(&self) -> usize {
        self.by_protocol.values().map(|s| s.count).sum()
    }
}

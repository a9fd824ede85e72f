// ── Trend bucketing ──
//
// Folds packet history into fixed-width time buckets and produces the
// original-vs-optimized size series the dashboards plot. Pure function
// of its inputs: no clock, no shared state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use qoswatch_api::Packet;
use serde::Serialize;

use crate::config::TrendConfig;

/// One bucket of the trend series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    /// Bucket start, epoch milliseconds (`floor(ts / W) * W`).
    pub bucket_start_ms: i64,
    /// Bucket start rendered as `HH:MM:SS` UTC.
    pub label: String,
    /// Packets that fell in this bucket.
    pub count: usize,
    /// Mean observed packet size.
    pub avg_original_size: f64,
    /// Mean estimated size after optimization. Packets carrying an
    /// optimization annotation count at `length * optimization_ratio`,
    /// the rest at their observed length.
    pub avg_optimized_size: f64,
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    original: u64,
    optimized: f64,
}

/// Bucket `packets` by capture time.
///
/// Buckets come out in ascending time order, and only the most recent
/// `config.max_buckets` are kept. Empty input gives an empty series.
#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
pub fn bucketize(packets: &[Arc<Packet>], config: &TrendConfig) -> Vec<TrendPoint> {
    let width = i64::try_from(config.bucket_width.as_millis())
        .unwrap_or(i64::MAX)
        .max(1);

    let mut buckets: BTreeMap<i64, Accumulator> = BTreeMap::new();
    for packet in packets {
        let start = packet.timestamp_ms().div_euclid(width) * width;
        let acc = buckets.entry(start).or_default();
        acc.count += 1;
        acc.original = acc.original.saturating_add(packet.length);
        acc.optimized += if packet.optimization.is_some() {
            packet.length as f64 * config.optimization_ratio
        } else {
            packet.length as f64
        };
    }

    let skip = buckets.len().saturating_sub(config.max_buckets);
    buckets
        .into_iter()
        .skip(skip)
        .map(|(start, acc)| {
            let count = acc.count as f64;
            TrendPoint {
                bucket_start_ms: start,
                label: bucket_label(start),
                count: acc.count,
                avg_original_size: acc.original as f64 / count,
                avg_optimized_size: acc.optimized / count,
            }
        })
        .collect()
}

fn bucket_label(start_ms: i64) -> String {
    Utc.timestamp_millis_opt(start_ms)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

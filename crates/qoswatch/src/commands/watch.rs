//! Live telemetry view.
//!
//! Attaches a monitor to the stream and re-renders the trend series and
//! per-protocol aggregation after every batch until Ctrl-C, a batch
//! limit, or the stream giving up.

use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;
use tracing::{debug, warn};

use qoswatch_core::{LinkStatus, Monitor, MonitorConfig, TelemetrySnapshot, TrendPoint};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

// ── Rows ────────────────────────────────────────────────────────────

#[derive(Tabled)]
struct TrendRow {
    #[tabled(rename = "Bucket")]
    label: String,
    #[tabled(rename = "Packets")]
    count: usize,
    #[tabled(rename = "Avg Size")]
    original: String,
    #[tabled(rename = "Optimized")]
    optimized: String,
}

impl From<&TrendPoint> for TrendRow {
    fn from(p: &TrendPoint) -> Self {
        Self {
            label: p.label.clone(),
            count: p.count,
            original: format!("{:.1}", p.avg_original_size),
            optimized: format!("{:.1}", p.avg_optimized_size),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct ProtocolRow {
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "Packets")]
    count: usize,
    #[tabled(rename = "Bytes")]
    total_size: u64,
    #[tabled(rename = "Avg Size", display_with = "one_decimal")]
    avg_size: f64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn one_decimal(v: &f64) -> String {
    format!("{v:.1}")
}

/// One rendered frame; also the JSON shape emitted per batch.
#[derive(Debug, Serialize)]
struct WatchFrame {
    batches: u64,
    link: LinkStatus,
    packets: usize,
    filter: Option<String>,
    matching: usize,
    trend: Vec<TrendPoint>,
    protocols: Vec<ProtocolRow>,
}

impl WatchFrame {
    fn capture(monitor: &Monitor, snapshot: &TelemetrySnapshot) -> Self {
        let protocols = snapshot
            .aggregation
            .iter()
            .map(|(protocol, stats)| ProtocolRow {
                protocol: protocol.to_owned(),
                count: stats.count,
                total_size: stats.total_size,
                avg_size: stats.avg_size(),
            })
            .collect();
        Self {
            batches: snapshot.batches_applied,
            link: monitor.link_status(),
            packets: snapshot.packets.len(),
            filter: monitor.store().protocol_filter(),
            matching: monitor.filtered_packets().len(),
            trend: monitor.trend(),
            protocols,
        }
    }

    fn render_table(&self, color: bool) -> String {
        let trend: Vec<TrendRow> = self.trend.iter().map(TrendRow::from).collect();
        let mut status = format!(
            "{} | batches {} | packets {}",
            output::status(&self.link.to_string(), self.link == LinkStatus::Live, color),
            self.batches,
            self.packets,
        );
        if let Some(ref filter) = self.filter {
            status.push_str(&format!(" | {filter}: {}", self.matching));
        }
        [
            status,
            output::heading("Trend", color),
            output::render_table(&trend),
            output::heading("Protocols", color),
            output::render_table(&self.protocols),
        ]
        .join("\n")
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    mut config: MonitorConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if args.retry_forever {
        config.reconnect.max_retries = None;
    }
    let monitor = Monitor::create(config)?;
    monitor.set_protocol_filter(args.protocol.clone());

    // Seed metrics so the first frame isn't empty if the stream is slow.
    if let Err(e) = monitor.refresh_metrics().await {
        warn!(error = %e, "initial metrics snapshot failed");
    }

    let result = run(&monitor, &args, global).await;
    monitor.teardown();
    result
}

async fn run(monitor: &Monitor, args: &WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    monitor
        .wait_for_data(Duration::from_secs(args.wait))
        .await?;

    let color = output::should_color(&global.color);
    let mut telemetry = monitor.telemetry_stream();
    let mut link = monitor.link_stream();
    let mut snapshot = telemetry.latest();

    loop {
        render_frame(monitor, &snapshot, global, color);

        if args.batches.is_some_and(|n| snapshot.batches_applied >= n) {
            return Ok(());
        }

        tokio::select! {
            next = telemetry.changed() => match next {
                Some(next) => snapshot = next,
                None => return Ok(()),
            },
            status = link.changed() => {
                if status == Some(LinkStatus::Stale) {
                    return Err(CliError::StreamLost);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                return Ok(());
            }
        }
    }
}

fn render_frame(monitor: &Monitor, snapshot: &TelemetrySnapshot, global: &GlobalOpts, color: bool) {
    let frame = WatchFrame::capture(monitor, snapshot);
    let out = match global.output {
        OutputFormat::Table => frame.render_table(color),
        // One document per batch; compact keeps it line-delimited.
        OutputFormat::Json | OutputFormat::JsonCompact => {
            output::render_single(&OutputFormat::JsonCompact, &frame, |_| String::new(), |_| {
                String::new()
            })
        }
        OutputFormat::Yaml => format!(
            "---\n{}",
            output::render_single(&global.output, &frame, |_| String::new(), |_| String::new())
        ),
        OutputFormat::Plain => frame
            .trend
            .iter()
            .map(|p| format!("{} {}", p.label, p.count))
            .collect::<Vec<_>>()
            .join("\n"),
    };
    output::print_output(&out, global.quiet);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(filter: Option<&str>) -> WatchFrame {
        WatchFrame {
            batches: 2,
            link: LinkStatus::Live,
            packets: 3,
            filter: filter.map(str::to_owned),
            matching: 1,
            trend: vec![TrendPoint {
                bucket_start_ms: 1_700_000_100_000,
                label: "22:15:00".into(),
                count: 3,
                avg_original_size: 100.0,
                avg_optimized_size: 80.0,
            }],
            protocols: vec![ProtocolRow {
                protocol: "TCP".into(),
                count: 3,
                total_size: 300,
                avg_size: 100.0,
            }],
        }
    }

    #[test]
    fn test_table_frame_shows_status_and_tables() {
        let text = frame(None).render_table(false);
        assert!(text.starts_with("live | batches 2 | packets 3"));
        assert!(text.contains("22:15:00"));
        assert!(text.contains("80.0"));
        assert!(text.contains("TCP"));
    }

    #[test]
    fn test_table_frame_reports_filter_matches() {
        let text = frame(Some("ICMP")).render_table(false);
        assert!(text.lines().next().unwrap_or_default().ends_with("ICMP: 1"));
    }
}

//! Metrics command handlers.

use std::sync::Arc;

use qoswatch_core::{MetricsSnapshot, Monitor};

use crate::cli::{GlobalOpts, MetricsArgs, MetricsCommand};
use crate::error::CliError;
use crate::output;

/// Multi-line detail view used for table output.
pub fn detail(m: &Arc<MetricsSnapshot>) -> String {
    let s = &m.statistics;
    let l = &m.latency_metrics;
    let mut out = [
        format!("Packets:      {}", s.total_packets),
        format!("Throughput:   {:.1} B/s", s.throughput),
        format!(
            "Size:         avg {:.1}  min {:.0}  max {:.0}  std {:.1}",
            s.avg_packet_size, s.min_packet_size, s.max_packet_size, s.std_packet_size
        ),
        format!(
            "Latency (ms): avg {:.2}  p95 {:.2}  p99 {:.2}",
            l.avg_latency, l.p95_latency, l.p99_latency
        ),
    ]
    .join("\n");

    if !s.protocol_distribution.is_empty() {
        out.push_str("\nProtocols:");
        for (protocol, count) in &s.protocol_distribution {
            let bytes = m
                .bandwidth_utilization
                .get(protocol)
                .map_or_else(|| "-".into(), |b| format!("{b:.0} B"));
            out.push_str(&format!("\n  {protocol:<10} {count:>8} pkts  {bytes}"));
        }
    }
    out
}

pub async fn handle(
    monitor: &Monitor,
    args: MetricsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        MetricsCommand::Show => {
            let snapshot = monitor.refresh_metrics().await?;
            let out = output::render_single(&global.output, &snapshot, detail, |m| {
                m.statistics.total_packets.to_string()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        MetricsCommand::Clear => {
            monitor.clear_history().await?;
            if !global.quiet {
                eprintln!("Backend packet history cleared");
            }
            Ok(())
        }
    }
}

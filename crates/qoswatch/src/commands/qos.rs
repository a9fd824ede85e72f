//! QoS rule command handlers.

use std::sync::Arc;

use tabled::Tabled;

use qoswatch_core::{Monitor, QosRule};

use crate::cli::{GlobalOpts, QosArgs, QosCommand};
use crate::error::{self, CliError};
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct QosRow {
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "Priority")]
    priority: u8,
    #[tabled(rename = "Bandwidth Limit")]
    bandwidth_limit: String,
}

impl From<&Arc<QosRule>> for QosRow {
    fn from(r: &Arc<QosRule>) -> Self {
        Self {
            protocol: r.protocol.clone(),
            priority: r.priority,
            bandwidth_limit: r
                .bandwidth_limit
                .map_or_else(|| "-".into(), |b| format!("{b} B/s")),
        }
    }
}

fn render_rules(monitor: &Monitor, global: &GlobalOpts) {
    let rules = monitor.qos_rules();
    let out = output::render_list(&global.output, &rules, |r| QosRow::from(r), |r| {
        r.protocol.clone()
    });
    output::print_output(&out, global.quiet);
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(monitor: &Monitor, args: QosArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        QosCommand::List => {
            monitor.refresh_qos_rules().await?;
            render_rules(monitor, global);
            Ok(())
        }

        QosCommand::Set {
            protocol,
            priority,
            bandwidth_limit,
        } => {
            let removing = priority.is_none() && bandwidth_limit.is_none();
            monitor
                .set_qos_rule(&protocol, priority, bandwidth_limit)
                .await
                .map_err(|e| error::not_found_on_404(e, "qos", &protocol))?;
            if !global.quiet {
                if removing {
                    eprintln!("QoS rule for {protocol} removed");
                } else {
                    eprintln!("QoS rule for {protocol} set");
                }
            }
            render_rules(monitor, global);
            Ok(())
        }

        QosCommand::Delete { protocol } => {
            monitor
                .delete_qos_rule(&protocol)
                .await
                .map_err(|e| error::not_found_on_404(e, "qos", &protocol))?;
            if !global.quiet {
                eprintln!("QoS rule for {protocol} removed");
            }
            Ok(())
        }
    }
}

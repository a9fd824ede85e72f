//! SDN rule command handlers.

use std::sync::Arc;

use tabled::Tabled;

use qoswatch_core::{Monitor, RuleId, SdnAction, SdnRule};

use crate::cli::{GlobalOpts, SdnActionArg, SdnArgs, SdnCommand};
use crate::error::{self, CliError};
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct SdnRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Destination")]
    destination: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Created")]
    created: String,
}

impl From<&Arc<SdnRule>> for SdnRow {
    fn from(r: &Arc<SdnRule>) -> Self {
        Self {
            id: r.id.to_string(),
            source: r.source_ip.clone(),
            destination: r.destination_ip.clone(),
            action: r.action.to_string(),
            status: r.status.to_string(),
            created: r
                .created_at
                .map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

impl From<SdnActionArg> for SdnAction {
    fn from(a: SdnActionArg) -> Self {
        match a {
            SdnActionArg::Allow => Self::Allow,
            SdnActionArg::Drop => Self::Drop,
            SdnActionArg::Forward => Self::Forward,
        }
    }
}

fn render_rules(monitor: &Monitor, global: &GlobalOpts) {
    let rules = monitor.sdn_rules();
    let out = output::render_list(&global.output, &rules, |r| SdnRow::from(r), |r| {
        r.id.to_string()
    });
    output::print_output(&out, global.quiet);
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(monitor: &Monitor, args: SdnArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        SdnCommand::List => {
            monitor.refresh_sdn_rules().await?;
            render_rules(monitor, global);
            Ok(())
        }

        SdnCommand::Create {
            source,
            destination,
            action,
        } => {
            monitor
                .create_sdn_rule(&source, &destination, action.into())
                .await?;
            if !global.quiet {
                eprintln!("SDN rule {source} -> {destination} created");
            }
            render_rules(monitor, global);
            Ok(())
        }

        SdnCommand::Delete { id } => {
            monitor
                .delete_sdn_rule(&RuleId::from(id.as_str()))
                .await
                .map_err(|e| error::not_found_on_404(e, "sdn", &id))?;
            if !global.quiet {
                eprintln!("SDN rule {id} deleted");
            }
            Ok(())
        }
    }
}

//! Command dispatch: bridges CLI args -> `Monitor` calls -> output formatting.

pub mod config_cmd;
pub mod metrics;
pub mod qos;
pub mod sdn;
pub mod watch;

use qoswatch_core::{Monitor, MonitorConfig};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a backend-bound command to the appropriate handler.
///
/// Request/response commands share a stream-less monitor; `watch` builds
/// its own so it can attach to the telemetry stream.
pub async fn dispatch(
    cmd: Command,
    config: MonitorConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(config, args, global).await,
        Command::Metrics(args) => metrics::handle(&Monitor::oneshot(config)?, args, global).await,
        Command::Qos(args) => qos::handle(&Monitor::oneshot(config)?, args, global).await,
        Command::Sdn(args) => sdn::handle(&Monitor::oneshot(config)?, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}

//! Clap derive structures for the `qoswatch` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// qoswatch -- live traffic telemetry and rule management
#[derive(Debug, Parser)]
#[command(
    name = "qoswatch",
    version,
    about = "Watch traffic telemetry and manage QoS/SDN rules on an optimization backend",
    long_about = "Streams packet batches from a traffic-optimization backend, keeps a\n\
        bounded local history with per-protocol aggregates and trend buckets,\n\
        and reconciles QoS and SDN rules against the backend's rule store.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend profile to use
    #[arg(long, short = 'p', env = "QOSWATCH_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Backend base URL (overrides profile)
    #[arg(long, short = 'u', env = "QOSWATCH_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Telemetry stream URL (derived from the API URL when omitted)
    #[arg(long, env = "QOSWATCH_STREAM_URL", global = true)]
    pub stream_url: Option<String>,

    /// Config file to read instead of the platform default
    #[arg(long, env = "QOSWATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "QOSWATCH_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "QOSWATCH_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream live telemetry and show trend and protocol tables
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Point-in-time backend metrics
    #[command(alias = "m")]
    Metrics(MetricsArgs),

    /// Manage per-protocol QoS rules
    Qos(QosArgs),

    /// Manage SDN flow rules
    Sdn(SdnArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  WATCH
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only show packets carrying this protocol layer (e.g. TCP)
    #[arg(long, short = 'f')]
    pub protocol: Option<String>,

    /// Stop after this many batches (runs until Ctrl-C when omitted)
    #[arg(long, short = 'n')]
    pub batches: Option<u64>,

    /// Seconds to wait for the first batch before giving up
    #[arg(long, default_value = "10")]
    pub wait: u64,

    /// Retry the stream forever instead of giving up after the configured attempts
    #[arg(long)]
    pub retry_forever: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  METRICS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct MetricsArgs {
    #[command(subcommand)]
    pub command: MetricsCommand,
}

#[derive(Debug, Subcommand)]
pub enum MetricsCommand {
    /// Show the backend's current metrics snapshot
    Show,

    /// Clear the backend's packet history
    Clear,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  QOS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct QosArgs {
    #[command(subcommand)]
    pub command: QosCommand,
}

#[derive(Debug, Subcommand)]
pub enum QosCommand {
    /// List QoS rules
    #[command(alias = "ls")]
    List,

    /// Create or replace the QoS rule for a protocol
    ///
    /// With neither --priority nor --bandwidth-limit the rule is removed.
    Set {
        /// Protocol name (e.g. TCP, UDP, ICMP)
        protocol: String,

        /// Priority, higher is more important (default range 1-10)
        #[arg(long, short = 'P')]
        priority: Option<u8>,

        /// Bandwidth limit in bytes per second
        #[arg(long, short = 'b')]
        bandwidth_limit: Option<u64>,
    },

    /// Delete the QoS rule for a protocol
    #[command(alias = "rm")]
    Delete {
        /// Protocol name
        protocol: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SDN
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct SdnArgs {
    #[command(subcommand)]
    pub command: SdnCommand,
}

#[derive(Debug, Subcommand)]
pub enum SdnCommand {
    /// List SDN rules
    #[command(alias = "ls")]
    List,

    /// Create an SDN flow rule
    Create {
        /// Source IP address
        #[arg(long, short = 's')]
        source: String,

        /// Destination IP address
        #[arg(long, short = 'd')]
        destination: String,

        /// Flow action
        #[arg(long, short = 'a', value_enum, default_value = "allow")]
        action: SdnActionArg,
    },

    /// Delete an SDN rule by id
    #[command(alias = "rm")]
    Delete {
        /// Rule id as assigned by the backend
        id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SdnActionArg {
    Allow,
    Drop,
    Forward,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a config file with a single profile
    Init {
        /// Profile name
        #[arg(long, default_value = "local")]
        name: String,

        /// Backend base URL for the profile
        #[arg(long, default_value = "http://localhost:8000")]
        url: String,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Display current resolved configuration
    Show,

    /// Print the config file path
    Path,

    /// List configured profiles
    Profiles,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

//! Configuration for qoswatch.
//!
//! TOML profiles (one per backend), layered with environment overrides
//! and translated to `qoswatch_core::MonitorConfig`. The CLI adds
//! flag-aware wrappers on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use qoswatch_core::{MonitorConfig, ReconnectConfig, TrendConfig};

/// Prefix for environment overrides, e.g. `QOSWATCH_DEFAULTS__TIMEOUT=10`.
pub const ENV_PREFIX: &str = "QOSWATCH_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("unknown profile '{name}' (available: {available})")]
    UnknownProfile { name: String, available: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    /// Global defaults, overridable per profile.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "local".to_owned(),
            Profile {
                api_url: "http://localhost:8000".into(),
                ..Profile::default()
            },
        );
        Self {
            default_profile: Some("local".into()),
            defaults: Defaults::default(),
            profiles,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Packets kept in local history.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    #[serde(default)]
    pub trend: TrendSettings,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            history_capacity: default_history_capacity(),
            reconnect: ReconnectSettings::default(),
            trend: TrendSettings::default(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    5
}
fn default_history_capacity() -> usize {
    qoswatch_core::config::DEFAULT_HISTORY_CAPACITY
}

/// Stream reconnect policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Reconnect attempts after a failure before giving up.
    pub max_attempts: u32,
    /// Ignore `max_attempts` and keep trying.
    pub retry_forever: bool,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let core = ReconnectConfig::default();
        Self {
            initial_delay_ms: duration_ms(core.initial_delay),
            max_delay_ms: duration_ms(core.max_delay),
            max_attempts: core.max_retries.unwrap_or(5),
            retry_forever: false,
        }
    }
}

impl ReconnectSettings {
    fn to_reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_retries: (!self.retry_forever).then_some(self.max_attempts),
        }
    }
}

/// Trend bucketing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrendSettings {
    pub bucket_width_ms: u64,
    pub buckets: usize,
    pub optimization_ratio: f64,
}

impl Default for TrendSettings {
    fn default() -> Self {
        let core = TrendConfig::default();
        Self {
            bucket_width_ms: duration_ms(core.bucket_width),
            buckets: core.max_buckets,
            optimization_ratio: core.optimization_ratio,
        }
    }
}

impl TrendSettings {
    fn to_trend_config(&self) -> TrendConfig {
        TrendConfig {
            bucket_width: Duration::from_millis(self.bucket_width_ms),
            max_buckets: self.buckets,
            optimization_ratio: self.optimization_ratio,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A named backend profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Backend base URL (e.g. "http://localhost:8000").
    pub api_url: String,

    /// Telemetry stream URL. Derived from `api_url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,

    /// Override timeout (seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Override history retention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_capacity: Option<usize>,

    /// Lowest valid QoS priority, also used when a write omits one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_priority: Option<u8>,

    /// Highest valid QoS priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority: Option<u8>,
}

impl Config {
    /// Resolve a profile by name, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "local".into());

        self.profiles
            .get(&name)
            .map(|p| (name.clone(), p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                available: if self.profiles.is_empty() {
                    "none".into()
                } else {
                    self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
                },
                name,
            })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "qoswatch", "qoswatch").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("qoswatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Layered sources: built-in defaults, then the TOML file at `path`,
/// then `QOSWATCH_*` environment variables (`__` separates nested keys).
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment_for(path).extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to MonitorConfig ────────────────────────────────────

/// Build a `MonitorConfig` from a profile and the global defaults.
pub fn profile_to_monitor_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<MonitorConfig, ConfigError> {
    let api_url = parse_url("api_url", &profile.api_url)?;
    let stream_url = match profile.stream_url.as_deref() {
        Some(raw) => parse_url("stream_url", raw)?,
        None => qoswatch_core::derive_stream_url(&api_url).map_err(|e| {
            ConfigError::Validation {
                field: "stream_url".into(),
                reason: e.to_string(),
            }
        })?,
    };

    let mut config = MonitorConfig::new(api_url, stream_url);
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.history_capacity = profile.history_capacity.unwrap_or(defaults.history_capacity);
    config.reconnect = defaults.reconnect.to_reconnect_config();
    config.trend = defaults.trend.to_trend_config();
    if profile.min_priority.is_some() || profile.max_priority.is_some() {
        let (min, max) = config.qos_priority_range.clone().into_inner();
        config.qos_priority_range =
            profile.min_priority.unwrap_or(min)..=profile.max_priority.unwrap_or(max);
    }

    config.validate().map_err(|e| ConfigError::Validation {
        field: "profile".into(),
        reason: e.to_string(),
    })?;
    Ok(config)
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

// ── Tests ───────────────────────────────────────────────────────────

//! CLI-side configuration: locate the config file, pick a profile, and
//! layer command-line overrides on top before handing core a
//! `MonitorConfig`.
//!
//! The file format and env layering live in `qoswatch-config`.

use std::path::PathBuf;

use qoswatch_config::{Config, Profile};
use qoswatch_core::MonitorConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config` if given, else the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(qoswatch_config::config_path)
}

/// Load the config file named by `--config`, or the default one.
///
/// An explicit path must load cleanly; the default location falls back to
/// built-in defaults when missing or unreadable.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    match &global.config {
        Some(path) => Ok(qoswatch_config::load_config_from(path)?),
        None => Ok(qoswatch_config::load_config_or_default()),
    }
}

/// Resolve the active profile and apply flag overrides.
///
/// `--api-url` works without any profile as long as `--profile` was not
/// named explicitly.
pub fn resolve_profile(global: &GlobalOpts, cfg: &Config) -> Result<Profile, CliError> {
    let mut profile = match cfg.profile(global.profile.as_deref()) {
        Ok((_, profile)) => profile.clone(),
        Err(_) if global.profile.is_none() && global.api_url.is_some() => Profile::default(),
        Err(e) => return Err(e.into()),
    };

    if let Some(ref url) = global.api_url {
        profile.api_url.clone_from(url);
        // A profile's stream URL belongs to its own backend.
        profile.stream_url = None;
    }
    if let Some(ref url) = global.stream_url {
        profile.stream_url = Some(url.clone());
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }
    Ok(profile)
}

/// Build the runtime config for a backend-bound command.
pub fn build_monitor_config(global: &GlobalOpts) -> Result<MonitorConfig, CliError> {
    let cfg = load(global)?;
    let profile = resolve_profile(global, &cfg)?;
    tracing::debug!(api_url = %profile.api_url, "resolved backend profile");
    Ok(qoswatch_config::profile_to_monitor_config(
        &profile,
        &cfg.defaults,
    )?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["qoswatch"];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&["qos", "list"]);
        Cli::try_parse_from(argv).unwrap().global
    }

    #[test]
    fn test_api_url_flag_overrides_profile() {
        let mut cfg = Config::default();
        cfg.profiles.get_mut("local").unwrap().stream_url = Some("ws://elsewhere/ws".into());

        let profile = resolve_profile(&global(&["--api-url", "http://10.0.0.5:8000"]), &cfg).unwrap();
        assert_eq!(profile.api_url, "http://10.0.0.5:8000");
        assert_eq!(profile.stream_url, None);
    }

    #[test]
    fn test_api_url_without_profiles() {
        let cfg = Config {
            default_profile: None,
            defaults: qoswatch_config::Defaults::default(),
            profiles: std::collections::BTreeMap::new(),
        };
        let profile = resolve_profile(
            &global(&["--api-url", "http://backend:8000", "--timeout", "9"]),
            &cfg,
        )
        .unwrap();
        assert_eq!(profile.api_url, "http://backend:8000");
        assert_eq!(profile.timeout, Some(9));
    }

    #[test]
    fn test_named_missing_profile_is_an_error() {
        let err = resolve_profile(
            &global(&["--profile", "prod", "--api-url", "http://backend:8000"]),
            &Config::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CliError::ProfileNotFound { .. }));
    }
}

//! Config subcommand handlers.

use std::collections::BTreeMap;

use tabled::Tabled;

use qoswatch_config::{Config, Defaults, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "API URL")]
    api_url: String,
    #[tabled(rename = "Stream URL")]
    stream_url: String,
    #[tabled(rename = "Default")]
    default: String,
}

#[derive(serde::Serialize)]
struct NamedProfile<'a> {
    name: &'a str,
    default: bool,
    #[serde(flatten)]
    profile: &'a Profile,
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init { name, url, force } => {
            let path = config::config_path(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }

            url::Url::parse(&url).map_err(|e| CliError::Validation {
                field: "url".into(),
                reason: format!("invalid URL '{url}': {e}"),
            })?;

            let cfg = Config {
                default_profile: Some(name.clone()),
                defaults: Defaults::default(),
                profiles: BTreeMap::from([(
                    name.clone(),
                    Profile {
                        api_url: url,
                        ..Profile::default()
                    },
                )]),
            };
            qoswatch_config::save_config_to(&cfg, &path)?;

            if !global.quiet {
                eprintln!("Configuration written to {}", path.display());
                eprintln!("  Active profile: {name}");
            }
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("{c:#?}\n({e})")),
                |c| c.default_profile.clone().unwrap_or_default(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path(global).display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load(global)?;
            let default = cfg.default_profile.as_deref();
            let profiles: Vec<NamedProfile<'_>> = cfg
                .profiles
                .iter()
                .map(|(name, profile)| NamedProfile {
                    name,
                    default: Some(name.as_str()) == default,
                    profile,
                })
                .collect();
            let out = output::render_list(
                &global.output,
                &profiles,
                |p| ProfileRow {
                    name: p.name.to_owned(),
                    api_url: p.profile.api_url.clone(),
                    stream_url: p
                        .profile
                        .stream_url
                        .clone()
                        .unwrap_or_else(|| "(derived)".into()),
                    default: if p.default { "*".into() } else { String::new() },
                },
                |p| p.name.to_owned(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

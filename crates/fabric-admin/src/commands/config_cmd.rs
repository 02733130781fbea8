//! Config subcommand handlers.

use fabric_sync_config::DEFAULT_PROFILE;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

/// Starter config written by `config init`.
fn starter_config() -> Config {
    let mut cfg = Config::default();
    cfg.profiles.insert(DEFAULT_PROFILE.into(), Profile::default());
    cfg
}

fn to_toml(cfg: &Config) -> Result<String, CliError> {
    toml::to_string_pretty(cfg).map_err(|e| CliError::Render(e.to_string()))
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let path = config::config_path();
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            let rendered = match global.output {
                // A table of nested profiles reads worse than the file itself.
                OutputFormat::Table => to_toml(&cfg)?,
                format => output::render_single(
                    format,
                    &cfg,
                    |_| String::new(),
                    |c| c.default_profile.clone().unwrap_or_default(),
                )?,
            };
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            let path = config::config_path();
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }

            config::save_config_to(&starter_config(), &path)?;
            tracing::info!(path = %path.display(), "wrote config");
            if !global.quiet {
                eprintln!("Config written to {}", path.display());
            }
            Ok(())
        }
    }
}

//! CLI configuration: thin wrapper around `fabric_sync_config` shared types.
//!
//! Adds resolution that respects the `--profile` flag.

use fabric_sync_core::SyncConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use fabric_sync_config::{Config, Profile, config_path, load_config, save_config_to};

// ── CLI-specific helpers ────────────────────────────────────────────

/// A profile resolved against the loaded config.
pub struct ResolvedProfile {
    pub name: String,
    pub profile: Profile,
    pub sync: SyncConfig,
}

/// Load the config and translate the active profile into a `SyncConfig`.
pub fn resolve(global: &GlobalOpts) -> Result<ResolvedProfile, CliError> {
    let config = load_config()?;
    let (name, profile) = fabric_sync_config::resolve_profile(&config, global.profile.as_deref())
        .map_err(|e| match e {
            fabric_sync_config::ConfigError::ProfileNotFound { name } => CliError::ProfileNotFound {
                name,
                available: available_profiles(&config),
            },
            other => other.into(),
        })?;
    let sync = fabric_sync_config::profile_to_sync_config(&profile, &config.defaults)?;

    tracing::debug!(profile = %name, "resolved profile");
    Ok(ResolvedProfile {
        name,
        profile,
        sync,
    })
}

fn available_profiles(config: &Config) -> String {
    let mut names: Vec<&str> = config.profiles.keys().map(String::as_str).collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort_unstable();
    names.join(", ")
}

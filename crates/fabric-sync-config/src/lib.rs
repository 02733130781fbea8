//! Shared configuration for fabric-sync tools.
//!
//! TOML profiles, environment overrides, and translation to
//! `fabric_sync_core::SyncConfig`. The CLI layers its `GlobalOpts`
//! on top of what this crate resolves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fabric_sync_api::{EndpointId, FabricIndex, NodeId, ProductId, VendorId};
use fabric_sync_core::SyncConfig;
use fabric_sync_core::commissioner_control::COMMISSION_NODE_TIMEOUT_RANGE;
use fabric_sync_core::config::DEFAULT_COMMISSIONER_CONTROL_ENDPOINT;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "FABRIC_SYNC_CONFIG";

const ENV_PREFIX: &str = "FABRIC_SYNC_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },

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

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named fabric profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some(DEFAULT_PROFILE.into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

/// Name of the profile used when nothing else is selected.
pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Subscription max-interval ceiling, in seconds.
    #[serde(default = "default_max_interval_ceiling")]
    pub max_interval_ceiling: u64,

    /// `CommissionNode` response timeout, in seconds.
    #[serde(default = "default_commission_timeout")]
    pub commission_timeout: u64,

    /// ICD stay-active duration, in seconds.
    #[serde(default = "default_stay_active")]
    pub stay_active: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            max_interval_ceiling: default_max_interval_ceiling(),
            commission_timeout: default_commission_timeout(),
            stay_active: default_stay_active(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_max_interval_ceiling() -> u64 {
    300
}
fn default_commission_timeout() -> u64 {
    30
}
fn default_stay_active() -> u64 {
    30
}

/// A named fabric profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Index of the local fabric.
    #[serde(default = "default_fabric_index")]
    pub fabric_index: u8,

    /// Operational node id of this administrator.
    #[serde(default = "default_controller_node_id")]
    pub controller_node_id: u64,

    /// Node id of the local fabric bridge.
    pub local_bridge: Option<u64>,

    /// Node id of the remote fabric's bridge.
    pub remote_bridge: Option<u64>,

    /// Commissioner Control endpoint on the remote bridge.
    pub commissioner_control_endpoint: Option<EndpointId>,

    /// Vendor id for commissioning approval requests.
    pub vendor_id: Option<VendorId>,

    /// Product id for commissioning approval requests.
    pub product_id: Option<ProductId>,

    /// Subscription min interval, in seconds.
    pub min_interval: Option<u64>,

    /// Override the max-interval ceiling.
    pub max_interval_ceiling: Option<u64>,

    /// Override the `CommissionNode` response timeout.
    pub commission_timeout: Option<u64>,

    /// Override the stay-active duration.
    pub stay_active: Option<u64>,

    /// Request commissioning approval for endpoints the remote bridge adds.
    #[serde(default)]
    pub auto_request_approval: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            fabric_index: default_fabric_index(),
            controller_node_id: default_controller_node_id(),
            local_bridge: None,
            remote_bridge: None,
            commissioner_control_endpoint: None,
            vendor_id: None,
            product_id: None,
            min_interval: None,
            max_interval_ceiling: None,
            commission_timeout: None,
            stay_active: None,
            auto_request_approval: false,
        }
    }
}

fn default_fabric_index() -> u8 {
    1
}
fn default_controller_node_id() -> u64 {
    0x0001_B669
}

impl Profile {
    pub fn fabric_index(&self) -> FabricIndex {
        FabricIndex(self.fabric_index)
    }

    pub fn controller_node_id(&self) -> NodeId {
        NodeId(self.controller_node_id)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via `FABRIC_SYNC_CONFIG` or platform
/// conventions.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }

    ProjectDirs::from("org", "fabric-sync", "fabric-sync").map_or_else(
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
    p.push("fabric-sync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
///
/// A missing file is not an error; the defaults and environment still
/// apply. Nested keys use a double underscore, e.g.
/// `FABRIC_SYNC_DEFAULTS__OUTPUT=json`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__").ignore(&["config"]));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
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

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

/// Pick the profile named on the command line, else the config's default.
///
/// The implicit `default` profile resolves to `Profile::default()` when
/// the file does not define it.
pub fn resolve_profile(
    config: &Config,
    name: Option<&str>,
) -> Result<(String, Profile), ConfigError> {
    let name = name
        .or(config.default_profile.as_deref())
        .unwrap_or(DEFAULT_PROFILE);

    match config.profiles.get(name) {
        Some(profile) => Ok((name.to_owned(), profile.clone())),
        None if name == DEFAULT_PROFILE => Ok((name.to_owned(), Profile::default())),
        None => Err(ConfigError::ProfileNotFound { name: name.into() }),
    }
}

/// Build a validated `SyncConfig` from a profile and the global defaults.
pub fn profile_to_sync_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<SyncConfig, ConfigError> {
    if profile.fabric_index == 0 {
        return Err(invalid("fabric_index", "fabric index 0 is reserved"));
    }
    if profile.controller_node_id == 0 {
        return Err(invalid("controller_node_id", "node id 0 is not operational"));
    }
    if let (Some(local), Some(remote)) = (profile.local_bridge, profile.remote_bridge) {
        if local == remote {
            return Err(invalid(
                "remote_bridge",
                format!("0x{remote:X} is also configured as the local bridge"),
            ));
        }
    }

    let commission_timeout = profile.commission_timeout.unwrap_or(defaults.commission_timeout);
    if !COMMISSION_NODE_TIMEOUT_RANGE.contains(&commission_timeout) {
        return Err(invalid(
            "commission_timeout",
            format!(
                "{commission_timeout}s is outside {}..={}s",
                COMMISSION_NODE_TIMEOUT_RANGE.start(),
                COMMISSION_NODE_TIMEOUT_RANGE.end()
            ),
        ));
    }

    let min_interval = profile.min_interval.unwrap_or(0);
    let ceiling = profile
        .max_interval_ceiling
        .unwrap_or(defaults.max_interval_ceiling);
    if ceiling == 0 || min_interval > ceiling {
        return Err(invalid(
            "max_interval_ceiling",
            format!(
                "ceiling {ceiling}s must be non-zero and at least min_interval {min_interval}s"
            ),
        ));
    }

    let stay_active = profile.stay_active.unwrap_or(defaults.stay_active);
    if stay_active == 0 {
        return Err(invalid("stay_active", "duration must be non-zero"));
    }

    let base = SyncConfig::default();
    Ok(SyncConfig {
        local_bridge: profile.local_bridge.map(NodeId),
        remote_bridge: profile.remote_bridge.map(NodeId),
        commissioner_control_endpoint: profile
            .commissioner_control_endpoint
            .unwrap_or(DEFAULT_COMMISSIONER_CONTROL_ENDPOINT),
        vendor_id: profile.vendor_id.unwrap_or(base.vendor_id),
        product_id: profile.product_id.unwrap_or(base.product_id),
        subscription_min_interval: Duration::from_secs(min_interval),
        subscription_max_interval_ceiling: Duration::from_secs(ceiling),
        commission_node_response_timeout: Duration::from_secs(commission_timeout),
        stay_active_duration: Duration::from_secs(stay_active),
        auto_request_approval: profile.auto_request_approval,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some(DEFAULT_PROFILE));
        assert_eq!(config.defaults.commission_timeout, 30);
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn profile_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
default_profile = "lab"

[defaults]
output = "json"
stay_active = 45

[profiles.lab]
fabric_index = 2
local_bridge = 0x10
remote_bridge = 0x100
commissioner_control_endpoint = 3
commission_timeout = 60
auto_request_approval = true
"#,
        );

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.defaults.output, "json");

        let (name, profile) = resolve_profile(&config, None).unwrap();
        assert_eq!(name, "lab");
        assert_eq!(profile.fabric_index(), FabricIndex(2));

        let sync = profile_to_sync_config(&profile, &config.defaults).unwrap();
        assert_eq!(sync.local_bridge, Some(NodeId(0x10)));
        assert_eq!(sync.remote_bridge, Some(NodeId(0x100)));
        assert_eq!(sync.commissioner_control_endpoint, 3);
        assert_eq!(sync.commission_node_response_timeout, Duration::from_secs(60));
        assert_eq!(sync.stay_active_duration, Duration::from_secs(45));
        assert_eq!(sync.vendor_id, 0xFFF1);
        assert!(sync.auto_request_approval);
        assert!(!profile_to_sync_config(&Profile::default(), &config.defaults)
            .unwrap()
            .auto_request_approval);
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let config = Config::default();
        assert!(matches!(
            resolve_profile(&config, Some("nope")),
            Err(ConfigError::ProfileNotFound { name }) if name == "nope"
        ));
        let (_, implicit) = resolve_profile(&config, None).unwrap();
        assert_eq!(implicit, Profile::default());
    }

    #[test]
    fn commission_timeout_outside_range_is_rejected() {
        let profile = Profile {
            commission_timeout: Some(121),
            ..Profile::default()
        };
        let err = profile_to_sync_config(&profile, &Defaults::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation { ref field, .. } if field == "commission_timeout"
        ));
    }

    #[test]
    fn same_node_cannot_be_both_bridges() {
        let profile = Profile {
            local_bridge: Some(7),
            remote_bridge: Some(7),
            ..Profile::default()
        };
        assert!(profile_to_sync_config(&profile, &Defaults::default()).is_err());
    }

    #[test]
    fn min_interval_above_ceiling_is_rejected() {
        let profile = Profile {
            min_interval: Some(600),
            ..Profile::default()
        };
        assert!(profile_to_sync_config(&profile, &Defaults::default()).is_err());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.profiles.insert(
            DEFAULT_PROFILE.into(),
            Profile {
                remote_bridge: Some(0x100),
                ..Profile::default()
            },
        );
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, config);
    }
}

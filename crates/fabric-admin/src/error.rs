//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use fabric_sync_config::ConfigError;
use fabric_sync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Fabric ───────────────────────────────────────────────────────
    #[error("Could not reach {peer}: {reason}")]
    #[diagnostic(
        code(fabric_admin::connection_failed),
        help("Check that the node is commissioned onto this fabric and online.")
    )]
    ConnectionFailed { peer: String, reason: String },

    #[error("Interaction timed out")]
    #[diagnostic(
        code(fabric_admin::timeout),
        help("The peer stopped answering. ICDs may need `--icd` so they are kept active.")
    )]
    Timeout,

    #[error("{resource} '{identifier}' not found")]
    #[diagnostic(code(fabric_admin::not_found))]
    NotFound { resource: String, identifier: String },

    #[error("{message}")]
    #[diagnostic(
        code(fabric_admin::busy),
        help("Wait for the in-flight operation to finish and retry.")
    )]
    Busy { message: String },

    #[error("No remote bridge configured")]
    #[diagnostic(
        code(fabric_admin::no_remote_bridge),
        help("Set `remote_bridge` in your profile. Run: fabric-admin config path")
    )]
    NoRemoteBridge,

    #[error("Operation failed: {message}")]
    #[diagnostic(code(fabric_admin::operation_failed))]
    OperationFailed { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(fabric_admin::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(fabric_admin::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create a config with: fabric-admin config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(fabric_admin::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error("Configuration could not be loaded")]
    #[diagnostic(code(fabric_admin::config))]
    Config(#[source] ConfigError),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {0}")]
    #[diagnostic(code(fabric_admin::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout => exit_code::TIMEOUT,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Busy { .. } | Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::NoRemoteBridge => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::ProfileNotFound { name } => CliError::ProfileNotFound {
                name,
                available: String::from("(none)"),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { peer, reason } => CliError::ConnectionFailed {
                peer: peer.to_string(),
                reason,
            },

            CoreError::Timeout => CliError::Timeout,

            CoreError::DeviceNotFound { peer } => CliError::NotFound {
                resource: "device".into(),
                identifier: peer.to_string(),
            },

            CoreError::SubscriptionNotFound { peer } => CliError::NotFound {
                resource: "subscription".into(),
                identifier: peer.to_string(),
            },

            e @ (CoreError::SynchronizerBusy { .. }
            | CoreError::AlreadyExists { .. }
            | CoreError::OperationInProgress { .. }) => CliError::Busy {
                message: e.to_string(),
            },

            CoreError::NoRemoteBridge => CliError::NoRemoteBridge,

            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::FabricMismatch { peer } => CliError::Validation {
                field: "peer".into(),
                reason: format!("{peer} is not on this fabric"),
            },

            other @ (CoreError::Status { .. }
            | CoreError::Api { .. }
            | CoreError::AlreadyStarted
            | CoreError::ControllerStopped
            | CoreError::Cancelled { .. }
            | CoreError::Internal(_)) => CliError::OperationFailed {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use fabric_sync_api::{FabricIndex, NodeId, PeerNodeId};
    use fabric_sync_core::SynchronizationState;

    use super::*;

    #[test]
    fn busy_synchronizer_is_a_conflict() {
        let err: CliError = CoreError::SynchronizerBusy {
            state: SynchronizationState::Connecting,
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::CONFLICT);
    }

    #[test]
    fn unknown_device_is_not_found() {
        let peer = PeerNodeId::new(FabricIndex(1), NodeId(0x10));
        let err: CliError = CoreError::DeviceNotFound { peer }.into();
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
        assert!(err.to_string().contains("device"));
    }

    #[test]
    fn config_validation_is_a_usage_error() {
        let err: CliError = ConfigError::Validation {
            field: "commission_timeout".into(),
            reason: "too long".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}

// ── Core error types ──
//
// Domain errors surfaced by the controller facade. Transport failures
// from `fabric_sync_api` are translated by the `From` impl below so
// callers never match on interaction-model details.

use fabric_sync_api::{PeerNodeId, StatusCode};
use thiserror::Error;

use crate::synchronizer::SynchronizationState;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Rejections ───────────────────────────────────────────────────
    #[error("Device synchronization already in progress (state {state})")]
    SynchronizerBusy { state: SynchronizationState },

    #[error("Subscription for {peer} already exists")]
    AlreadyExists { peer: PeerNodeId },

    #[error("No subscription for {peer}")]
    SubscriptionNotFound { peer: PeerNodeId },

    #[error("Device not found: {peer}")]
    DeviceNotFound { peer: PeerNodeId },

    #[error("{peer} is not on the controller's fabric")]
    FabricMismatch { peer: PeerNodeId },

    #[error("A {operation} command is already in flight")]
    OperationInProgress { operation: String },

    #[error("No remote bridge configured")]
    NoRemoteBridge,

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── Transport ────────────────────────────────────────────────────
    #[error("Cannot connect to {peer}: {reason}")]
    ConnectionFailed { peer: PeerNodeId, reason: String },

    #[error("Interaction timed out")]
    Timeout,

    #[error("Peer returned status {status}")]
    Status { status: StatusCode },

    #[error("Interaction error: {message}")]
    Api { message: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Controller already started")]
    AlreadyStarted,

    #[error("Controller stopped")]
    ControllerStopped,

    #[error("Operation cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from interaction-layer errors ─────────────────────────

impl From<fabric_sync_api::Error> for CoreError {
    fn from(err: fabric_sync_api::Error) -> Self {
        match err {
            fabric_sync_api::Error::SessionEstablishment { peer, reason } => {
                CoreError::ConnectionFailed { peer, reason }
            }
            fabric_sync_api::Error::Timeout => CoreError::Timeout,
            fabric_sync_api::Error::Status(status) => CoreError::Status { status },
            other @ (fabric_sync_api::Error::SessionClosed
            | fabric_sync_api::Error::RequestRejected(_)
            | fabric_sync_api::Error::Decode(_)) => CoreError::Api {
                message: other.to_string(),
            },
        }
    }
}

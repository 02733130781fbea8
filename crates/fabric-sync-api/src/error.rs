use thiserror::Error;

use crate::ids::{PeerNodeId, StatusCode};

/// Failure reported by the interaction-model collaborator.
///
/// Cloneable so a single failure can be fanned out to every report
/// stream observing the same peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // ── Session ─────────────────────────────────────────────────────
    /// CASE session establishment to the peer failed.
    #[error("Session establishment to {peer} failed: {reason}")]
    SessionEstablishment { peer: PeerNodeId, reason: String },

    /// The secure session was closed underneath an exchange.
    #[error("Session closed")]
    SessionClosed,

    // ── Interaction ─────────────────────────────────────────────────
    /// No response within the exchange or subscription liveness window.
    #[error("Interaction timed out")]
    Timeout,

    /// The peer answered with a non-success status.
    #[error("Peer returned status {0}")]
    Status(StatusCode),

    /// The request could not be issued at all.
    #[error("Request could not be issued: {0}")]
    RequestRejected(String),

    // ── Data ────────────────────────────────────────────────────────
    /// A value did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Returns `true` for liveness timeouts that the transport is
    /// expected to recover from on its own.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns the peer status code, if this error carries one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(code) => Some(*code),
            _ => None,
        }
    }
}

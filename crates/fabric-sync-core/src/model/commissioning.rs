// ── Commissioning domain types ──

use fabric_sync_api::{FabricIndex, NodeId, PeerNodeId, ProductId, StatusCode, VendorId};
use serde::{Deserialize, Serialize};

/// `AdministratorCommissioning.WindowStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
pub enum WindowStatus {
    #[default]
    WindowNotOpen,
    EnhancedWindowOpen,
    BasicWindowOpen,
}

impl WindowStatus {
    /// Map the wire enumeration; unknown values yield `None`.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::WindowNotOpen),
            1 => Some(Self::EnhancedWindowOpen),
            2 => Some(Self::BasicWindowOpen),
            _ => None,
        }
    }
}

/// Live view of a device's AdministratorCommissioning cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCommissioningState {
    pub peer: PeerNodeId,
    pub window_status: WindowStatus,
    /// Fabric that opened the window, if one is open.
    pub opener_fabric_index: Option<FabricIndex>,
    /// Vendor of the administrator that opened the window.
    pub opener_vendor_id: Option<VendorId>,
}

impl AdminCommissioningState {
    pub fn new(peer: PeerNodeId) -> Self {
        Self {
            peer,
            window_status: WindowStatus::WindowNotOpen,
            opener_fabric_index: None,
            opener_vendor_id: None,
        }
    }
}

/// Reverse-commissioning approval request sent to the remote bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissioningApprovalRequest {
    /// Caller-chosen nonce echoed back by the bridge.
    pub request_id: u64,
    pub vendor_id: VendorId,
    pub product_id: ProductId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// `CommissionerControl.CommissioningRequestResult` event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissioningRequestResult {
    pub request_id: u64,
    pub client_node_id: NodeId,
    pub status_code: StatusCode,
    pub fabric_index: FabricIndex,
}

/// Parameters returned by `CommissionNode` for opening a commissioning
/// window on the bridged device. Passed through opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseCommissioningWindow {
    pub commissioning_timeout_secs: u16,
    pub pake_passcode_verifier: Vec<u8>,
    pub discriminator: u16,
    pub iterations: u32,
    pub salt: Vec<u8>,
}

// ── Synchronized device record ──

use chrono::{DateTime, Utc};
use fabric_sync_api::{EndpointId, PeerNodeId, ProductId, VendorId};
use serde::{Deserialize, Serialize};

/// Identity of a device mirrored from the remote fabric.
///
/// Created once by a successful synchronization and owned by the
/// controller's device store until the device is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedDevice {
    pub peer: PeerNodeId,
    /// Endpoint of this device on the remote bridge, or the root endpoint.
    pub endpoint_id: EndpointId,
    pub is_icd: bool,
    pub unique_id: Option<String>,
    pub vendor_name: Option<String>,
    pub vendor_id: Option<VendorId>,
    pub product_name: Option<String>,
    pub product_id: Option<ProductId>,
    pub node_label: Option<String>,
    pub hardware_version_string: Option<String>,
    pub software_version_string: Option<String>,
    pub synchronized_at: DateTime<Utc>,
}

impl SyncedDevice {
    /// Best human-readable label: node label, then product name, then unique id.
    pub fn display_name(&self) -> Option<&str> {
        self.node_label
            .as_deref()
            .or(self.product_name.as_deref())
            .or(self.unique_id.as_deref())
    }
}

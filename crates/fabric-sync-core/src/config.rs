// ── Runtime synchronization configuration ──
//
// Tuning for the bridge layer. Built by the CLI (or a test) and handed
// to `Controller`; core never reads config files.

use std::time::Duration;

use fabric_sync_api::{EndpointId, NodeId, ProductId, VendorId};

/// Default subscription max-interval ceiling.
pub const DEFAULT_MAX_INTERVAL_CEILING: Duration = Duration::from_secs(300);
/// Default `ResponseTimeoutSeconds` sent with `CommissionNode`.
pub const DEFAULT_COMMISSION_NODE_TIMEOUT: Duration = Duration::from_secs(30);
/// Endpoint of the aggregator hosting Commissioner Control on a bridge.
pub const DEFAULT_COMMISSIONER_CONTROL_ENDPOINT: EndpointId = 1;

/// Configuration for one bridge-layer controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Node id of the local fabric bridge, if already known.
    pub local_bridge: Option<NodeId>,
    /// Node id of the remote fabric's bridge, if already known.
    pub remote_bridge: Option<NodeId>,
    /// Endpoint hosting Commissioner Control on the remote bridge.
    pub commissioner_control_endpoint: EndpointId,
    /// Vendor id sent with commissioning approval requests.
    pub vendor_id: VendorId,
    /// Product id sent with commissioning approval requests.
    pub product_id: ProductId,
    /// Minimum reporting interval requested by device subscriptions.
    pub subscription_min_interval: Duration,
    /// Max-interval ceiling requested by device subscriptions.
    pub subscription_max_interval_ceiling: Duration,
    /// `ResponseTimeoutSeconds` for `CommissionNode` (30–120 s).
    pub commission_node_response_timeout: Duration,
    /// Default ICD stay-active duration.
    pub stay_active_duration: Duration,
    /// Ask the remote bridge for commissioning approval whenever its
    /// PartsList gains an endpoint that is not one of our own devices.
    pub auto_request_approval: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_bridge: None,
            remote_bridge: None,
            commissioner_control_endpoint: DEFAULT_COMMISSIONER_CONTROL_ENDPOINT,
            vendor_id: 0xFFF1,
            product_id: 0x8001,
            subscription_min_interval: Duration::ZERO,
            subscription_max_interval_ceiling: DEFAULT_MAX_INTERVAL_CEILING,
            commission_node_response_timeout: DEFAULT_COMMISSION_NODE_TIMEOUT,
            stay_active_duration: Duration::from_secs(30),
            auto_request_approval: false,
        }
    }
}

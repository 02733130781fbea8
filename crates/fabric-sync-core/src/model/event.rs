// ── Bridge events ──
//
// Broadcast to every `Controller::events()` subscriber.

use fabric_sync_api::{EndpointId, PeerNodeId};
use serde::Serialize;

use super::commissioning::{AdminCommissioningState, ReverseCommissioningWindow};
use super::device::SyncedDevice;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    DeviceSynchronized { device: SyncedDevice },
    DeviceRemoved { peer: PeerNodeId },
    /// One notification per subscription report carrying changes.
    AdminCommissioningChanged { state: AdminCommissioningState },
    ReachabilityChanged { peer: PeerNodeId, reachable: bool },
    SubscriptionEnded { peer: PeerNodeId },
    /// Sent on our own initiative for a newly bridged endpoint.
    CommissioningApprovalRequested {
        endpoint: EndpointId,
        request_id: u64,
    },
    ReverseCommissioningWindowOpened {
        request_id: u64,
        window: ReverseCommissioningWindow,
    },
    /// PartsList and `CommissioningRequestResult` updates stopped; set
    /// the remote bridge again to resume them.
    RemoteBridgeWatchLost { bridge: PeerNodeId },
    BridgedEndpointAdded { endpoint: EndpointId },
    BridgedEndpointRemoved { endpoint: EndpointId },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use fabric_sync_api::{FabricIndex, NodeId};

    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let event = BridgeEvent::ReachabilityChanged {
            peer: PeerNodeId::new(FabricIndex(1), NodeId(0x10)),
            reachable: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reachability_changed");
        assert_eq!(json["peer"]["node_id"], 0x10);
        assert_eq!(json["reachable"], false);
    }

    #[test]
    fn endpoint_events_carry_the_endpoint() {
        let event = BridgeEvent::BridgedEndpointRemoved { endpoint: 4 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"bridged_endpoint_removed","endpoint":4}"#);
    }
}

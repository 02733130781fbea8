// ── Identifier types ──
//
// Node, fabric and protocol identifiers shared by every layer above.

use std::fmt;

use serde::{Deserialize, Serialize};

pub type EndpointId = u16;
pub type ClusterId = u32;
pub type AttributeId = u32;
pub type CommandId = u32;
pub type EventId = u32;
pub type VendorId = u16;
pub type ProductId = u16;

/// Index of a fabric in the local node's fabric table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FabricIndex(pub u8);

impl fmt::Display for FabricIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operational node id, unique within one fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A node scoped to the fabric it lives on.
///
/// The only identity of a peer that stays stable across both fabrics
/// a bridge participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerNodeId {
    pub fabric_index: FabricIndex,
    pub node_id: NodeId,
}

impl PeerNodeId {
    pub fn new(fabric_index: FabricIndex, node_id: NodeId) -> Self {
        Self {
            fabric_index,
            node_id,
        }
    }
}

impl fmt::Display for PeerNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.fabric_index, self.node_id)
    }
}

/// Interaction-model status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u8);

impl StatusCode {
    pub const SUCCESS: Self = Self(0x00);
    pub const FAILURE: Self = Self(0x01);
    pub const INVALID_COMMAND: Self = Self(0x85);
    pub const UNSUPPORTED_COMMAND: Self = Self(0x81);
    pub const UNSUPPORTED_ATTRIBUTE: Self = Self(0x86);
    pub const BUSY: Self = Self(0x9C);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_node_id_display_includes_fabric_and_node() {
        let peer = PeerNodeId::new(FabricIndex(2), NodeId(42));
        assert_eq!(peer.to_string(), "[2:0x000000000000002A]");
    }

    #[test]
    fn peers_on_different_fabrics_are_distinct() {
        let a = PeerNodeId::new(FabricIndex(1), NodeId(7));
        let b = PeerNodeId::new(FabricIndex(2), NodeId(7));
        assert_ne!(a, b);
    }
}

// ── Domain model ──
//
// Canonical types the bridge layer publishes to its consumers: the
// synchronized device record, commissioning state, and outward events.

pub mod commissioning;
pub mod device;
pub mod event;

// ── Re-exports ──────────────────────────────────────────────────────

pub use commissioning::{
    AdminCommissioningState, CommissioningApprovalRequest, CommissioningRequestResult,
    ReverseCommissioningWindow, WindowStatus,
};
pub use device::SyncedDevice;
pub use event::BridgeEvent;

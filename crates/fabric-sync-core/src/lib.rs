// fabric-sync-core: device synchronization, subscriptions and reverse
// commissioning for a fabric bridge.

pub mod command;
pub mod commissioner_control;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod store;
pub mod stream;
pub mod subscription;
pub mod synchronizer;

mod convert;
mod manager;
mod operation;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandResult};
pub use commissioner_control::CommandType;
pub use config::SyncConfig;
pub use controller::{Controller, ControllerState};
pub use error::CoreError;
pub use store::DeviceStore;
pub use stream::{EntityStream, Snapshot};
pub use subscription::SubscriptionState;
pub use synchronizer::{BridgedUniqueIdResolver, SynchronizationState, UniqueIdResolver};

pub use model::{
    AdminCommissioningState, BridgeEvent, CommissioningApprovalRequest, CommissioningRequestResult,
    ReverseCommissioningWindow, SyncedDevice, WindowStatus,
};

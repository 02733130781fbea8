// ── Reactive device store ──
//
// Records published by the bridge layer. Written only from the event
// loop; read from anywhere through snapshots and `EntityStream`s.

mod collection;

use std::sync::Arc;

use fabric_sync_api::PeerNodeId;

use self::collection::EntityCollection;
use crate::model::{AdminCommissioningState, SyncedDevice};
use crate::stream::{EntityStream, Snapshot};

pub struct DeviceStore {
    pub(crate) devices: EntityCollection<PeerNodeId, SyncedDevice>,
    pub(crate) commissioning: EntityCollection<PeerNodeId, AdminCommissioningState>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self {
            devices: EntityCollection::new(),
            commissioning: EntityCollection::new(),
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn devices_snapshot(&self) -> Snapshot<SyncedDevice> {
        self.devices.snapshot()
    }

    pub fn device(&self, peer: &PeerNodeId) -> Option<Arc<SyncedDevice>> {
        self.devices.get(peer)
    }

    pub fn admin_commissioning(&self, peer: &PeerNodeId) -> Option<Arc<AdminCommissioningState>> {
        self.commissioning.get(peer)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_devices(&self) -> EntityStream<SyncedDevice> {
        EntityStream::new(self.devices.subscribe())
    }

    pub fn subscribe_commissioning(&self) -> EntityStream<AdminCommissioningState> {
        EntityStream::new(self.commissioning.subscribe())
    }

    // ── Mutations (event loop only) ──────────────────────────────────

    /// Returns `true` when the device was not known before.
    pub(crate) fn upsert_device(&self, device: SyncedDevice) -> bool {
        self.devices.upsert(device.peer, device)
    }

    /// Drops the device and its last-known commissioning state.
    pub(crate) fn remove_device(&self, peer: &PeerNodeId) -> Option<Arc<SyncedDevice>> {
        self.commissioning.remove(peer);
        self.devices.remove(peer)
    }

    pub(crate) fn set_admin_commissioning(&self, state: AdminCommissioningState) {
        self.commissioning.upsert(state.peer, state);
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

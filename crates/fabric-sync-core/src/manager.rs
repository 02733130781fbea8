// ── Device manager ──
//
// Owns every piece of bridge-layer state: topology, the synchronizer,
// the subscription registry, Commissioner Control and pending one-shot
// commands. Lives inside the event loop task; commands and I/O outcomes
// are applied one at a time.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use fabric_sync_api::clusters::{
    CLUSTER_COMMISSIONER_CONTROL_EVENT_ID_COMMISSIONING_REQUEST_RESULT,
    CLUSTER_DESCRIPTOR_ATTR_ID_PARTS_LIST, CLUSTER_ICD_MANAGEMENT_CMD_ID_STAY_ACTIVE_REQUEST,
    CLUSTER_ID_COMMISSIONER_CONTROL, CLUSTER_ID_DESCRIPTOR, CLUSTER_ID_ICD_MANAGEMENT,
    ROOT_ENDPOINT,
};
use fabric_sync_api::{
    AttributePath, EndpointId, EventPath, InvokeRequest, NodeId, PeerNodeId, ReportItem,
    SubscribeRequest,
};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::DropGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::{Command, CommandResult};
use crate::commissioner_control::{CommissionerControl, Completion};
use crate::config::SyncConfig;
use crate::convert::{
    decode_commissioning_request_result, decode_parts_list, decode_stay_active_response,
    stay_active_fields,
};
use crate::error::CoreError;
use crate::model::{
    AdminCommissioningState, BridgeEvent, CommissioningApprovalRequest, SyncedDevice,
};
use crate::operation::{
    LoopEvent, OneShotCommand, OneShotProgress, OperationId, PeerLink, Route, SessionEvent,
};
use crate::store::DeviceStore;
use crate::subscription::{SubscriptionIntervals, SubscriptionNotifier, SubscriptionRegistry};
use crate::synchronizer::{DeviceSynchronizer, SyncContext, SyncOutcome, UniqueIdResolver};

type Reply = oneshot::Sender<Result<CommandResult, CoreError>>;

#[derive(Debug, Default)]
struct Topology {
    local_bridge: Option<NodeId>,
    remote_bridge: Option<PeerNodeId>,
    /// Local node -> endpoint mirroring it on the remote bridge.
    bridged: BTreeMap<NodeId, EndpointId>,
    /// Last PartsList reported by the remote bridge.
    parts_list: BTreeSet<EndpointId>,
}

/// Subscription to the remote bridge's PartsList and
/// `CommissioningRequestResult` events.
struct RemoteBridgeWatch {
    peer: PeerNodeId,
    op: OperationId,
    reports: Option<DropGuard>,
}

struct PendingStayActive {
    command: OneShotCommand,
    reply: Reply,
}

pub(crate) struct DeviceManager {
    link: PeerLink,
    config: SyncConfig,
    store: Arc<DeviceStore>,
    events: broadcast::Sender<BridgeEvent>,
    topology: Topology,
    synchronizer: DeviceSynchronizer,
    sync_reply: Option<Reply>,
    registry: SubscriptionRegistry,
    commissioner: CommissionerControl,
    commissioner_replies: HashMap<OperationId, Reply>,
    stay_active: HashMap<OperationId, PendingStayActive>,
    remote_watch: Option<RemoteBridgeWatch>,
    /// New bridged endpoints awaiting an automatic approval request.
    auto_approvals: VecDeque<EndpointId>,
}

impl DeviceManager {
    pub(crate) fn new(
        link: PeerLink,
        config: SyncConfig,
        store: Arc<DeviceStore>,
        events: broadcast::Sender<BridgeEvent>,
        resolver: Arc<dyn UniqueIdResolver>,
    ) -> Self {
        let intervals = SubscriptionIntervals {
            min_interval: config.subscription_min_interval,
            max_interval_ceiling: config.subscription_max_interval_ceiling,
        };
        let commissioner = CommissionerControl::new(
            config.commissioner_control_endpoint,
            config.commission_node_response_timeout,
        );
        let topology = Topology {
            local_bridge: config.local_bridge,
            ..Topology::default()
        };
        Self {
            link,
            config,
            store,
            events,
            topology,
            synchronizer: DeviceSynchronizer::new(resolver),
            sync_reply: None,
            registry: SubscriptionRegistry::new(intervals),
            commissioner,
            commissioner_replies: HashMap::new(),
            stay_active: HashMap::new(),
            remote_watch: None,
            auto_approvals: VecDeque::new(),
        }
    }

    /// Apply configured topology that needs peer I/O.
    pub(crate) fn init(&mut self) {
        if let Some(node) = self.config.remote_bridge {
            self.set_remote_bridge(Some(node));
        }
    }

    // ── Command routing ──────────────────────────────────────────────

    pub(crate) fn route(&mut self, command: Command, reply: Reply) {
        debug!(command = command.name(), "routing command");
        match command {
            Command::StartDeviceSynchronization { node_id, is_icd } => {
                match self.synchronizer.start(&self.link, node_id, is_icd) {
                    Ok(()) => self.sync_reply = Some(reply),
                    Err(e) => respond(reply, Err(e)),
                }
            }
            Command::StartSubscription { peer } => {
                let result = self.registry.start(&self.link, peer);
                respond(reply, result.map(|()| CommandResult::Ok));
            }
            Command::StopSubscription { peer } => {
                let result = self.stop_subscription(peer);
                respond(reply, result.map(|()| CommandResult::Ok));
            }
            Command::SetLocalBridge { node_id } => {
                info!(bridge = ?node_id, "local bridge set");
                self.topology.local_bridge = node_id;
                respond(reply, Ok(CommandResult::Ok));
            }
            Command::SetRemoteBridge { node_id } => {
                self.set_remote_bridge(node_id);
                respond(reply, Ok(CommandResult::Ok));
            }
            Command::RegisterBridgedDevice { node_id, endpoint } => {
                debug!(node = %node_id, endpoint, "bridged device mapped");
                self.topology.bridged.insert(node_id, endpoint);
                respond(reply, Ok(CommandResult::Ok));
            }
            Command::ApplyPartsList { endpoints } => {
                self.apply_parts_list(endpoints);
                self.drive_auto_approvals();
                respond(reply, Ok(CommandResult::Ok));
            }
            Command::RemoveDevice { peer } => {
                let result = self.remove_device(peer);
                respond(reply, result.map(|()| CommandResult::Ok));
            }
            Command::RequestCommissioningApproval { request_id, label } => {
                let request = CommissioningApprovalRequest {
                    request_id: request_id.unwrap_or_else(random_request_id),
                    vendor_id: self.config.vendor_id,
                    product_id: self.config.product_id,
                    label,
                };
                match self.commissioner.request_commissioning_approval(&self.link, request) {
                    Ok(op) => {
                        self.commissioner_replies.insert(op, reply);
                    }
                    Err(e) => respond(reply, Err(e)),
                }
            }
            Command::CommissionNode {
                request_id,
                response_timeout,
            } => match self
                .commissioner
                .commission_node(&self.link, request_id, response_timeout)
            {
                Ok(op) => {
                    self.commissioner_replies.insert(op, reply);
                }
                Err(e) => respond(reply, Err(e)),
            },
            Command::DeliverCommissioningRequestResult(result) => {
                let result = self.commissioner.on_request_result(&self.link, result);
                respond(reply, result.map(|_| CommandResult::Ok));
            }
            Command::KeepActive { peer, duration } => self.keep_active(peer, duration, reply),
            Command::SynchronizerState => {
                respond(reply, Ok(CommandResult::SynchronizerState(self.synchronizer.state())));
            }
            Command::SubscriptionStates => {
                respond(reply, Ok(CommandResult::Subscriptions(self.registry.states())));
            }
            Command::CommissionerState => {
                respond(
                    reply,
                    Ok(CommandResult::CommissionerState(self.commissioner.command_type())),
                );
            }
        }
    }

    // ── Loop events ──────────────────────────────────────────────────

    pub(crate) fn handle_event(&mut self, event: LoopEvent) {
        let LoopEvent { route, op, event } = event;
        match route {
            Route::Synchronizer => self.on_synchronizer_event(op, event),
            Route::Subscription(peer) => {
                let mut sink = EventSink {
                    events: &self.events,
                    store: &self.store,
                };
                if self.registry.handle(&self.link, peer, op, event, &mut sink) {
                    self.publish(BridgeEvent::SubscriptionEnded { peer });
                }
            }
            Route::Commissioner => {
                if let Some(completion) = self.commissioner.handle(&self.link, op, event) {
                    self.on_commissioner_completion(completion);
                }
                self.drive_auto_approvals();
            }
            Route::RemoteBridge => {
                self.on_remote_bridge_event(op, event);
                self.drive_auto_approvals();
            }
            Route::StayActive => self.on_stay_active_event(op, event),
        }
    }

    /// Tear everything down; pending callers see `ControllerStopped`.
    pub(crate) fn shutdown(&mut self) {
        self.registry.drop_all();
        self.remote_watch = None;
        if let Some(reply) = self.sync_reply.take() {
            respond(reply, Err(CoreError::ControllerStopped));
        }
        for (_, reply) in self.commissioner_replies.drain() {
            respond(reply, Err(CoreError::ControllerStopped));
        }
        for (_, pending) in self.stay_active.drain() {
            respond(pending.reply, Err(CoreError::ControllerStopped));
        }
    }

    // ── Synchronization ──────────────────────────────────────────────

    fn on_synchronizer_event(&mut self, op: OperationId, event: SessionEvent) {
        let remote_endpoint = self
            .synchronizer
            .target()
            .and_then(|peer| self.topology.bridged.get(&peer.node_id).copied());
        let ctx = SyncContext {
            local_bridge: self.topology.local_bridge,
            remote_bridge: self.topology.remote_bridge,
            remote_endpoint,
        };

        let synchronized = match self.synchronizer.handle(&self.link, op, event, &ctx) {
            SyncOutcome::Pending => return,
            SyncOutcome::Completed(device) => {
                self.add_device(device);
                true
            }
            SyncOutcome::Abandoned => false,
        };
        if let Some(reply) = self.sync_reply.take() {
            respond(reply, Ok(CommandResult::Synchronized(synchronized)));
        }
    }

    fn add_device(&mut self, device: SyncedDevice) {
        let peer = device.peer;
        let is_icd = device.is_icd;
        if !self.store.upsert_device(device.clone()) {
            debug!(%peer, "replaced existing device record");
        }
        self.publish(BridgeEvent::DeviceSynchronized { device });

        if is_icd {
            debug!(%peer, "intermittently connected device, not subscribing");
            return;
        }
        match self.registry.start(&self.link, peer) {
            Ok(()) => {}
            Err(CoreError::AlreadyExists { .. }) => debug!(%peer, "subscription already active"),
            Err(e) => warn!(
                %peer,
                error = %e,
                "failed to start subscription after synchronization"
            ),
        }
    }

    // ── Devices and subscriptions ────────────────────────────────────

    fn stop_subscription(&mut self, peer: PeerNodeId) -> Result<(), CoreError> {
        if self.registry.stop(peer)? {
            self.publish(BridgeEvent::SubscriptionEnded { peer });
        }
        Ok(())
    }

    fn remove_device(&mut self, peer: PeerNodeId) -> Result<(), CoreError> {
        let removed = self
            .store
            .remove_device(&peer)
            .ok_or(CoreError::DeviceNotFound { peer })?;
        if self.registry.contains(&peer) {
            self.stop_subscription(peer)?;
        }
        info!(%peer, name = removed.display_name().unwrap_or("-"), "device removed");
        self.publish(BridgeEvent::DeviceRemoved { peer });
        Ok(())
    }

    // ── Topology ─────────────────────────────────────────────────────

    /// Setting the current bridge again re-arms a watch that was lost to
    /// a connection failure or an ended subscription.
    fn set_remote_bridge(&mut self, node_id: Option<NodeId>) {
        let peer = node_id.map(|node| self.link.peer(node));
        if self.topology.remote_bridge == peer {
            if let Some(peer) = peer.filter(|_| self.remote_watch.is_none()) {
                info!(bridge = %peer, "re-arming remote bridge watch");
                self.watch_remote_bridge(peer);
            }
            return;
        }
        info!(bridge = ?peer, "remote bridge changed");
        self.topology.remote_bridge = peer;
        self.topology.parts_list.clear();
        self.auto_approvals.clear();
        self.remote_watch = None;

        if let Some(op) = self.commissioner.set_bridge(peer) {
            if let Some(reply) = self.commissioner_replies.remove(&op) {
                respond(
                    reply,
                    Err(CoreError::Cancelled {
                        reason: "remote bridge changed".into(),
                    }),
                );
            }
        }

        if let Some(peer) = peer {
            self.watch_remote_bridge(peer);
        }
    }

    fn watch_remote_bridge(&mut self, peer: PeerNodeId) {
        let op = self.link.next_operation();
        self.link.connect(peer, Route::RemoteBridge, op);
        self.remote_watch = Some(RemoteBridgeWatch {
            peer,
            op,
            reports: None,
        });
    }

    fn apply_parts_list(&mut self, endpoints: BTreeSet<EndpointId>) {
        let added: Vec<EndpointId> = endpoints
            .difference(&self.topology.parts_list)
            .copied()
            .collect();
        let removed: Vec<EndpointId> = self
            .topology
            .parts_list
            .difference(&endpoints)
            .copied()
            .collect();
        self.topology.parts_list = endpoints;

        for endpoint in added {
            info!(endpoint, "bridged endpoint added");
            self.publish(BridgeEvent::BridgedEndpointAdded { endpoint });
            // Endpoints mirroring our own devices need no approval.
            if self.config.auto_request_approval
                && !self.topology.bridged.values().any(|mapped| *mapped == endpoint)
            {
                self.auto_approvals.push_back(endpoint);
            }
        }
        for endpoint in removed {
            info!(endpoint, "bridged endpoint removed");
            self.publish(BridgeEvent::BridgedEndpointRemoved { endpoint });
            self.auto_approvals.retain(|queued| *queued != endpoint);

            let nodes: Vec<NodeId> = self
                .topology
                .bridged
                .iter()
                .filter(|(_, mapped)| **mapped == endpoint)
                .map(|(node, _)| *node)
                .collect();
            for node in nodes {
                self.topology.bridged.remove(&node);
                match self.remove_device(self.link.peer(node)) {
                    Ok(()) | Err(CoreError::DeviceNotFound { .. }) => {}
                    Err(e) => warn!(node = %node, error = %e, "failed to remove unbridged device"),
                }
            }
        }
    }

    fn on_remote_bridge_event(&mut self, op: OperationId, event: SessionEvent) {
        let Some(bridge_watch) = self.remote_watch.as_mut().filter(|w| w.op == op) else {
            debug!(%op, "dropping stale remote bridge event");
            return;
        };
        match event {
            SessionEvent::Connected(session) => {
                let request = SubscribeRequest {
                    attributes: vec![AttributePath::new(
                        ROOT_ENDPOINT,
                        CLUSTER_ID_DESCRIPTOR,
                        CLUSTER_DESCRIPTOR_ATTR_ID_PARTS_LIST,
                    )],
                    events: vec![EventPath::new(
                        self.config.commissioner_control_endpoint,
                        CLUSTER_ID_COMMISSIONER_CONTROL,
                        CLUSTER_COMMISSIONER_CONTROL_EVENT_ID_COMMISSIONING_REQUEST_RESULT,
                    )],
                    min_interval: self.config.subscription_min_interval,
                    max_interval_ceiling: self.config.subscription_max_interval_ceiling,
                };
                match self.link.client().subscribe(&session, request) {
                    Ok(stream) => {
                        info!(bridge = %bridge_watch.peer, "watching remote bridge");
                        bridge_watch.reports =
                            Some(self.link.forward_reports(stream, Route::RemoteBridge, op));
                    }
                    Err(e) => {
                        let bridge = bridge_watch.peer;
                        warn!(%bridge, error = %e, "remote bridge subscription rejected");
                        self.lose_remote_watch(bridge);
                    }
                }
            }
            SessionEvent::ConnectionFailed(e) => {
                let bridge = bridge_watch.peer;
                warn!(%bridge, error = %e, "cannot reach remote bridge");
                self.lose_remote_watch(bridge);
            }
            SessionEvent::Report(item) => self.on_remote_bridge_report(item),
            SessionEvent::ReportsDone => {
                let bridge = bridge_watch.peer;
                warn!(%bridge, "remote bridge subscription ended");
                self.lose_remote_watch(bridge);
            }
            other => debug!(event = ?other, "ignoring remote bridge event"),
        }
    }

    /// The watch stays down until the bridge is set again.
    fn lose_remote_watch(&mut self, bridge: PeerNodeId) {
        self.remote_watch = None;
        self.publish(BridgeEvent::RemoteBridgeWatchLost { bridge });
    }

    fn on_remote_bridge_report(&mut self, item: ReportItem) {
        match item {
            ReportItem::Attribute { path, data }
                if path.cluster == CLUSTER_ID_DESCRIPTOR
                    && path.attribute == CLUSTER_DESCRIPTOR_ATTR_ID_PARTS_LIST =>
            {
                match data.and_then(|value| decode_parts_list(&value)) {
                    Ok(endpoints) => self.apply_parts_list(endpoints),
                    Err(e) => warn!(error = %e, "undecodable PartsList from remote bridge"),
                }
            }
            ReportItem::Event { path, data, .. }
                if path.cluster == CLUSTER_ID_COMMISSIONER_CONTROL
                    && path.event
                        == CLUSTER_COMMISSIONER_CONTROL_EVENT_ID_COMMISSIONING_REQUEST_RESULT =>
            {
                match data.and_then(|value| decode_commissioning_request_result(&value)) {
                    Ok(result) => {
                        if let Err(e) = self.commissioner.on_request_result(&self.link, result) {
                            debug!(error = %e, "commissioning request result ignored");
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable CommissioningRequestResult"),
                }
            }
            ReportItem::Error(e) => warn!(error = %e, "remote bridge subscription error"),
            _ => {}
        }
    }

    // ── Commissioner Control ─────────────────────────────────────────

    /// Request approval for the next queued endpoint once the previous
    /// handshake has finished.
    fn drive_auto_approvals(&mut self) {
        while self.commissioner.is_idle() {
            let Some(endpoint) = self.auto_approvals.pop_front() else {
                return;
            };
            let request = CommissioningApprovalRequest {
                request_id: random_request_id(),
                vendor_id: self.config.vendor_id,
                product_id: self.config.product_id,
                label: None,
            };
            let request_id = request.request_id;
            match self.commissioner.request_commissioning_approval(&self.link, request) {
                Ok(_) => {
                    info!(endpoint, request_id, "requested approval for new bridged endpoint");
                    self.publish(BridgeEvent::CommissioningApprovalRequested {
                        endpoint,
                        request_id,
                    });
                }
                Err(e) => warn!(endpoint, error = %e, "automatic approval request not sent"),
            }
        }
    }

    fn on_commissioner_completion(&mut self, completion: Completion) {
        let Completion {
            op,
            command,
            request_id,
            result,
        } = completion;
        if let Ok(Some(window)) = &result {
            self.publish(BridgeEvent::ReverseCommissioningWindowOpened {
                request_id,
                window: window.clone(),
            });
        }
        let Some(reply) = self.commissioner_replies.remove(&op) else {
            debug!(%command, request_id, "no caller waiting on commissioner command");
            return;
        };
        let result = result.map(|window| match window {
            Some(window) => CommandResult::CommissioningWindow(window),
            None => CommandResult::RequestId(request_id),
        });
        respond(reply, result);
    }

    // ── ICD ──────────────────────────────────────────────────────────

    fn keep_active(&mut self, peer: PeerNodeId, duration: Option<Duration>, reply: Reply) {
        if peer.fabric_index != self.link.fabric_index() {
            return respond(reply, Err(CoreError::FabricMismatch { peer }));
        }
        let duration = duration.unwrap_or(self.config.stay_active_duration);
        info!(%peer, duration_ms = duration.as_millis(), "requesting stay-active");
        let request = InvokeRequest {
            endpoint: ROOT_ENDPOINT,
            cluster: CLUSTER_ID_ICD_MANAGEMENT,
            command: CLUSTER_ICD_MANAGEMENT_CMD_ID_STAY_ACTIVE_REQUEST,
            fields: stay_active_fields(duration),
            timeout: None,
        };
        let command = OneShotCommand::start(&self.link, peer, Route::StayActive, request);
        self.stay_active
            .insert(command.op(), PendingStayActive { command, reply });
    }

    fn on_stay_active_event(&mut self, op: OperationId, event: SessionEvent) {
        let Some(pending) = self.stay_active.get_mut(&op) else {
            debug!(%op, "dropping stale stay-active event");
            return;
        };
        let OneShotProgress::Done(result) = pending.command.on_event(&self.link, event) else {
            return;
        };
        let Some(pending) = self.stay_active.remove(&op) else {
            return;
        };

        let peer = pending.command.peer();
        let result = result
            .and_then(|response| {
                decode_stay_active_response(&response.fields).map_err(CoreError::from)
            })
            .map(CommandResult::PromisedActiveDuration);
        match &result {
            Ok(promised) => info!(%peer, ?promised, "device will stay active"),
            Err(e) => warn!(%peer, error = %e, "stay-active request failed"),
        }
        respond(pending.reply, result);
    }

    fn publish(&self, event: BridgeEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// Notifications from subscriptions land in the store and on the
/// event bus.
struct EventSink<'a> {
    events: &'a broadcast::Sender<BridgeEvent>,
    store: &'a DeviceStore,
}

impl SubscriptionNotifier for EventSink<'_> {
    fn admin_commissioning_changed(&mut self, state: &AdminCommissioningState) {
        debug!(
            peer = %state.peer,
            window = %state.window_status,
            "administrator commissioning changed"
        );
        self.store.set_admin_commissioning(state.clone());
        let _ = self.events.send(BridgeEvent::AdminCommissioningChanged {
            state: state.clone(),
        });
    }

    fn reachability_changed(&mut self, peer: PeerNodeId, reachable: bool) {
        let _ = self
            .events
            .send(BridgeEvent::ReachabilityChanged { peer, reachable });
    }
}

fn respond(reply: Reply, result: Result<CommandResult, CoreError>) {
    if reply.send(result).is_err() {
        debug!("command caller went away before the result");
    }
}

fn random_request_id() -> u64 {
    Uuid::new_v4().as_u64_pair().0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use fabric_sync_api::SimDevice;

    use super::*;
    use crate::operation::testing::Harness;
    use crate::synchronizer::BridgedUniqueIdResolver;

    fn manager(harness: &Harness) -> (DeviceManager, broadcast::Receiver<BridgeEvent>) {
        manager_with(harness, SyncConfig::default())
    }

    fn manager_with(
        harness: &Harness,
        config: SyncConfig,
    ) -> (DeviceManager, broadcast::Receiver<BridgeEvent>) {
        let (events, rx) = broadcast::channel(64);
        let manager = DeviceManager::new(
            harness.link.clone(),
            config,
            Arc::new(DeviceStore::new()),
            events,
            Arc::new(BridgedUniqueIdResolver),
        );
        (manager, rx)
    }

    fn record(harness: &Harness, node: u64, endpoint: EndpointId) -> SyncedDevice {
        SyncedDevice {
            peer: harness.fabric.peer(node),
            endpoint_id: endpoint,
            is_icd: true,
            unique_id: None,
            vendor_name: None,
            vendor_id: None,
            product_name: None,
            product_id: None,
            node_label: None,
            hardware_version_string: None,
            software_version_string: None,
            synchronized_at: Utc::now(),
        }
    }

    fn drain(rx: &mut broadcast::Receiver<BridgeEvent>) -> Vec<BridgeEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn parts_list_diff_publishes_added_and_removed() {
        let harness = Harness::new();
        let (mut manager, mut rx) = manager(&harness);

        manager.apply_parts_list([1, 2, 3].into());
        manager.apply_parts_list([2, 3, 4].into());

        assert_eq!(
            drain(&mut rx),
            vec![
                BridgeEvent::BridgedEndpointAdded { endpoint: 1 },
                BridgeEvent::BridgedEndpointAdded { endpoint: 2 },
                BridgeEvent::BridgedEndpointAdded { endpoint: 3 },
                BridgeEvent::BridgedEndpointAdded { endpoint: 4 },
                BridgeEvent::BridgedEndpointRemoved { endpoint: 1 },
            ]
        );
    }

    #[test]
    fn vanished_endpoint_removes_mapped_device() {
        let harness = Harness::new();
        let (mut manager, mut rx) = manager(&harness);
        manager.topology.bridged.insert(NodeId(42), 5);
        manager.add_device(record(&harness, 42, 5));
        manager.apply_parts_list([5].into());
        drain(&mut rx);

        manager.apply_parts_list(BTreeSet::new());

        let peer = harness.fabric.peer(42);
        assert_eq!(
            drain(&mut rx),
            vec![
                BridgeEvent::BridgedEndpointRemoved { endpoint: 5 },
                BridgeEvent::DeviceRemoved { peer },
            ]
        );
        assert!(manager.store.device(&peer).is_none());
        assert!(manager.topology.bridged.is_empty());
    }

    #[tokio::test]
    async fn new_foreign_endpoints_are_queued_for_approval_one_at_a_time() {
        let harness = Harness::new();
        harness.fabric.add_device(SimDevice::new(0x100));
        let config = SyncConfig {
            auto_request_approval: true,
            ..SyncConfig::default()
        };
        let (mut manager, mut rx) = manager_with(&harness, config);
        manager.set_remote_bridge(Some(NodeId(0x100)));
        manager.topology.bridged.insert(NodeId(42), 5);

        manager.apply_parts_list([4, 5, 6].into());
        manager.drive_auto_approvals();

        let requested: Vec<EndpointId> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                BridgeEvent::CommissioningApprovalRequested { endpoint, .. } => Some(endpoint),
                _ => None,
            })
            .collect();
        assert_eq!(requested, vec![4]);
        assert_eq!(manager.auto_approvals, VecDeque::from([6]));

        manager.apply_parts_list([4, 5].into());
        assert!(manager.auto_approvals.is_empty());
    }

    #[test]
    fn endpoints_are_not_queued_unless_enabled() {
        let harness = Harness::new();
        let (mut manager, _rx) = manager(&harness);
        manager.apply_parts_list([4].into());
        assert!(manager.auto_approvals.is_empty());
    }

    #[test]
    fn removing_unknown_device_is_not_found() {
        let harness = Harness::new();
        let (mut manager, _rx) = manager(&harness);
        let err = manager.remove_device(harness.fabric.peer(9)).unwrap_err();
        assert!(matches!(err, CoreError::DeviceNotFound { .. }));
    }

    #[test]
    fn request_ids_vary() {
        assert_ne!(random_request_id(), random_request_id());
    }
}

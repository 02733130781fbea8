//! In-memory fabric implementing [`InteractionClient`].
//!
//! Backs the `fabric-admin simulate` command and every state-machine test
//! in the workspace. Nodes hold an attribute table per endpoint; reads
//! answer from that table, subscriptions receive a priming report followed
//! by whatever the test (or demo) pushes through the control methods.
//!
//! ```ignore
//! let fabric = SimulatedFabric::new(FabricIndex(1), NodeId(0x1));
//! fabric.add_device(SimDevice::new(42).vendor_name("Acme").unique_id("abc123"));
//! let controller = Controller::new(config, Arc::new(fabric.clone()));
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use crate::clusters::{
    CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_FABRIC_INDEX,
    CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_VENDOR_ID,
    CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_WINDOW_STATUS,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_HARDWARE_VERSION_STRING,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_NODE_LABEL, CLUSTER_BASIC_INFORMATION_ATTR_ID_PRODUCT_ID,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_PRODUCT_NAME,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_SOFTWARE_VERSION_STRING,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID, CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_ID,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_NAME,
    CLUSTER_BRIDGED_DEVICE_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID,
    CLUSTER_COMMISSIONER_CONTROL_CMD_ID_COMMISSION_NODE,
    CLUSTER_COMMISSIONER_CONTROL_CMD_ID_REQUEST_COMMISSIONING_APPROVAL,
    CLUSTER_COMMISSIONER_CONTROL_CMD_ID_REVERSE_OPEN_COMMISSIONING_WINDOW,
    CLUSTER_COMMISSIONER_CONTROL_EVENT_ID_COMMISSIONING_REQUEST_RESULT,
    CLUSTER_DESCRIPTOR_ATTR_ID_PARTS_LIST, CLUSTER_ICD_MANAGEMENT_CMD_ID_STAY_ACTIVE_REQUEST,
    CLUSTER_ICD_MANAGEMENT_CMD_ID_STAY_ACTIVE_RESPONSE, CLUSTER_ID_ADMINISTRATOR_COMMISSIONING,
    CLUSTER_ID_BASIC_INFORMATION, CLUSTER_ID_BRIDGED_DEVICE_BASIC_INFORMATION,
    CLUSTER_ID_COMMISSIONER_CONTROL, CLUSTER_ID_DESCRIPTOR, CLUSTER_ID_ICD_MANAGEMENT,
    FABRIC_INDEX_FIELD_TAG, ROOT_ENDPOINT,
};
use crate::error::Error;
use crate::ids::{
    AttributeId, ClusterId, CommandId, EndpointId, FabricIndex, NodeId, PeerNodeId, StatusCode,
};
use crate::interaction::{
    AttributePath, EventPath, InteractionClient, InvokeRequest, InvokeResponse, ReadRequest,
    ReportItem, ReportStream, Session, SubscribeRequest,
};
use crate::value::AttributeValue;

const PUSH_CHANNEL_SIZE: usize = 64;
const SIM_DISCRIMINATOR: u16 = 3840;
const SIM_PBKDF_ITERATIONS: u32 = 1000;

// ── Device builder ──────────────────────────────────────────────────

/// Description of a simulated node, consumed by [`SimulatedFabric::add_device`].
#[derive(Debug, Clone)]
pub struct SimDevice {
    node_id: NodeId,
    attributes: HashMap<AttributePath, AttributeValue>,
    auto_approve: bool,
}

impl SimDevice {
    /// A node exposing Basic Information and a closed commissioning window.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        let mut device = Self {
            node_id: node_id.into(),
            attributes: HashMap::new(),
            auto_approve: false,
        };
        device.set_root(
            CLUSTER_ID_ADMINISTRATOR_COMMISSIONING,
            CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_WINDOW_STATUS,
            AttributeValue::UInt(0),
        );
        device.set_root(
            CLUSTER_ID_ADMINISTRATOR_COMMISSIONING,
            CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_FABRIC_INDEX,
            AttributeValue::Null,
        );
        device.set_root(
            CLUSTER_ID_ADMINISTRATOR_COMMISSIONING,
            CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_VENDOR_ID,
            AttributeValue::Null,
        );
        device
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn vendor_name(self, name: &str) -> Self {
        self.basic(CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_NAME, name.into())
    }

    pub fn vendor_id(self, vendor_id: u16) -> Self {
        self.basic(CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_ID, vendor_id.into())
    }

    pub fn product_name(self, name: &str) -> Self {
        self.basic(CLUSTER_BASIC_INFORMATION_ATTR_ID_PRODUCT_NAME, name.into())
    }

    pub fn product_id(self, product_id: u16) -> Self {
        self.basic(CLUSTER_BASIC_INFORMATION_ATTR_ID_PRODUCT_ID, product_id.into())
    }

    pub fn node_label(self, label: &str) -> Self {
        self.basic(CLUSTER_BASIC_INFORMATION_ATTR_ID_NODE_LABEL, label.into())
    }

    pub fn hardware_version(self, version: &str) -> Self {
        self.basic(
            CLUSTER_BASIC_INFORMATION_ATTR_ID_HARDWARE_VERSION_STRING,
            version.into(),
        )
    }

    pub fn software_version(self, version: &str) -> Self {
        self.basic(
            CLUSTER_BASIC_INFORMATION_ATTR_ID_SOFTWARE_VERSION_STRING,
            version.into(),
        )
    }

    pub fn unique_id(self, unique_id: &str) -> Self {
        self.basic(CLUSTER_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID, unique_id.into())
    }

    /// Set an arbitrary attribute, e.g. a malformed value.
    pub fn attribute(mut self, path: AttributePath, value: AttributeValue) -> Self {
        self.attributes.insert(path, value);
        self
    }

    /// Expose a bridged endpoint: adds it to the root PartsList and, when
    /// given, publishes the bridged device's unique id on it.
    pub fn bridged_endpoint(mut self, endpoint: EndpointId, unique_id: Option<&str>) -> Self {
        let parts_path = AttributePath::new(
            ROOT_ENDPOINT,
            CLUSTER_ID_DESCRIPTOR,
            CLUSTER_DESCRIPTOR_ATTR_ID_PARTS_LIST,
        );
        let entry = self
            .attributes
            .entry(parts_path)
            .or_insert_with(|| AttributeValue::List(Vec::new()));
        if let AttributeValue::List(parts) = entry {
            parts.push(endpoint.into());
        }
        if let Some(unique_id) = unique_id {
            self.attributes.insert(
                AttributePath::new(
                    endpoint,
                    CLUSTER_ID_BRIDGED_DEVICE_BASIC_INFORMATION,
                    CLUSTER_BRIDGED_DEVICE_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID,
                ),
                unique_id.into(),
            );
        }
        self
    }

    /// Answer every commissioning approval request with a successful
    /// `CommissioningRequestResult` event.
    pub fn auto_approve(mut self) -> Self {
        self.auto_approve = true;
        self
    }

    fn basic(mut self, attribute: AttributeId, value: AttributeValue) -> Self {
        self.set_root(CLUSTER_ID_BASIC_INFORMATION, attribute, value);
        self
    }

    fn set_root(&mut self, cluster: ClusterId, attribute: AttributeId, value: AttributeValue) {
        self.attributes
            .insert(AttributePath::new(ROOT_ENDPOINT, cluster, attribute), value);
    }
}

// ── Fabric ──────────────────────────────────────────────────────────

/// How a node answers read requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadBehavior {
    #[default]
    Respond,
    /// The read cannot be issued.
    Reject,
    /// The read is issued but fails with a timeout.
    Fail,
}

/// A command received by a simulated node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub peer: PeerNodeId,
    pub endpoint: EndpointId,
    pub cluster: ClusterId,
    pub command: CommandId,
    pub fields: AttributeValue,
}

#[derive(Debug, Clone)]
enum Push {
    Report(Vec<ReportItem>),
    Timeout,
    End,
}

struct SimNode {
    reachable: bool,
    read_behavior: ReadBehavior,
    reject_subscriptions: bool,
    command_failure: Option<StatusCode>,
    auto_approve: bool,
    attributes: HashMap<AttributePath, AttributeValue>,
    pushes: broadcast::Sender<Push>,
}

struct SimInner {
    fabric_index: FabricIndex,
    controller_node: NodeId,
    nodes: DashMap<NodeId, SimNode>,
    next_session: AtomicU64,
    next_event_number: AtomicU64,
    next_subscription: AtomicU32,
    invocations: Mutex<Vec<Invocation>>,
}

/// Cheaply cloneable handle to a simulated fabric.
#[derive(Clone)]
pub struct SimulatedFabric {
    inner: Arc<SimInner>,
}

impl SimulatedFabric {
    pub fn new(fabric_index: FabricIndex, controller_node: NodeId) -> Self {
        Self {
            inner: Arc::new(SimInner {
                fabric_index,
                controller_node,
                nodes: DashMap::new(),
                next_session: AtomicU64::new(1),
                next_event_number: AtomicU64::new(1),
                next_subscription: AtomicU32::new(1),
                invocations: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn peer(&self, node_id: impl Into<NodeId>) -> PeerNodeId {
        PeerNodeId::new(self.inner.fabric_index, node_id.into())
    }

    // ── Topology control ────────────────────────────────────────────

    pub fn add_device(&self, device: SimDevice) {
        let (pushes, _) = broadcast::channel(PUSH_CHANNEL_SIZE);
        self.inner.nodes.insert(
            device.node_id,
            SimNode {
                reachable: true,
                read_behavior: ReadBehavior::default(),
                reject_subscriptions: false,
                command_failure: None,
                auto_approve: device.auto_approve,
                attributes: device.attributes,
                pushes,
            },
        );
    }

    /// Remove a node. Its live subscriptions end.
    pub fn remove_device(&self, node_id: impl Into<NodeId>) {
        self.inner.nodes.remove(&node_id.into());
    }

    pub fn set_reachable(&self, node_id: impl Into<NodeId>, reachable: bool) {
        self.with_node(node_id.into(), |node| node.reachable = reachable);
    }

    pub fn set_read_behavior(&self, node_id: impl Into<NodeId>, behavior: ReadBehavior) {
        self.with_node(node_id.into(), |node| node.read_behavior = behavior);
    }

    pub fn reject_subscriptions(&self, node_id: impl Into<NodeId>, reject: bool) {
        self.with_node(node_id.into(), |node| node.reject_subscriptions = reject);
    }

    /// Make every command sent to the node fail with `status`.
    pub fn fail_commands(&self, node_id: impl Into<NodeId>, status: Option<StatusCode>) {
        self.with_node(node_id.into(), |node| node.command_failure = status);
    }

    // ── Report injection ────────────────────────────────────────────

    /// Store new attribute values and deliver them to subscribers as one report.
    pub fn update_attributes<I>(
        &self,
        node_id: impl Into<NodeId>,
        endpoint: EndpointId,
        cluster: ClusterId,
        updates: I,
    ) where
        I: IntoIterator<Item = (AttributeId, AttributeValue)>,
    {
        let node_id = node_id.into();
        let mut items = Vec::new();
        self.with_node(node_id, |node| {
            for (attribute, value) in updates {
                let path = AttributePath::new(endpoint, cluster, attribute);
                node.attributes.insert(path, value.clone());
                items.push(ReportItem::Attribute {
                    path,
                    data: Ok(value),
                });
            }
        });
        self.inner.push(node_id, Push::Report(items));
    }

    /// Replace the root PartsList of a bridge.
    pub fn set_parts_list(&self, node_id: impl Into<NodeId>, endpoints: &[EndpointId]) {
        let list = endpoints.iter().copied().map(AttributeValue::from).collect();
        self.update_attributes(
            node_id,
            ROOT_ENDPOINT,
            CLUSTER_ID_DESCRIPTOR,
            [(CLUSTER_DESCRIPTOR_ATTR_ID_PARTS_LIST, AttributeValue::List(list))],
        );
    }

    /// Deliver an event to subscribers of `path`.
    pub fn emit_event(&self, node_id: impl Into<NodeId>, path: EventPath, data: AttributeValue) {
        self.inner.emit_event(node_id.into(), path, data);
    }

    /// Emit a `CommissioningRequestResult` event from a bridge.
    pub fn emit_commissioning_request_result(
        &self,
        node_id: impl Into<NodeId>,
        endpoint: EndpointId,
        request_id: u64,
        client_node: NodeId,
        status: StatusCode,
    ) {
        let data = self.inner.request_result(request_id, client_node, status);
        self.inner.emit_event(
            node_id.into(),
            EventPath::new(
                endpoint,
                CLUSTER_ID_COMMISSIONER_CONTROL,
                CLUSTER_COMMISSIONER_CONTROL_EVENT_ID_COMMISSIONING_REQUEST_RESULT,
            ),
            data,
        );
    }

    /// Signal a liveness timeout on every subscription to the node.
    pub fn report_timeout(&self, node_id: impl Into<NodeId>) {
        self.inner.push(node_id.into(), Push::Timeout);
    }

    /// Terminate every subscription to the node from the publisher side.
    pub fn end_subscriptions(&self, node_id: impl Into<NodeId>) {
        self.inner.push(node_id.into(), Push::End);
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// Number of live subscriptions to the node.
    pub fn subscriber_count(&self, node_id: impl Into<NodeId>) -> usize {
        self.inner
            .nodes
            .get(&node_id.into())
            .map_or(0, |node| node.pushes.receiver_count())
    }

    /// Every command received so far, in arrival order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.inner
            .invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn with_node(&self, node_id: NodeId, f: impl FnOnce(&mut SimNode)) {
        match self.inner.nodes.get_mut(&node_id) {
            Some(mut node) => f(&mut node),
            None => warn!(node = %node_id, "simulated node not found"),
        }
    }
}

impl SimInner {
    fn push(&self, node_id: NodeId, push: Push) {
        if let Some(node) = self.nodes.get(&node_id) {
            // No receivers simply means nobody is subscribed.
            let _ = node.pushes.send(push);
        }
    }

    fn emit_event(&self, node_id: NodeId, path: EventPath, data: AttributeValue) {
        let event_number = self.next_event_number.fetch_add(1, Ordering::Relaxed);
        self.push(
            node_id,
            Push::Report(vec![ReportItem::Event {
                path,
                event_number,
                data: Ok(data),
            }]),
        );
    }

    fn request_result(
        &self,
        request_id: u64,
        client_node: NodeId,
        status: StatusCode,
    ) -> AttributeValue {
        AttributeValue::structure([
            (0, AttributeValue::UInt(request_id)),
            (1, AttributeValue::UInt(client_node.0)),
            (2, status.0.into()),
            (FABRIC_INDEX_FIELD_TAG, self.fabric_index.0.into()),
        ])
    }

    fn record(&self, invocation: Invocation) {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation);
    }

    fn respond(&self, peer: PeerNodeId, request: &InvokeRequest) -> Result<InvokeResponse, Error> {
        let (failure, auto_approve) = self
            .nodes
            .get(&peer.node_id)
            .map(|node| (node.command_failure, node.auto_approve))
            .ok_or(Error::SessionClosed)?;
        if let Some(status) = failure {
            return Err(Error::Status(status));
        }

        let invalid = |_| Error::Status(StatusCode::INVALID_COMMAND);
        match (request.cluster, request.command) {
            (
                CLUSTER_ID_COMMISSIONER_CONTROL,
                CLUSTER_COMMISSIONER_CONTROL_CMD_ID_REQUEST_COMMISSIONING_APPROVAL,
            ) => {
                let request_id = request
                    .fields
                    .field(0)
                    .and_then(AttributeValue::as_u64)
                    .map_err(invalid)?;
                if auto_approve {
                    let data =
                        self.request_result(request_id, self.controller_node, StatusCode::SUCCESS);
                    self.emit_event(
                        peer.node_id,
                        EventPath::new(
                            request.endpoint,
                            CLUSTER_ID_COMMISSIONER_CONTROL,
                            CLUSTER_COMMISSIONER_CONTROL_EVENT_ID_COMMISSIONING_REQUEST_RESULT,
                        ),
                        data,
                    );
                }
                Ok(InvokeResponse::status_only())
            }
            (
                CLUSTER_ID_COMMISSIONER_CONTROL,
                CLUSTER_COMMISSIONER_CONTROL_CMD_ID_COMMISSION_NODE,
            ) => {
                let timeout = request
                    .fields
                    .field(1)
                    .and_then(AttributeValue::as_u16)
                    .map_err(invalid)?;
                Ok(InvokeResponse {
                    command: Some(
                        CLUSTER_COMMISSIONER_CONTROL_CMD_ID_REVERSE_OPEN_COMMISSIONING_WINDOW,
                    ),
                    fields: AttributeValue::structure([
                        (0, timeout.into()),
                        (1, AttributeValue::Bytes(vec![0xA5; 97])),
                        (2, SIM_DISCRIMINATOR.into()),
                        (3, AttributeValue::UInt(u64::from(SIM_PBKDF_ITERATIONS))),
                        (4, AttributeValue::Bytes(vec![0x5A; 16])),
                    ]),
                })
            }
            (CLUSTER_ID_ICD_MANAGEMENT, CLUSTER_ICD_MANAGEMENT_CMD_ID_STAY_ACTIVE_REQUEST) => {
                let duration = request
                    .fields
                    .field(0)
                    .and_then(AttributeValue::as_u32)
                    .map_err(invalid)?;
                Ok(InvokeResponse {
                    command: Some(CLUSTER_ICD_MANAGEMENT_CMD_ID_STAY_ACTIVE_RESPONSE),
                    fields: AttributeValue::structure([(
                        0,
                        AttributeValue::UInt(u64::from(duration)),
                    )]),
                })
            }
            _ => Err(Error::Status(StatusCode::UNSUPPORTED_COMMAND)),
        }
    }
}

// ── InteractionClient ───────────────────────────────────────────────

impl InteractionClient for SimulatedFabric {
    fn fabric_index(&self) -> FabricIndex {
        self.inner.fabric_index
    }

    fn local_node_id(&self) -> NodeId {
        self.inner.controller_node
    }

    fn establish_session(&self, peer: PeerNodeId) -> BoxFuture<'static, Result<Session, Error>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            tokio::task::yield_now().await;
            if peer.fabric_index != inner.fabric_index {
                return Err(Error::SessionEstablishment {
                    peer,
                    reason: "peer is not on this fabric".into(),
                });
            }
            let reachable = inner.nodes.get(&peer.node_id).map(|node| node.reachable);
            match reachable {
                Some(true) => {
                    let id = inner.next_session.fetch_add(1, Ordering::Relaxed);
                    debug!(peer = %peer, session = id, "session established");
                    Ok(Session::new(peer, id))
                }
                Some(false) => Err(Error::SessionEstablishment {
                    peer,
                    reason: "no response to Sigma1".into(),
                }),
                None => Err(Error::SessionEstablishment {
                    peer,
                    reason: "operational node not found".into(),
                }),
            }
        })
    }

    fn read(&self, session: &Session, request: ReadRequest) -> Result<ReportStream, Error> {
        let node = self
            .inner
            .nodes
            .get(&session.peer().node_id)
            .ok_or(Error::SessionClosed)?;

        let items: Vec<ReportItem> = match node.read_behavior {
            ReadBehavior::Reject => {
                return Err(Error::RequestRejected("no exchange available".into()));
            }
            ReadBehavior::Fail => vec![ReportItem::Error(Error::Timeout)],
            ReadBehavior::Respond => request
                .attributes
                .iter()
                .map(|path| ReportItem::Attribute {
                    path: *path,
                    data: node
                        .attributes
                        .get(path)
                        .cloned()
                        .ok_or(Error::Status(StatusCode::UNSUPPORTED_ATTRIBUTE)),
                })
                .chain(std::iter::once(ReportItem::ReportEnd))
                .collect(),
        };

        Ok(Box::pin(futures_util::stream::iter(items)))
    }

    fn subscribe(
        &self,
        session: &Session,
        request: SubscribeRequest,
    ) -> Result<ReportStream, Error> {
        let node = self
            .inner
            .nodes
            .get(&session.peer().node_id)
            .ok_or(Error::SessionClosed)?;
        if node.reject_subscriptions {
            return Err(Error::RequestRejected("subscription resources exhausted".into()));
        }

        let priming: Vec<ReportItem> = request
            .attributes
            .iter()
            .filter_map(|path| {
                node.attributes.get(path).map(|value| ReportItem::Attribute {
                    path: *path,
                    data: Ok(value.clone()),
                })
            })
            .collect();
        let pushes = BroadcastStream::new(node.pushes.subscribe());
        drop(node);

        let subscription_id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        let stream = async_stream::stream! {
            for item in priming {
                yield item;
            }
            yield ReportItem::ReportEnd;
            yield ReportItem::SubscriptionEstablished { subscription_id };

            let mut pushes = pushes;
            while let Some(push) = pushes.next().await {
                match push {
                    Ok(Push::Report(items)) => {
                        let matching: Vec<ReportItem> = items
                            .into_iter()
                            .filter(|item| matches_request(&request, item))
                            .collect();
                        if !matching.is_empty() {
                            for item in matching {
                                yield item;
                            }
                            yield ReportItem::ReportEnd;
                        }
                    }
                    Ok(Push::Timeout) => {
                        yield ReportItem::Error(Error::Timeout);
                    }
                    Ok(Push::End) => break,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, subscription_id, "simulated subscription lagged");
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn invoke(
        &self,
        session: &Session,
        request: InvokeRequest,
    ) -> BoxFuture<'static, Result<InvokeResponse, Error>> {
        let inner = Arc::clone(&self.inner);
        let peer = session.peer();
        Box::pin(async move {
            tokio::task::yield_now().await;
            inner.record(Invocation {
                peer,
                endpoint: request.endpoint,
                cluster: request.cluster,
                command: request.command,
                fields: request.fields.clone(),
            });
            inner.respond(peer, &request)
        })
    }
}

fn matches_request(request: &SubscribeRequest, item: &ReportItem) -> bool {
    match item {
        ReportItem::Attribute { path, .. } => request.attributes.contains(path),
        ReportItem::Event { path, .. } => request.events.contains(path),
        _ => true,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn fabric() -> SimulatedFabric {
        SimulatedFabric::new(FabricIndex(1), NodeId(0x1))
    }

    async fn session(fabric: &SimulatedFabric, node: u64) -> Session {
        fabric.establish_session(fabric.peer(node)).await.unwrap()
    }

    fn admin_subscription() -> SubscribeRequest {
        SubscribeRequest {
            attributes: vec![AttributePath::new(
                ROOT_ENDPOINT,
                CLUSTER_ID_ADMINISTRATOR_COMMISSIONING,
                CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_WINDOW_STATUS,
            )],
            events: Vec::new(),
            min_interval: Duration::ZERO,
            max_interval_ceiling: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn read_reports_missing_attributes_as_unsupported() {
        let fabric = fabric();
        fabric.add_device(SimDevice::new(42).vendor_name("Acme"));
        let session = session(&fabric, 42).await;

        let request = ReadRequest {
            attributes: vec![
                AttributePath::new(
                    ROOT_ENDPOINT,
                    CLUSTER_ID_BASIC_INFORMATION,
                    CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_NAME,
                ),
                AttributePath::new(
                    ROOT_ENDPOINT,
                    CLUSTER_ID_BASIC_INFORMATION,
                    CLUSTER_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID,
                ),
            ],
        };
        let items: Vec<ReportItem> = fabric.read(&session, request).unwrap().collect().await;

        assert_eq!(items.len(), 3);
        assert!(matches!(
            &items[0],
            ReportItem::Attribute { data: Ok(AttributeValue::Utf8(name)), .. } if name == "Acme"
        ));
        assert!(matches!(
            &items[1],
            ReportItem::Attribute {
                data: Err(Error::Status(StatusCode::UNSUPPORTED_ATTRIBUTE)),
                ..
            }
        ));
        assert!(matches!(items[2], ReportItem::ReportEnd));
    }

    #[tokio::test]
    async fn unreachable_node_fails_session_establishment() {
        let fabric = fabric();
        fabric.add_device(SimDevice::new(7));
        fabric.set_reachable(7, false);

        let err = fabric.establish_session(fabric.peer(7)).await.unwrap_err();
        assert!(matches!(err, Error::SessionEstablishment { .. }));
    }

    #[tokio::test]
    async fn subscription_primes_then_streams_pushed_reports() {
        let fabric = fabric();
        fabric.add_device(SimDevice::new(42));
        let session = session(&fabric, 42).await;
        let mut stream = fabric.subscribe(&session, admin_subscription()).unwrap();

        assert!(matches!(stream.next().await, Some(ReportItem::Attribute { .. })));
        assert!(matches!(stream.next().await, Some(ReportItem::ReportEnd)));
        assert!(matches!(
            stream.next().await,
            Some(ReportItem::SubscriptionEstablished { .. })
        ));
        assert_eq!(fabric.subscriber_count(42), 1);

        fabric.update_attributes(
            42,
            ROOT_ENDPOINT,
            CLUSTER_ID_ADMINISTRATOR_COMMISSIONING,
            [(CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_WINDOW_STATUS, AttributeValue::UInt(2))],
        );
        fabric.report_timeout(42);
        fabric.end_subscriptions(42);

        assert!(matches!(
            stream.next().await,
            Some(ReportItem::Attribute { data: Ok(AttributeValue::UInt(2)), .. })
        ));
        assert!(matches!(stream.next().await, Some(ReportItem::ReportEnd)));
        assert!(matches!(stream.next().await, Some(ReportItem::Error(Error::Timeout))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn rejected_read_cannot_be_issued() {
        let fabric = fabric();
        fabric.add_device(SimDevice::new(42));
        fabric.set_read_behavior(42, ReadBehavior::Reject);
        let session = session(&fabric, 42).await;

        let result = fabric.read(&session, ReadRequest { attributes: Vec::new() });
        assert!(matches!(result, Err(Error::RequestRejected(_))));
    }

    #[tokio::test]
    async fn auto_approving_bridge_emits_request_result() {
        let fabric = fabric();
        fabric.add_device(SimDevice::new(100).auto_approve());
        let session = session(&fabric, 100).await;
        let events = EventPath::new(
            1,
            CLUSTER_ID_COMMISSIONER_CONTROL,
            CLUSTER_COMMISSIONER_CONTROL_EVENT_ID_COMMISSIONING_REQUEST_RESULT,
        );
        let mut stream = fabric
            .subscribe(
                &session,
                SubscribeRequest {
                    attributes: Vec::new(),
                    events: vec![events],
                    min_interval: Duration::ZERO,
                    max_interval_ceiling: Duration::from_secs(300),
                },
            )
            .unwrap();
        // Priming: report end + established.
        stream.next().await;
        stream.next().await;

        let response = fabric
            .invoke(
                &session,
                InvokeRequest {
                    endpoint: 1,
                    cluster: CLUSTER_ID_COMMISSIONER_CONTROL,
                    command: CLUSTER_COMMISSIONER_CONTROL_CMD_ID_REQUEST_COMMISSIONING_APPROVAL,
                    fields: AttributeValue::structure([(0, AttributeValue::UInt(77))]),
                    timeout: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(response, InvokeResponse::status_only());

        let Some(ReportItem::Event { data: Ok(data), .. }) = stream.next().await else {
            panic!("expected a request result event");
        };
        assert_eq!(data.field(0).unwrap().as_u64().unwrap(), 77);
        assert_eq!(data.field(1).unwrap().as_u64().unwrap(), 0x1);
        assert_eq!(fabric.invocations().len(), 1);
    }
}

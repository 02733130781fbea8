// ── Device synchronizer ──
//
// Fetches the Basic Information of a newly-seen device and turns it into
// a `SyncedDevice`. Exactly one synchronization runs at a time; a start
// request while another is in flight is rejected, never queued.

use std::sync::Arc;

use fabric_sync_api::clusters::{
    BASIC_INFORMATION_SYNC_ATTRIBUTES, CLUSTER_BRIDGED_DEVICE_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID,
    CLUSTER_ID_BASIC_INFORMATION, CLUSTER_ID_BRIDGED_DEVICE_BASIC_INFORMATION, ROOT_ENDPOINT,
};
use fabric_sync_api::{
    AttributePath, AttributeValue, EndpointId, InteractionClient, NodeId, PeerNodeId, ReadRequest,
    ReportItem, Session,
};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::DropGuard;
use tracing::{debug, info, warn};

use crate::convert::{BasicInformation, MAX_NAME_LENGTH, bounded_string};
use crate::error::CoreError;
use crate::model::SyncedDevice;
use crate::operation::{OperationId, PeerLink, Route, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum SynchronizationState {
    Idle,
    Connecting,
    AwaitingResponse,
    ReceivedResponse,
    ReceivedError,
    GettingUniqueId,
}

// ── Unique-id resolution ─────────────────────────────────────────────

/// Out-of-band lookup of a bridged device's unique id through the
/// remote fabric's aggregator.
pub trait UniqueIdResolver: Send + Sync {
    /// Start a lookup for the device on `remote_endpoint` of
    /// `remote_bridge`. `Err` means the lookup could not be started.
    fn resolve(
        &self,
        client: Arc<dyn InteractionClient>,
        remote_bridge: PeerNodeId,
        remote_endpoint: EndpointId,
    ) -> Result<BoxFuture<'static, Option<String>>, CoreError>;
}

/// Reads `BridgedDeviceBasicInformation.UniqueID` from the remote bridge.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgedUniqueIdResolver;

impl UniqueIdResolver for BridgedUniqueIdResolver {
    fn resolve(
        &self,
        client: Arc<dyn InteractionClient>,
        remote_bridge: PeerNodeId,
        remote_endpoint: EndpointId,
    ) -> Result<BoxFuture<'static, Option<String>>, CoreError> {
        let session = client.establish_session(remote_bridge);
        Ok(Box::pin(async move {
            let session = match session.await {
                Ok(session) => session,
                Err(e) => {
                    warn!(bridge = %remote_bridge, error = %e, "unique id lookup: no session");
                    return None;
                }
            };
            read_bridged_unique_id(client.as_ref(), &session, remote_endpoint).await
        }))
    }
}

async fn read_bridged_unique_id(
    client: &dyn InteractionClient,
    session: &Session,
    endpoint: EndpointId,
) -> Option<String> {
    let request = ReadRequest {
        attributes: vec![AttributePath::new(
            endpoint,
            CLUSTER_ID_BRIDGED_DEVICE_BASIC_INFORMATION,
            CLUSTER_BRIDGED_DEVICE_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID,
        )],
    };
    let mut stream = match client.read(session, request) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(endpoint, error = %e, "unique id lookup: read not issued");
            return None;
        }
    };
    while let Some(item) = stream.next().await {
        match item {
            ReportItem::Attribute { data: Ok(value), .. } => {
                return bounded_string(&value, MAX_NAME_LENGTH)
                    .inspect_err(|e| warn!(endpoint, error = %e, "unique id lookup: bad value"))
                    .ok();
            }
            ReportItem::Attribute { data: Err(e), .. } | ReportItem::Error(e) => {
                debug!(endpoint, error = %e, "unique id lookup failed");
                return None;
            }
            _ => {}
        }
    }
    None
}

// ── Synchronizer ─────────────────────────────────────────────────────

/// Topology facts the synchronizer consults when a read completes.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SyncContext {
    pub local_bridge: Option<NodeId>,
    pub remote_bridge: Option<PeerNodeId>,
    /// Endpoint of the target device on the remote bridge.
    pub remote_endpoint: Option<EndpointId>,
}

#[derive(Debug)]
pub(crate) enum SyncOutcome {
    Pending,
    Completed(SyncedDevice),
    Abandoned,
}

struct Target {
    peer: PeerNodeId,
    is_icd: bool,
    op: OperationId,
    info: BasicInformation,
    endpoint_id: EndpointId,
    /// Keeps the read's report stream alive.
    reports: Option<DropGuard>,
}

pub(crate) struct DeviceSynchronizer {
    state: SynchronizationState,
    target: Option<Target>,
    resolver: Arc<dyn UniqueIdResolver>,
}

impl DeviceSynchronizer {
    pub(crate) fn new(resolver: Arc<dyn UniqueIdResolver>) -> Self {
        Self {
            state: SynchronizationState::Idle,
            target: None,
            resolver,
        }
    }

    pub(crate) fn state(&self) -> SynchronizationState {
        self.state
    }

    /// Peer of the synchronization in progress.
    pub(crate) fn target(&self) -> Option<PeerNodeId> {
        self.target.as_ref().map(|t| t.peer)
    }

    /// Begin synchronizing `node_id`. Rejected unless idle.
    pub(crate) fn start(
        &mut self,
        link: &PeerLink,
        node_id: NodeId,
        is_icd: bool,
    ) -> Result<(), CoreError> {
        if self.state != SynchronizationState::Idle {
            warn!(
                node = %node_id,
                state = %self.state,
                "device synchronization already in progress"
            );
            return Err(CoreError::SynchronizerBusy { state: self.state });
        }

        let peer = link.peer(node_id);
        let op = link.next_operation();
        info!(%peer, is_icd, "starting device synchronization");
        self.target = Some(Target {
            peer,
            is_icd,
            op,
            info: BasicInformation::default(),
            endpoint_id: ROOT_ENDPOINT,
            reports: None,
        });
        self.state = SynchronizationState::Connecting;
        link.connect(peer, Route::Synchronizer, op);
        Ok(())
    }

    pub(crate) fn handle(
        &mut self,
        link: &PeerLink,
        op: OperationId,
        event: SessionEvent,
        ctx: &SyncContext,
    ) -> SyncOutcome {
        let Some(target) = self.target.as_mut().filter(|t| t.op == op) else {
            debug!(%op, "dropping stale synchronizer event");
            return SyncOutcome::Pending;
        };

        match (self.state, event) {
            (SynchronizationState::Connecting, SessionEvent::Connected(session)) => {
                let request = ReadRequest {
                    attributes: BASIC_INFORMATION_SYNC_ATTRIBUTES
                        .iter()
                        .map(|&attribute| {
                            AttributePath::new(
                                ROOT_ENDPOINT,
                                CLUSTER_ID_BASIC_INFORMATION,
                                attribute,
                            )
                        })
                        .collect(),
                };
                match link.client().read(&session, request) {
                    Ok(stream) => {
                        target.reports =
                            Some(link.forward_reports(stream, Route::Synchronizer, op));
                        self.state = SynchronizationState::AwaitingResponse;
                        SyncOutcome::Pending
                    }
                    Err(e) => {
                        warn!(
                            peer = %target.peer,
                            error = %e,
                            "failed to issue Basic Information read"
                        );
                        self.reset()
                    }
                }
            }
            (SynchronizationState::Connecting, SessionEvent::ConnectionFailed(e)) => {
                warn!(peer = %target.peer, error = %e, "device synchronization: connection failed");
                self.state = SynchronizationState::ReceivedError;
                self.reset()
            }
            (SynchronizationState::AwaitingResponse, SessionEvent::Report(item)) => {
                match item {
                    ReportItem::Attribute { path, data } => ingest(target, path, data),
                    ReportItem::ReportEnd => self.state = SynchronizationState::ReceivedResponse,
                    ReportItem::Error(e) => {
                        warn!(peer = %target.peer, error = %e, "Basic Information read failed");
                        self.state = SynchronizationState::ReceivedError;
                    }
                    other => debug!(peer = %target.peer, item = ?other, "ignoring report item"),
                }
                SyncOutcome::Pending
            }
            (_, SessionEvent::ReportsDone) => self.on_done(link, ctx),
            (SynchronizationState::GettingUniqueId, SessionEvent::UniqueIdResolved(unique_id)) => {
                match unique_id {
                    Some(unique_id) => {
                        debug!(
                            peer = %target.peer,
                            %unique_id,
                            "resolved unique id via remote bridge"
                        );
                        target.info.unique_id = Some(unique_id);
                    }
                    None => warn!(peer = %target.peer, "unique id unavailable from remote bridge"),
                }
                self.complete()
            }
            (state, event) => {
                debug!(%state, ?event, "ignoring synchronizer event");
                SyncOutcome::Pending
            }
        }
    }

    /// The read finished. Fetch the unique id out of band when needed.
    fn on_done(&mut self, link: &PeerLink, ctx: &SyncContext) -> SyncOutcome {
        if self.state != SynchronizationState::ReceivedResponse {
            if let Some(target) = &self.target {
                warn!(
                    peer = %target.peer,
                    state = %self.state,
                    "synchronization ended without a response"
                );
            }
            self.state = SynchronizationState::ReceivedError;
            return self.reset();
        }
        let Some(target) = self.target.as_mut() else {
            return self.reset();
        };
        target.reports = None;
        if let Some(endpoint) = ctx.remote_endpoint {
            target.endpoint_id = endpoint;
        }

        let is_local_bridge = ctx.local_bridge == Some(target.peer.node_id);
        if is_local_bridge || target.info.unique_id.is_some() {
            return self.complete();
        }

        let (Some(remote_bridge), Some(remote_endpoint)) = (ctx.remote_bridge, ctx.remote_endpoint)
        else {
            debug!(peer = %target.peer, "no remote bridge mapping, skipping unique id lookup");
            return self.complete();
        };
        match self
            .resolver
            .resolve(Arc::clone(link.client()), remote_bridge, remote_endpoint)
        {
            Ok(lookup) => {
                self.state = SynchronizationState::GettingUniqueId;
                link.spawn(Route::Synchronizer, target.op, async move {
                    SessionEvent::UniqueIdResolved(lookup.await)
                });
                SyncOutcome::Pending
            }
            Err(e) => {
                warn!(peer = %target.peer, error = %e, "unique id lookup unavailable");
                self.complete()
            }
        }
    }

    fn complete(&mut self) -> SyncOutcome {
        let outcome = match self.target.take() {
            Some(target) => {
                let device = target
                    .info
                    .into_device(target.peer, target.endpoint_id, target.is_icd);
                info!(
                    peer = %device.peer,
                    unique_id = ?device.unique_id,
                    "device synchronization complete"
                );
                SyncOutcome::Completed(device)
            }
            None => SyncOutcome::Abandoned,
        };
        self.state = SynchronizationState::Idle;
        outcome
    }

    fn reset(&mut self) -> SyncOutcome {
        self.target = None;
        self.state = SynchronizationState::Idle;
        SyncOutcome::Abandoned
    }
}

fn ingest(
    target: &mut Target,
    path: AttributePath,
    data: Result<AttributeValue, fabric_sync_api::Error>,
) {
    if path.cluster != CLUSTER_ID_BASIC_INFORMATION {
        debug!(peer = %target.peer, %path, "ignoring attribute outside Basic Information");
        return;
    }
    let result = data.and_then(|value| target.info.apply(path.attribute, &value));
    if let Err(e) = result {
        warn!(
            peer = %target.peer,
            %path,
            error = %e,
            "failed to decode Basic Information attribute"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use fabric_sync_api::clusters::CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_ID;
    use fabric_sync_api::{ReadBehavior, SimDevice};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::operation::testing::Harness;

    /// Counts lookups and answers with a fixed id.
    struct FixedResolver {
        calls: AtomicUsize,
        answer: Option<String>,
    }

    impl FixedResolver {
        fn new(answer: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                answer: answer.map(str::to_owned),
            })
        }
    }

    impl UniqueIdResolver for FixedResolver {
        fn resolve(
            &self,
            _client: Arc<dyn InteractionClient>,
            _remote_bridge: PeerNodeId,
            _remote_endpoint: EndpointId,
        ) -> Result<BoxFuture<'static, Option<String>>, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = self.answer.clone();
            Ok(Box::pin(async move { answer }))
        }
    }

    /// Pump events until the synchronizer produces a final outcome.
    async fn run(
        harness: &mut Harness,
        sync: &mut DeviceSynchronizer,
        ctx: &SyncContext,
        states: &mut Vec<SynchronizationState>,
    ) -> SyncOutcome {
        while let Some(event) = harness.next_event().await {
            assert_eq!(event.route, Route::Synchronizer);
            let outcome = sync.handle(&harness.link, event.op, event.event, ctx);
            states.push(sync.state());
            if !matches!(outcome, SyncOutcome::Pending) {
                return outcome;
            }
        }
        SyncOutcome::Pending
    }

    #[tokio::test]
    async fn synchronizes_vendor_name_and_unique_id() {
        let mut harness = Harness::new();
        harness
            .fabric
            .add_device(SimDevice::new(42).vendor_name("Acme").unique_id("abc123"));
        let resolver = FixedResolver::new(Some("unused"));
        let mut sync = DeviceSynchronizer::new(resolver.clone());

        sync.start(&harness.link, NodeId(42), false).unwrap();
        assert_eq!(sync.state(), SynchronizationState::Connecting);

        let mut states = Vec::new();
        let ctx = SyncContext::default();
        let SyncOutcome::Completed(device) = run(&mut harness, &mut sync, &ctx, &mut states).await
        else {
            panic!("synchronization did not complete");
        };

        assert_eq!(device.peer, harness.fabric.peer(42));
        assert!(!device.is_icd);
        assert_eq!(device.vendor_name.as_deref(), Some("Acme"));
        assert_eq!(device.unique_id.as_deref(), Some("abc123"));
        assert_eq!(device.endpoint_id, ROOT_ENDPOINT);
        assert_eq!(sync.state(), SynchronizationState::Idle);
        assert!(!states.contains(&SynchronizationState::GettingUniqueId));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_start_is_rejected_without_side_effects() {
        let mut harness = Harness::new();
        harness.fabric.add_device(SimDevice::new(42).unique_id("abc123"));
        harness.fabric.add_device(SimDevice::new(43).unique_id("def456"));
        let mut sync = DeviceSynchronizer::new(FixedResolver::new(None));

        sync.start(&harness.link, NodeId(42), false).unwrap();
        let err = sync.start(&harness.link, NodeId(43), true).unwrap_err();
        assert!(matches!(
            err,
            CoreError::SynchronizerBusy {
                state: SynchronizationState::Connecting
            }
        ));

        let SyncOutcome::Completed(device) =
            run(&mut harness, &mut sync, &SyncContext::default(), &mut Vec::new()).await
        else {
            panic!("original synchronization did not complete");
        };
        assert_eq!(device.peer.node_id, NodeId(42));
        assert_eq!(device.unique_id.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn session_failure_returns_to_idle_without_a_record() {
        let mut harness = Harness::new();
        harness.fabric.add_device(SimDevice::new(42));
        harness.fabric.set_reachable(42, false);
        let mut sync = DeviceSynchronizer::new(FixedResolver::new(None));

        sync.start(&harness.link, NodeId(42), false).unwrap();
        let outcome = run(&mut harness, &mut sync, &SyncContext::default(), &mut Vec::new()).await;

        assert!(matches!(outcome, SyncOutcome::Abandoned));
        assert_eq!(sync.state(), SynchronizationState::Idle);
    }

    #[tokio::test]
    async fn read_that_cannot_be_issued_abandons_attempt() {
        let mut harness = Harness::new();
        harness.fabric.add_device(SimDevice::new(42));
        harness.fabric.set_read_behavior(42, ReadBehavior::Reject);
        let mut sync = DeviceSynchronizer::new(FixedResolver::new(None));

        sync.start(&harness.link, NodeId(42), false).unwrap();
        let outcome = run(&mut harness, &mut sync, &SyncContext::default(), &mut Vec::new()).await;

        assert!(matches!(outcome, SyncOutcome::Abandoned));
        assert_eq!(sync.state(), SynchronizationState::Idle);
    }

    #[tokio::test]
    async fn failed_read_publishes_nothing() {
        let mut harness = Harness::new();
        harness.fabric.add_device(SimDevice::new(42).unique_id("abc123"));
        harness.fabric.set_read_behavior(42, ReadBehavior::Fail);
        let mut sync = DeviceSynchronizer::new(FixedResolver::new(None));

        sync.start(&harness.link, NodeId(42), false).unwrap();
        let mut states = Vec::new();
        let outcome = run(&mut harness, &mut sync, &SyncContext::default(), &mut states).await;

        assert!(matches!(outcome, SyncOutcome::Abandoned));
        assert!(states.contains(&SynchronizationState::ReceivedError));
        assert_eq!(sync.state(), SynchronizationState::Idle);
    }

    #[tokio::test]
    async fn bad_attribute_leaves_field_unset() {
        let mut harness = Harness::new();
        harness.fabric.add_device(
            SimDevice::new(42)
                .vendor_name("Acme")
                .unique_id("abc123")
                .attribute(
                    AttributePath::new(
                        ROOT_ENDPOINT,
                        CLUSTER_ID_BASIC_INFORMATION,
                        CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_ID,
                    ),
                    AttributeValue::Utf8("not a number".into()),
                ),
        );
        let mut sync = DeviceSynchronizer::new(FixedResolver::new(None));

        sync.start(&harness.link, NodeId(42), false).unwrap();
        let SyncOutcome::Completed(device) =
            run(&mut harness, &mut sync, &SyncContext::default(), &mut Vec::new()).await
        else {
            panic!("synchronization did not complete");
        };

        assert_eq!(device.vendor_id, None);
        assert_eq!(device.vendor_name.as_deref(), Some("Acme"));
        assert_eq!(device.product_name, None);
    }

    #[tokio::test]
    async fn missing_unique_id_is_resolved_through_remote_bridge() {
        let mut harness = Harness::new();
        harness.fabric.add_device(SimDevice::new(42).vendor_name("Acme"));
        let resolver = FixedResolver::new(Some("bridged-7"));
        let mut sync = DeviceSynchronizer::new(resolver.clone());
        let ctx = SyncContext {
            local_bridge: None,
            remote_bridge: Some(harness.fabric.peer(100)),
            remote_endpoint: Some(7),
        };

        sync.start(&harness.link, NodeId(42), false).unwrap();
        let mut states = Vec::new();
        let SyncOutcome::Completed(device) = run(&mut harness, &mut sync, &ctx, &mut states).await
        else {
            panic!("synchronization did not complete");
        };

        assert!(states.contains(&SynchronizationState::GettingUniqueId));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(device.unique_id.as_deref(), Some("bridged-7"));
        assert_eq!(device.endpoint_id, 7);
    }

    #[tokio::test]
    async fn local_bridge_skips_unique_id_lookup() {
        let mut harness = Harness::new();
        harness.fabric.add_device(SimDevice::new(50).vendor_name("Bridge"));
        let resolver = FixedResolver::new(Some("never"));
        let mut sync = DeviceSynchronizer::new(resolver.clone());
        let ctx = SyncContext {
            local_bridge: Some(NodeId(50)),
            remote_bridge: Some(harness.fabric.peer(100)),
            remote_endpoint: Some(3),
        };

        sync.start(&harness.link, NodeId(50), false).unwrap();
        let SyncOutcome::Completed(device) =
            run(&mut harness, &mut sync, &ctx, &mut Vec::new()).await
        else {
            panic!("synchronization did not complete");
        };

        assert_eq!(device.unique_id, None);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bridged_resolver_reads_remote_endpoint() {
        let harness = Harness::new();
        harness
            .fabric
            .add_device(SimDevice::new(100).bridged_endpoint(4, Some("bridged-4")));

        let lookup = BridgedUniqueIdResolver
            .resolve(Arc::clone(harness.link.client()), harness.fabric.peer(100), 4)
            .unwrap();
        assert_eq!(lookup.await.as_deref(), Some("bridged-4"));

        let missing = BridgedUniqueIdResolver
            .resolve(Arc::clone(harness.link.client()), harness.fabric.peer(100), 5)
            .unwrap();
        assert_eq!(missing.await, None);
    }
}

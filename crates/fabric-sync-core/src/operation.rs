// ── Peer session operations ──
//
// Every peer interaction follows the same shape: establish a session,
// perform one action over it, report completion exactly once. The I/O
// runs in spawned tasks that never touch component state; each step's
// outcome is posted back to the event loop as a `LoopEvent` tagged with
// the route and operation id that started it. Components drop events
// whose id no longer matches their live operation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use fabric_sync_api::{
    FabricIndex, InteractionClient, InvokeRequest, InvokeResponse, NodeId, PeerNodeId,
    ReportItem, ReportStream, Session,
};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::error::CoreError;

// ── Routing ──────────────────────────────────────────────────────────

/// Identifies one started operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct OperationId(u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Which component an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Synchronizer,
    Subscription(PeerNodeId),
    Commissioner,
    RemoteBridge,
    StayActive,
}

/// Outcome of one asynchronous step.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Connected(Session),
    ConnectionFailed(fabric_sync_api::Error),
    Report(ReportItem),
    /// The report stream ended.
    ReportsDone,
    Response(Result<InvokeResponse, fabric_sync_api::Error>),
    UniqueIdResolved(Option<String>),
}

#[derive(Debug)]
pub(crate) struct LoopEvent {
    pub route: Route,
    pub op: OperationId,
    pub event: SessionEvent,
}

// ── PeerLink ─────────────────────────────────────────────────────────

/// Loop-side handle for starting peer I/O.
///
/// Cloneable; every clone posts into the same event loop and shares the
/// operation id counter. All spawned tasks stop when `cancel` fires.
#[derive(Clone)]
pub(crate) struct PeerLink {
    client: Arc<dyn InteractionClient>,
    events: mpsc::UnboundedSender<LoopEvent>,
    cancel: CancellationToken,
    next_op: Arc<AtomicU64>,
}

impl PeerLink {
    pub(crate) fn new(
        client: Arc<dyn InteractionClient>,
        events: mpsc::UnboundedSender<LoopEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            events,
            cancel,
            next_op: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn client(&self) -> &Arc<dyn InteractionClient> {
        &self.client
    }

    pub(crate) fn fabric_index(&self) -> FabricIndex {
        self.client.fabric_index()
    }

    pub(crate) fn local_node_id(&self) -> NodeId {
        self.client.local_node_id()
    }

    pub(crate) fn peer(&self, node_id: NodeId) -> PeerNodeId {
        PeerNodeId::new(self.fabric_index(), node_id)
    }

    pub(crate) fn next_operation(&self) -> OperationId {
        OperationId(self.next_op.fetch_add(1, Ordering::Relaxed))
    }

    /// Request session establishment; posts `Connected` or `ConnectionFailed`.
    pub(crate) fn connect(&self, peer: PeerNodeId, route: Route, op: OperationId) {
        let session = self.client.establish_session(peer);
        self.spawn(route, op, async move {
            match session.await {
                Ok(session) => SessionEvent::Connected(session),
                Err(e) => SessionEvent::ConnectionFailed(e),
            }
        });
    }

    /// Forward every report item to the loop, then `ReportsDone`.
    ///
    /// Dropping the returned guard stops forwarding and drops the stream,
    /// which tears the interaction down. No `ReportsDone` is posted then.
    pub(crate) fn forward_reports(
        &self,
        mut stream: ReportStream,
        route: Route,
        op: OperationId,
    ) -> DropGuard {
        let token = self.cancel.child_token();
        let stop = token.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    item = stream.next() => {
                        let event = match item {
                            Some(item) => SessionEvent::Report(item),
                            None => SessionEvent::ReportsDone,
                        };
                        let done = matches!(event, SessionEvent::ReportsDone);
                        if events.send(LoopEvent { route, op, event }).is_err() || done {
                            break;
                        }
                    }
                }
            }
        });
        token.drop_guard()
    }

    /// Send one command over an established session; posts `Response`.
    pub(crate) fn invoke(
        &self,
        session: &Session,
        request: InvokeRequest,
        route: Route,
        op: OperationId,
    ) {
        let response = self.client.invoke(session, request);
        self.spawn(route, op, async move { SessionEvent::Response(response.await) });
    }

    /// Run `work` off-loop and post its result.
    pub(crate) fn spawn<F>(&self, route: Route, op: OperationId, work: F)
    where
        F: Future<Output = SessionEvent> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                event = work => {
                    if events.send(LoopEvent { route, op, event }).is_err() {
                        debug!(%op, "event loop gone, dropping result");
                    }
                }
            }
        });
    }
}

// ── OneShotCommand ───────────────────────────────────────────────────

/// Progress of a [`OneShotCommand`].
#[derive(Debug)]
pub(crate) enum OneShotProgress {
    Pending,
    Done(Result<InvokeResponse, CoreError>),
}

/// Connect to a peer, send one command, report the outcome once.
///
/// Held in a single-owner slot by whoever started it and dropped when
/// `on_event` returns `Done`.
#[derive(Debug)]
pub(crate) struct OneShotCommand {
    op: OperationId,
    route: Route,
    peer: PeerNodeId,
    request: Option<InvokeRequest>,
}

impl OneShotCommand {
    pub(crate) fn start(
        link: &PeerLink,
        peer: PeerNodeId,
        route: Route,
        request: InvokeRequest,
    ) -> Self {
        let op = link.next_operation();
        debug!(%peer, %op, cluster = request.cluster, command = request.command, "sending command");
        link.connect(peer, route, op);
        Self {
            op,
            route,
            peer,
            request: Some(request),
        }
    }

    pub(crate) fn op(&self) -> OperationId {
        self.op
    }

    pub(crate) fn peer(&self) -> PeerNodeId {
        self.peer
    }

    pub(crate) fn on_event(&mut self, link: &PeerLink, event: SessionEvent) -> OneShotProgress {
        match event {
            SessionEvent::Connected(session) => {
                if let Some(request) = self.request.take() {
                    link.invoke(&session, request, self.route, self.op);
                } else {
                    warn!(
                        peer = %self.peer,
                        op = %self.op,
                        "duplicate session for one-shot command"
                    );
                }
                OneShotProgress::Pending
            }
            SessionEvent::ConnectionFailed(e) => OneShotProgress::Done(Err(e.into())),
            SessionEvent::Response(result) => OneShotProgress::Done(result.map_err(Into::into)),
            other => {
                debug!(
                    peer = %self.peer,
                    op = %self.op,
                    event = ?other,
                    "ignoring event for one-shot command"
                );
                OneShotProgress::Pending
            }
        }
    }
}

// ── Test harness ─────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use fabric_sync_api::{FabricIndex, NodeId, SimulatedFabric};

    use super::*;

    pub(crate) const CONTROLLER_NODE: NodeId = NodeId(0x1);
    const QUIET_PERIOD: Duration = Duration::from_millis(100);

    /// A `PeerLink` wired to a simulated fabric with the loop side
    /// exposed for manual pumping.
    pub(crate) struct Harness {
        pub fabric: SimulatedFabric,
        pub link: PeerLink,
        rx: mpsc::UnboundedReceiver<LoopEvent>,
        _cancel: CancellationToken,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            let fabric = SimulatedFabric::new(FabricIndex(1), CONTROLLER_NODE);
            let (tx, rx) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            let link = PeerLink::new(Arc::new(fabric.clone()), tx, cancel.clone());
            Self {
                fabric,
                link,
                rx,
                _cancel: cancel,
            }
        }

        /// Next event, or `None` once the loop has been quiet for a while.
        pub(crate) async fn next_event(&mut self) -> Option<LoopEvent> {
            tokio::time::timeout(QUIET_PERIOD, self.rx.recv())
                .await
                .ok()
                .flatten()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use fabric_sync_api::clusters::{
        CLUSTER_ICD_MANAGEMENT_CMD_ID_STAY_ACTIVE_REQUEST, CLUSTER_ID_ICD_MANAGEMENT,
        ROOT_ENDPOINT,
    };
    use fabric_sync_api::{AttributeValue, SimDevice};

    use super::testing::Harness;
    use super::*;

    fn stay_active(ms: u64) -> InvokeRequest {
        InvokeRequest {
            endpoint: ROOT_ENDPOINT,
            cluster: CLUSTER_ID_ICD_MANAGEMENT,
            command: CLUSTER_ICD_MANAGEMENT_CMD_ID_STAY_ACTIVE_REQUEST,
            fields: AttributeValue::structure([(0, AttributeValue::UInt(ms))]),
            timeout: None,
        }
    }

    async fn drive(
        harness: &mut Harness,
        command: &mut OneShotCommand,
    ) -> Result<InvokeResponse, CoreError> {
        while let Some(event) = harness.next_event().await {
            assert_eq!(event.op, command.op());
            if let OneShotProgress::Done(result) = command.on_event(&harness.link, event.event) {
                return result;
            }
        }
        panic!("one-shot command never completed");
    }

    #[tokio::test]
    async fn one_shot_command_completes_once() {
        let mut harness = Harness::new();
        harness.fabric.add_device(SimDevice::new(9));
        let peer = harness.fabric.peer(9);

        let mut command =
            OneShotCommand::start(&harness.link, peer, Route::StayActive, stay_active(5000));
        let response = drive(&mut harness, &mut command).await.unwrap();

        assert_eq!(response.fields.field(0).unwrap().as_u64().unwrap(), 5000);
        assert!(harness.next_event().await.is_none());
        assert_eq!(harness.fabric.invocations().len(), 1);
    }

    #[tokio::test]
    async fn one_shot_command_reports_connection_failure() {
        let mut harness = Harness::new();
        harness.fabric.add_device(SimDevice::new(9));
        harness.fabric.set_reachable(9, false);
        let peer = harness.fabric.peer(9);

        let mut command =
            OneShotCommand::start(&harness.link, peer, Route::StayActive, stay_active(5000));
        let err = drive(&mut harness, &mut command).await.unwrap_err();

        assert!(matches!(err, CoreError::ConnectionFailed { .. }));
        assert!(harness.fabric.invocations().is_empty());
    }

    #[test]
    fn operation_ids_are_unique() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let fabric = fabric_sync_api::SimulatedFabric::new(FabricIndex(1), NodeId(1));
        let link = PeerLink::new(Arc::new(fabric), tx, CancellationToken::new());
        let clone = link.clone();
        assert_ne!(link.next_operation(), clone.next_operation());
    }
}

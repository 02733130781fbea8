// ── Interaction-model contracts ──
//
// What the bridge layer needs from the session/transport collaborator:
// establish a CASE session, read, subscribe, invoke. Reads and
// subscriptions deliver a stream of report items; the end of the stream
// is the "done" notification. Dropping a stream tears the interaction down.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use futures_core::Stream;
use futures_util::future::BoxFuture;

use crate::error::Error;
use crate::ids::{
    AttributeId, ClusterId, CommandId, EndpointId, EventId, FabricIndex, NodeId, PeerNodeId,
};
use crate::value::AttributeValue;

// ── Paths ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributePath {
    pub endpoint: EndpointId,
    pub cluster: ClusterId,
    pub attribute: AttributeId,
}

impl AttributePath {
    pub fn new(endpoint: EndpointId, cluster: ClusterId, attribute: AttributeId) -> Self {
        Self {
            endpoint,
            cluster,
            attribute,
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/0x{:04X}/0x{:04X}",
            self.endpoint, self.cluster, self.attribute
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventPath {
    pub endpoint: EndpointId,
    pub cluster: ClusterId,
    pub event: EventId,
}

impl EventPath {
    pub fn new(endpoint: EndpointId, cluster: ClusterId, event: EventId) -> Self {
        Self {
            endpoint,
            cluster,
            event,
        }
    }
}

// ── Reports ─────────────────────────────────────────────────────────

/// One item of a read or subscription report stream.
#[derive(Debug, Clone)]
pub enum ReportItem {
    /// An attribute value, or the per-attribute failure for that path.
    Attribute {
        path: AttributePath,
        data: Result<AttributeValue, Error>,
    },
    Event {
        path: EventPath,
        event_number: u64,
        data: Result<AttributeValue, Error>,
    },
    /// The current report is complete.
    ReportEnd,
    /// The subscription handshake finished after the priming report.
    SubscriptionEstablished { subscription_id: u32 },
    /// Interaction-level failure. Timeouts on a live subscription are
    /// followed by more items; any other error is followed by stream end.
    Error(Error),
}

pub type ReportStream = Pin<Box<dyn Stream<Item = ReportItem> + Send>>;

// ── Requests ────────────────────────────────────────────────────────

/// Handle to an established secure session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    peer: PeerNodeId,
    id: u64,
}

impl Session {
    pub fn new(peer: PeerNodeId, id: u64) -> Self {
        Self { peer, id }
    }

    pub fn peer(&self) -> PeerNodeId {
        self.peer
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub attributes: Vec<AttributePath>,
}

#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub attributes: Vec<AttributePath>,
    pub events: Vec<EventPath>,
    pub min_interval: Duration,
    /// Upper bound the publisher may negotiate the max interval up to.
    pub max_interval_ceiling: Duration,
}

#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub endpoint: EndpointId,
    pub cluster: ClusterId,
    pub command: CommandId,
    pub fields: AttributeValue,
    pub timeout: Option<Duration>,
}

/// Successful command response: either a bare success status
/// (`command == None`) or a data response command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeResponse {
    pub command: Option<CommandId>,
    pub fields: AttributeValue,
}

impl InvokeResponse {
    pub fn status_only() -> Self {
        Self {
            command: None,
            fields: AttributeValue::Null,
        }
    }
}

// ── Client trait ────────────────────────────────────────────────────

/// The interaction-model surface consumed by the bridge layer.
///
/// `read` and `subscribe` fail synchronously when the request cannot be
/// issued; failures after that arrive as [`ReportItem::Error`].
pub trait InteractionClient: Send + Sync + 'static {
    /// Fabric the local controller operates on.
    fn fabric_index(&self) -> FabricIndex;

    /// Operational node id of the local controller on that fabric.
    fn local_node_id(&self) -> NodeId;

    fn establish_session(&self, peer: PeerNodeId) -> BoxFuture<'static, Result<Session, Error>>;

    fn read(&self, session: &Session, request: ReadRequest) -> Result<ReportStream, Error>;

    fn subscribe(&self, session: &Session, request: SubscribeRequest)
    -> Result<ReportStream, Error>;

    fn invoke(
        &self,
        session: &Session,
        request: InvokeRequest,
    ) -> BoxFuture<'static, Result<InvokeResponse, Error>>;
}

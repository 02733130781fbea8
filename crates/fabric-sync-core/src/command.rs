// ── Command API ──
//
// Every external request flows through a unified `Command` enum. The
// controller marshals each one onto the event loop, which routes it to
// the owning component and answers through the envelope's oneshot.

use std::collections::BTreeSet;
use std::time::Duration;

use fabric_sync_api::{EndpointId, NodeId, PeerNodeId};

use crate::commissioner_control::CommandType;
use crate::error::CoreError;
use crate::model::{CommissioningRequestResult, ReverseCommissioningWindow};
use crate::subscription::SubscriptionState;
use crate::synchronizer::SynchronizationState;

/// A command envelope sent through the command channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // ── Synchronization ──────────────────────────────────────────────
    /// Fetch Basic Information for a device; resolves once the record is
    /// published or the attempt is abandoned.
    StartDeviceSynchronization {
        node_id: NodeId,
        is_icd: bool,
    },

    // ── Subscriptions ────────────────────────────────────────────────
    StartSubscription {
        peer: PeerNodeId,
    },
    StopSubscription {
        peer: PeerNodeId,
    },

    // ── Topology ─────────────────────────────────────────────────────
    SetLocalBridge {
        node_id: Option<NodeId>,
    },
    SetRemoteBridge {
        node_id: Option<NodeId>,
    },
    /// Map a local node to the remote bridge endpoint that mirrors it.
    RegisterBridgedDevice {
        node_id: NodeId,
        endpoint: EndpointId,
    },
    ApplyPartsList {
        endpoints: BTreeSet<EndpointId>,
    },
    RemoveDevice {
        peer: PeerNodeId,
    },

    // ── Commissioner Control ─────────────────────────────────────────
    /// A random request id is chosen when `request_id` is `None`.
    RequestCommissioningApproval {
        request_id: Option<u64>,
        label: Option<String>,
    },
    CommissionNode {
        request_id: u64,
        response_timeout: Duration,
    },
    DeliverCommissioningRequestResult(CommissioningRequestResult),

    // ── ICD ──────────────────────────────────────────────────────────
    KeepActive {
        peer: PeerNodeId,
        duration: Option<Duration>,
    },

    // ── Introspection ────────────────────────────────────────────────
    SynchronizerState,
    SubscriptionStates,
    CommissionerState,
}

impl Command {
    /// Short name for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartDeviceSynchronization { .. } => "start_device_synchronization",
            Self::StartSubscription { .. } => "start_subscription",
            Self::StopSubscription { .. } => "stop_subscription",
            Self::SetLocalBridge { .. } => "set_local_bridge",
            Self::SetRemoteBridge { .. } => "set_remote_bridge",
            Self::RegisterBridgedDevice { .. } => "register_bridged_device",
            Self::ApplyPartsList { .. } => "apply_parts_list",
            Self::RemoveDevice { .. } => "remove_device",
            Self::RequestCommissioningApproval { .. } => "request_commissioning_approval",
            Self::CommissionNode { .. } => "commission_node",
            Self::DeliverCommissioningRequestResult(_) => "deliver_commissioning_request_result",
            Self::KeepActive { .. } => "keep_active",
            Self::SynchronizerState => "synchronizer_state",
            Self::SubscriptionStates => "subscription_states",
            Self::CommissionerState => "commissioner_state",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Ok,
    /// Whether synchronization produced a record.
    Synchronized(bool),
    RequestId(u64),
    CommissioningWindow(ReverseCommissioningWindow),
    PromisedActiveDuration(Duration),
    SynchronizerState(SynchronizationState),
    Subscriptions(Vec<(PeerNodeId, SubscriptionState)>),
    CommissionerState(CommandType),
}

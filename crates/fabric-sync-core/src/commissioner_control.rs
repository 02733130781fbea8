// ── Commissioner Control client ──
//
// Drives reverse commissioning against the remote fabric's bridge:
// `RequestCommissioningApproval`, then, once the bridge reports an
// approved `CommissioningRequestResult`, `CommissionNode`. One command is
// in flight at a time and its slot is released on completion.

use std::time::Duration;

use fabric_sync_api::clusters::{
    CLUSTER_COMMISSIONER_CONTROL_CMD_ID_COMMISSION_NODE,
    CLUSTER_COMMISSIONER_CONTROL_CMD_ID_REQUEST_COMMISSIONING_APPROVAL,
    CLUSTER_ID_COMMISSIONER_CONTROL,
};
use fabric_sync_api::{EndpointId, InvokeRequest, NodeId, PeerNodeId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::convert::{
    MAX_APPROVAL_LABEL_LENGTH, approval_request_fields, commission_node_fields,
    decode_reverse_commissioning_window,
};
use crate::error::CoreError;
use crate::model::{
    CommissioningApprovalRequest, CommissioningRequestResult, ReverseCommissioningWindow,
};
use crate::operation::{
    OneShotCommand, OneShotProgress, OperationId, PeerLink, Route, SessionEvent,
};

/// Accepted range for `CommissionNode.ResponseTimeoutSeconds`.
pub const COMMISSION_NODE_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 30..=120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum CommandType {
    Undefined,
    RequestCommissioningApproval,
    CommissionNode,
}

/// Approval request awaiting its `CommissioningRequestResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutstandingRequest {
    request_id: u64,
    client_node_id: NodeId,
}

struct InFlight {
    command: OneShotCommand,
    request_id: u64,
}

/// A finished command.
#[derive(Debug)]
pub(crate) struct Completion {
    pub op: OperationId,
    pub command: CommandType,
    pub request_id: u64,
    /// `Some` for a successful `CommissionNode`.
    pub result: Result<Option<ReverseCommissioningWindow>, CoreError>,
}

pub(crate) struct CommissionerControl {
    bridge: Option<PeerNodeId>,
    endpoint: EndpointId,
    response_timeout: Duration,
    command_type: CommandType,
    in_flight: Option<InFlight>,
    outstanding: Option<OutstandingRequest>,
    /// CommissionNode request id validated while the slot was busy.
    deferred: Option<u64>,
}

impl CommissionerControl {
    pub(crate) fn new(endpoint: EndpointId, response_timeout: Duration) -> Self {
        Self {
            bridge: None,
            endpoint,
            response_timeout,
            command_type: CommandType::Undefined,
            in_flight: None,
            outstanding: None,
            deferred: None,
        }
    }

    pub(crate) fn command_type(&self) -> CommandType {
        self.command_type
    }

    /// No command in flight and no approval awaiting its result.
    pub(crate) fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.outstanding.is_none() && self.deferred.is_none()
    }

    /// Re-initialise against a new (or no) remote bridge. Returns the
    /// operation id of any command abandoned by the switch.
    pub(crate) fn set_bridge(&mut self, bridge: Option<PeerNodeId>) -> Option<OperationId> {
        if self.bridge == bridge {
            return None;
        }
        info!(bridge = ?bridge, "commissioner control re-initialised");
        self.bridge = bridge;
        self.outstanding = None;
        self.deferred = None;
        self.command_type = CommandType::Undefined;
        self.in_flight.take().map(|flight| flight.command.op())
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub(crate) fn request_commissioning_approval(
        &mut self,
        link: &PeerLink,
        request: CommissioningApprovalRequest,
    ) -> Result<OperationId, CoreError> {
        if let Some(label) = &request.label {
            if label.len() > MAX_APPROVAL_LABEL_LENGTH {
                return Err(CoreError::ValidationFailed {
                    message: format!(
                        "label is {} bytes, maximum is {MAX_APPROVAL_LABEL_LENGTH}",
                        label.len()
                    ),
                });
            }
        }
        let bridge = self.ready_bridge()?;

        info!(%bridge, request_id = request.request_id, "requesting commissioning approval");
        let invoke = InvokeRequest {
            endpoint: self.endpoint,
            cluster: CLUSTER_ID_COMMISSIONER_CONTROL,
            command: CLUSTER_COMMISSIONER_CONTROL_CMD_ID_REQUEST_COMMISSIONING_APPROVAL,
            fields: approval_request_fields(&request),
            timeout: None,
        };
        self.outstanding = Some(OutstandingRequest {
            request_id: request.request_id,
            client_node_id: link.local_node_id(),
        });
        Ok(self.send(
            link,
            bridge,
            CommandType::RequestCommissioningApproval,
            request.request_id,
            invoke,
        ))
    }

    pub(crate) fn commission_node(
        &mut self,
        link: &PeerLink,
        request_id: u64,
        response_timeout: Duration,
    ) -> Result<OperationId, CoreError> {
        let secs = response_timeout.as_secs();
        if !COMMISSION_NODE_TIMEOUT_RANGE.contains(&secs) {
            return Err(CoreError::ValidationFailed {
                message: format!(
                    "response timeout {secs}s outside {}..={}s",
                    COMMISSION_NODE_TIMEOUT_RANGE.start(),
                    COMMISSION_NODE_TIMEOUT_RANGE.end()
                ),
            });
        }
        let bridge = self.ready_bridge()?;
        let secs = u16::try_from(secs).map_err(|e| CoreError::Internal(e.to_string()))?;

        info!(%bridge, request_id, timeout_secs = secs, "sending CommissionNode");
        let invoke = InvokeRequest {
            endpoint: self.endpoint,
            cluster: CLUSTER_ID_COMMISSIONER_CONTROL,
            command: CLUSTER_COMMISSIONER_CONTROL_CMD_ID_COMMISSION_NODE,
            fields: commission_node_fields(request_id, secs),
            timeout: Some(response_timeout),
        };
        Ok(self.send(link, bridge, CommandType::CommissionNode, request_id, invoke))
    }

    /// Validate a `CommissioningRequestResult` against the outstanding
    /// approval request and, when it checks out, commission the node.
    ///
    /// Returns the `CommissionNode` operation, or `None` when the command
    /// was deferred behind the one in flight.
    pub(crate) fn on_request_result(
        &mut self,
        link: &PeerLink,
        result: CommissioningRequestResult,
    ) -> Result<Option<OperationId>, CoreError> {
        let Some(outstanding) = self.outstanding else {
            return Err(rejected(&result, "no approval request outstanding"));
        };
        if result.request_id != outstanding.request_id {
            return Err(rejected(&result, "request id mismatch"));
        }
        if result.client_node_id != outstanding.client_node_id {
            return Err(rejected(&result, "client node mismatch"));
        }
        if !result.status_code.is_success() {
            self.outstanding = None;
            return Err(rejected(&result, "approval not granted"));
        }
        self.outstanding = None;

        if self.in_flight.is_some() {
            debug!(request_id = result.request_id, "command in flight, deferring CommissionNode");
            self.deferred = Some(result.request_id);
            return Ok(None);
        }
        self.commission_node(link, result.request_id, self.response_timeout)
            .map(Some)
    }

    // ── Loop events ──────────────────────────────────────────────────

    pub(crate) fn handle(
        &mut self,
        link: &PeerLink,
        op: OperationId,
        event: SessionEvent,
    ) -> Option<Completion> {
        let Some(flight) = self.in_flight.as_mut().filter(|f| f.command.op() == op) else {
            debug!(%op, "dropping stale commissioner control event");
            return None;
        };
        let OneShotProgress::Done(result) = flight.command.on_event(link, event) else {
            return None;
        };

        let command = self.command_type;
        let request_id = flight.request_id;
        self.command_type = CommandType::Undefined;
        self.in_flight = None;

        let result = result.and_then(|response| match command {
            CommandType::CommissionNode => decode_reverse_commissioning_window(&response.fields)
                .map(Some)
                .map_err(CoreError::from),
            _ => Ok(None),
        });
        match &result {
            Ok(_) => info!(%command, request_id, "commissioner control command complete"),
            Err(e) => {
                warn!(%command, request_id, error = %e, "commissioner control command failed");
                if command == CommandType::RequestCommissioningApproval {
                    self.outstanding = None;
                }
            }
        }

        if let Some(deferred) = self.deferred.take() {
            if let Err(e) = self.commission_node(link, deferred, self.response_timeout) {
                warn!(request_id = deferred, error = %e, "deferred CommissionNode not sent");
            }
        }

        Some(Completion {
            op,
            command,
            request_id,
            result,
        })
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn ready_bridge(&self) -> Result<PeerNodeId, CoreError> {
        let bridge = self.bridge.ok_or(CoreError::NoRemoteBridge)?;
        if self.in_flight.is_some() {
            return Err(CoreError::OperationInProgress {
                operation: self.command_type.to_string(),
            });
        }
        Ok(bridge)
    }

    fn send(
        &mut self,
        link: &PeerLink,
        bridge: PeerNodeId,
        command_type: CommandType,
        request_id: u64,
        invoke: InvokeRequest,
    ) -> OperationId {
        let command = OneShotCommand::start(link, bridge, Route::Commissioner, invoke);
        let op = command.op();
        self.command_type = command_type;
        self.in_flight = Some(InFlight { command, request_id });
        op
    }
}

fn rejected(result: &CommissioningRequestResult, reason: &str) -> CoreError {
    warn!(
        request_id = result.request_id,
        client_node = %result.client_node_id,
        status = %result.status_code,
        reason,
        "dropping commissioning request result"
    );
    CoreError::ValidationFailed {
        message: format!("commissioning request result {}: {reason}", result.request_id),
    }
}

// ── Controller facade ──
//
// Lifecycle and command routing for the bridge layer. A single event
// loop task owns every state machine; callers marshal work onto it
// through the command channel and observe results through the device
// store and the event bus.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use fabric_sync_api::{EndpointId, InteractionClient, NodeId, PeerNodeId};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::commissioner_control::CommandType;
use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::manager::DeviceManager;
use crate::model::{
    AdminCommissioningState, BridgeEvent, CommissioningRequestResult, ReverseCommissioningWindow,
    SyncedDevice,
};
use crate::operation::{LoopEvent, PeerLink};
use crate::store::DeviceStore;
use crate::stream::{EntityStream, Snapshot};
use crate::subscription::SubscriptionState;
use crate::synchronizer::{BridgedUniqueIdResolver, SynchronizationState, UniqueIdResolver};

const COMMAND_CHANNEL_SIZE: usize = 64;
const EVENT_CHANNEL_SIZE: usize = 256;

// ── ControllerState ──────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Stopped,
}

// ── Controller ───────────────────────────────────────────────────────

/// Entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Construct, call
/// [`start()`](Self::start), then issue commands.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: SyncConfig,
    client: Arc<dyn InteractionClient>,
    resolver: Arc<dyn UniqueIdResolver>,
    store: Arc<DeviceStore>,
    state: watch::Sender<ControllerState>,
    event_tx: broadcast::Sender<BridgeEvent>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Create a controller that resolves bridged unique ids by reading
    /// the remote bridge. Does not start the event loop.
    pub fn new(config: SyncConfig, client: Arc<dyn InteractionClient>) -> Self {
        Self::with_resolver(config, client, Arc::new(BridgedUniqueIdResolver))
    }

    pub fn with_resolver(
        config: SyncConfig,
        client: Arc<dyn InteractionClient>,
        resolver: Arc<dyn UniqueIdResolver>,
    ) -> Self {
        let (state, _) = watch::channel(ControllerState::Idle);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        Self {
            inner: Arc::new(ControllerInner {
                config,
                client,
                resolver,
                store: Arc::new(DeviceStore::new()),
                state,
                event_tx,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.inner.store
    }

    /// Address of `node_id` on the controller's fabric.
    pub fn peer(&self, node_id: NodeId) -> PeerNodeId {
        PeerNodeId::new(self.inner.client.fabric_index(), node_id)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the event loop.
    pub async fn start(&self) -> Result<(), CoreError> {
        let Some(commands) = self.inner.command_rx.lock().await.take() else {
            return Err(CoreError::AlreadyStarted);
        };

        let (event_tx, events) = mpsc::unbounded_channel();
        let link = PeerLink::new(
            Arc::clone(&self.inner.client),
            event_tx,
            self.inner.cancel.child_token(),
        );
        let manager = DeviceManager::new(
            link,
            self.inner.config.clone(),
            Arc::clone(&self.inner.store),
            self.inner.event_tx.clone(),
            Arc::clone(&self.inner.resolver),
        );

        let handle = tokio::spawn(event_loop(
            manager,
            commands,
            events,
            self.inner.cancel.clone(),
        ));
        self.inner.task_handles.lock().await.push(handle);
        self.inner.state.send_replace(ControllerState::Running);
        info!(
            fabric = %self.inner.client.fabric_index(),
            node = %self.inner.client.local_node_id(),
            "bridge controller started"
        );
        Ok(())
    }

    /// Cancel all work and wait for the event loop to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "event loop task panicked");
            }
        }

        self.inner.state.send_replace(ControllerState::Stopped);
        debug!("bridge controller stopped");
    }

    pub fn state(&self) -> watch::Receiver<ControllerState> {
        self.inner.state.subscribe()
    }

    // ── Command execution ────────────────────────────────────────────

    /// Send a command to the event loop and await its result.
    pub async fn execute(&self, command: Command) -> Result<CommandResult, CoreError> {
        if *self.inner.state.borrow() != ControllerState::Running {
            return Err(CoreError::ControllerStopped);
        }

        let (tx, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(CommandEnvelope {
                command,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::ControllerStopped)?;

        rx.await.map_err(|_| CoreError::ControllerStopped)?
    }

    /// Start, run `f`, shut down.
    pub async fn oneshot<F, Fut, T>(
        config: SyncConfig,
        client: Arc<dyn InteractionClient>,
        f: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let controller = Controller::new(config, client);
        controller.start().await?;
        let result = f(controller.clone()).await;
        controller.shutdown().await;
        result
    }

    // ── Synchronization ──────────────────────────────────────────────

    /// Synchronize one device. `Ok(true)` once its record is published,
    /// `Ok(false)` if the attempt was abandoned.
    pub async fn start_device_synchronization(
        &self,
        node_id: NodeId,
        is_icd: bool,
    ) -> Result<bool, CoreError> {
        match self
            .execute(Command::StartDeviceSynchronization { node_id, is_icd })
            .await?
        {
            CommandResult::Synchronized(synchronized) => Ok(synchronized),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn synchronizer_state(&self) -> Result<SynchronizationState, CoreError> {
        match self.execute(Command::SynchronizerState).await? {
            CommandResult::SynchronizerState(state) => Ok(state),
            other => Err(unexpected(&other)),
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub async fn start_subscription(&self, peer: PeerNodeId) -> Result<(), CoreError> {
        self.execute(Command::StartSubscription { peer }).await.and_then(expect_ok)
    }

    pub async fn stop_subscription(&self, peer: PeerNodeId) -> Result<(), CoreError> {
        self.execute(Command::StopSubscription { peer }).await.and_then(expect_ok)
    }

    pub async fn subscription_states(
        &self,
    ) -> Result<Vec<(PeerNodeId, SubscriptionState)>, CoreError> {
        match self.execute(Command::SubscriptionStates).await? {
            CommandResult::Subscriptions(states) => Ok(states),
            other => Err(unexpected(&other)),
        }
    }

    // ── Topology ─────────────────────────────────────────────────────

    pub async fn set_local_bridge(&self, node_id: Option<NodeId>) -> Result<(), CoreError> {
        self.execute(Command::SetLocalBridge { node_id }).await.and_then(expect_ok)
    }

    pub async fn set_remote_bridge(&self, node_id: Option<NodeId>) -> Result<(), CoreError> {
        self.execute(Command::SetRemoteBridge { node_id }).await.and_then(expect_ok)
    }

    pub async fn register_bridged_device(
        &self,
        node_id: NodeId,
        endpoint: EndpointId,
    ) -> Result<(), CoreError> {
        self.execute(Command::RegisterBridgedDevice { node_id, endpoint })
            .await
            .and_then(expect_ok)
    }

    pub async fn apply_parts_list(&self, endpoints: BTreeSet<EndpointId>) -> Result<(), CoreError> {
        self.execute(Command::ApplyPartsList { endpoints }).await.and_then(expect_ok)
    }

    pub async fn remove_device(&self, peer: PeerNodeId) -> Result<(), CoreError> {
        self.execute(Command::RemoveDevice { peer }).await.and_then(expect_ok)
    }

    // ── Commissioner Control ─────────────────────────────────────────

    /// Returns the request id once the bridge accepted the request.
    pub async fn request_commissioning_approval(
        &self,
        request_id: Option<u64>,
        label: Option<String>,
    ) -> Result<u64, CoreError> {
        match self
            .execute(Command::RequestCommissioningApproval { request_id, label })
            .await?
        {
            CommandResult::RequestId(id) => Ok(id),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn commission_node(
        &self,
        request_id: u64,
        response_timeout: Duration,
    ) -> Result<ReverseCommissioningWindow, CoreError> {
        match self
            .execute(Command::CommissionNode {
                request_id,
                response_timeout,
            })
            .await?
        {
            CommandResult::CommissioningWindow(window) => Ok(window),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn deliver_commissioning_request_result(
        &self,
        result: CommissioningRequestResult,
    ) -> Result<(), CoreError> {
        self.execute(Command::DeliverCommissioningRequestResult(result))
            .await
            .and_then(expect_ok)
    }

    pub async fn commissioner_state(&self) -> Result<CommandType, CoreError> {
        match self.execute(Command::CommissionerState).await? {
            CommandResult::CommissionerState(state) => Ok(state),
            other => Err(unexpected(&other)),
        }
    }

    // ── ICD ──────────────────────────────────────────────────────────

    /// Ask an ICD to stay awake; returns the duration it promised.
    pub async fn keep_active(
        &self,
        peer: PeerNodeId,
        duration: Option<Duration>,
    ) -> Result<Duration, CoreError> {
        match self.execute(Command::KeepActive { peer, duration }).await? {
            CommandResult::PromisedActiveDuration(promised) => Ok(promised),
            other => Err(unexpected(&other)),
        }
    }

    // ── State observation ────────────────────────────────────────────

    pub fn events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn devices(&self) -> EntityStream<SyncedDevice> {
        self.inner.store.subscribe_devices()
    }

    pub fn devices_snapshot(&self) -> Snapshot<SyncedDevice> {
        self.inner.store.devices_snapshot()
    }

    pub fn device(&self, peer: &PeerNodeId) -> Option<Arc<SyncedDevice>> {
        self.inner.store.device(peer)
    }

    pub fn admin_commissioning(&self, peer: &PeerNodeId) -> Option<Arc<AdminCommissioningState>> {
        self.inner.store.admin_commissioning(peer)
    }

    pub fn commissioning_states(&self) -> EntityStream<AdminCommissioningState> {
        self.inner.store.subscribe_commissioning()
    }
}

fn expect_ok(result: CommandResult) -> Result<(), CoreError> {
    match result {
        CommandResult::Ok => Ok(()),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(result: &CommandResult) -> CoreError {
    CoreError::Internal(format!("unexpected command result: {result:?}"))
}

// ── Event loop ───────────────────────────────────────────────────────

/// Owns the manager. Cancellation wins over pending work; I/O outcomes
/// are applied before new commands.
async fn event_loop(
    mut manager: DeviceManager,
    mut commands: mpsc::Receiver<CommandEnvelope>,
    mut events: mpsc::UnboundedReceiver<LoopEvent>,
    cancel: CancellationToken,
) {
    manager.init();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(event) = events.recv() => manager.handle_event(event),
            envelope = commands.recv() => {
                let Some(envelope) = envelope else { break };
                manager.route(envelope.command, envelope.response_tx);
            }
        }
    }

    manager.shutdown();
    debug!("event loop exited");
}

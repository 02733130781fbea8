// ── Device subscriptions ──
//
// One long-lived AdministratorCommissioning subscription per synchronized
// device. The registry owns every `DeviceSubscription`; an entry is
// inserted only by `start` and erased only when that entry reports its
// own termination.

use std::collections::HashMap;
use std::time::Duration;

use fabric_sync_api::clusters::{
    ADMINISTRATOR_COMMISSIONING_ATTRIBUTES, CLUSTER_ID_ADMINISTRATOR_COMMISSIONING, ROOT_ENDPOINT,
};
use fabric_sync_api::{AttributePath, PeerNodeId, ReportItem, Session, SubscribeRequest};
use serde::{Deserialize, Serialize};
use tokio_util::sync::DropGuard;
use tracing::{debug, info, warn};

use crate::convert::apply_admin_commissioning;
use crate::error::CoreError;
use crate::model::AdminCommissioningState;
use crate::operation::{OperationId, PeerLink, Route, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum SubscriptionState {
    Idle,
    Connecting,
    SubscriptionStarted,
    Stopping,
    AwaitingDestruction,
}

/// Whether a subscription is still alive after handling a call.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Active,
    Terminated,
}

/// Receives the outward notifications of every subscription.
pub(crate) trait SubscriptionNotifier {
    /// Called once per report that carried AdministratorCommissioning data.
    fn admin_commissioning_changed(&mut self, state: &AdminCommissioningState);

    fn reachability_changed(&mut self, peer: PeerNodeId, reachable: bool);
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SubscriptionIntervals {
    pub min_interval: Duration,
    pub max_interval_ceiling: Duration,
}

// ── DeviceSubscription ───────────────────────────────────────────────

pub(crate) struct DeviceSubscription {
    peer: PeerNodeId,
    op: OperationId,
    state: SubscriptionState,
    intervals: SubscriptionIntervals,
    reports: Option<DropGuard>,
    current: AdminCommissioningState,
    change_detected: bool,
    unreachable: bool,
}

impl DeviceSubscription {
    pub(crate) fn new(peer: PeerNodeId, op: OperationId, intervals: SubscriptionIntervals) -> Self {
        Self {
            peer,
            op,
            state: SubscriptionState::Idle,
            intervals,
            reports: None,
            current: AdminCommissioningState::new(peer),
            change_detected: false,
            unreachable: false,
        }
    }

    pub(crate) fn op(&self) -> OperationId {
        self.op
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        self.state
    }

    pub(crate) fn start(&mut self, link: &PeerLink) {
        assert_eq!(
            self.state,
            SubscriptionState::Idle,
            "subscription for {} started twice",
            self.peer
        );
        self.state = SubscriptionState::Connecting;
        link.connect(self.peer, Route::Subscription(self.peer), self.op);
    }

    /// Request teardown.
    ///
    /// While connecting there is nothing to cancel yet, so teardown waits
    /// for the connect outcome. A second stop while stopping is a no-op.
    ///
    /// # Panics
    ///
    /// When the subscription is idle or already terminated.
    pub(crate) fn stop(&mut self) -> Lifecycle {
        match self.state {
            SubscriptionState::Connecting => {
                debug!(peer = %self.peer, "stop requested while connecting, deferring teardown");
                self.state = SubscriptionState::Stopping;
                Lifecycle::Active
            }
            SubscriptionState::SubscriptionStarted => {
                info!(peer = %self.peer, "stopping subscription");
                self.terminate()
            }
            SubscriptionState::Stopping => Lifecycle::Active,
            SubscriptionState::Idle | SubscriptionState::AwaitingDestruction => panic!(
                "stop_subscription called for {} in state {}",
                self.peer, self.state
            ),
        }
    }

    pub(crate) fn handle(
        &mut self,
        link: &PeerLink,
        event: SessionEvent,
        notifier: &mut dyn SubscriptionNotifier,
    ) -> Lifecycle {
        match (self.state, event) {
            (SubscriptionState::Connecting, SessionEvent::Connected(session)) => {
                self.subscribe(link, &session)
            }
            (SubscriptionState::Stopping, SessionEvent::Connected(_)) => {
                debug!(peer = %self.peer, "connected after stop request, tearing down");
                self.terminate()
            }
            (
                SubscriptionState::Connecting | SubscriptionState::Stopping,
                SessionEvent::ConnectionFailed(e),
            ) => {
                warn!(peer = %self.peer, error = %e, "subscription connection failed");
                self.terminate()
            }
            (SubscriptionState::SubscriptionStarted, SessionEvent::Report(item)) => {
                self.on_report(item, notifier);
                Lifecycle::Active
            }
            (SubscriptionState::SubscriptionStarted, SessionEvent::ReportsDone) => {
                info!(peer = %self.peer, "subscription ended by peer");
                self.terminate()
            }
            (state, event) => {
                debug!(peer = %self.peer, %state, ?event, "ignoring subscription event");
                Lifecycle::Active
            }
        }
    }

    fn subscribe(&mut self, link: &PeerLink, session: &Session) -> Lifecycle {
        let request = SubscribeRequest {
            attributes: ADMINISTRATOR_COMMISSIONING_ATTRIBUTES
                .iter()
                .map(|&attribute| {
                    AttributePath::new(
                        ROOT_ENDPOINT,
                        CLUSTER_ID_ADMINISTRATOR_COMMISSIONING,
                        attribute,
                    )
                })
                .collect(),
            events: Vec::new(),
            min_interval: self.intervals.min_interval,
            max_interval_ceiling: self.intervals.max_interval_ceiling,
        };
        match link.client().subscribe(session, request) {
            Ok(stream) => {
                let route = Route::Subscription(self.peer);
                self.reports = Some(link.forward_reports(stream, route, self.op));
                self.state = SubscriptionState::SubscriptionStarted;
                Lifecycle::Active
            }
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "failed to issue subscribe request");
                self.terminate()
            }
        }
    }

    fn on_report(&mut self, item: ReportItem, notifier: &mut dyn SubscriptionNotifier) {
        match item {
            ReportItem::Attribute { path, data } => {
                if path.cluster != CLUSTER_ID_ADMINISTRATOR_COMMISSIONING {
                    return;
                }
                let result = data.and_then(|value| {
                    apply_admin_commissioning(&mut self.current, path.attribute, &value)
                });
                match result {
                    Ok(()) => self.change_detected = true,
                    Err(e) => {
                        warn!(peer = %self.peer, %path, error = %e, "failed to decode attribute");
                    }
                }
            }
            ReportItem::ReportEnd => {
                self.mark_reachable(notifier);
                if self.change_detected {
                    self.change_detected = false;
                    notifier.admin_commissioning_changed(&self.current);
                }
            }
            ReportItem::SubscriptionEstablished { subscription_id } => {
                debug!(peer = %self.peer, subscription_id, "subscription established");
                self.mark_reachable(notifier);
            }
            ReportItem::Error(e) if e.is_timeout() => {
                if !self.unreachable {
                    warn!(peer = %self.peer, "subscription timed out, marking unreachable");
                    self.unreachable = true;
                    notifier.reachability_changed(self.peer, false);
                }
            }
            ReportItem::Error(e) => warn!(peer = %self.peer, error = %e, "subscription error"),
            ReportItem::Event { .. } => {}
        }
    }

    fn mark_reachable(&mut self, notifier: &mut dyn SubscriptionNotifier) {
        if self.unreachable {
            info!(peer = %self.peer, "device reachable again");
            self.unreachable = false;
            notifier.reachability_changed(self.peer, true);
        }
    }

    fn terminate(&mut self) -> Lifecycle {
        self.reports = None;
        self.state = SubscriptionState::AwaitingDestruction;
        Lifecycle::Terminated
    }
}

// ── SubscriptionRegistry ─────────────────────────────────────────────

/// At most one subscription per peer.
pub(crate) struct SubscriptionRegistry {
    entries: HashMap<PeerNodeId, DeviceSubscription>,
    intervals: SubscriptionIntervals,
}

impl SubscriptionRegistry {
    pub(crate) fn new(intervals: SubscriptionIntervals) -> Self {
        Self {
            entries: HashMap::new(),
            intervals,
        }
    }

    pub(crate) fn contains(&self, peer: &PeerNodeId) -> bool {
        self.entries.contains_key(peer)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn states(&self) -> Vec<(PeerNodeId, SubscriptionState)> {
        let mut states: Vec<_> = self
            .entries
            .iter()
            .map(|(peer, sub)| (*peer, sub.state()))
            .collect();
        states.sort_by_key(|(peer, _)| *peer);
        states
    }

    pub(crate) fn start(&mut self, link: &PeerLink, peer: PeerNodeId) -> Result<(), CoreError> {
        if peer.fabric_index != link.fabric_index() {
            return Err(CoreError::FabricMismatch { peer });
        }
        if self.entries.contains_key(&peer) {
            return Err(CoreError::AlreadyExists { peer });
        }

        info!(%peer, "starting subscription");
        let mut subscription = DeviceSubscription::new(peer, link.next_operation(), self.intervals);
        subscription.start(link);
        self.entries.insert(peer, subscription);
        Ok(())
    }

    /// Returns `true` when the subscription terminated immediately.
    pub(crate) fn stop(&mut self, peer: PeerNodeId) -> Result<bool, CoreError> {
        let subscription = self
            .entries
            .get_mut(&peer)
            .ok_or(CoreError::SubscriptionNotFound { peer })?;
        let terminated = subscription.stop() == Lifecycle::Terminated;
        if terminated {
            self.on_terminated(peer);
        }
        Ok(terminated)
    }

    /// Route an event to its subscription. Returns `true` when that
    /// subscription terminated and was erased.
    pub(crate) fn handle(
        &mut self,
        link: &PeerLink,
        peer: PeerNodeId,
        op: OperationId,
        event: SessionEvent,
        notifier: &mut dyn SubscriptionNotifier,
    ) -> bool {
        let Some(subscription) = self.entries.get_mut(&peer).filter(|s| s.op() == op) else {
            debug!(%peer, %op, "dropping event for finished subscription");
            return false;
        };
        let terminated = subscription.handle(link, event, notifier) == Lifecycle::Terminated;
        if terminated {
            self.on_terminated(peer);
        }
        terminated
    }

    /// Shutdown only. Drops every entry without running the termination
    /// path, so no notifier sees an ending; report streams close with
    /// their guards.
    pub(crate) fn drop_all(&mut self) {
        self.entries.clear();
    }

    fn on_terminated(&mut self, peer: PeerNodeId) {
        let removed = self.entries.remove(&peer);
        assert!(
            removed.is_some(),
            "terminated subscription for {peer} missing from registry"
        );
        debug!(%peer, "subscription removed from registry");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use fabric_sync_api::clusters::{
        CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_FABRIC_INDEX,
        CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_VENDOR_ID,
        CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_WINDOW_STATUS,
    };
    use fabric_sync_api::{AttributeValue, FabricIndex, NodeId, SimDevice};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::WindowStatus;
    use crate::operation::testing::Harness;

    #[derive(Default)]
    struct Recorder {
        changes: Vec<AdminCommissioningState>,
        reachability: Vec<(PeerNodeId, bool)>,
    }

    impl SubscriptionNotifier for Recorder {
        fn admin_commissioning_changed(&mut self, state: &AdminCommissioningState) {
            self.changes.push(state.clone());
        }

        fn reachability_changed(&mut self, peer: PeerNodeId, reachable: bool) {
            self.reachability.push((peer, reachable));
        }
    }

    fn intervals() -> SubscriptionIntervals {
        SubscriptionIntervals {
            min_interval: Duration::ZERO,
            max_interval_ceiling: Duration::from_secs(300),
        }
    }

    /// Pump every pending event; returns how many terminations occurred.
    async fn pump(
        harness: &mut Harness,
        registry: &mut SubscriptionRegistry,
        recorder: &mut Recorder,
    ) -> usize {
        let mut terminations = 0;
        while let Some(event) = harness.next_event().await {
            let Route::Subscription(peer) = event.route else {
                panic!("unexpected route {:?}", event.route);
            };
            if registry.handle(&harness.link, peer, event.op, event.event, recorder) {
                terminations += 1;
            }
        }
        terminations
    }

    fn setup(nodes: &[u64]) -> (Harness, SubscriptionRegistry, Recorder) {
        let harness = Harness::new();
        for &node in nodes {
            harness.fabric.add_device(SimDevice::new(node));
        }
        (harness, SubscriptionRegistry::new(intervals()), Recorder::default())
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected() {
        let (mut harness, mut registry, mut recorder) = setup(&[42]);
        let peer = harness.fabric.peer(42);

        registry.start(&harness.link, peer).unwrap();
        let err = registry.start(&harness.link, peer).unwrap_err();

        assert!(matches!(err, CoreError::AlreadyExists { peer: p } if p == peer));
        assert_eq!(registry.len(), 1);

        pump(&mut harness, &mut registry, &mut recorder).await;
        assert_eq!(harness.fabric.subscriber_count(42), 1);
        assert_eq!(registry.states(), vec![(peer, SubscriptionState::SubscriptionStarted)]);
    }

    #[tokio::test]
    async fn peer_on_another_fabric_is_rejected() {
        let (harness, mut registry, _) = setup(&[42]);
        let foreign = PeerNodeId::new(FabricIndex(9), NodeId(42));

        let err = registry.start(&harness.link, foreign).unwrap_err();
        assert!(matches!(err, CoreError::FabricMismatch { .. }));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn restart_after_termination_succeeds() {
        let (mut harness, mut registry, mut recorder) = setup(&[42]);
        let peer = harness.fabric.peer(42);

        registry.start(&harness.link, peer).unwrap();
        pump(&mut harness, &mut registry, &mut recorder).await;
        assert!(registry.stop(peer).unwrap());
        assert!(!registry.contains(&peer));

        registry.start(&harness.link, peer).unwrap();
        pump(&mut harness, &mut registry, &mut recorder).await;
        assert_eq!(registry.states(), vec![(peer, SubscriptionState::SubscriptionStarted)]);
        assert_eq!(harness.fabric.subscriber_count(42), 1);
    }

    #[tokio::test]
    async fn double_stop_while_connecting_terminates_once() {
        let (mut harness, mut registry, mut recorder) = setup(&[42]);
        let peer = harness.fabric.peer(42);

        registry.start(&harness.link, peer).unwrap();
        assert!(!registry.stop(peer).unwrap());
        assert!(!registry.stop(peer).unwrap());
        assert_eq!(registry.states(), vec![(peer, SubscriptionState::Stopping)]);

        let terminations = pump(&mut harness, &mut registry, &mut recorder).await;

        assert_eq!(terminations, 1);
        assert!(!registry.contains(&peer));
        assert_eq!(harness.fabric.subscriber_count(42), 0);
    }

    #[tokio::test]
    async fn stop_unknown_peer_is_not_found() {
        let (harness, mut registry, _) = setup(&[]);
        let err = registry.stop(harness.fabric.peer(7)).unwrap_err();
        assert!(matches!(err, CoreError::SubscriptionNotFound { .. }));
    }

    #[tokio::test]
    async fn report_with_three_changes_notifies_once() {
        let (mut harness, mut registry, mut recorder) = setup(&[42]);
        let peer = harness.fabric.peer(42);
        registry.start(&harness.link, peer).unwrap();
        pump(&mut harness, &mut registry, &mut recorder).await;
        // Priming report.
        assert_eq!(recorder.changes.len(), 1);

        harness.fabric.update_attributes(
            42,
            ROOT_ENDPOINT,
            CLUSTER_ID_ADMINISTRATOR_COMMISSIONING,
            [
                (
                    CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_WINDOW_STATUS,
                    AttributeValue::UInt(1),
                ),
                (
                    CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_FABRIC_INDEX,
                    AttributeValue::UInt(2),
                ),
                (
                    CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_VENDOR_ID,
                    AttributeValue::UInt(0xFFF1),
                ),
            ],
        );
        pump(&mut harness, &mut registry, &mut recorder).await;

        assert_eq!(recorder.changes.len(), 2);
        let latest = recorder.changes.last().unwrap();
        assert_eq!(latest.window_status, WindowStatus::EnhancedWindowOpen);
        assert_eq!(latest.opener_fabric_index, Some(FabricIndex(2)));
        assert_eq!(latest.opener_vendor_id, Some(0xFFF1));
    }

    #[tokio::test]
    async fn timeout_marks_unreachable_without_teardown() {
        let (mut harness, mut registry, mut recorder) = setup(&[42]);
        let peer = harness.fabric.peer(42);
        registry.start(&harness.link, peer).unwrap();
        pump(&mut harness, &mut registry, &mut recorder).await;

        harness.fabric.report_timeout(42);
        harness.fabric.report_timeout(42);
        pump(&mut harness, &mut registry, &mut recorder).await;

        assert_eq!(recorder.reachability, vec![(peer, false)]);
        assert!(registry.contains(&peer));
        assert_eq!(harness.fabric.subscriber_count(42), 1);

        harness.fabric.update_attributes(
            42,
            ROOT_ENDPOINT,
            CLUSTER_ID_ADMINISTRATOR_COMMISSIONING,
            [(CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_WINDOW_STATUS, AttributeValue::UInt(2))],
        );
        pump(&mut harness, &mut registry, &mut recorder).await;
        assert_eq!(recorder.reachability, vec![(peer, false), (peer, true)]);
    }

    #[tokio::test]
    async fn peer_terminated_subscription_is_erased() {
        let (mut harness, mut registry, mut recorder) = setup(&[42]);
        let peer = harness.fabric.peer(42);
        registry.start(&harness.link, peer).unwrap();
        pump(&mut harness, &mut registry, &mut recorder).await;

        harness.fabric.end_subscriptions(42);
        let terminations = pump(&mut harness, &mut registry, &mut recorder).await;

        assert_eq!(terminations, 1);
        assert!(!registry.contains(&peer));
    }

    #[tokio::test]
    async fn subscribe_that_cannot_be_issued_terminates() {
        let (mut harness, mut registry, mut recorder) = setup(&[42]);
        harness.fabric.reject_subscriptions(42, true);
        let peer = harness.fabric.peer(42);

        registry.start(&harness.link, peer).unwrap();
        let terminations = pump(&mut harness, &mut registry, &mut recorder).await;

        assert_eq!(terminations, 1);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn connection_failure_terminates() {
        let (mut harness, mut registry, mut recorder) = setup(&[42]);
        harness.fabric.set_reachable(42, false);
        let peer = harness.fabric.peer(42);

        registry.start(&harness.link, peer).unwrap();
        assert_eq!(pump(&mut harness, &mut registry, &mut recorder).await, 1);
        assert!(recorder.changes.is_empty());
    }

    #[test]
    #[should_panic(expected = "in state Idle")]
    fn stop_while_idle_panics() {
        let peer = PeerNodeId::new(FabricIndex(1), NodeId(42));
        let mut subscription = DeviceSubscription::new(peer, test_op(), intervals());
        let _ = subscription.stop();
    }

    #[tokio::test]
    #[should_panic(expected = "in state AwaitingDestruction")]
    async fn stop_after_termination_panics() {
        let (mut harness, _, mut recorder) = setup(&[42]);
        let peer = harness.fabric.peer(42);
        let mut subscription =
            DeviceSubscription::new(peer, harness.link.next_operation(), intervals());
        subscription.start(&harness.link);
        while let Some(event) = harness.next_event().await {
            let _ = subscription.handle(&harness.link, event.event, &mut recorder);
        }
        assert_eq!(subscription.stop(), Lifecycle::Terminated);
        let _ = subscription.stop();
    }

    fn test_op() -> OperationId {
        Harness::new().link.next_operation()
    }

    #[tokio::test]
    async fn drop_all_releases_streams_without_terminations() {
        let (mut harness, mut registry, mut recorder) = setup(&[42]);
        let peer = harness.fabric.peer(42);
        registry.start(&harness.link, peer).unwrap();
        assert_eq!(pump(&mut harness, &mut registry, &mut recorder).await, 0);
        assert_eq!(harness.fabric.subscriber_count(42), 1);

        registry.drop_all();

        assert!(registry.states().is_empty());
        assert_eq!(pump(&mut harness, &mut registry, &mut recorder).await, 0);
        assert_eq!(harness.fabric.subscriber_count(42), 0);
    }
}

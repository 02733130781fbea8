//! `simulate`: run the bridge layer end to end against `SimulatedFabric`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use fabric_sync_api::{EndpointId, NodeId, PeerNodeId, SimDevice, SimulatedFabric};
use fabric_sync_core::{Controller, CoreError, SubscriptionState, SyncedDevice, WindowStatus};

use crate::cli::{FIRST_SIMULATED_NODE, GlobalOpts, SimulateArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

/// First endpoint the simulated remote bridge assigns to a bridged device.
const FIRST_BRIDGED_ENDPOINT: EndpointId = 3;

// ── Report ──────────────────────────────────────────────────────────

/// Outcome for one simulated node.
#[derive(Debug, Serialize)]
struct NodeReport {
    node_id: NodeId,
    synchronized: bool,
    is_icd: bool,
    subscription: Option<SubscriptionState>,
    window_status: Option<WindowStatus>,
    device: Option<SyncedDevice>,
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Synced")]
    synced: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Vendor")]
    vendor: String,
    #[tabled(rename = "Unique ID")]
    unique_id: String,
    #[tabled(rename = "ICD")]
    icd: String,
    #[tabled(rename = "Subscription")]
    subscription: String,
    #[tabled(rename = "Window")]
    window: String,
}

fn to_row(report: &NodeReport, color: bool) -> NodeRow {
    let device = report.device.as_ref();
    let subscription = report
        .subscription
        .map_or_else(|| "-".into(), |s| s.to_string());
    NodeRow {
        node: report.node_id.to_string(),
        synced: output::paint_state(
            if report.synchronized { "yes" } else { "no" },
            report.synchronized,
            color,
        ),
        name: device
            .and_then(SyncedDevice::display_name)
            .unwrap_or("-")
            .to_owned(),
        vendor: device
            .and_then(|d| d.vendor_name.clone())
            .unwrap_or_else(|| "-".into()),
        unique_id: device
            .and_then(|d| d.unique_id.clone())
            .unwrap_or_else(|| "-".into()),
        icd: if report.is_icd { "yes".into() } else { "no".into() },
        subscription: output::paint_state(
            &subscription,
            report.subscription == Some(SubscriptionState::SubscriptionStarted),
            color,
        ),
        window: report
            .window_status
            .map_or_else(|| "-".into(), |w| w.to_string()),
    }
}

// ── Fabric setup ────────────────────────────────────────────────────

fn simulated_device(node_id: NodeId, index: u16) -> SimDevice {
    SimDevice::new(node_id)
        .vendor_name("Simulated Vendor")
        .vendor_id(0xFFF1)
        .product_name("Simulated Light")
        .product_id(0x8000 + index)
        .node_label(&format!("light-{index}"))
        .hardware_version("1.0")
        .software_version("1.0.0")
}

fn bridged_unique_id(node_id: NodeId) -> String {
    format!("sim-{:x}", node_id.0)
}

fn check_listed(flag: &str, requested: &[u64], nodes: &[NodeId]) -> Result<(), CliError> {
    match requested.iter().find(|raw| !nodes.contains(&NodeId(**raw))) {
        Some(raw) => Err(CliError::Validation {
            field: flag.into(),
            reason: format!(
                "node 0x{raw:X} is not one of the {} simulated devices \
                 (0x{FIRST_SIMULATED_NODE:X}..)",
                nodes.len()
            ),
        }),
        None => Ok(()),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: SimulateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let resolved = config::resolve(global)?;
    let sync = resolved.sync;

    let nodes: Vec<NodeId> = (0..u64::from(args.devices))
        .map(|i| NodeId(FIRST_SIMULATED_NODE + i))
        .collect();
    check_listed("icd", &args.icd, &nodes)?;
    check_listed("unreachable", &args.unreachable, &nodes)?;

    let fabric = SimulatedFabric::new(
        resolved.profile.fabric_index(),
        resolved.profile.controller_node_id(),
    );
    for (index, node) in (0_u16..).zip(&nodes) {
        fabric.add_device(simulated_device(*node, index));
    }

    // Endpoints on the remote bridge, keyed by the device they mirror.
    let mut bridged: HashMap<NodeId, EndpointId> = HashMap::new();
    if let Some(bridge) = sync.remote_bridge {
        let mut device = SimDevice::new(bridge).node_label("remote-bridge").auto_approve();
        for (endpoint, node) in (FIRST_BRIDGED_ENDPOINT..).zip(&nodes) {
            device = device.bridged_endpoint(endpoint, Some(&bridged_unique_id(*node)));
            bridged.insert(*node, endpoint);
        }
        fabric.add_device(device);
        info!(bridge = %bridge, endpoints = bridged.len(), "simulating remote bridge");
    }
    for raw in &args.unreachable {
        fabric.set_reachable(NodeId(*raw), false);
    }

    info!(
        profile = %resolved.name,
        devices = nodes.len(),
        "starting simulated synchronization"
    );

    let client = Arc::new(fabric);
    let settle = Duration::from_millis(args.settle_ms);
    let reports = Controller::oneshot(sync, client, |controller| async move {
        let mut events = controller.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => debug!(?event, "bridge event"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        for (node, endpoint) in &bridged {
            controller.register_bridged_device(*node, *endpoint).await?;
        }

        let mut outcomes = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let is_icd = args.icd.contains(&node.0);
            let synchronized = controller.start_device_synchronization(*node, is_icd).await?;
            if !synchronized {
                warn!(node = %node, "synchronization abandoned");
            }
            outcomes.push((*node, is_icd, synchronized));
        }

        await_first_reports(&controller, &outcomes, settle).await;
        collect_reports(&controller, outcomes).await
    })
    .await?;

    let color = output::should_color(global.color);
    let out = output::render_list(
        global.output,
        &reports,
        |r| to_row(r, color),
        |r| r.node_id.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Wait until every subscribed node has reported its commissioning
/// window, or `limit` passes.
async fn await_first_reports(
    controller: &Controller,
    outcomes: &[(NodeId, bool, bool)],
    limit: Duration,
) {
    let subscribed: Vec<PeerNodeId> = outcomes
        .iter()
        .filter(|(_, is_icd, synchronized)| *synchronized && !*is_icd)
        .map(|(node, ..)| controller.peer(*node))
        .collect();
    let mut states = controller.commissioning_states();
    let primed = states.wait_for(|records| {
        subscribed
            .iter()
            .all(|peer| records.iter().any(|record| record.peer == *peer))
    });
    match tokio::time::timeout(limit, primed).await {
        Ok(Some(_)) => debug!(nodes = subscribed.len(), "subscriptions primed"),
        Ok(None) => warn!("device store closed before subscriptions primed"),
        Err(_) => warn!(
            limit_ms = limit.as_millis(),
            "not every subscription reported before the settle limit"
        ),
    }
}

async fn collect_reports(
    controller: &Controller,
    outcomes: Vec<(NodeId, bool, bool)>,
) -> Result<Vec<NodeReport>, CoreError> {
    let subscriptions: HashMap<PeerNodeId, SubscriptionState> =
        controller.subscription_states().await?.into_iter().collect();

    Ok(outcomes
        .into_iter()
        .map(|(node_id, is_icd, synchronized)| {
            let peer = controller.peer(node_id);
            NodeReport {
                node_id,
                synchronized,
                is_icd,
                subscription: subscriptions.get(&peer).copied(),
                window_status: controller
                    .admin_commissioning(&peer)
                    .map(|state| state.window_status),
                device: controller.device(&peer).map(|d| SyncedDevice::clone(&d)),
            }
        })
        .collect())
}

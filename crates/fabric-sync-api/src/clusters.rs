//! Cluster, attribute, command and event identifiers used by the bridge layer.
//!
//! Only the subset this workspace touches is listed.

use crate::ids::{AttributeId, ClusterId, CommandId, EndpointId, EventId};

/// Root endpoint every node exposes.
pub const ROOT_ENDPOINT: EndpointId = 0;

// ── Descriptor ──────────────────────────────────────────────────────

pub const CLUSTER_ID_DESCRIPTOR: ClusterId = 0x001D;
pub const CLUSTER_DESCRIPTOR_ATTR_ID_PARTS_LIST: AttributeId = 0x0003;

// ── Basic Information ───────────────────────────────────────────────

pub const CLUSTER_ID_BASIC_INFORMATION: ClusterId = 0x0028;
pub const CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_NAME: AttributeId = 0x0001;
pub const CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_ID: AttributeId = 0x0002;
pub const CLUSTER_BASIC_INFORMATION_ATTR_ID_PRODUCT_NAME: AttributeId = 0x0003;
pub const CLUSTER_BASIC_INFORMATION_ATTR_ID_PRODUCT_ID: AttributeId = 0x0004;
pub const CLUSTER_BASIC_INFORMATION_ATTR_ID_NODE_LABEL: AttributeId = 0x0005;
pub const CLUSTER_BASIC_INFORMATION_ATTR_ID_HARDWARE_VERSION_STRING: AttributeId = 0x0008;
pub const CLUSTER_BASIC_INFORMATION_ATTR_ID_SOFTWARE_VERSION_STRING: AttributeId = 0x000A;
pub const CLUSTER_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID: AttributeId = 0x0012;

/// Attributes fetched when synchronizing a device's identity.
pub const BASIC_INFORMATION_SYNC_ATTRIBUTES: [AttributeId; 8] = [
    CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_NAME,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_ID,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_PRODUCT_NAME,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_PRODUCT_ID,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_NODE_LABEL,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_HARDWARE_VERSION_STRING,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_SOFTWARE_VERSION_STRING,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID,
];

// ── Bridged Device Basic Information ────────────────────────────────

pub const CLUSTER_ID_BRIDGED_DEVICE_BASIC_INFORMATION: ClusterId = 0x0039;
pub const CLUSTER_BRIDGED_DEVICE_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID: AttributeId = 0x0012;

// ── Administrator Commissioning ─────────────────────────────────────

pub const CLUSTER_ID_ADMINISTRATOR_COMMISSIONING: ClusterId = 0x003C;
pub const CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_WINDOW_STATUS: AttributeId = 0x0000;
pub const CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_FABRIC_INDEX: AttributeId = 0x0001;
pub const CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_VENDOR_ID: AttributeId = 0x0002;

/// Attributes tracked by a device subscription.
pub const ADMINISTRATOR_COMMISSIONING_ATTRIBUTES: [AttributeId; 3] = [
    CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_WINDOW_STATUS,
    CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_FABRIC_INDEX,
    CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_VENDOR_ID,
];

// ── ICD Management ──────────────────────────────────────────────────

pub const CLUSTER_ID_ICD_MANAGEMENT: ClusterId = 0x0046;
pub const CLUSTER_ICD_MANAGEMENT_CMD_ID_STAY_ACTIVE_REQUEST: CommandId = 0x03;
pub const CLUSTER_ICD_MANAGEMENT_CMD_ID_STAY_ACTIVE_RESPONSE: CommandId = 0x04;

// ── Commissioner Control ────────────────────────────────────────────

pub const CLUSTER_ID_COMMISSIONER_CONTROL: ClusterId = 0x0751;
pub const CLUSTER_COMMISSIONER_CONTROL_CMD_ID_REQUEST_COMMISSIONING_APPROVAL: CommandId = 0x00;
pub const CLUSTER_COMMISSIONER_CONTROL_CMD_ID_COMMISSION_NODE: CommandId = 0x01;
pub const CLUSTER_COMMISSIONER_CONTROL_CMD_ID_REVERSE_OPEN_COMMISSIONING_WINDOW: CommandId = 0x02;
pub const CLUSTER_COMMISSIONER_CONTROL_EVENT_ID_COMMISSIONING_REQUEST_RESULT: EventId = 0x00;

/// Field tag of the fabric index carried by fabric-scoped events.
pub const FABRIC_INDEX_FIELD_TAG: u8 = 0xFE;

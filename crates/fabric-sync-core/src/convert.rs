// ── Attribute and payload conversion ──
//
// Translates decoded interaction-model values into domain types and
// builds the command payloads the bridge layer sends. String attributes
// longer than their cluster maximum are decode failures.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use fabric_sync_api::clusters::{
    CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_FABRIC_INDEX,
    CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_VENDOR_ID,
    CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_WINDOW_STATUS,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_HARDWARE_VERSION_STRING,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_NODE_LABEL, CLUSTER_BASIC_INFORMATION_ATTR_ID_PRODUCT_ID,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_PRODUCT_NAME,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_SOFTWARE_VERSION_STRING,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID, CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_ID,
    CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_NAME, FABRIC_INDEX_FIELD_TAG,
};
use fabric_sync_api::{
    AttributeId, AttributeValue, EndpointId, Error, FabricIndex, NodeId, PeerNodeId, ProductId,
    StatusCode, VendorId,
};

use crate::model::{
    AdminCommissioningState, CommissioningApprovalRequest, CommissioningRequestResult,
    ReverseCommissioningWindow, SyncedDevice, WindowStatus,
};

/// Maximum length of names, labels and unique ids.
pub(crate) const MAX_NAME_LENGTH: usize = 32;
/// Maximum length of hardware/software version strings.
pub(crate) const MAX_VERSION_STRING_LENGTH: usize = 64;
/// Maximum length of a commissioning approval label.
pub(crate) const MAX_APPROVAL_LABEL_LENGTH: usize = 64;

pub(crate) fn bounded_string(value: &AttributeValue, max: usize) -> Result<String, Error> {
    let s = value.as_str()?;
    if s.len() > max {
        return Err(Error::Decode(format!(
            "string of {} bytes exceeds maximum of {max}",
            s.len()
        )));
    }
    Ok(s.to_owned())
}

// ── Basic Information ────────────────────────────────────────────────

/// Basic Information attributes collected during one synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BasicInformation {
    pub unique_id: Option<String>,
    pub vendor_name: Option<String>,
    pub vendor_id: Option<VendorId>,
    pub product_name: Option<String>,
    pub product_id: Option<ProductId>,
    pub node_label: Option<String>,
    pub hardware_version_string: Option<String>,
    pub software_version_string: Option<String>,
}

impl BasicInformation {
    /// Decode one attribute into its field. Untracked attributes are ignored.
    pub(crate) fn apply(
        &mut self,
        attribute: AttributeId,
        value: &AttributeValue,
    ) -> Result<(), Error> {
        match attribute {
            CLUSTER_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID => {
                self.unique_id = Some(bounded_string(value, MAX_NAME_LENGTH)?);
            }
            CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_NAME => {
                self.vendor_name = Some(bounded_string(value, MAX_NAME_LENGTH)?);
            }
            CLUSTER_BASIC_INFORMATION_ATTR_ID_VENDOR_ID => {
                self.vendor_id = Some(value.as_u16()?);
            }
            CLUSTER_BASIC_INFORMATION_ATTR_ID_PRODUCT_NAME => {
                self.product_name = Some(bounded_string(value, MAX_NAME_LENGTH)?);
            }
            CLUSTER_BASIC_INFORMATION_ATTR_ID_PRODUCT_ID => {
                self.product_id = Some(value.as_u16()?);
            }
            CLUSTER_BASIC_INFORMATION_ATTR_ID_NODE_LABEL => {
                self.node_label = Some(bounded_string(value, MAX_NAME_LENGTH)?);
            }
            CLUSTER_BASIC_INFORMATION_ATTR_ID_HARDWARE_VERSION_STRING => {
                self.hardware_version_string =
                    Some(bounded_string(value, MAX_VERSION_STRING_LENGTH)?);
            }
            CLUSTER_BASIC_INFORMATION_ATTR_ID_SOFTWARE_VERSION_STRING => {
                self.software_version_string =
                    Some(bounded_string(value, MAX_VERSION_STRING_LENGTH)?);
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn into_device(
        self,
        peer: PeerNodeId,
        endpoint_id: EndpointId,
        is_icd: bool,
    ) -> SyncedDevice {
        SyncedDevice {
            peer,
            endpoint_id,
            is_icd,
            unique_id: self.unique_id,
            vendor_name: self.vendor_name,
            vendor_id: self.vendor_id,
            product_name: self.product_name,
            product_id: self.product_id,
            node_label: self.node_label,
            hardware_version_string: self.hardware_version_string,
            software_version_string: self.software_version_string,
            synchronized_at: Utc::now(),
        }
    }
}

// ── Administrator Commissioning ──────────────────────────────────────

/// Apply one AdministratorCommissioning attribute to the current view.
/// Nullable attributes clear the field when null.
pub(crate) fn apply_admin_commissioning(
    state: &mut AdminCommissioningState,
    attribute: AttributeId,
    value: &AttributeValue,
) -> Result<(), Error> {
    match attribute {
        CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_WINDOW_STATUS => {
            let raw = value.as_u8()?;
            state.window_status = WindowStatus::from_raw(raw)
                .ok_or_else(|| Error::Decode(format!("unknown window status {raw}")))?;
        }
        CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_FABRIC_INDEX => {
            state.opener_fabric_index = if value.is_null() {
                None
            } else {
                Some(FabricIndex(value.as_u8()?))
            };
        }
        CLUSTER_ADMINISTRATOR_COMMISSIONING_ATTR_ID_ADMIN_VENDOR_ID => {
            state.opener_vendor_id = if value.is_null() {
                None
            } else {
                Some(value.as_u16()?)
            };
        }
        other => {
            return Err(Error::Decode(format!(
                "unexpected administrator commissioning attribute 0x{other:04X}"
            )));
        }
    }
    Ok(())
}

// ── Descriptor ───────────────────────────────────────────────────────

pub(crate) fn decode_parts_list(value: &AttributeValue) -> Result<BTreeSet<EndpointId>, Error> {
    value.as_list()?.iter().map(AttributeValue::as_u16).collect()
}

// ── Commissioner Control ─────────────────────────────────────────────

pub(crate) fn approval_request_fields(request: &CommissioningApprovalRequest) -> AttributeValue {
    let mut fields = vec![
        (0, AttributeValue::UInt(request.request_id)),
        (1, request.vendor_id.into()),
        (2, request.product_id.into()),
    ];
    if let Some(label) = &request.label {
        fields.push((3, label.as_str().into()));
    }
    AttributeValue::structure(fields)
}

pub(crate) fn commission_node_fields(
    request_id: u64,
    response_timeout_secs: u16,
) -> AttributeValue {
    AttributeValue::structure([
        (0, AttributeValue::UInt(request_id)),
        (1, response_timeout_secs.into()),
    ])
}

pub(crate) fn decode_commissioning_request_result(
    value: &AttributeValue,
) -> Result<CommissioningRequestResult, Error> {
    Ok(CommissioningRequestResult {
        request_id: value.field(0)?.as_u64()?,
        client_node_id: NodeId(value.field(1)?.as_u64()?),
        status_code: StatusCode(value.field(2)?.as_u8()?),
        fabric_index: FabricIndex(value.field(FABRIC_INDEX_FIELD_TAG)?.as_u8()?),
    })
}

pub(crate) fn decode_reverse_commissioning_window(
    value: &AttributeValue,
) -> Result<ReverseCommissioningWindow, Error> {
    Ok(ReverseCommissioningWindow {
        commissioning_timeout_secs: value.field(0)?.as_u16()?,
        pake_passcode_verifier: value.field(1)?.as_bytes()?.to_vec(),
        discriminator: value.field(2)?.as_u16()?,
        iterations: value.field(3)?.as_u32()?,
        salt: value.field(4)?.as_bytes()?.to_vec(),
    })
}

// ── ICD Management ───────────────────────────────────────────────────

pub(crate) fn stay_active_fields(duration: Duration) -> AttributeValue {
    let millis = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
    AttributeValue::structure([(0, AttributeValue::UInt(u64::from(millis)))])
}

pub(crate) fn decode_stay_active_response(value: &AttributeValue) -> Result<Duration, Error> {
    Ok(Duration::from_millis(u64::from(value.field(0)?.as_u32()?)))
}

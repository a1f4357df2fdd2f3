use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EventError, EventResult};
use crate::master_data::MasterDataEventRecord;

/// Stable discriminators carried next to every serialized payload.
pub mod payload_types {
    pub const REQUISITION_SUBMITTED: &str = "requisition.submitted";
    pub const REQUISITION_APPROVED: &str = "requisition.approved";
    pub const REQUISITION_REJECTED: &str = "requisition.rejected";
    pub const MASTER_DATA: &str = "masterdata.change";

    pub const ALL: [&str; 4] = [
        REQUISITION_SUBMITTED,
        REQUISITION_APPROVED,
        REQUISITION_REJECTED,
        MASTER_DATA,
    ];
}

/// One product line of a requisition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_code: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionSubmitted {
    pub requisition_id: Uuid,
    pub program_code: String,
    pub submitted_by: String,
    pub line_items: Vec<LineItem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionApproved {
    pub requisition_id: Uuid,
    pub approved_by: String,
    pub approved_items: Vec<LineItem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionRejected {
    pub requisition_id: Uuid,
    pub rejected_by: String,
    pub reason: String,
}

/// Typed event body.
///
/// On the wire each variant travels as its discriminator plus a JSON body of
/// the variant's inner struct; see [`crate::PayloadSerializer`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    RequisitionSubmitted(RequisitionSubmitted),
    RequisitionApproved(RequisitionApproved),
    RequisitionRejected(RequisitionRejected),
    MasterData(MasterDataEventRecord),
}

impl EventPayload {
    /// The discriminator for this payload.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RequisitionSubmitted(_) => payload_types::REQUISITION_SUBMITTED,
            Self::RequisitionApproved(_) => payload_types::REQUISITION_APPROVED,
            Self::RequisitionRejected(_) => payload_types::REQUISITION_REJECTED,
            Self::MasterData(_) => payload_types::MASTER_DATA,
        }
    }

    /// JSON body of the inner payload, without the variant tag.
    pub fn body_json(&self) -> EventResult<serde_json::Value> {
        let value = match self {
            Self::RequisitionSubmitted(p) => serde_json::to_value(p),
            Self::RequisitionApproved(p) => serde_json::to_value(p),
            Self::RequisitionRejected(p) => serde_json::to_value(p),
            Self::MasterData(p) => serde_json::to_value(p),
        };
        value.map_err(|e| EventError::InvalidPayload {
            payload_type: self.type_name().to_string(),
            reason: e.to_string(),
        })
    }

    /// Requisition the payload refers to, if any.
    pub fn requisition_id(&self) -> Option<Uuid> {
        match self {
            Self::RequisitionSubmitted(p) => Some(p.requisition_id),
            Self::RequisitionApproved(p) => Some(p.requisition_id),
            Self::RequisitionRejected(p) => Some(p.requisition_id),
            Self::MasterData(_) => None,
        }
    }
}

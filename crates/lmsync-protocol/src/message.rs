use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lmsync_store::{AckDirection, AckRecord};
use lmsync_types::{AgentId, EventId, FacilityId};

use crate::dto::ExternalEventDto;

pub const PROTOCOL_VERSION: u32 = 1;

/// `POST /agents` body: an agent announcing its public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub agent_id: AgentId,
    pub facility_id: FacilityId,
    /// Hex-encoded Ed25519 verifying key.
    pub public_key: String,
}

/// What backs a registration, sent as headers next to the body.
///
/// A new agent needs the operator secret. A known agent changing its key
/// needs a machine token signed with the key on file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationProof {
    pub operator_secret: Option<String>,
    pub token: Option<String>,
}

impl RegistrationProof {
    pub fn operator(secret: impl Into<String>) -> Self {
        Self {
            operator_secret: Some(secret.into()),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub agent_id: AgentId,
    pub facility_id: FacilityId,
    pub registered_at: DateTime<Utc>,
}

/// A batch of events, as pushed by an agent or returned by `GET /peeringEvents`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    pub events: Vec<ExternalEventDto>,
}

/// Body of both ack confirmations (`PUT /acks`, `POST /acks`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventIdsRequest {
    pub event_ids: Vec<EventId>,
}

impl EventIdsRequest {
    pub fn new(event_ids: Vec<EventId>) -> Self {
        Self { event_ids }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub confirmed: usize,
}

/// One acknowledgement on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckDto {
    pub event_id: EventId,
    pub counterpart: Option<FacilityId>,
    pub direction: AckDirection,
    pub recorded_at: DateTime<Utc>,
}

impl From<AckRecord> for AckDto {
    fn from(r: AckRecord) -> Self {
        Self {
            event_id: r.event_id,
            counterpart: r.counterpart,
            direction: r.direction,
            recorded_at: r.recorded_at,
        }
    }
}

/// `GET /acks` body: phase-1 acknowledgements owed to the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcksResponse {
    pub acks: Vec<AckDto>,
}

impl AcksResponse {
    pub fn event_ids(&self) -> Vec<EventId> {
        self.acks.iter().map(|a| a.event_id).collect()
    }
}

/// Result of storing and replaying a batch (push or binary import).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub imported: usize,
    pub duplicates: usize,
    /// Ids whose replay failed; the sender keeps them pending.
    pub failed: Vec<EventId>,
}

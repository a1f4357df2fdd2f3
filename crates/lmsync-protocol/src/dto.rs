use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lmsync_event::{Event, PayloadSerializer};
use lmsync_types::{EventId, FacilityId, GroupId};

use crate::error::ProtocolResult;

/// JSON form of an [`Event`] for the HTTP binding.
///
/// The payload travels as its discriminator plus a plain JSON body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEventDto {
    pub id: EventId,
    pub sender_id: FacilityId,
    #[serde(default)]
    pub receiver_id: Option<FacilityId>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    pub group_sequence: u64,
    pub occurred_at: DateTime<Utc>,
    pub payload_type: String,
    pub payload: serde_json::Value,
}

/// Maps events to and from [`ExternalEventDto`] using the payload registry.
#[derive(Clone, Debug, Default)]
pub struct ExternalEventDtoMapper {
    serializer: Arc<PayloadSerializer>,
}

impl ExternalEventDtoMapper {
    pub fn new(serializer: Arc<PayloadSerializer>) -> Self {
        Self { serializer }
    }

    pub fn to_dto(&self, event: &Event) -> ProtocolResult<ExternalEventDto> {
        Ok(ExternalEventDto {
            id: event.id,
            sender_id: event.sender_id,
            receiver_id: event.receiver_id,
            group_id: event.group_id,
            group_sequence: event.group_sequence,
            occurred_at: event.occurred_at,
            payload_type: event.payload_type().to_string(),
            payload: event.payload.body_json()?,
        })
    }

    /// Rebuild the event. Fails with `UnknownPayloadType` when the
    /// discriminator has no registered decoder.
    pub fn from_dto(&self, dto: ExternalEventDto) -> ProtocolResult<Event> {
        let payload = self
            .serializer
            .deserialize_value(&dto.payload_type, &dto.payload)?;
        debug!(event_id = %dto.id, payload_type = %dto.payload_type, "event dto mapped");
        Ok(Event {
            id: dto.id,
            sender_id: dto.sender_id,
            receiver_id: dto.receiver_id,
            group_id: dto.group_id,
            group_sequence: dto.group_sequence,
            occurred_at: dto.occurred_at,
            payload,
        })
    }

    pub fn to_dtos(&self, events: &[Event]) -> ProtocolResult<Vec<ExternalEventDto>> {
        events.iter().map(|e| self.to_dto(e)).collect()
    }

    pub fn from_dtos(&self, dtos: Vec<ExternalEventDto>) -> ProtocolResult<Vec<Event>> {
        dtos.into_iter().map(|d| self.from_dto(d)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use lmsync_event::{
        ChangeOperation, EventDraft, EventError, EventPayload, LineItem, MasterDataEventRecord,
        RequisitionSubmitted,
    };

    fn submitted() -> Event {
        EventDraft::new(
            FacilityId::random(),
            EventPayload::RequisitionSubmitted(RequisitionSubmitted {
                requisition_id: uuid::Uuid::new_v4(),
                program_code: "ARV".into(),
                submitted_by: "clerk".into(),
                line_items: vec![LineItem {
                    product_code: "P-100".into(),
                    quantity: 12,
                }],
            }),
        )
        .to_receiver(Some(FacilityId::random()))
        .in_group(Some(GroupId::random()))
        .into_event(3)
    }

    #[test]
    fn dto_preserves_every_field() {
        let mapper = ExternalEventDtoMapper::default();
        let event = submitted();
        let dto = mapper.to_dto(&event).unwrap();
        assert_eq!(dto.payload_type, "requisition.submitted");
        assert_eq!(dto.payload["program_code"], "ARV");

        let json = serde_json::to_string(&dto).unwrap();
        assert!(json.contains("\"payloadType\""));
        assert!(json.contains("\"groupSequence\":3"));
        let back: ExternalEventDto = serde_json::from_str(&json).unwrap();
        assert_eq!(mapper.from_dto(back).unwrap(), event);
    }

    #[test]
    fn master_data_dto_keeps_null_columns() {
        let mapper = ExternalEventDtoMapper::default();
        let event = EventDraft::new(
            FacilityId::random(),
            EventPayload::MasterData(MasterDataEventRecord {
                schema: "referencedata".into(),
                table: "orderables".into(),
                operation: ChangeOperation::Update,
                column_names: vec!["id".into(), "note".into()],
                column_values: vec![Some("1".into()), None],
                primary_key: vec!["id".into()],
                snapshot_version: Some(4),
            }),
        )
        .into_event(1);
        let dto = mapper.to_dto(&event).unwrap();
        assert_eq!(mapper.from_dto(dto).unwrap(), event);
    }

    #[test]
    fn unknown_payload_type_is_rejected() {
        let mapper = ExternalEventDtoMapper::default();
        let mut dto = mapper.to_dto(&submitted()).unwrap();
        dto.payload_type = "stock.adjusted".into();
        assert!(matches!(
            mapper.from_dto(dto),
            Err(ProtocolError::Event(EventError::UnknownPayloadType(t))) if t == "stock.adjusted"
        ));
    }
}

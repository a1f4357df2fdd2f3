use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lmsync_types::{EventId, FacilityId, GroupId};

use crate::error::{EventError, EventResult};
use crate::event::Event;
use crate::serializer::PayloadSerializer;

/// Version byte written at the head of every event frame.
pub const FRAME_VERSION: u8 = 1;

/// Binary form of an event: the envelope fields plus the payload as
/// discriminator and JSON body.
#[derive(Serialize, Deserialize)]
struct EventFrame {
    version: u8,
    id: EventId,
    sender_id: FacilityId,
    receiver_id: Option<FacilityId>,
    group_id: Option<GroupId>,
    group_sequence: u64,
    occurred_at: DateTime<Utc>,
    payload_type: String,
    payload: Vec<u8>,
}

/// Encodes events to bincode frames and back.
///
/// The frame is what the entry codec wraps, so it is the unit stored in event
/// files, export resources and the store journal.
#[derive(Clone, Debug)]
pub struct EventCodec {
    serializer: Arc<PayloadSerializer>,
}

impl EventCodec {
    pub fn new(serializer: Arc<PayloadSerializer>) -> Self {
        Self { serializer }
    }

    pub fn serializer(&self) -> &PayloadSerializer {
        &self.serializer
    }

    pub fn encode(&self, event: &Event) -> EventResult<Vec<u8>> {
        let (payload_type, payload) = self.serializer.serialize(&event.payload)?;
        let frame = EventFrame {
            version: FRAME_VERSION,
            id: event.id,
            sender_id: event.sender_id,
            receiver_id: event.receiver_id,
            group_id: event.group_id,
            group_sequence: event.group_sequence,
            occurred_at: event.occurred_at,
            payload_type,
            payload,
        };
        bincode::serialize(&frame).map_err(|e| EventError::Serialization(e.to_string()))
    }

    pub fn decode(&self, bytes: &[u8]) -> EventResult<Event> {
        let frame: EventFrame =
            bincode::deserialize(bytes).map_err(|e| EventError::Serialization(e.to_string()))?;
        if frame.version != FRAME_VERSION {
            return Err(EventError::UnsupportedFrameVersion(frame.version));
        }
        let payload = self
            .serializer
            .deserialize(&frame.payload_type, &frame.payload)?;
        Ok(Event {
            id: frame.id,
            sender_id: frame.sender_id,
            receiver_id: frame.receiver_id,
            group_id: frame.group_id,
            group_sequence: frame.group_sequence,
            occurred_at: frame.occurred_at,
            payload,
        })
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new(Arc::new(PayloadSerializer::with_defaults()))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lmsync_types::{EventId, FacilityId, GroupId};

use crate::payload::EventPayload;

/// An immutable event envelope.
///
/// Invariants:
/// - `id` is unique and never reused; it is the idempotence key for replay.
/// - `receiver_id == None` means the event is addressed to the online web only.
/// - Events sharing a `group_id` are ordered by `group_sequence`. Sequence
///   numbers start at 1 and are assigned by the event store at append time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub sender_id: FacilityId,
    pub receiver_id: Option<FacilityId>,
    pub group_id: Option<GroupId>,
    pub group_sequence: u64,
    pub occurred_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// Discriminator of the payload.
    pub fn payload_type(&self) -> &'static str {
        self.payload.type_name()
    }

    /// Whether the event must be delivered to `facility`.
    pub fn is_addressed_to(&self, facility: &FacilityId) -> bool {
        self.receiver_id.as_ref() == Some(facility)
    }
}

/// An event before the store has assigned its group sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventDraft {
    pub id: EventId,
    pub sender_id: FacilityId,
    pub receiver_id: Option<FacilityId>,
    pub group_id: Option<GroupId>,
    pub occurred_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl EventDraft {
    /// Draft a new event with a fresh id, stamped with the current time.
    pub fn new(sender_id: FacilityId, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            sender_id,
            receiver_id: None,
            group_id: None,
            occurred_at: Utc::now(),
            payload,
        }
    }

    pub fn to_receiver(mut self, receiver: Option<FacilityId>) -> Self {
        self.receiver_id = receiver;
        self
    }

    pub fn in_group(mut self, group: Option<GroupId>) -> Self {
        self.group_id = group;
        self
    }

    /// Seal the draft with the sequence assigned by the store.
    pub fn into_event(self, group_sequence: u64) -> Event {
        Event {
            id: self.id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            group_id: self.group_id,
            group_sequence,
            occurred_at: self.occurred_at,
            payload: self.payload,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lmsync_event::Event;
use lmsync_types::{EventId, FacilityId, NodeRole};

/// Where a stored event came from, relative to this node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventOrigin {
    /// Emitted by this node's publisher.
    Local,
    /// Received from the peer.
    Remote,
}

/// The store's row for one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub event: Event,
    pub origin: EventOrigin,
    /// Insertion order; tie-breaker after group sequence.
    pub ordinal: u64,
    pub inserted_at: DateTime<Utc>,
    /// Phase 1: the online web holds the event.
    pub online_web_received_at: Option<DateTime<Utc>>,
    /// Phase 2: the acknowledgement made it back to the sender.
    pub ack_shipped_at: Option<DateTime<Utc>>,
    /// The addressed receiver confirmed it has the event.
    pub receiver_synced_at: Option<DateTime<Utc>>,
    pub replayed_at: Option<DateTime<Utc>>,
}

impl EventRecord {
    /// A fresh record with the delivery flags a `(role, origin)` pair starts
    /// with.
    ///
    /// | role       | origin | starts as                   |
    /// |------------|--------|-----------------------------|
    /// | agent      | local  | replayed                    |
    /// | agent      | remote | received, shipped           |
    /// | online web | local  | received, shipped, replayed |
    /// | online web | remote | received                    |
    pub fn new(
        event: Event,
        origin: EventOrigin,
        role: NodeRole,
        ordinal: u64,
        at: DateTime<Utc>,
    ) -> Self {
        let (received, shipped, replayed) = match (role, origin) {
            (NodeRole::Agent, EventOrigin::Local) => (false, false, true),
            (NodeRole::Agent, EventOrigin::Remote) => (true, true, false),
            (NodeRole::OnlineWeb, EventOrigin::Local) => (true, true, true),
            (NodeRole::OnlineWeb, EventOrigin::Remote) => (true, false, false),
        };
        let stamp = |set: bool| set.then_some(at);
        Self {
            event,
            origin,
            ordinal,
            inserted_at: at,
            online_web_received_at: stamp(received),
            ack_shipped_at: stamp(shipped),
            receiver_synced_at: None,
            replayed_at: stamp(replayed),
        }
    }

    pub fn id(&self) -> EventId {
        self.event.id
    }

    pub fn is_received_by_online_web(&self) -> bool {
        self.online_web_received_at.is_some()
    }

    pub fn is_ack_shipped(&self) -> bool {
        self.ack_shipped_at.is_some()
    }

    pub fn is_receiver_synced(&self) -> bool {
        self.receiver_synced_at.is_some()
    }

    pub fn is_replayed(&self) -> bool {
        self.replayed_at.is_some()
    }

    /// Whether every party that needs this event has confirmed it.
    pub fn is_prunable(&self, role: NodeRole) -> bool {
        if !(self.is_received_by_online_web() && self.is_ack_shipped() && self.is_replayed()) {
            return false;
        }
        match (role, self.origin) {
            (NodeRole::Agent, EventOrigin::Local) => true,
            (NodeRole::Agent, EventOrigin::Remote) => self.is_receiver_synced(),
            (NodeRole::OnlineWeb, _) => {
                self.event.receiver_id.is_none() || self.is_receiver_synced()
            }
        }
    }

    /// Ordering key: group, then sequence within the group, then insertion.
    pub(crate) fn delivery_key(&self) -> (Option<lmsync_types::GroupId>, u64, u64) {
        (self.event.group_id, self.event.group_sequence, self.ordinal)
    }
}

/// What an acknowledgement record attests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckDirection {
    /// The online web stored an event pushed by its sender (phase 1).
    ReceivedByOnlineWeb,
    /// The sender learned of phase 1 and confirmed it (phase 2).
    AckShipped,
    /// The addressed receiver confirmed it holds the event.
    ReceivedByReceiver,
}

/// One acknowledgement in an event's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckRecord {
    pub event_id: EventId,
    /// The other party in this acknowledgement, when known.
    pub counterpart: Option<FacilityId>,
    pub direction: AckDirection,
    pub recorded_at: DateTime<Utc>,
}

/// A replay failure kept for operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    pub id: Uuid,
    pub event_id: EventId,
    pub payload_type: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    /// Failed replay attempts for this event so far.
    pub attempts: u32,
}

impl SyncErrorRecord {
    pub fn new(event: &Event, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: event.id,
            payload_type: event.payload_type().to_string(),
            message: message.into(),
            occurred_at: Utc::now(),
            attempts: 1,
        }
    }
}

/// Result of inserting an event received from the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Already stored; `replayed` tells whether it was applied.
    Duplicate { replayed: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmsync_event::{EventDraft, EventPayload, RequisitionRejected};

    fn event(receiver: Option<FacilityId>) -> Event {
        EventDraft::new(
            FacilityId::random(),
            EventPayload::RequisitionRejected(RequisitionRejected {
                requisition_id: Uuid::new_v4(),
                rejected_by: "x".into(),
                reason: "y".into(),
            }),
        )
        .to_receiver(receiver)
        .into_event(1)
    }

    #[test]
    fn initial_flags_follow_role_and_origin() {
        let now = Utc::now();
        let agent_local = EventRecord::new(event(None), EventOrigin::Local, NodeRole::Agent, 0, now);
        assert!(!agent_local.is_received_by_online_web());
        assert!(!agent_local.is_ack_shipped());
        assert!(agent_local.is_replayed());

        let agent_remote =
            EventRecord::new(event(None), EventOrigin::Remote, NodeRole::Agent, 0, now);
        assert!(agent_remote.is_received_by_online_web() && agent_remote.is_ack_shipped());
        assert!(!agent_remote.is_replayed());

        let web_local =
            EventRecord::new(event(None), EventOrigin::Local, NodeRole::OnlineWeb, 0, now);
        assert!(web_local.is_prunable(NodeRole::OnlineWeb));

        let web_remote =
            EventRecord::new(event(None), EventOrigin::Remote, NodeRole::OnlineWeb, 0, now);
        assert!(web_remote.is_received_by_online_web());
        assert!(!web_remote.is_ack_shipped());
    }

    #[test]
    fn agent_local_event_needs_both_ack_phases() {
        let now = Utc::now();
        let mut rec = EventRecord::new(event(None), EventOrigin::Local, NodeRole::Agent, 0, now);
        assert!(!rec.is_prunable(NodeRole::Agent));
        rec.online_web_received_at = Some(now);
        assert!(!rec.is_prunable(NodeRole::Agent));
        rec.ack_shipped_at = Some(now);
        assert!(rec.is_prunable(NodeRole::Agent));
    }

    #[test]
    fn addressed_event_waits_for_receiver_on_online_web() {
        let now = Utc::now();
        let mut rec = EventRecord::new(
            event(Some(FacilityId::random())),
            EventOrigin::Local,
            NodeRole::OnlineWeb,
            0,
            now,
        );
        assert!(!rec.is_prunable(NodeRole::OnlineWeb));
        rec.receiver_synced_at = Some(now);
        assert!(rec.is_prunable(NodeRole::OnlineWeb));
    }
}

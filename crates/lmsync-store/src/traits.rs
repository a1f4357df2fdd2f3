use lmsync_event::{Event, EventDraft};
use lmsync_types::{EventId, FacilityId, NodeRole};

use crate::error::StoreResult;
use crate::record::{AckRecord, EventRecord, InsertOutcome, SyncErrorRecord};

/// The event store: single source of truth for delivery state.
///
/// Invariants every implementation keeps:
/// - An event id is stored at most once; re-inserting is a no-op reported as
///   [`InsertOutcome::Duplicate`].
/// - `group_sequence` is assigned at append time, strictly increasing within
///   a group, and never reused, even after the earlier events are pruned.
/// - Acknowledgement updates are serialized; two confirmations racing on the
///   same event cannot lose either update.
/// - A change is durable before the call returns.
pub trait EventStore: Send + Sync {
    /// The node role this store runs under. Decides initial delivery flags.
    fn role(&self) -> NodeRole;

    /// Append an event emitted on this node, assigning its group sequence.
    fn append_local(&self, draft: EventDraft) -> StoreResult<Event>;

    /// Store an event received from the peer.
    fn insert_remote(&self, event: &Event) -> StoreResult<InsertOutcome>;

    fn get(&self, id: &EventId) -> StoreResult<Option<EventRecord>>;

    /// Events addressed to `facility` it has not yet confirmed, in causal
    /// order (group, group sequence, insertion).
    fn events_for_receiver(&self, facility: &FacilityId) -> StoreResult<Vec<Event>>;

    /// Local events the online web has not confirmed yet, in causal order.
    fn pending_for_online_web(&self) -> StoreResult<Vec<Event>>;

    /// Phase-1 acknowledgements still owed to `facility` for events it sent.
    fn acks_for_event_sender(&self, facility: &FacilityId) -> StoreResult<Vec<AckRecord>>;

    /// Phase 1: record that the online web holds these events.
    /// Returns how many records changed.
    fn confirm_received_to_online_web(&self, ids: &[EventId]) -> StoreResult<usize>;

    /// Phase 2: record that the acknowledgement reached the sender.
    fn confirm_ack_shipped(&self, ids: &[EventId]) -> StoreResult<usize>;

    /// The receiver `facility` confirmed it holds these events; stop
    /// delivering them. Ids not addressed to `facility` are ignored.
    fn confirm_received_by_receiver(
        &self,
        facility: &FacilityId,
        ids: &[EventId],
    ) -> StoreResult<usize>;

    /// Mark an event as applied to domain state. Clears its sync errors.
    /// Returns `false` if it was already marked or is unknown.
    fn mark_replayed(&self, id: &EventId) -> StoreResult<bool>;

    /// Stored events whose replay has not succeeded yet, in causal order.
    fn unreplayed(&self) -> StoreResult<Vec<Event>>;

    fn ack_records(&self, id: &EventId) -> StoreResult<Vec<AckRecord>>;

    /// Keep a replay failure. A second failure of the same event replaces
    /// the first and bumps its attempt count.
    fn record_sync_error(&self, error: SyncErrorRecord) -> StoreResult<()>;

    fn sync_errors(&self) -> StoreResult<Vec<SyncErrorRecord>>;

    /// Drop every record that all parties have confirmed. Returns how many
    /// were removed.
    fn prune(&self) -> StoreResult<usize>;

    fn len(&self) -> StoreResult<usize>;

    /// Records some party has not confirmed yet, so [`prune`](Self::prune)
    /// keeps them.
    fn undelivered(&self) -> StoreResult<usize>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

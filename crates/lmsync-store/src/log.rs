use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use lmsync_event::{Event, EventCodec, EventDraft};
use lmsync_types::{EventId, FacilityId, GroupId, NodeRole};

use crate::error::StoreResult;
use crate::journal::{FileJournal, Journal, NullJournal, RecordSnapshot, StoreOp, SyncMode};
use crate::record::{
    AckDirection, AckRecord, EventOrigin, EventRecord, InsertOutcome, SyncErrorRecord,
};
use crate::traits::EventStore;

/// Purely in-memory event store, for tests and embedding.
pub type InMemoryEventStore = EventLog<NullJournal>;

/// Event store persisted to an append-only journal file.
pub type FileEventStore = EventLog<FileJournal>;

#[derive(Default)]
struct LogState {
    records: HashMap<EventId, EventRecord>,
    acks: HashMap<EventId, Vec<AckRecord>>,
    errors: Vec<SyncErrorRecord>,
    /// Highest sequence ever assigned per group. Survives pruning.
    group_heads: HashMap<GroupId, u64>,
    next_ordinal: u64,
}

impl LogState {
    fn apply(&mut self, op: StoreOp, role: NodeRole, codec: &EventCodec) -> StoreResult<()> {
        match op {
            StoreOp::Insert {
                frame,
                origin,
                ordinal,
                at,
            } => {
                let event = codec.decode(&frame)?;
                self.bump_group(&event);
                self.next_ordinal = self.next_ordinal.max(ordinal + 1);
                if role == NodeRole::OnlineWeb && origin == EventOrigin::Remote {
                    self.push_ack(event.id, Some(event.sender_id), AckDirection::ReceivedByOnlineWeb, at);
                }
                let record = EventRecord::new(event, origin, role, ordinal, at);
                self.records.insert(record.id(), record);
            }
            StoreOp::ReceivedByOnlineWeb { ids, at } => {
                for id in ids {
                    if let Some(rec) = self.records.get_mut(&id) {
                        rec.online_web_received_at.get_or_insert(at);
                        self.push_ack(id, None, AckDirection::ReceivedByOnlineWeb, at);
                    }
                }
            }
            StoreOp::AckShipped { ids, at } => {
                for id in ids {
                    if let Some(rec) = self.records.get_mut(&id) {
                        rec.ack_shipped_at.get_or_insert(at);
                        let sender = rec.event.sender_id;
                        self.push_ack(id, Some(sender), AckDirection::AckShipped, at);
                    }
                }
            }
            StoreOp::ReceiverSynced { receiver, ids, at } => {
                for id in ids {
                    if let Some(rec) = self.records.get_mut(&id) {
                        rec.receiver_synced_at.get_or_insert(at);
                        self.push_ack(id, Some(receiver), AckDirection::ReceivedByReceiver, at);
                    }
                }
            }
            StoreOp::Replayed { id, at } => {
                if let Some(rec) = self.records.get_mut(&id) {
                    rec.replayed_at.get_or_insert(at);
                }
                self.errors.retain(|e| e.event_id != id);
            }
            StoreOp::SyncError(error) => {
                match self.errors.iter_mut().find(|e| e.event_id == error.event_id) {
                    Some(existing) => {
                        let attempts = existing.attempts + 1;
                        *existing = SyncErrorRecord { attempts, ..error };
                    }
                    None => self.errors.push(error),
                }
            }
            StoreOp::Prune { ids } => {
                for id in ids {
                    self.records.remove(&id);
                    self.acks.remove(&id);
                }
            }
            StoreOp::Restore(snap) => {
                let event = codec.decode(&snap.frame)?;
                self.bump_group(&event);
                self.next_ordinal = self.next_ordinal.max(snap.ordinal + 1);
                let record = EventRecord {
                    event,
                    origin: snap.origin,
                    ordinal: snap.ordinal,
                    inserted_at: snap.inserted_at,
                    online_web_received_at: snap.online_web_received_at,
                    ack_shipped_at: snap.ack_shipped_at,
                    receiver_synced_at: snap.receiver_synced_at,
                    replayed_at: snap.replayed_at,
                };
                if !snap.acks.is_empty() {
                    self.acks.insert(record.id(), snap.acks);
                }
                self.records.insert(record.id(), record);
            }
            StoreOp::GroupHead { group, sequence } => {
                let head = self.group_heads.entry(group).or_insert(0);
                *head = (*head).max(sequence);
            }
        }
        Ok(())
    }

    fn bump_group(&mut self, event: &Event) {
        if let Some(group) = event.group_id {
            let head = self.group_heads.entry(group).or_insert(0);
            *head = (*head).max(event.group_sequence);
        }
    }

    fn push_ack(
        &mut self,
        event_id: EventId,
        counterpart: Option<FacilityId>,
        direction: AckDirection,
        at: DateTime<Utc>,
    ) {
        self.acks.entry(event_id).or_default().push(AckRecord {
            event_id,
            counterpart,
            direction,
            recorded_at: at,
        });
    }

    fn sorted<'a>(&'a self, filter: impl Fn(&EventRecord) -> bool) -> Vec<&'a EventRecord> {
        let mut out: Vec<&EventRecord> = self.records.values().filter(|r| filter(r)).collect();
        out.sort_by_key(|r| r.delivery_key());
        out
    }

    /// Ids in `ids` whose record exists and passes `pending`, deduplicated.
    fn changing(&self, ids: &[EventId], pending: impl Fn(&EventRecord) -> bool) -> Vec<EventId> {
        let mut out: Vec<EventId> = ids
            .iter()
            .filter(|id| self.records.get(id).is_some_and(|r| pending(r)))
            .copied()
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Event store over a [`Journal`].
///
/// State lives in memory behind one `RwLock`; every mutation appends its op
/// to the journal and applies it while holding the write guard, so ack
/// updates are serialized and the journal order matches the applied order.
pub struct EventLog<J: Journal> {
    role: NodeRole,
    codec: EventCodec,
    journal: J,
    state: RwLock<LogState>,
}

impl EventLog<NullJournal> {
    /// Create a new empty in-memory store.
    pub fn in_memory(role: NodeRole, codec: EventCodec) -> Self {
        Self {
            role,
            codec,
            journal: NullJournal,
            state: RwLock::new(LogState::default()),
        }
    }
}

impl EventLog<FileJournal> {
    /// Open (or create) a journaled store at `path`.
    pub fn open(
        path: &Path,
        role: NodeRole,
        codec: EventCodec,
        sync_mode: SyncMode,
    ) -> StoreResult<Self> {
        Self::with_journal(FileJournal::open(path, sync_mode)?, role, codec)
    }
}

impl<J: Journal> EventLog<J> {
    /// Build a store by replaying every op the journal holds.
    pub fn with_journal(journal: J, role: NodeRole, codec: EventCodec) -> StoreResult<Self> {
        let mut state = LogState::default();
        let ops = journal.load()?;
        let count = ops.len();
        for op in ops {
            state.apply(op, role, &codec)?;
        }
        info!(
            %role,
            ops = count,
            records = state.records.len(),
            "event store opened"
        );
        Ok(Self {
            role,
            codec,
            journal,
            state: RwLock::new(state),
        })
    }

    pub fn codec(&self) -> &EventCodec {
        &self.codec
    }

    fn commit(&self, state: &mut LogState, op: StoreOp) -> StoreResult<()> {
        self.journal.append(&op)?;
        state.apply(op, self.role, &self.codec)
    }

    /// Rewrite the journal from live state, dropping pruned history.
    pub fn compact(&self) -> StoreResult<usize> {
        let state = self.state.read().expect("lock poisoned");
        let mut ops = Vec::with_capacity(state.records.len() + state.group_heads.len());
        for (group, sequence) in &state.group_heads {
            ops.push(StoreOp::GroupHead {
                group: *group,
                sequence: *sequence,
            });
        }
        let mut records: Vec<&EventRecord> = state.records.values().collect();
        records.sort_by_key(|r| r.ordinal);
        for rec in records {
            ops.push(StoreOp::Restore(RecordSnapshot {
                frame: self.codec.encode(&rec.event)?,
                origin: rec.origin,
                ordinal: rec.ordinal,
                inserted_at: rec.inserted_at,
                online_web_received_at: rec.online_web_received_at,
                ack_shipped_at: rec.ack_shipped_at,
                receiver_synced_at: rec.receiver_synced_at,
                replayed_at: rec.replayed_at,
                acks: state.acks.get(&rec.id()).cloned().unwrap_or_default(),
            }));
        }
        for error in &state.errors {
            ops.push(StoreOp::SyncError(error.clone()));
        }
        self.journal.rewrite(&ops)?;
        info!(ops = ops.len(), "event store journal compacted");
        Ok(ops.len())
    }
}

impl<J: Journal> EventStore for EventLog<J> {
    fn role(&self) -> NodeRole {
        self.role
    }

    fn append_local(&self, draft: EventDraft) -> StoreResult<Event> {
        let mut state = self.state.write().expect("lock poisoned");
        let sequence = match draft.group_id {
            Some(group) => state.group_heads.get(&group).copied().unwrap_or(0) + 1,
            None => 1,
        };
        let event = draft.into_event(sequence);
        let op = StoreOp::Insert {
            frame: self.codec.encode(&event)?,
            origin: EventOrigin::Local,
            ordinal: state.next_ordinal,
            at: Utc::now(),
        };
        self.commit(&mut state, op)?;
        debug!(event_id = %event.id, group_sequence = sequence, "local event appended");
        Ok(event)
    }

    fn insert_remote(&self, event: &Event) -> StoreResult<InsertOutcome> {
        let mut state = self.state.write().expect("lock poisoned");
        if let Some(existing) = state.records.get(&event.id) {
            return Ok(InsertOutcome::Duplicate {
                replayed: existing.is_replayed(),
            });
        }
        let op = StoreOp::Insert {
            frame: self.codec.encode(event)?,
            origin: EventOrigin::Remote,
            ordinal: state.next_ordinal,
            at: Utc::now(),
        };
        self.commit(&mut state, op)?;
        debug!(event_id = %event.id, sender = %event.sender_id, "remote event stored");
        Ok(InsertOutcome::Inserted)
    }

    fn get(&self, id: &EventId) -> StoreResult<Option<EventRecord>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.records.get(id).cloned())
    }

    fn events_for_receiver(&self, facility: &FacilityId) -> StoreResult<Vec<Event>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .sorted(|r| r.event.is_addressed_to(facility) && !r.is_receiver_synced())
            .into_iter()
            .map(|r| r.event.clone())
            .collect())
    }

    fn pending_for_online_web(&self) -> StoreResult<Vec<Event>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .sorted(|r| r.origin == EventOrigin::Local && !r.is_received_by_online_web())
            .into_iter()
            .map(|r| r.event.clone())
            .collect())
    }

    fn acks_for_event_sender(&self, facility: &FacilityId) -> StoreResult<Vec<AckRecord>> {
        let state = self.state.read().expect("lock poisoned");
        let owed = state.sorted(|r| {
            r.origin == EventOrigin::Remote
                && r.event.sender_id == *facility
                && r.is_received_by_online_web()
                && r.is_replayed()
                && !r.is_ack_shipped()
        });
        Ok(owed
            .into_iter()
            .map(|r| {
                state
                    .acks
                    .get(&r.id())
                    .and_then(|acks| {
                        acks.iter()
                            .find(|a| a.direction == AckDirection::ReceivedByOnlineWeb)
                            .cloned()
                    })
                    .unwrap_or(AckRecord {
                        event_id: r.id(),
                        counterpart: Some(r.event.sender_id),
                        direction: AckDirection::ReceivedByOnlineWeb,
                        recorded_at: r.inserted_at,
                    })
            })
            .collect())
    }

    fn confirm_received_to_online_web(&self, ids: &[EventId]) -> StoreResult<usize> {
        let mut state = self.state.write().expect("lock poisoned");
        let ids = state.changing(ids, |r| !r.is_received_by_online_web());
        if ids.is_empty() {
            return Ok(0);
        }
        let n = ids.len();
        self.commit(&mut state, StoreOp::ReceivedByOnlineWeb { ids, at: Utc::now() })?;
        debug!(count = n, "confirmed received by online web");
        Ok(n)
    }

    fn confirm_ack_shipped(&self, ids: &[EventId]) -> StoreResult<usize> {
        let mut state = self.state.write().expect("lock poisoned");
        let ids = state.changing(ids, |r| !r.is_ack_shipped());
        if ids.is_empty() {
            return Ok(0);
        }
        let n = ids.len();
        self.commit(&mut state, StoreOp::AckShipped { ids, at: Utc::now() })?;
        debug!(count = n, "confirmed ack shipped");
        Ok(n)
    }

    fn confirm_received_by_receiver(
        &self,
        facility: &FacilityId,
        ids: &[EventId],
    ) -> StoreResult<usize> {
        let mut state = self.state.write().expect("lock poisoned");
        let ids = state.changing(ids, |r| {
            r.event.is_addressed_to(facility) && !r.is_receiver_synced()
        });
        if ids.is_empty() {
            return Ok(0);
        }
        let n = ids.len();
        self.commit(
            &mut state,
            StoreOp::ReceiverSynced {
                receiver: *facility,
                ids,
                at: Utc::now(),
            },
        )?;
        debug!(count = n, receiver = %facility, "confirmed received by receiver");
        Ok(n)
    }

    fn mark_replayed(&self, id: &EventId) -> StoreResult<bool> {
        let mut state = self.state.write().expect("lock poisoned");
        match state.records.get(id) {
            Some(rec) if !rec.is_replayed() => {
                self.commit(&mut state, StoreOp::Replayed { id: *id, at: Utc::now() })?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn unreplayed(&self) -> StoreResult<Vec<Event>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .sorted(|r| !r.is_replayed())
            .into_iter()
            .map(|r| r.event.clone())
            .collect())
    }

    fn ack_records(&self, id: &EventId) -> StoreResult<Vec<AckRecord>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.acks.get(id).cloned().unwrap_or_default())
    }

    fn record_sync_error(&self, error: SyncErrorRecord) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        self.commit(&mut state, StoreOp::SyncError(error))
    }

    fn sync_errors(&self) -> StoreResult<Vec<SyncErrorRecord>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.errors.clone())
    }

    fn prune(&self) -> StoreResult<usize> {
        let mut state = self.state.write().expect("lock poisoned");
        let role = self.role;
        let mut ids: Vec<EventId> = state
            .records
            .values()
            .filter(|r| r.is_prunable(role))
            .map(|r| r.id())
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        ids.sort();
        let n = ids.len();
        self.commit(&mut state, StoreOp::Prune { ids })?;
        info!(pruned = n, "pruned fully acknowledged events");
        Ok(n)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.state.read().expect("lock poisoned").records.len())
    }

    fn undelivered(&self) -> StoreResult<usize> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .records
            .values()
            .filter(|r| !r.is_prunable(self.role))
            .count())
    }
}

impl<J: Journal> std::fmt::Debug for EventLog<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.state.read().map(|s| s.records.len()).unwrap_or(0);
        f.debug_struct("EventLog")
            .field("role", &self.role)
            .field("record_count", &count)
            .finish()
    }
}

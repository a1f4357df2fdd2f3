use std::sync::Arc;

use tracing::{debug, info, warn};

use lmsync_event::Event;
use lmsync_protocol::ImportResponse;
use lmsync_store::{EventStore, InsertOutcome, SyncErrorRecord};
use lmsync_types::EventId;

use crate::error::{SyncError, SyncResult};
use crate::replay::{ReplayOutcome, ReplayRegistry};

/// What happened to each event of an imported batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Stored (or already stored) and replayed by this import.
    pub imported: Vec<EventId>,
    /// Already stored and replayed before; nothing done.
    pub duplicates: Vec<EventId>,
    /// Replay failed; a sync error was recorded.
    pub failed: Vec<EventId>,
}

impl ImportReport {
    /// Ids the sender may consider delivered.
    pub fn confirmable_ids(&self) -> Vec<EventId> {
        self.imported
            .iter()
            .chain(&self.duplicates)
            .copied()
            .collect()
    }

    pub fn total(&self) -> usize {
        self.imported.len() + self.duplicates.len() + self.failed.len()
    }

    pub fn merge(&mut self, other: ImportReport) {
        self.imported.extend(other.imported);
        self.duplicates.extend(other.duplicates);
        self.failed.extend(other.failed);
    }
}

impl From<&ImportReport> for ImportResponse {
    fn from(r: &ImportReport) -> Self {
        Self {
            imported: r.imported.len(),
            duplicates: r.duplicates.len(),
            failed: r.failed.clone(),
        }
    }
}

/// Persists received events and dispatches them to their replayers.
pub struct EventImporter {
    store: Arc<dyn EventStore>,
    registry: Arc<ReplayRegistry>,
}

impl EventImporter {
    pub fn new(store: Arc<dyn EventStore>, registry: Arc<ReplayRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Import a batch in order.
    ///
    /// A replay failure is recorded and the batch continues; the failed
    /// event stays unreplayed and is retried when it arrives again. Store
    /// failures abort the batch.
    pub fn import_events(&self, events: &[Event]) -> SyncResult<ImportReport> {
        let mut report = ImportReport::default();
        for event in events {
            match self.store.insert_remote(event)? {
                InsertOutcome::Duplicate { replayed: true } => {
                    debug!(event_id = %event.id, "duplicate event already replayed");
                    report.duplicates.push(event.id);
                    continue;
                }
                InsertOutcome::Duplicate { replayed: false } | InsertOutcome::Inserted => {}
            }
            if self.replay_stored(event)? {
                report.imported.push(event.id);
            } else {
                report.failed.push(event.id);
            }
        }
        info!(
            imported = report.imported.len(),
            duplicates = report.duplicates.len(),
            failed = report.failed.len(),
            "event batch imported"
        );
        Ok(report)
    }

    /// Replay a stored event again on operator request, even if it was
    /// replayed before.
    pub fn replay_event(&self, id: &EventId) -> SyncResult<ReplayOutcome> {
        let record = self.store.get(id)?.ok_or(SyncError::EventNotFound(*id))?;
        match self.registry.dispatch(&record.event) {
            Ok(outcome) => {
                self.store.mark_replayed(id)?;
                info!(event_id = %id, ?outcome, "event replayed manually");
                Ok(outcome)
            }
            Err(e) => {
                self.store
                    .record_sync_error(SyncErrorRecord::new(&record.event, e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Retry every stored event whose replay has not succeeded yet.
    pub fn retry_unreplayed(&self) -> SyncResult<ImportReport> {
        let mut report = ImportReport::default();
        for event in self.store.unreplayed()? {
            if self.replay_stored(&event)? {
                report.imported.push(event.id);
            } else {
                report.failed.push(event.id);
            }
        }
        if report.total() > 0 {
            info!(
                replayed = report.imported.len(),
                failed = report.failed.len(),
                "retried unreplayed events"
            );
        }
        Ok(report)
    }

    /// Returns whether the replay succeeded.
    fn replay_stored(&self, event: &Event) -> SyncResult<bool> {
        match self.registry.dispatch(event) {
            Ok(outcome) => {
                self.store.mark_replayed(&event.id)?;
                debug!(event_id = %event.id, ?outcome, "event replayed");
                Ok(true)
            }
            Err(e) => {
                warn!(
                    event_id = %event.id,
                    payload_type = event.payload_type(),
                    error = %e,
                    "event replay failed"
                );
                self.store
                    .record_sync_error(SyncErrorRecord::new(event, e.to_string()))?;
                Ok(false)
            }
        }
    }
}

//! Master data replay into a local mirror of the source tables.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::debug;

use lmsync_event::{payload_types, ChangeOperation, Event, EventPayload};
use lmsync_types::EventId;

use super::{ReplayOutcome, Replayer};
use crate::error::{SyncError, SyncResult};

/// One mirrored row: column name to value, `None` is NULL.
pub type MirrorRow = BTreeMap<String, Option<String>>;

#[derive(Default)]
struct MirrorState {
    /// `schema.table` to rows keyed by primary key values.
    tables: HashMap<String, BTreeMap<Vec<String>, MirrorRow>>,
    /// Snapshot version each table was seeded from.
    baselines: HashMap<String, u64>,
    applied: HashSet<EventId>,
}

/// Local copy of the master data tables.
#[derive(Default)]
pub struct MasterDataMirror {
    state: RwLock<MirrorState>,
}

impl MasterDataMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `table` was seeded from snapshot `version`. Changes
    /// captured before that snapshot are skipped.
    pub fn set_baseline(&self, qualified_table: &str, version: u64) {
        self.state
            .write()
            .expect("lock poisoned")
            .baselines
            .insert(qualified_table.to_string(), version);
    }

    pub fn row(&self, qualified_table: &str, key: &[String]) -> Option<MirrorRow> {
        let state = self.state.read().expect("lock poisoned");
        state.tables.get(qualified_table)?.get(key).cloned()
    }

    pub fn row_count(&self, qualified_table: &str) -> usize {
        let state = self.state.read().expect("lock poisoned");
        state.tables.get(qualified_table).map_or(0, BTreeMap::len)
    }
}

impl std::fmt::Debug for MasterDataMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("MasterDataMirror")
            .field("tables", &state.tables.len())
            .field("applied", &state.applied.len())
            .finish()
    }
}

pub struct MasterDataReplayer {
    mirror: Arc<MasterDataMirror>,
}

impl MasterDataReplayer {
    pub fn new(mirror: Arc<MasterDataMirror>) -> Self {
        Self { mirror }
    }
}

impl Replayer for MasterDataReplayer {
    fn payload_type(&self) -> &'static str {
        payload_types::MASTER_DATA
    }

    fn replay(&self, event: &Event) -> SyncResult<ReplayOutcome> {
        let EventPayload::MasterData(record) = &event.payload else {
            return Err(SyncError::replay(self.payload_type(), "not a master data payload"));
        };
        if !record.is_well_formed() {
            return Err(SyncError::replay(
                self.payload_type(),
                format!(
                    "{} has {} columns but {} values",
                    record.qualified_table(),
                    record.column_names.len(),
                    record.column_values.len()
                ),
            ));
        }
        let key = record.row_key().ok_or_else(|| {
            SyncError::replay(
                self.payload_type(),
                format!("{} change without a usable primary key", record.qualified_table()),
            )
        })?;
        let table = record.qualified_table();

        let mut state = self.mirror.state.write().expect("lock poisoned");
        if state.applied.contains(&event.id) {
            return Ok(ReplayOutcome::Skipped);
        }
        let stale = match (record.snapshot_version, state.baselines.get(&table)) {
            (Some(version), Some(&baseline)) => version < baseline,
            _ => false,
        };
        if stale {
            debug!(event_id = %event.id, table = %table, "change predates mirror snapshot");
            state.applied.insert(event.id);
            return Ok(ReplayOutcome::Skipped);
        }

        let existing = state.tables.get(&table).and_then(|rows| rows.get(&key));
        let next: Option<MirrorRow> = match record.operation {
            ChangeOperation::Delete => None,
            ChangeOperation::Insert => Some(
                record
                    .column_names
                    .iter()
                    .cloned()
                    .zip(record.column_values.iter().cloned())
                    .collect(),
            ),
            ChangeOperation::Update => {
                let mut row = existing.cloned().unwrap_or_default();
                for (name, value) in record.column_names.iter().zip(&record.column_values) {
                    row.insert(name.clone(), value.clone());
                }
                Some(row)
            }
        };

        let rows = state.tables.entry(table.clone()).or_default();
        match next {
            Some(row) => {
                rows.insert(key, row);
            }
            None => {
                rows.remove(&key);
            }
        }
        state.applied.insert(event.id);
        debug!(event_id = %event.id, table = %table, operation = %record.operation, "master data replayed");
        Ok(ReplayOutcome::Applied)
    }
}

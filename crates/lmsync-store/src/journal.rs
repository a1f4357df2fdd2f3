use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lmsync_pack::{Entry, EntryReader, EntryWriter, PackError};
use lmsync_types::{EventId, FacilityId, GroupId};

use crate::error::{StoreError, StoreResult};
use crate::lock::StoreLock;
use crate::record::{AckRecord, EventOrigin, SyncErrorRecord};

/// Full state of one record, written when the journal is compacted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub frame: Vec<u8>,
    pub origin: EventOrigin,
    pub ordinal: u64,
    pub inserted_at: DateTime<Utc>,
    pub online_web_received_at: Option<DateTime<Utc>>,
    pub ack_shipped_at: Option<DateTime<Utc>>,
    pub receiver_synced_at: Option<DateTime<Utc>>,
    pub replayed_at: Option<DateTime<Utc>>,
    pub acks: Vec<AckRecord>,
}

/// One state change of the event store.
///
/// The in-memory state is a pure function of the op sequence, so replaying
/// the journal on open rebuilds it exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOp {
    Insert {
        frame: Vec<u8>,
        origin: EventOrigin,
        ordinal: u64,
        at: DateTime<Utc>,
    },
    ReceivedByOnlineWeb {
        ids: Vec<EventId>,
        at: DateTime<Utc>,
    },
    AckShipped {
        ids: Vec<EventId>,
        at: DateTime<Utc>,
    },
    ReceiverSynced {
        receiver: FacilityId,
        ids: Vec<EventId>,
        at: DateTime<Utc>,
    },
    Replayed {
        id: EventId,
        at: DateTime<Utc>,
    },
    SyncError(SyncErrorRecord),
    Prune {
        ids: Vec<EventId>,
    },
    Restore(RecordSnapshot),
    GroupHead {
        group: GroupId,
        sequence: u64,
    },
}

/// Durable log of store operations.
pub trait Journal: Send + Sync {
    /// Persist one op. Must be durable (per the journal's sync policy)
    /// before returning.
    fn append(&self, op: &StoreOp) -> StoreResult<()>;

    /// Every op persisted so far, oldest first.
    fn load(&self) -> StoreResult<Vec<StoreOp>>;

    /// Atomically replace the journal contents with `ops`.
    fn rewrite(&self, ops: &[StoreOp]) -> StoreResult<()>;
}

/// Journal that keeps nothing, for purely in-memory stores.
#[derive(Debug, Default)]
pub struct NullJournal;

impl Journal for NullJournal {
    fn append(&self, _op: &StoreOp) -> StoreResult<()> {
        Ok(())
    }

    fn load(&self) -> StoreResult<Vec<StoreOp>> {
        Ok(Vec::new())
    }

    fn rewrite(&self, _ops: &[StoreOp]) -> StoreResult<()> {
        Ok(())
    }
}

/// Flush policy for the file journal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every append.
    EveryWrite,
    /// Flush to the OS page cache only.
    #[default]
    OsDefault,
}

/// Append-only journal file of entry-framed, bincode-encoded ops.
///
/// A torn entry at the tail (crash mid-append) is cut off on open. Any
/// other corruption is an error: skipping a state change would leave
/// delivery flags inconsistent.
///
/// One process at a time: opening takes a [`StoreLock`] held until the
/// journal is dropped.
pub struct FileJournal {
    path: PathBuf,
    sync_mode: SyncMode,
    writer: Mutex<EntryWriter<BufWriter<File>>>,
    lock: StoreLock,
}

impl FileJournal {
    pub fn open(path: &Path, sync_mode: SyncMode) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = StoreLock::acquire(path)?;
        if path.exists() {
            Self::cut_torn_tail(path)?;
        }
        let writer = Self::append_writer(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            sync_mode,
            writer: Mutex::new(writer),
            lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock(&self) -> &StoreLock {
        &self.lock
    }

    fn append_writer(path: &Path) -> StoreResult<EntryWriter<BufWriter<File>>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(EntryWriter::new(BufWriter::new(file)))
    }

    fn cut_torn_tail(path: &Path) -> StoreResult<()> {
        let mut reader = EntryReader::new(BufReader::new(File::open(path)?));
        loop {
            match reader.read() {
                Ok(Some(_)) => continue,
                Ok(None) => return Ok(()),
                Err(PackError::Truncated { offset }) => {
                    warn!(offset, path = %path.display(), "torn journal tail; truncating");
                    let file = OpenOptions::new().write(true).open(path)?;
                    file.set_len(offset)?;
                    file.sync_all()?;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn encode(op: &StoreOp) -> StoreResult<Entry> {
        let bytes = bincode::serialize(op).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Entry::new(bytes)?)
    }
}

impl Journal for FileJournal {
    fn append(&self, op: &StoreOp) -> StoreResult<()> {
        let entry = Self::encode(op)?;
        let mut w = self.writer.lock().expect("journal mutex poisoned");
        w.write(&entry)?;
        w.flush()?;
        if self.sync_mode == SyncMode::EveryWrite {
            w.get_ref().get_ref().sync_data()?;
        }
        Ok(())
    }

    fn load(&self) -> StoreResult<Vec<StoreOp>> {
        let mut reader = EntryReader::new(BufReader::new(File::open(&self.path)?));
        let mut ops = Vec::new();
        loop {
            let offset = reader.offset();
            let Some(entry) = reader.read()? else {
                break;
            };
            let op = bincode::deserialize(entry.data()).map_err(|e| StoreError::CorruptJournal {
                offset,
                reason: e.to_string(),
            })?;
            ops.push(op);
        }
        debug!(ops = ops.len(), path = %self.path.display(), "journal loaded");
        Ok(ops)
    }

    fn rewrite(&self, ops: &[StoreOp]) -> StoreResult<()> {
        let tmp = self.path.with_extension("compact");
        let mut writer = EntryWriter::new(BufWriter::new(File::create(&tmp)?));
        for op in ops {
            writer.write(&Self::encode(op)?)?;
        }
        let file = writer
            .into_inner()
            .into_inner()
            .map_err(|e| e.into_error())?;
        file.sync_all()?;

        let mut w = self.writer.lock().expect("journal mutex poisoned");
        fs::rename(&tmp, &self.path)?;
        *w = Self::append_writer(&self.path)?;
        debug!(ops = ops.len(), path = %self.path.display(), "journal rewritten");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(n: u8) -> StoreOp {
        StoreOp::Prune {
            ids: vec![EventId::from_uuid(uuid::Uuid::from_u128(n as u128))],
        }
    }

    #[test]
    fn appended_ops_load_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::open(&dir.path().join("store.journal"), SyncMode::EveryWrite)
            .unwrap();
        journal.append(&op(1)).unwrap();
        journal.append(&op(2)).unwrap();
        assert_eq!(journal.load().unwrap(), vec![op(1), op(2)]);
    }

    #[test]
    fn reopen_keeps_ops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.journal");
        {
            let journal = FileJournal::open(&path, SyncMode::OsDefault).unwrap();
            journal.append(&op(1)).unwrap();
        }
        let journal = FileJournal::open(&path, SyncMode::OsDefault).unwrap();
        journal.append(&op(2)).unwrap();
        assert_eq!(journal.load().unwrap(), vec![op(1), op(2)]);
    }

    #[test]
    fn torn_tail_is_cut_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.journal");
        {
            let journal = FileJournal::open(&path, SyncMode::OsDefault).unwrap();
            journal.append(&op(1)).unwrap();
            journal.append(&op(2)).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        let journal = FileJournal::open(&path, SyncMode::OsDefault).unwrap();
        assert_eq!(journal.load().unwrap(), vec![op(1)]);
        journal.append(&op(3)).unwrap();
        assert_eq!(journal.load().unwrap(), vec![op(1), op(3)]);
    }

    #[test]
    fn flipped_byte_is_an_error_not_a_skip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.journal");
        {
            let journal = FileJournal::open(&path, SyncMode::OsDefault).unwrap();
            journal.append(&op(1)).unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            FileJournal::open(&path, SyncMode::OsDefault),
            Err(StoreError::Pack(PackError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let journal =
            FileJournal::open(&dir.path().join("store.journal"), SyncMode::OsDefault).unwrap();
        journal.append(&op(1)).unwrap();
        journal.append(&op(2)).unwrap();
        journal.rewrite(&[op(9)]).unwrap();
        journal.append(&op(10)).unwrap();
        assert_eq!(journal.load().unwrap(), vec![op(9), op(10)]);
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.journal");
        let journal = FileJournal::open(&path, SyncMode::OsDefault).unwrap();
        journal.append(&op(1)).unwrap();
        assert!(matches!(
            FileJournal::open(&path, SyncMode::OsDefault),
            Err(StoreError::Locked { .. })
        ));

        // the refused open must not have touched the live journal
        journal.append(&op(2)).unwrap();
        drop(journal);
        let journal = FileJournal::open(&path, SyncMode::OsDefault).unwrap();
        assert_eq!(journal.load().unwrap(), vec![op(1), op(2)]);
        assert_eq!(journal.lock().meta().pid, std::process::id());
    }

    #[test]
    fn null_journal_keeps_nothing() {
        let journal = NullJournal;
        journal.append(&op(1)).unwrap();
        assert!(journal.load().unwrap().is_empty());
    }
}

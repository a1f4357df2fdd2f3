//! Durable event store for lmsync.
//!
//! The store is the single source of truth for what has been delivered to
//! whom. Each stored event carries delivery flags:
//!
//! - **received by online web** (phase 1 of the two-phase ack)
//! - **ack shipped** (phase 2: the sender learned of phase 1)
//! - **receiver synced** (the addressed facility confirmed it)
//! - **replayed** (applied to local domain state)
//!
//! Records are pruned once every party that needs them has confirmed.
//!
//! # Modules
//!
//! - [`traits`]: the [`EventStore`] interface
//! - [`log`]: [`EventLog`], the store over a pluggable [`Journal`]
//! - [`journal`]: append-only op journal, file-backed or null
//! - [`lease`]: named job leases for background scheduling
//! - [`lock`]: cross-process lock file guarding a journal

pub mod error;
pub mod journal;
pub mod lease;
pub mod lock;
pub mod log;
pub mod record;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use journal::{FileJournal, Journal, NullJournal, RecordSnapshot, StoreOp, SyncMode};
pub use lease::{InMemoryLeaseStore, Lease, LeaseStore};
pub use lock::{StoreLock, StoreLockMeta};
pub use log::{EventLog, FileEventStore, InMemoryEventStore};
pub use record::{
    AckDirection, AckRecord, EventOrigin, EventRecord, InsertOutcome, SyncErrorRecord,
};
pub use traits::EventStore;

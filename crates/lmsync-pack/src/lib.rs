//! Binary packing of events for lmsync transport.
//!
//! Events move between nodes either over HTTP or as files carried by hand, so
//! every byte on the wire is framed and checksummed.
//!
//! # Layers
//!
//! - **Entry** ([`EntryWriter`] / [`EntryReader`]): `magic | crc32 | length | data`,
//!   big-endian, corruption-safe framing of opaque bytes
//! - **Event streams** ([`EventWriter`] / [`EventReader`]): events encoded with
//!   the event codec, one per entry, optionally zstd-compressed
//! - **Bounded containers** ([`EventFile`] / [`EventResourcePacker`]): fill up to
//!   a byte budget for fixed-size export bundles
//!
//! A single event is never split across containers: the write that crosses
//! the budget succeeds and reports a non-positive remaining capacity, and the
//! next write fails with [`PackError::OutOfCapacity`] until the container is
//! reset.

pub mod entry;
pub mod error;
pub mod file;
pub mod resource;
pub mod stream;

pub use entry::{Entry, EntryReader, EntryWriter, HEADER_SIZE, MAGIC, MAX_SIZE_BYTES};
pub use error::{PackError, PackResult};
pub use file::{read_event_files, EventFile, EventFileChain};
pub use resource::{read_resource, EventResource, EventResourcePacker};
pub use stream::{Compression, EventReader, EventWriter};

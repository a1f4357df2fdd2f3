use lmsync_event::EventError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("bad entry magic at offset {offset}: expected {expected:#04x}, found {found:#04x}")]
    BadMagic { offset: u64, expected: u8, found: u8 },

    #[error("entry checksum mismatch at offset {offset}: stored {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { offset: u64, expected: u64, actual: u64 },

    #[error("entry at offset {offset} declares {length} bytes (max {max})")]
    EntryTooLarge { offset: u64, length: u64, max: usize },

    #[error("stream ends inside the entry at offset {offset}")]
    Truncated { offset: u64 },

    #[error("container is full: {written} of {capacity} bytes used")]
    OutOfCapacity { capacity: u64, written: u64 },

    #[error("event file is closed")]
    Closed,

    #[error("event codec error: {0}")]
    Event(#[from] EventError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PackError {
    /// Corruption is fatal to the stream; the sender has to retransmit.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::BadMagic { .. }
                | Self::ChecksumMismatch { .. }
                | Self::EntryTooLarge { .. }
                | Self::Truncated { .. }
        )
    }
}

pub type PackResult<T> = Result<T, PackError>;

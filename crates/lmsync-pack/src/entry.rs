use std::io::{self, Read, Write};

use tracing::warn;

use crate::error::{PackError, PackResult};

/// Sentinel byte at the start of every entry.
pub const MAGIC: u8 = 0xE7;

/// Largest payload an entry may carry. A corrupt length field larger than
/// this is rejected before anything is allocated.
pub const MAX_SIZE_BYTES: usize = 4 * 1024 * 1024;

/// `magic (1) | checksum (8) | length (4)`.
pub const HEADER_SIZE: usize = 13;

/// A framed, checksummed byte record.
///
/// On-stream format, big-endian:
/// ```text
/// [1 byte : magic]
/// [8 bytes: CRC32 of data, widened to u64]
/// [4 bytes: data length]
/// [N bytes: data]
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    checksum: u64,
    data: Vec<u8>,
}

impl Entry {
    /// Wrap `data`, computing its checksum.
    pub fn new(data: Vec<u8>) -> PackResult<Self> {
        if data.len() > MAX_SIZE_BYTES {
            return Err(PackError::EntryTooLarge {
                offset: 0,
                length: data.len() as u64,
                max: MAX_SIZE_BYTES,
            });
        }
        Ok(Self {
            checksum: crc32fast::hash(&data) as u64,
            data,
        })
    }

    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Bytes this entry occupies on the stream, header included.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }
}

/// Appends entries to a byte sink.
pub struct EntryWriter<W: Write> {
    inner: W,
    bytes_written: u64,
}

impl<W: Write> EntryWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
        }
    }

    /// Write one entry. Returns the number of bytes written.
    pub fn write(&mut self, entry: &Entry) -> PackResult<usize> {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = MAGIC;
        header[1..9].copy_from_slice(&entry.checksum.to_be_bytes());
        header[9..13].copy_from_slice(&(entry.data.len() as u32).to_be_bytes());
        self.inner.write_all(&header)?;
        self.inner.write_all(&entry.data)?;
        let n = entry.encoded_len();
        self.bytes_written += n as u64;
        Ok(n)
    }

    pub fn flush(&mut self) -> PackResult<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads entries back from a byte source.
///
/// Corruption is fatal: after an error the reader's position is undefined and
/// the stream should be discarded.
pub struct EntryReader<R: Read> {
    inner: R,
    offset: u64,
}

impl<R: Read> EntryReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Next entry, or `None` at a clean end of stream.
    pub fn read(&mut self) -> PackResult<Option<Entry>> {
        let start = self.offset;
        let mut header = [0u8; HEADER_SIZE];

        let n = self.fill(&mut header[..1])?;
        if n == 0 {
            return Ok(None);
        }
        if header[0] != MAGIC {
            warn!(offset = start, found = header[0], "entry magic mismatch");
            return Err(PackError::BadMagic {
                offset: start,
                expected: MAGIC,
                found: header[0],
            });
        }

        if self.fill(&mut header[1..])? < HEADER_SIZE - 1 {
            return Err(PackError::Truncated { offset: start });
        }
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&header[1..9]);
        let expected = u64::from_be_bytes(checksum);
        let mut length = [0u8; 4];
        length.copy_from_slice(&header[9..13]);
        let length = u32::from_be_bytes(length) as usize;

        if length > MAX_SIZE_BYTES {
            return Err(PackError::EntryTooLarge {
                offset: start,
                length: length as u64,
                max: MAX_SIZE_BYTES,
            });
        }

        let mut data = vec![0u8; length];
        if self.fill(&mut data)? < length {
            return Err(PackError::Truncated { offset: start });
        }

        let actual = crc32fast::hash(&data) as u64;
        if actual != expected {
            warn!(offset = start, expected, actual, "entry checksum mismatch");
            return Err(PackError::ChecksumMismatch {
                offset: start,
                expected,
                actual,
            });
        }

        Ok(Some(Entry {
            checksum: expected,
            data,
        }))
    }

    /// Byte offset of the next entry.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read until `buf` is full or the source is exhausted.
    fn fill(&mut self, buf: &mut [u8]) -> PackResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.offset += filled as u64;
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn write_all(entries: &[Entry]) -> Vec<u8> {
        let mut writer = EntryWriter::new(Vec::new());
        for e in entries {
            writer.write(e).unwrap();
        }
        writer.into_inner()
    }

    #[test]
    fn header_layout_is_big_endian() {
        let entry = Entry::new(b"abc".to_vec()).unwrap();
        let bytes = write_all(&[entry.clone()]);
        assert_eq!(bytes.len(), HEADER_SIZE + 3);
        assert_eq!(bytes[0], MAGIC);
        assert_eq!(&bytes[1..9], &entry.checksum().to_be_bytes());
        assert_eq!(&bytes[9..13], &[0, 0, 0, 3]);
        assert_eq!(&bytes[13..], b"abc");
    }

    #[test]
    fn reads_entries_in_order_then_none() {
        let a = Entry::new(b"first".to_vec()).unwrap();
        let b = Entry::new(Vec::new()).unwrap();
        let bytes = write_all(&[a.clone(), b.clone()]);

        let mut reader = EntryReader::new(bytes.as_slice());
        assert_eq!(reader.read().unwrap(), Some(a));
        assert_eq!(reader.read().unwrap(), Some(b));
        assert_eq!(reader.read().unwrap(), None);
        assert_eq!(reader.offset(), bytes.len() as u64);
    }

    #[test]
    fn empty_stream_is_clean_end() {
        let mut reader = EntryReader::new(&[][..]);
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn bad_magic_detected() {
        let mut bytes = write_all(&[Entry::new(b"x".to_vec()).unwrap()]);
        bytes[0] = 0x00;
        let err = EntryReader::new(bytes.as_slice()).read().unwrap_err();
        assert!(matches!(err, PackError::BadMagic { found: 0, offset: 0, .. }));
        assert!(err.is_corruption());
    }

    #[test]
    fn oversized_length_rejected_before_allocation() {
        let mut bytes = write_all(&[Entry::new(b"x".to_vec()).unwrap()]);
        bytes[9..13].copy_from_slice(&u32::MAX.to_be_bytes());
        let err = EntryReader::new(bytes.as_slice()).read().unwrap_err();
        assert!(matches!(err, PackError::EntryTooLarge { length, .. } if length == u32::MAX as u64));
    }

    #[test]
    fn truncated_tail_detected() {
        let bytes = write_all(&[Entry::new(b"hello".to_vec()).unwrap()]);
        let cut = &bytes[..bytes.len() - 2];
        let err = EntryReader::new(cut).read().unwrap_err();
        assert!(matches!(err, PackError::Truncated { offset: 0 }));

        let header_only = &bytes[..5];
        let err = EntryReader::new(header_only).read().unwrap_err();
        assert!(matches!(err, PackError::Truncated { .. }));
    }

    #[test]
    fn entry_larger_than_max_cannot_be_built() {
        let err = Entry::new(vec![0u8; MAX_SIZE_BYTES + 1]).unwrap_err();
        assert!(matches!(err, PackError::EntryTooLarge { .. }));
    }

    proptest! {
        #[test]
        fn written_entries_read_back(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let entry = Entry::new(data).unwrap();
            let bytes = write_all(&[entry.clone()]);
            let read = EntryReader::new(bytes.as_slice()).read().unwrap();
            prop_assert_eq!(read, Some(entry));
        }

        #[test]
        fn any_payload_byte_flip_is_a_checksum_mismatch(
            data in proptest::collection::vec(any::<u8>(), 1..512),
            pos in any::<proptest::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut bytes = write_all(&[Entry::new(data.clone()).unwrap()]);
            let i = HEADER_SIZE + pos.index(data.len());
            bytes[i] ^= flip;
            let err = EntryReader::new(bytes.as_slice()).read().unwrap_err();
            let is_mismatch = matches!(err, PackError::ChecksumMismatch { .. });
            prop_assert!(is_mismatch);
        }
    }
}

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use lmsync_event::{Event, EventCodec};

use crate::error::{PackError, PackResult};
use crate::stream::{Compression, EventReader, EventWriter};

/// A bounded event file on disk.
///
/// Capacity is counted in uncompressed entry bytes. The write that crosses
/// the capacity still lands in this file; the caller sees a non-positive
/// remaining capacity and must roll over to a new file. An empty file always
/// takes one event, whatever its capacity.
pub struct EventFile {
    path: PathBuf,
    capacity: u64,
    codec: EventCodec,
    compression: Compression,
    writer: Option<EventWriter<BufWriter<File>>>,
    written: u64,
    count: usize,
}

impl EventFile {
    /// Create (or truncate) an uncompressed event file.
    pub fn create(path: impl AsRef<Path>, capacity: u64, codec: EventCodec) -> PackResult<Self> {
        Self::create_with(path, capacity, codec, Compression::None)
    }

    pub fn create_with(
        path: impl AsRef<Path>,
        capacity: u64,
        codec: EventCodec,
        compression: Compression,
    ) -> PackResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let writer = Self::open_writer(&path, &codec, compression)?;
        Ok(Self {
            path,
            capacity,
            codec,
            compression,
            writer: Some(writer),
            written: 0,
            count: 0,
        })
    }

    fn open_writer(
        path: &Path,
        codec: &EventCodec,
        compression: Compression,
    ) -> PackResult<EventWriter<BufWriter<File>>> {
        let file = File::create(path)?;
        EventWriter::with_compression(BufWriter::new(file), codec.clone(), compression)
    }

    /// Write an event and return the capacity left afterwards.
    ///
    /// A return value `<= 0` means the file is full. Writing again before
    /// [`reset`](Self::reset) fails with [`PackError::OutOfCapacity`].
    pub fn write_get_remaining_capacity(&mut self, event: &Event) -> PackResult<i64> {
        if self.is_full() {
            return Err(PackError::OutOfCapacity {
                capacity: self.capacity,
                written: self.written,
            });
        }
        let writer = self.writer.as_mut().ok_or(PackError::Closed)?;
        let n = writer.write(event)?;
        self.written += n as u64;
        self.count += 1;
        Ok(self.remaining())
    }

    /// Capacity left; non-positive once full.
    pub fn remaining(&self) -> i64 {
        self.capacity as i64 - self.written as i64
    }

    pub fn is_full(&self) -> bool {
        self.count > 0 && self.remaining() <= 0
    }

    /// Push everything written so far to disk. With compression the current
    /// block is flushed too, so a reader can consume the events before the
    /// file is closed.
    pub fn flush(&mut self) -> PackResult<()> {
        self.writer.as_mut().ok_or(PackError::Closed)?.flush()
    }

    /// Discard everything written and start over at the same path.
    pub fn reset(&mut self) -> PackResult<()> {
        self.writer = None;
        self.writer = Some(Self::open_writer(&self.path, &self.codec, self.compression)?);
        self.written = 0;
        self.count = 0;
        debug!(path = %self.path.display(), "event file reset");
        Ok(())
    }

    /// Finalize the file and make it durable. Closing twice is a no-op.
    pub fn close(&mut self) -> PackResult<()> {
        if let Some(writer) = self.writer.take() {
            let buffered = writer.finish()?;
            let file = buffered.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            debug!(
                path = %self.path.display(),
                events = self.count,
                bytes = self.written,
                "event file closed"
            );
        }
        Ok(())
    }

    /// Atomically move the finalized file, closing it first if needed.
    pub fn rename_to(&mut self, path: impl AsRef<Path>) -> PackResult<()> {
        self.close()?;
        let target = path.as_ref().to_path_buf();
        fs::rename(&self.path, &target)?;
        self.path = target;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Open a reader over an event file written with `compression`.
    pub fn reader(
        path: impl AsRef<Path>,
        codec: EventCodec,
        compression: Compression,
    ) -> PackResult<EventReader<BufReader<File>>> {
        let file = File::open(path)?;
        EventReader::with_compression(BufReader::new(file), codec, compression)
    }
}

impl Drop for EventFile {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            let _ = writer.finish();
        }
    }
}

/// Writes an unbounded event sequence as a chain of bounded files
/// `<prefix>-00000.events`, `<prefix>-00001.events`, …
pub struct EventFileChain {
    dir: PathBuf,
    prefix: String,
    capacity: u64,
    codec: EventCodec,
    compression: Compression,
    current: Option<EventFile>,
    finished: Vec<PathBuf>,
}

impl EventFileChain {
    pub fn new(dir: impl AsRef<Path>, prefix: &str, capacity: u64, codec: EventCodec) -> Self {
        Self::with_compression(dir, prefix, capacity, codec, Compression::None)
    }

    pub fn with_compression(
        dir: impl AsRef<Path>,
        prefix: &str,
        capacity: u64,
        codec: EventCodec,
        compression: Compression,
    ) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.to_string(),
            capacity,
            codec,
            compression,
            current: None,
            finished: Vec::new(),
        }
    }

    /// Append an event, rolling to a new file when the current one fills.
    pub fn write(&mut self, event: &Event) -> PackResult<()> {
        if self.current.is_none() {
            let index = self.finished.len();
            let path = self.dir.join(format!("{}-{index:05}.events", self.prefix));
            self.current = Some(EventFile::create_with(
                path,
                self.capacity,
                self.codec.clone(),
                self.compression,
            )?);
        }
        let Some(file) = self.current.as_mut() else {
            return Err(PackError::Closed);
        };
        if file.write_get_remaining_capacity(event)? <= 0 {
            self.roll()?;
        }
        Ok(())
    }

    fn roll(&mut self) -> PackResult<()> {
        if let Some(mut file) = self.current.take() {
            file.close()?;
            self.finished.push(file.path().to_path_buf());
        }
        Ok(())
    }

    /// Close the last file and return every file path in write order.
    pub fn finish(mut self) -> PackResult<Vec<PathBuf>> {
        self.roll()?;
        info!(files = self.finished.len(), dir = %self.dir.display(), "event file chain written");
        Ok(std::mem::take(&mut self.finished))
    }
}

/// Read a chain of event files back in order.
pub fn read_event_files(
    paths: &[PathBuf],
    codec: &EventCodec,
    compression: Compression,
) -> PackResult<Vec<Event>> {
    let mut events = Vec::new();
    for path in paths {
        let mut reader = EventFile::reader(path, codec.clone(), compression)?;
        events.extend(reader.read_all()?);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmsync_event::{EventDraft, EventPayload, RequisitionApproved};
    use lmsync_types::FacilityId;

    fn event(i: usize) -> Event {
        EventDraft::new(
            FacilityId::random(),
            EventPayload::RequisitionApproved(RequisitionApproved {
                requisition_id: uuid::Uuid::new_v4(),
                approved_by: format!("approver-{i}"),
                approved_items: vec![],
            }),
        )
        .into_event(i as u64 + 1)
    }

    #[test]
    fn remaining_capacity_drops_per_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut file =
            EventFile::create(dir.path().join("a.events"), 10_000, EventCodec::default()).unwrap();
        let r1 = file.write_get_remaining_capacity(&event(0)).unwrap();
        let r2 = file.write_get_remaining_capacity(&event(1)).unwrap();
        assert!(r1 < 10_000);
        assert!(r2 < r1);
        assert_eq!(file.count(), 2);
        assert_eq!(file.remaining(), r2);
    }

    #[test]
    fn overflowing_write_succeeds_then_next_is_out_of_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut file =
            EventFile::create(dir.path().join("b.events"), 50, EventCodec::default()).unwrap();
        let remaining = file.write_get_remaining_capacity(&event(0)).unwrap();
        assert!(remaining <= 0);
        assert!(file.is_full());

        let err = file.write_get_remaining_capacity(&event(1)).unwrap_err();
        assert!(matches!(err, PackError::OutOfCapacity { capacity: 50, .. }));
        assert!(!err.is_corruption());
        assert_eq!(file.count(), 1);
    }

    #[test]
    fn reset_allows_writing_up_to_capacity_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.events");
        let mut file = EventFile::create(&path, 50, EventCodec::default()).unwrap();
        file.write_get_remaining_capacity(&event(0)).unwrap();
        assert!(file.write_get_remaining_capacity(&event(1)).is_err());

        file.reset().unwrap();
        assert_eq!(file.count(), 0);
        let e = event(2);
        assert!(file.write_get_remaining_capacity(&e).unwrap() <= 0);
        file.close().unwrap();

        let read = EventFile::reader(&path, EventCodec::default(), Compression::None)
            .unwrap()
            .read_all()
            .unwrap();
        assert_eq!(read, vec![e]);
    }

    #[test]
    fn write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut file =
            EventFile::create(dir.path().join("d.events"), 10_000, EventCodec::default()).unwrap();
        file.close().unwrap();
        file.close().unwrap();
        assert!(file.is_closed());
        assert!(matches!(
            file.write_get_remaining_capacity(&event(0)),
            Err(PackError::Closed)
        ));
    }

    #[test]
    fn rename_moves_finalized_file() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging.events.tmp");
        let target = dir.path().join("final.events");
        let mut file =
            EventFile::create_with(&staging, 10_000, EventCodec::default(), Compression::Zstd)
                .unwrap();
        let e = event(0);
        file.write_get_remaining_capacity(&e).unwrap();
        file.rename_to(&target).unwrap();

        assert!(!staging.exists());
        assert_eq!(file.path(), target.as_path());
        let read = read_event_files(&[target], &EventCodec::default(), Compression::Zstd).unwrap();
        assert_eq!(read, vec![e]);
    }

    fn read_prefix_while_open(compression: Compression) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("open.events");
        let input: Vec<Event> = (0..4).map(event).collect();
        let mut file =
            EventFile::create_with(&path, 1 << 20, EventCodec::default(), compression).unwrap();
        for e in &input[..3] {
            file.write_get_remaining_capacity(e).unwrap();
        }
        file.flush().unwrap();

        let mut reader = EventFile::reader(&path, EventCodec::default(), compression).unwrap();
        for e in &input[..3] {
            assert_eq!(reader.read().unwrap().as_ref(), Some(e));
        }
        if compression == Compression::None {
            assert!(reader.read().unwrap().is_none());
        }

        file.write_get_remaining_capacity(&input[3]).unwrap();
        file.close().unwrap();
        let read = read_event_files(&[path], &EventCodec::default(), compression).unwrap();
        assert_eq!(read, input);
    }

    #[test]
    fn flushed_plain_file_is_readable_before_close() {
        read_prefix_while_open(Compression::None);
    }

    #[test]
    fn flushed_zstd_file_is_readable_before_close() {
        read_prefix_while_open(Compression::Zstd);
    }

    #[test]
    fn flush_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut file =
            EventFile::create(dir.path().join("e.events"), 100, EventCodec::default()).unwrap();
        file.close().unwrap();
        assert!(matches!(file.flush(), Err(PackError::Closed)));
    }

    #[test]
    fn zero_capacity_holds_one_event_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file =
            EventFile::create(dir.path().join("z.events"), 0, EventCodec::default()).unwrap();
        assert!(!file.is_full());
        assert!(file.write_get_remaining_capacity(&event(0)).unwrap() < 0);
        assert!(file.is_full());
        assert!(file.write_get_remaining_capacity(&event(1)).is_err());

        let input: Vec<Event> = (0..3).map(event).collect();
        let mut chain = EventFileChain::new(dir.path(), "zero", 0, EventCodec::default());
        for e in &input {
            chain.write(e).unwrap();
        }
        let paths = chain.finish().unwrap();
        assert_eq!(paths.len(), 3);
        let read = read_event_files(&paths, &EventCodec::default(), Compression::None).unwrap();
        assert_eq!(read, input);
    }

    #[test]
    fn chain_rolls_over_and_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let input: Vec<Event> = (0..10).map(event).collect();
        let mut chain = EventFileChain::new(dir.path(), "export", 300, EventCodec::default());
        for e in &input {
            chain.write(e).unwrap();
        }
        let paths = chain.finish().unwrap();
        assert!(paths.len() > 1);
        assert!(paths[0].ends_with("export-00000.events"));

        let read = read_event_files(&paths, &EventCodec::default(), Compression::None).unwrap();
        assert_eq!(read, input);
    }
}

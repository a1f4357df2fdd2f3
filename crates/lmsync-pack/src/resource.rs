use serde::{Deserialize, Serialize};
use tracing::debug;

use lmsync_event::{Event, EventCodec};

use crate::entry::{Entry, EntryWriter};
use crate::error::{PackError, PackResult};
use crate::stream::{Compression, EventReader, ZSTD_LEVEL};

/// A finalized in-memory bundle of events, ready for HTTP transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventResource {
    pub compression: Compression,
    pub count: usize,
    pub bytes: Vec<u8>,
}

impl EventResource {
    /// Decode every event in the resource, in write order.
    pub fn read_events(&self, codec: &EventCodec) -> PackResult<Vec<Event>> {
        read_resource(&self.bytes, codec, self.compression)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Decode raw resource bytes.
pub fn read_resource(
    bytes: &[u8],
    codec: &EventCodec,
    compression: Compression,
) -> PackResult<Vec<Event>> {
    EventReader::with_compression(bytes, codec.clone(), compression)?.read_all()
}

/// Accumulates events in memory up to a byte budget.
///
/// Same capacity rules as [`crate::EventFile`]: the crossing write succeeds,
/// the following one fails with [`PackError::OutOfCapacity`] until reset,
/// and an empty packer always takes one event.
pub struct EventResourcePacker {
    capacity: u64,
    codec: EventCodec,
    compression: Compression,
    buffer: Vec<u8>,
    count: usize,
}

impl EventResourcePacker {
    pub fn new(capacity: u64, codec: EventCodec) -> Self {
        Self::with_compression(capacity, codec, Compression::None)
    }

    pub fn with_compression(capacity: u64, codec: EventCodec, compression: Compression) -> Self {
        Self {
            capacity,
            codec,
            compression,
            buffer: Vec::new(),
            count: 0,
        }
    }

    pub fn write_get_remaining_capacity(&mut self, event: &Event) -> PackResult<i64> {
        if self.is_full() {
            return Err(PackError::OutOfCapacity {
                capacity: self.capacity,
                written: self.buffer.len() as u64,
            });
        }
        let entry = Entry::new(self.codec.encode(event)?)?;
        EntryWriter::new(&mut self.buffer).write(&entry)?;
        self.count += 1;
        Ok(self.remaining())
    }

    pub fn remaining(&self) -> i64 {
        self.capacity as i64 - self.buffer.len() as i64
    }

    pub fn is_full(&self) -> bool {
        self.count > 0 && self.remaining() <= 0
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Clear for reuse. The buffer keeps its allocation.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.count = 0;
    }

    /// Finalize what has been packed so far into a transportable resource.
    pub fn to_resource(&self) -> PackResult<EventResource> {
        let bytes = match self.compression {
            Compression::None => self.buffer.clone(),
            // entries are already framed; only the compression layer is added
            Compression::Zstd => zstd::encode_all(self.buffer.as_slice(), ZSTD_LEVEL)?,
        };
        debug!(events = self.count, bytes = bytes.len(), "event resource packed");
        Ok(EventResource {
            compression: self.compression,
            count: self.count,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmsync_event::{EventDraft, EventPayload, RequisitionRejected};
    use lmsync_types::FacilityId;

    fn event(i: usize) -> Event {
        EventDraft::new(
            FacilityId::random(),
            EventPayload::RequisitionRejected(RequisitionRejected {
                requisition_id: uuid::Uuid::new_v4(),
                rejected_by: format!("r{i}"),
                reason: "expired".into(),
            }),
        )
        .into_event(1)
    }

    #[test]
    fn packs_until_full_then_refuses() {
        let mut packer = EventResourcePacker::new(600, EventCodec::default());
        let mut written = Vec::new();
        loop {
            let e = event(written.len());
            let remaining = packer.write_get_remaining_capacity(&e).unwrap();
            written.push(e);
            if remaining <= 0 {
                break;
            }
        }
        assert!(written.len() >= 2);
        assert!(matches!(
            packer.write_get_remaining_capacity(&event(99)),
            Err(PackError::OutOfCapacity { capacity: 600, .. })
        ));

        let resource = packer.to_resource().unwrap();
        assert_eq!(resource.count, written.len());
        assert_eq!(resource.read_events(&EventCodec::default()).unwrap(), written);
    }

    #[test]
    fn reset_keeps_allocation_and_accepts_writes() {
        let mut packer = EventResourcePacker::new(100, EventCodec::default());
        packer.write_get_remaining_capacity(&event(0)).unwrap();
        let cap_before = packer.buffer.capacity();
        packer.reset();
        assert!(packer.is_empty());
        assert_eq!(packer.buffer.capacity(), cap_before);
        assert!(packer.write_get_remaining_capacity(&event(1)).is_ok());
    }

    #[test]
    fn compressed_resource_reads_back() {
        let mut packer =
            EventResourcePacker::with_compression(100_000, EventCodec::default(), Compression::Zstd);
        let input: Vec<Event> = (0..8).map(event).collect();
        for e in &input {
            packer.write_get_remaining_capacity(e).unwrap();
        }
        let resource = packer.to_resource().unwrap();
        assert_eq!(resource.compression, Compression::Zstd);
        assert_eq!(resource.read_events(&EventCodec::default()).unwrap(), input);
    }

    #[test]
    fn zero_capacity_still_packs_one_event() {
        let mut packer = EventResourcePacker::new(0, EventCodec::default());
        assert!(packer.write_get_remaining_capacity(&event(0)).unwrap() < 0);
        assert!(packer.write_get_remaining_capacity(&event(1)).is_err());
        assert_eq!(packer.to_resource().unwrap().count, 1);
    }

    #[test]
    fn empty_resource() {
        let packer = EventResourcePacker::new(100, EventCodec::default());
        let resource = packer.to_resource().unwrap();
        assert!(resource.is_empty());
        assert!(resource.read_events(&EventCodec::default()).unwrap().is_empty());
    }
}

use std::io::{self, BufReader, Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use lmsync_event::{Event, EventCodec};

use crate::entry::{Entry, EntryReader, EntryWriter};
use crate::error::PackResult;

/// zstd level used for compressed streams.
pub(crate) const ZSTD_LEVEL: i32 = 3;

/// Optional compression layer under the entry framing.
///
/// Compressed and plain streams carry the same entries once decompressed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    None,
    Zstd,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "zstd" => Ok(Self::Zstd),
            other => Err(format!("unknown compression: {other}")),
        }
    }
}

enum Sink<W: Write> {
    Plain(W),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Write for Sink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Zstd(w) => w.flush(),
        }
    }
}

impl<W: Write> Sink<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            Self::Zstd(encoder) => {
                let mut w = encoder.finish()?;
                w.flush()?;
                Ok(w)
            }
        }
    }
}

/// Writes events, one entry each, to a byte sink.
pub struct EventWriter<W: Write> {
    entries: EntryWriter<Sink<W>>,
    codec: EventCodec,
    count: usize,
}

impl<W: Write> EventWriter<W> {
    /// Uncompressed writer.
    pub fn new(inner: W, codec: EventCodec) -> Self {
        Self {
            entries: EntryWriter::new(Sink::Plain(inner)),
            codec,
            count: 0,
        }
    }

    pub fn with_compression(
        inner: W,
        codec: EventCodec,
        compression: Compression,
    ) -> PackResult<Self> {
        let sink = match compression {
            Compression::None => Sink::Plain(inner),
            Compression::Zstd => Sink::Zstd(zstd::stream::write::Encoder::new(inner, ZSTD_LEVEL)?),
        };
        Ok(Self {
            entries: EntryWriter::new(sink),
            codec,
            count: 0,
        })
    }

    /// Encode and append one event. Returns the uncompressed entry size.
    pub fn write(&mut self, event: &Event) -> PackResult<usize> {
        let entry = Entry::new(self.codec.encode(event)?)?;
        let n = self.entries.write(&entry)?;
        self.count += 1;
        debug!(event_id = %event.id, bytes = n, "event written");
        Ok(n)
    }

    /// Push buffered bytes (and the current compressed block) to the sink.
    pub fn flush(&mut self) -> PackResult<()> {
        self.entries.flush()
    }

    /// Finalize the stream and hand back the sink.
    pub fn finish(self) -> PackResult<W> {
        Ok(self.entries.into_inner().finish()?)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Uncompressed bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.entries.bytes_written()
    }
}

enum Source<R: Read> {
    Plain(R),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<R>>),
}

impl<R: Read> Read for Source<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(r) => r.read(buf),
            Self::Zstd(r) => r.read(buf),
        }
    }
}

/// Reads events back in the order they were written.
pub struct EventReader<R: Read> {
    entries: EntryReader<Source<R>>,
    codec: EventCodec,
    count: usize,
}

impl<R: Read> EventReader<R> {
    pub fn new(inner: R, codec: EventCodec) -> Self {
        Self {
            entries: EntryReader::new(Source::Plain(inner)),
            codec,
            count: 0,
        }
    }

    pub fn with_compression(
        inner: R,
        codec: EventCodec,
        compression: Compression,
    ) -> PackResult<Self> {
        let source = match compression {
            Compression::None => Source::Plain(inner),
            Compression::Zstd => Source::Zstd(zstd::stream::read::Decoder::new(inner)?),
        };
        Ok(Self {
            entries: EntryReader::new(source),
            codec,
            count: 0,
        })
    }

    /// Next event, or `None` at the end of the stream.
    pub fn read(&mut self) -> PackResult<Option<Event>> {
        match self.entries.read()? {
            Some(entry) => {
                let event = self.codec.decode(entry.data())?;
                self.count += 1;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    /// Events read so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Drain the stream.
    pub fn read_all(&mut self) -> PackResult<Vec<Event>> {
        let mut events = Vec::new();
        while let Some(event) = self.read()? {
            events.push(event);
        }
        Ok(events)
    }
}

impl<R: Read> Iterator for EventReader<R> {
    type Item = PackResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

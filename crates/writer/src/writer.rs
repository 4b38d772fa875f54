/// Record framing on top of a [`FileSink`].
///
/// One call to [`CrawlWriter::write`] produces exactly one key/value entry in
/// the current file: key = URI, value = length prefix + payload. The payload
/// is assembled in a [`RecordBuffer`] first, so a record whose streams turn
/// out short is dropped whole instead of landing half-written.
use std::io::{Cursor, Read};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use config::WriterSettings;
use seqfile::StorageBackend;

use crate::buffer::RecordBuffer;
use crate::record::{is_http, CrawlRecord, CRLF, WRITER_ID};
use crate::sink::{FileSink, FinalizedFile};
use crate::WriteError;

/// Fixed headroom reserved on top of the field block and captured streams.
const RECORD_OVERHEAD: u64 = 256;

/// A captured stream: how many bytes it claims to hold, and a reader over
/// them.
#[derive(Debug)]
pub struct Capture<R> {
    pub len: u64,
    pub reader: R,
}

impl<R: Read> Capture<R> {
    pub fn new(len: u64, reader: R) -> Self {
        Self { len, reader }
    }
}

impl<'a> Capture<Cursor<&'a [u8]>> {
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self {
            len: bytes.len() as u64,
            reader: Cursor::new(bytes),
        }
    }

    pub fn empty() -> Self {
        Self::from_bytes(&[])
    }
}

#[derive(Debug)]
pub struct CrawlWriter {
    id: usize,
    settings: Arc<WriterSettings>,
    sink: FileSink,
    buf: RecordBuffer,
    records_written: u64,
}

impl CrawlWriter {
    pub fn new(
        id: usize,
        backend: Arc<dyn StorageBackend>,
        settings: Arc<WriterSettings>,
        serials: Arc<AtomicU64>,
    ) -> Result<Self, WriteError> {
        let sink = FileSink::new(id, backend, Arc::clone(&settings), serials)?;
        Ok(Self {
            id,
            settings,
            sink,
            buf: RecordBuffer::new(),
            records_written: 0,
        })
    }

    /// Frames and appends one record.
    ///
    /// The request is stored only for `http`/`https` URIs and must deliver
    /// its full declared length ([`WriteError::ShortRead`] otherwise). The
    /// response is copied up to its declared length; if it delivers fewer
    /// bytes the write fails with [`WriteError::RecordLengthMismatch`] and
    /// nothing is appended.
    pub fn write<Q: Read, S: Read>(
        &mut self,
        uri: &str,
        fields: &[u8],
        request: Capture<Q>,
        response: Capture<S>,
    ) -> Result<(), WriteError> {
        self.sink.ensure_capacity()?;

        let result = match self.frame(uri, fields, request, response) {
            Ok(()) => match self.buf.finish() {
                Ok(payload) => self.sink.append(uri.as_bytes(), payload),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.buf.recycle();

        if result.is_ok() {
            self.records_written += 1;
        }
        result
    }

    /// Builds the field block for `record` and writes it.
    pub fn write_record(&mut self, record: &CrawlRecord<'_>) -> Result<(), WriteError> {
        let fields = record.field_block(&self.settings.field_names).into_bytes();
        self.write(
            record.uri,
            &fields,
            Capture::from_bytes(record.request),
            Capture::from_bytes(record.response),
        )
    }

    fn frame<Q: Read, S: Read>(
        &mut self,
        uri: &str,
        fields: &[u8],
        mut request: Capture<Q>,
        mut response: Capture<S>,
    ) -> Result<(), WriteError> {
        let wanted = RECORD_OVERHEAD
            .saturating_add(fields.len() as u64)
            .saturating_add(request.len)
            .saturating_add(response.len);
        if wanted > u64::from(u32::MAX) {
            return Err(WriteError::RecordTooLarge(wanted));
        }

        self.buf.reset();
        self.buf.ensure_capacity(wanted as usize);

        self.buf.write(WRITER_ID.as_bytes());
        self.buf.write(CRLF);
        self.buf.write(fields);

        if is_http(uri) {
            self.buf.read_fully_from(&mut request.reader, request.len)?;
        }

        let copied = self.buf.copy_from(&mut response.reader, response.len)?;
        let remaining = response.len - copied;
        if remaining != 0 {
            tracing::warn!(writer = self.id, uri, remaining, "response shorter than declared");
            return Err(WriteError::RecordLengthMismatch {
                uri: uri.to_string(),
                declared: response.len,
                remaining,
            });
        }
        Ok(())
    }

    /// Closes the current file and opens a new one.
    pub fn rotate(&mut self) -> Result<Option<FinalizedFile>, WriteError> {
        self.sink.rotate()
    }

    /// Closes and finalizes the current file. The writer stays usable; the
    /// next write opens a new file.
    pub fn close(&mut self) -> Result<Option<FinalizedFile>, WriteError> {
        self.sink.close()
    }

    /// Bytes written to the current file so far.
    pub fn position(&self) -> u64 {
        self.sink.position()
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn current_path(&self) -> Option<&str> {
        self.sink.current_path()
    }

    pub fn files_opened(&self) -> u64 {
        self.sink.files_opened()
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Capacity of the record buffer, prefix included.
    pub fn buffer_capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn settings(&self) -> &WriterSettings {
        &self.settings
    }
}

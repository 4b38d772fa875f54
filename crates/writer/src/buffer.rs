use byteorder::{BigEndian, ByteOrder};
use std::io::{self, Read, Write};

use crate::WriteError;

/// Bytes reserved at the front of every record for the length prefix.
pub const PREFIX_LEN: usize = 4;
/// Capacity a fresh (or shrunk) buffer starts with: 256 KiB.
pub const DEFAULT_CAPACITY: usize = 256 * 1024;
/// Extra room added on every growth so small overruns don't reallocate twice.
pub const GROWTH_SLACK: usize = 8 * 1024;
/// Buffers grown beyond this (1 MiB) are shrunk once their record is flushed.
pub const HIGH_WATER_MARK: usize = 1024 * 1024;

/// Growable accumulator for one framed record.
///
/// The first [`PREFIX_LEN`] bytes are reserved for the big-endian payload
/// length, which [`finish`](RecordBuffer::finish) patches in just before the
/// record is handed to the sink. Everything after the prefix is the payload.
///
/// Growth allocates `capacity + shortfall + GROWTH_SLACK` and copies the old
/// bytes over; [`recycle`](RecordBuffer::recycle) gives memory back after an
/// oversized record so one huge page does not pin megabytes per writer.
#[derive(Debug)]
pub struct RecordBuffer {
    buf: Vec<u8>,
}

impl Default for RecordBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity.max(PREFIX_LEN));
        buf.extend_from_slice(&[0u8; PREFIX_LEN]);
        Self { buf }
    }

    /// Accumulated bytes, prefix included.
    #[must_use]
    pub fn current_length(&self) -> usize {
        self.buf.len()
    }

    /// Accumulated payload bytes (everything after the prefix).
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.buf.len() - PREFIX_LEN
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Appends `bytes` to the payload.
    pub fn write(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    /// Appends `len` bytes of `bytes` starting at `offset`.
    pub fn write_range(&mut self, bytes: &[u8], offset: usize, len: usize) -> Result<(), WriteError> {
        let end = offset.checked_add(len).filter(|&end| end <= bytes.len()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("range {}+{} outside a {} byte slice", offset, len, bytes.len()),
            )
        })?;
        self.write(&bytes[offset..end]);
        Ok(())
    }

    pub fn write_byte(&mut self, b: u8) {
        self.reserve(1);
        self.buf.push(b);
    }

    /// Reads exactly `len` bytes from `source` into the payload.
    ///
    /// Returns [`WriteError::ShortRead`] if the source hits EOF first; the
    /// bytes that did arrive stay in the buffer until the next reset.
    pub fn read_fully_from<R: Read + ?Sized>(&mut self, source: &mut R, len: u64) -> Result<(), WriteError> {
        let want = usize::try_from(len).map_err(|_| WriteError::RecordTooLarge(len))?;
        self.reserve(want);

        let start = self.buf.len();
        self.buf.resize(start + want, 0);

        let mut total = 0usize;
        while total < want {
            match source.read(&mut self.buf[start + total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(start + total);
                    return Err(e.into());
                }
            }
        }

        if total != want {
            self.buf.truncate(start + total);
            return Err(WriteError::ShortRead {
                expected: len,
                actual: total as u64,
            });
        }
        Ok(())
    }

    /// Copies at most `limit` bytes from `source`, stopping early at EOF.
    /// Returns how many bytes were copied.
    pub fn copy_from<R: Read + ?Sized>(&mut self, source: &mut R, limit: u64) -> io::Result<u64> {
        io::copy(&mut source.take(limit), self)
    }

    /// Drops the payload, keeping the allocation.
    pub fn reset(&mut self) {
        self.buf.truncate(PREFIX_LEN);
    }

    /// Makes sure at least `total` bytes (prefix included) fit without
    /// another reallocation.
    pub fn ensure_capacity(&mut self, total: usize) {
        if self.buf.capacity() < total {
            self.reallocate(total + GROWTH_SLACK);
        }
    }

    /// Patches the length prefix and returns the framed record.
    pub fn finish(&mut self) -> Result<&[u8], WriteError> {
        let payload = self.payload_len() as u64;
        if payload > u64::from(u32::MAX) {
            return Err(WriteError::RecordTooLarge(payload));
        }
        BigEndian::write_u32(&mut self.buf[..PREFIX_LEN], payload as u32);
        Ok(&self.buf)
    }

    /// Resets after a record was flushed, shrinking back to the default
    /// capacity if an oversized record pushed it past the high-water mark.
    pub fn recycle(&mut self) {
        if self.buf.capacity() > HIGH_WATER_MARK {
            *self = Self::with_capacity(DEFAULT_CAPACITY);
        } else {
            self.reset();
        }
    }

    /// Grows so that `needed` more bytes fit. New capacity is the old one
    /// plus the shortfall plus [`GROWTH_SLACK`].
    fn reserve(&mut self, needed: usize) {
        let spare = self.buf.capacity() - self.buf.len();
        if spare < needed {
            let shortfall = needed - spare;
            self.reallocate(self.buf.capacity() + shortfall + GROWTH_SLACK);
        }
    }

    fn reallocate(&mut self, capacity: usize) {
        let mut grown = Vec::with_capacity(capacity);
        grown.extend_from_slice(&self.buf);
        self.buf = grown;
    }
}

impl Write for RecordBuffer {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        RecordBuffer::write(self, bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

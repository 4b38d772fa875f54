use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use flate2::read::DeflateDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::format::{take_entry, FileHeader, KIND_BLOCK, KIND_PLAIN, KIND_RECORD, MAX_FRAME_SIZE};
use crate::SeqFileError;

/// Sequential container reader.
///
/// Generic over any `Read` implementor so tests can feed in-memory buffers.
/// Each frame's CRC32 is verified. A truncated tail frame (writer crashed
/// mid-append, or the file is still open) is treated as a clean EOF.
pub struct SeqFileReader<R: Read> {
    rdr: BufReader<R>,
    header: FileHeader,
    frames: u64,
}

impl SeqFileReader<File> {
    /// Opens a container file and reads its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SeqFileReader<File>, SeqFileError> {
        let f = File::open(path)?;
        Self::from_reader(f)
    }
}

impl<R: Read> SeqFileReader<R> {
    /// Constructs a reader from any `Read` implementor, consuming the header.
    pub fn from_reader(reader: R) -> Result<Self, SeqFileError> {
        let mut rdr = BufReader::new(reader);
        let header = FileHeader::read_from(&mut rdr)?;
        Ok(Self {
            rdr,
            header,
            frames: 0,
        })
    }

    /// Returns the container header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Frames verified so far. A block frame counts once however many
    /// entries it holds.
    pub fn frames_read(&self) -> u64 {
        self.frames
    }

    /// Calls `apply(key, value)` for every entry, in file order.
    ///
    /// - **Clean EOF** or **truncated tail** -> `Ok(())`.
    /// - **CRC mismatch**, unknown kind or bad inflate -> `Err(Corrupt)`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<(), SeqFileError>
    where
        F: FnMut(Vec<u8>, Vec<u8>),
    {
        let mut body = Vec::with_capacity(256);

        loop {
            let frame_len = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(SeqFileError::Io(e)),
            };
            if frame_len <= 5 || frame_len > MAX_FRAME_SIZE {
                return Err(SeqFileError::Corrupt);
            }

            let crc = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(SeqFileError::Io(e)),
            };

            let body_len = (frame_len - 4) as usize;
            body.clear();
            body.resize(body_len, 0);
            match self.rdr.read_exact(&mut body) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(SeqFileError::Io(e)),
            }

            let mut hasher = Crc32::new();
            hasher.update(&body);
            if hasher.finalize() != crc {
                return Err(SeqFileError::Corrupt);
            }
            self.frames += 1;

            let kind = body[0];
            let mut br = &body[1..];
            match kind {
                KIND_PLAIN => {
                    let (key, value) = take_entry(&mut br, body_len)?;
                    apply(key, value);
                }
                KIND_RECORD => {
                    let key_len = br.read_u32::<LittleEndian>()? as usize;
                    if key_len > body_len {
                        return Err(SeqFileError::Corrupt);
                    }
                    let mut key = vec![0u8; key_len];
                    br.read_exact(&mut key)?;
                    let raw_len = br.read_u32::<LittleEndian>()? as usize;
                    let value = inflate(br, raw_len)?;
                    apply(key, value);
                }
                KIND_BLOCK => {
                    let count = br.read_u32::<LittleEndian>()?;
                    let raw_len = br.read_u32::<LittleEndian>()? as usize;
                    let raw = inflate(br, raw_len)?;
                    let mut entries = &raw[..];
                    for _ in 0..count {
                        let (key, value) = take_entry(&mut entries, raw_len)?;
                        apply(key, value);
                    }
                }
                _ => return Err(SeqFileError::Corrupt),
            }
        }
    }

    /// Collects every entry into memory.
    pub fn read_all(&mut self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SeqFileError> {
        let mut out = Vec::new();
        self.replay(|k, v| out.push((k, v)))?;
        Ok(out)
    }
}

/// Inflates `packed`, requiring exactly `raw_len` bytes of output.
fn inflate(packed: &[u8], raw_len: usize) -> Result<Vec<u8>, SeqFileError> {
    if raw_len > MAX_FRAME_SIZE as usize {
        return Err(SeqFileError::Corrupt);
    }
    let mut out = Vec::with_capacity(raw_len);
    DeflateDecoder::new(packed)
        .take(raw_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|_| SeqFileError::Corrupt)?;
    if out.len() != raw_len {
        return Err(SeqFileError::Corrupt);
    }
    Ok(out)
}

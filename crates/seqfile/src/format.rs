//! Container binary format constants and header read/write helpers.
//!
//! ## Header
//!
//! ```text
//! [magic: u32 LE "CSEQ"][version: u8][compression: u8][replication: u16 LE]
//! [metadata_count: u32 LE] repeated: [len: u32 LE][utf8 bytes]
//! ```
//!
//! ## Frames
//!
//! ```text
//! [frame_len: u32 LE][crc32: u32 LE][kind: u8][body ...]
//! ```
//!
//! `frame_len` covers the CRC, the kind byte and the body but **not** itself.
//! The CRC covers the kind byte and the body.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::{Compression, SeqFileError};

/// Magic number identifying a container file (ASCII "CSEQ").
pub const SEQFILE_MAGIC: u32 = 0x4353_4551;

/// Current container version.
pub const SEQFILE_VERSION: u8 = 1;

/// Bytes of frame overhead in front of the body: `frame_len` + `crc32` + `kind`.
pub const FRAME_OVERHEAD: usize = 4 + 4 + 1;

/// Upper bound on a single frame; anything larger is treated as corruption.
pub const MAX_FRAME_SIZE: u32 = 512 * 1024 * 1024;

/// Upper bound on a single metadata entry.
const MAX_METADATA_BYTES: usize = 64 * 1024;

/// Frame kind tags.
pub const KIND_PLAIN: u8 = 0;
pub const KIND_RECORD: u8 = 1;
pub const KIND_BLOCK: u8 = 2;

/// Parsed container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub compression: Compression,
    pub replication: u16,
    pub metadata: Vec<String>,
}

impl FileHeader {
    /// Serializes the header to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(SEQFILE_MAGIC)?;
        w.write_u8(SEQFILE_VERSION)?;
        w.write_u8(self.compression.tag())?;
        w.write_u16::<LittleEndian>(self.replication)?;
        w.write_u32::<LittleEndian>(self.metadata.len() as u32)?;
        for entry in &self.metadata {
            w.write_u32::<LittleEndian>(entry.len() as u32)?;
            w.write_all(entry.as_bytes())?;
        }
        Ok(())
    }

    /// Number of bytes [`write_to`](FileHeader::write_to) produces.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        let entries: usize = self.metadata.iter().map(|m| 4 + m.len()).sum();
        (4 + 1 + 1 + 2 + 4 + entries) as u64
    }

    /// Reads and validates a header from `r`.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, SeqFileError> {
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != SEQFILE_MAGIC {
            return Err(SeqFileError::BadMagic(magic));
        }
        let version = r.read_u8()?;
        if version != SEQFILE_VERSION {
            return Err(SeqFileError::UnsupportedVersion(version));
        }
        let compression = Compression::from_tag(r.read_u8()?).ok_or(SeqFileError::Corrupt)?;
        let replication = r.read_u16::<LittleEndian>()?;
        let count = r.read_u32::<LittleEndian>()?;

        let mut metadata = Vec::new();
        for _ in 0..count {
            let len = r.read_u32::<LittleEndian>()? as usize;
            if len > MAX_METADATA_BYTES {
                return Err(SeqFileError::Corrupt);
            }
            let mut raw = vec![0u8; len];
            r.read_exact(&mut raw)?;
            metadata.push(String::from_utf8(raw).map_err(|_| SeqFileError::Corrupt)?);
        }

        Ok(Self {
            compression,
            replication,
            metadata,
        })
    }
}

/// Appends `key_len | key | val_len | val` to `buf`.
pub fn put_entry(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) -> io::Result<()> {
    buf.write_u32::<LittleEndian>(key.len() as u32)?;
    buf.extend_from_slice(key);
    buf.write_u32::<LittleEndian>(value.len() as u32)?;
    buf.extend_from_slice(value);
    Ok(())
}

/// Reads one `key_len | key | val_len | val` entry from `body`, bounded by
/// `limit` so a corrupt length cannot trigger a huge allocation.
pub fn take_entry(body: &mut &[u8], limit: usize) -> Result<(Vec<u8>, Vec<u8>), SeqFileError> {
    let key_len = body.read_u32::<LittleEndian>()? as usize;
    if key_len > limit {
        return Err(SeqFileError::Corrupt);
    }
    let mut key = vec![0u8; key_len];
    body.read_exact(&mut key)?;

    let val_len = body.read_u32::<LittleEndian>()? as usize;
    if val_len > limit {
        return Err(SeqFileError::Corrupt);
    }
    let mut value = vec![0u8; val_len];
    body.read_exact(&mut value)?;
    Ok((key, value))
}

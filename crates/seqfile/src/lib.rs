//! # SeqFile - sequential key/value containers
//!
//! Storage abstraction for the crawl log writer. The writer core only needs
//! four things from a storage system: create a file for sequential appends,
//! append a key/value pair, report how many bytes have reached the file, and
//! rename a closed file. Those are captured by the [`StorageBackend`] and
//! [`SequentialWriter`] traits so that any filesystem with append and rename
//! semantics can sit underneath.
//!
//! [`LocalBackend`] is the bundled implementation. It maps a hierarchical
//! path namespace (`/crawl/part-00001.seq`) onto a local root directory and
//! writes the container format described in [`format`].
//!
//! ## Compression
//!
//! | Mode     | Frame kind | Behaviour                                      |
//! |----------|------------|------------------------------------------------|
//! | `NONE`   | plain      | key and value stored as-is                     |
//! | `RECORD` | record     | each value deflated on its own                 |
//! | `BLOCK`  | block      | entries batched up to `buffer_size`, deflated |
//!
//! ## Example
//!
//! ```rust,no_run
//! use seqfile::{Compression, CreateOptions, LocalBackend, SeqFileReader, StorageBackend};
//!
//! let backend = LocalBackend::new("data");
//! let opts = CreateOptions::new(Compression::Record);
//! let mut w = backend.create("/crawl/demo.seq", &opts).unwrap();
//! w.append(b"http://example.com/", b"payload").unwrap();
//! w.close().unwrap();
//!
//! let mut r = SeqFileReader::open("data/crawl/demo.seq").unwrap();
//! r.replay(|k, v| println!("{} => {} bytes", String::from_utf8_lossy(&k), v.len())).unwrap();
//! ```

pub mod format;
mod local;
mod reader;

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

pub use local::{LocalBackend, LocalSeqWriter};
pub use reader::SeqFileReader;

/// How values are compressed inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// No compression.
    None,
    /// Every value is deflated individually.
    Record,
    /// Runs of entries are deflated together.
    Block,
}

impl Compression {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Record => 1,
            Compression::Block => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Compression::None),
            1 => Some(Compression::Record),
            2 => Some(Compression::Block),
            _ => None,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::None => "NONE",
            Compression::Record => "RECORD",
            Compression::Block => "BLOCK",
        };
        f.write_str(name)
    }
}

impl FromStr for Compression {
    type Err = SeqFileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(Compression::None),
            "RECORD" => Ok(Compression::Record),
            "BLOCK" => Ok(Compression::Block),
            _ => Err(SeqFileError::UnknownCompression(s.to_string())),
        }
    }
}

/// Errors produced by container readers and backend construction.
#[derive(Debug, Error)]
pub enum SeqFileError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file does not start with the container magic.
    #[error("bad magic: {0:#x}")]
    BadMagic(u32),

    /// The container was written by an unknown format version.
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u8),

    /// A frame failed CRC validation or carried an unknown kind.
    #[error("corrupt frame")]
    Corrupt,

    /// A compression mode name that is not `NONE`, `RECORD` or `BLOCK`.
    #[error("unknown compression type '{0}'")]
    UnknownCompression(String),

    /// No backend is available for the configured endpoint.
    #[error("unsupported storage endpoint '{0}'")]
    UnsupportedEndpoint(String),
}

/// Parameters passed to [`StorageBackend::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    pub compression: Compression,
    /// Requested replication factor. Backends without replication record it
    /// for reference only.
    pub replication: u16,
    /// Size of the in-process write buffer; also the batch size for
    /// [`Compression::Block`].
    pub buffer_size: usize,
    /// Free-form metadata stored in the container header.
    pub metadata: Vec<String>,
}

impl CreateOptions {
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            replication: 1,
            buffer_size: 16 * 1024,
            metadata: Vec::new(),
        }
    }
}

/// An open, append-only key/value container.
///
/// Implementations are owned by exactly one writer at a time and must be
/// `Send` so that pooled writers can move between threads.
pub trait SequentialWriter: Send {
    /// Appends one key/value pair.
    fn append(&mut self, key: &[u8], value: &[u8]) -> io::Result<()>;

    /// Pushes buffered and batched data down to the file. A pending block is
    /// cut and framed.
    fn sync(&mut self) -> io::Result<()>;

    /// Pushes complete frames down to the file. A pending block stays open.
    fn flush(&mut self) -> io::Result<()>;

    /// Bytes handed to the file so far, plus the raw size of a pending block.
    /// Framed bytes are only on disk after [`flush`](Self::flush).
    fn size(&self) -> u64;

    /// Flushes and closes the container.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// A hierarchical, rename-capable storage namespace.
pub trait StorageBackend: Send + Sync {
    /// Creates `path` and any missing parents.
    fn create_dir_all(&self, path: &str) -> io::Result<()>;

    /// Creates a new container at `path` for sequential appends.
    fn create(&self, path: &str, opts: &CreateOptions) -> io::Result<Box<dyn SequentialWriter>>;

    /// Renames `from` to `to`. Returns `Ok(false)` when the backend refuses
    /// the rename without an I/O error (for example because `to` exists).
    fn rename(&self, from: &str, to: &str) -> io::Result<bool>;

    /// Reports whether `path` exists.
    fn exists(&self, path: &str) -> io::Result<bool>;

    /// Compression used when the configuration asks for the backend default.
    fn default_compression(&self) -> Compression;

    /// Human readable location, for logs.
    fn endpoint(&self) -> String;
}

/// Resolves a configured endpoint to a backend.
///
/// * `local` - the current directory.
/// * `file:///some/dir` or `file://relative/dir` - a local root directory.
///
/// Any other scheme (including `hdfs://`) has no bundled client and yields
/// [`SeqFileError::UnsupportedEndpoint`].
pub fn open_backend(endpoint: &str) -> Result<Arc<dyn StorageBackend>, SeqFileError> {
    Ok(Arc::new(LocalBackend::from_endpoint(endpoint)?))
}

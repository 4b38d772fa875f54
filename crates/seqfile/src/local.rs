use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression as Level;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::format::{
    put_entry, FileHeader, KIND_BLOCK, KIND_PLAIN, KIND_RECORD, MAX_FRAME_SIZE,
};
use crate::{Compression, CreateOptions, SeqFileError, SequentialWriter, StorageBackend};

/// Storage backend over a local directory tree.
///
/// Backend paths are rooted at `root`: `/crawl/a.seq` resolves to
/// `root/crawl/a.seq`. Replication is recorded in each container header but
/// otherwise ignored.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    default_compression: Compression,
}

impl LocalBackend {
    /// Creates a backend rooted at `root`. The default compression is
    /// [`Compression::Record`].
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            default_compression: Compression::Record,
        }
    }

    /// Builds a backend from a `local` or `file://dir` endpoint. See
    /// [`open_backend`](crate::open_backend).
    pub fn from_endpoint(endpoint: &str) -> Result<Self, SeqFileError> {
        if endpoint == "local" {
            return Ok(Self::new("."));
        }
        match endpoint.strip_prefix("file://") {
            Some(root) if !root.is_empty() => Ok(Self::new(root)),
            _ => Err(SeqFileError::UnsupportedEndpoint(endpoint.to_string())),
        }
    }

    /// Overrides the compression used for `DEFAULT` requests.
    #[must_use]
    pub fn with_default_compression(mut self, compression: Compression) -> Self {
        self.default_compression = compression;
        self
    }

    /// Returns the local root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a backend path onto the local filesystem.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl StorageBackend for LocalBackend {
    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path))
    }

    fn create(&self, path: &str, opts: &CreateOptions) -> io::Result<Box<dyn SequentialWriter>> {
        let local = self.resolve(path);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        let writer = LocalSeqWriter::create(&local, opts)?;
        tracing::debug!(path = %local.display(), compression = %opts.compression, "created container");
        Ok(Box::new(writer))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<bool> {
        let src = self.resolve(from);
        let dst = self.resolve(to);
        if dst.exists() || !src.exists() {
            return Ok(false);
        }
        fs::rename(&src, &dst)?;

        // Make the rename durable; a crash before the directory entry is
        // synced can lose it on ext4/XFS.
        if let Some(parent) = dst.parent() {
            if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
                tracing::warn!(dir = %parent.display(), error = %e, "directory sync after rename failed");
            }
        }
        Ok(true)
    }

    fn exists(&self, path: &str) -> io::Result<bool> {
        Ok(self.resolve(path).exists())
    }

    fn default_compression(&self) -> Compression {
        self.default_compression
    }

    fn endpoint(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

/// Append-only container writer for [`LocalBackend`].
///
/// Every frame is assembled in a reusable scratch buffer, CRC-checksummed and
/// written with a single `write_all`, like a WAL append. In
/// [`Compression::Block`] mode entries are collected until `buffer_size`
/// bytes are pending, [`sync`](SequentialWriter::sync) is called or the file
/// is closed.
pub struct LocalSeqWriter {
    out: BufWriter<File>,
    compression: Compression,
    /// Bytes handed to `out` so far, header included.
    written: u64,
    /// Reusable scratch buffer for frame assembly.
    frame: Vec<u8>,
    /// Pending uncompressed block entries.
    block: Vec<u8>,
    block_count: u32,
    block_limit: usize,
}

impl LocalSeqWriter {
    /// Creates (truncating) a container at `path` and writes its header.
    pub fn create<P: AsRef<Path>>(path: P, opts: &CreateOptions) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut out = BufWriter::with_capacity(opts.buffer_size.max(512), file);

        let header = FileHeader {
            compression: opts.compression,
            replication: opts.replication,
            metadata: opts.metadata.clone(),
        };
        header.write_to(&mut out)?;

        Ok(Self {
            out,
            compression: opts.compression,
            written: header.encoded_len(),
            frame: Vec::with_capacity(256),
            block: Vec::new(),
            block_count: 0,
            block_limit: opts.buffer_size.max(1),
        })
    }

    /// Starts a frame of the given kind in the scratch buffer.
    fn begin_frame(&mut self, kind: u8) {
        self.frame.clear();
        // frame_len + crc, patched in `finish_frame`
        self.frame.extend_from_slice(&[0u8; 8]);
        self.frame.push(kind);
    }

    /// Patches length and CRC into the scratch frame and writes it out.
    fn finish_frame(&mut self) -> io::Result<()> {
        let body = &self.frame[8..];

        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        let frame_len = (body.len() as u64) + 4;
        if frame_len > u64::from(MAX_FRAME_SIZE) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "container frame too large",
            ));
        }

        self.frame[0..4].copy_from_slice(&(frame_len as u32).to_le_bytes());
        self.frame[4..8].copy_from_slice(&crc.to_le_bytes());

        self.out.write_all(&self.frame)?;
        self.written += self.frame.len() as u64;
        Ok(())
    }

    fn flush_block(&mut self) -> io::Result<()> {
        if self.block_count == 0 {
            return Ok(());
        }
        let mut enc = DeflateEncoder::new(Vec::with_capacity(self.block.len() / 2), Level::default());
        enc.write_all(&self.block)?;
        let packed = enc.finish()?;

        self.begin_frame(KIND_BLOCK);
        self.frame.write_u32::<LittleEndian>(self.block_count)?;
        self.frame.write_u32::<LittleEndian>(self.block.len() as u32)?;
        self.frame.extend_from_slice(&packed);
        self.finish_frame()?;

        self.block.clear();
        self.block_count = 0;
        Ok(())
    }
}

impl SequentialWriter for LocalSeqWriter {
    fn append(&mut self, key: &[u8], value: &[u8]) -> io::Result<()> {
        match self.compression {
            Compression::None => {
                self.begin_frame(KIND_PLAIN);
                put_entry(&mut self.frame, key, value)?;
                self.finish_frame()
            }
            Compression::Record => {
                let mut enc = DeflateEncoder::new(Vec::with_capacity(value.len() / 2), Level::default());
                enc.write_all(value)?;
                let packed = enc.finish()?;

                self.begin_frame(KIND_RECORD);
                self.frame.write_u32::<LittleEndian>(key.len() as u32)?;
                self.frame.extend_from_slice(key);
                self.frame.write_u32::<LittleEndian>(value.len() as u32)?;
                self.frame.extend_from_slice(&packed);
                self.finish_frame()
            }
            Compression::Block => {
                put_entry(&mut self.block, key, value)?;
                self.block_count += 1;
                if self.block.len() >= self.block_limit {
                    self.flush_block()?;
                }
                Ok(())
            }
        }
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush_block()?;
        self.out.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    fn size(&self) -> u64 {
        self.written + self.block.len() as u64
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        self.sync()?;
        let this = *self;
        let file = this.out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}

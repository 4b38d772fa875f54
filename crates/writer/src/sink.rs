/// File sink: owns at most one open container and rotates it by size.
///
/// ```text
/// NoFile ──ensure_capacity──▶ Open ──size > max──▶ close + rename ──▶ Open ...
///                              │
///                              └──close()──▶ NoFile (file finalized)
/// ```
///
/// A file is created as `{name}.open` and renamed to `{name}` once its
/// append handle has been closed. A failed rename is logged and the file
/// keeps its marker so that consumers skip it.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use config::WriterSettings;
use seqfile::{Compression, CreateOptions, SequentialWriter, StorageBackend};

use crate::naming::{self, OCCUPIED_SUFFIX};
use crate::{SinkFault, WriteError};

/// Where a closed file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedFile {
    /// Backend path of the file after close.
    pub path: String,
    /// `false` if the occupied marker could not be removed.
    pub finalized: bool,
}

struct OpenFile {
    out: Box<dyn SequentialWriter>,
    path: String,
}

pub struct FileSink {
    writer_id: usize,
    backend: Arc<dyn StorageBackend>,
    settings: Arc<WriterSettings>,
    serials: Arc<AtomicU64>,
    compression: Compression,
    open: Option<OpenFile>,
    files_opened: u64,
}

impl FileSink {
    /// Creates a sink with no open file. The output directory is created
    /// here so that a bad path fails at construction, not on first write.
    pub fn new(
        writer_id: usize,
        backend: Arc<dyn StorageBackend>,
        settings: Arc<WriterSettings>,
        serials: Arc<AtomicU64>,
    ) -> Result<Self, WriteError> {
        backend.create_dir_all(&settings.output_path)?;
        let compression = settings.container_compression(backend.default_compression());
        Ok(Self {
            writer_id,
            backend,
            settings,
            serials,
            compression,
            open: None,
            files_opened: 0,
        })
    }

    /// Rotates if no file is open or the open file already exceeds the
    /// configured maximum. Called before every record.
    pub fn ensure_capacity(&mut self) -> Result<(), WriteError> {
        if self.open.is_none() {
            self.open_next()?;
            return Ok(());
        }

        let full = match self.current_size() {
            Ok(size) => size > self.settings.max_file_size,
            Err(fault) => {
                tracing::warn!(writer = self.writer_id, error = %fault, "size probe failed, rotating");
                true
            }
        };
        if full {
            self.rotate()?;
        }
        Ok(())
    }

    /// Flushes the open file and returns its length. `Ok(0)` with no open
    /// file. A pending compression block is counted but not cut.
    pub fn current_size(&mut self) -> Result<u64, SinkFault> {
        let Some(open) = self.open.as_mut() else {
            return Ok(0);
        };
        open.out.flush().map_err(|source| SinkFault::RotationProbe {
            path: open.path.clone(),
            source,
        })?;
        Ok(open.out.size())
    }

    /// Bytes handed to the open file so far, without syncing.
    pub fn position(&self) -> u64 {
        self.open.as_ref().map_or(0, |o| o.out.size())
    }

    /// Closes the current file (if any) and opens the next one.
    pub fn rotate(&mut self) -> Result<Option<FinalizedFile>, WriteError> {
        let closed = self.close()?;
        self.open_next()?;
        Ok(closed)
    }

    /// Appends one record, opening a file first if none is open.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<(), WriteError> {
        let frequent_flushes = self.settings.frequent_flushes;
        let open = match self.open {
            Some(ref mut open) => open,
            None => self.open_next()?,
        };
        open.out.append(key, value)?;
        if frequent_flushes {
            open.out.sync()?;
        }
        Ok(())
    }

    /// Closes and finalizes the open file.
    ///
    /// The sink is back in the no-file state afterwards even when closing the
    /// append handle fails; the next append opens a fresh file.
    pub fn close(&mut self) -> Result<Option<FinalizedFile>, WriteError> {
        let Some(OpenFile { out, path }) = self.open.take() else {
            return Ok(None);
        };
        out.close()?;

        let Some(target) = naming::strip_occupied(&path) else {
            return Ok(Some(FinalizedFile {
                path,
                finalized: true,
            }));
        };

        let fault = match self.backend.rename(&path, target) {
            Ok(true) => {
                tracing::info!(writer = self.writer_id, path = %target, "closed");
                return Ok(Some(FinalizedFile {
                    path: target.to_string(),
                    finalized: true,
                }));
            }
            Ok(false) => SinkFault::RenameFailure {
                from: path.clone(),
                to: target.to_string(),
                reason: "target exists or source vanished".to_string(),
            },
            Err(e) => SinkFault::RenameFailure {
                from: path.clone(),
                to: target.to_string(),
                reason: e.to_string(),
            },
        };
        tracing::warn!(writer = self.writer_id, error = %fault, "file keeps its occupied marker");
        Ok(Some(FinalizedFile {
            path,
            finalized: false,
        }))
    }

    /// Backend path of the open file, marker included.
    pub fn current_path(&self) -> Option<&str> {
        self.open.as_ref().map(|o| o.path.as_str())
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Number of files this sink has opened over its lifetime.
    pub fn files_opened(&self) -> u64 {
        self.files_opened
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    fn open_next(&mut self) -> Result<&mut OpenFile, WriteError> {
        let serial = self.serials.fetch_add(1, Ordering::Relaxed);
        let name = naming::basename(
            &self.settings.prefix,
            Utc::now(),
            serial,
            &self.settings.suffix,
        );
        let path = format!(
            "{}{}",
            naming::join(&self.settings.output_path, &name),
            OCCUPIED_SUFFIX
        );

        let opts = CreateOptions {
            compression: self.compression,
            replication: self.settings.replication,
            buffer_size: self.settings.write_buffer_size,
            metadata: self.settings.metadata.clone(),
        };
        let out = self.backend.create(&path, &opts)?;
        tracing::info!(
            writer = self.writer_id,
            path = %path,
            compression = %self.compression,
            "opened"
        );

        self.files_opened += 1;
        Ok(self.open.insert(OpenFile { out, path }))
    }
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink")
            .field("writer_id", &self.writer_id)
            .field("current_path", &self.current_path())
            .field("files_opened", &self.files_opened)
            .finish()
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if self.open.is_some() {
            if let Err(e) = self.close() {
                tracing::warn!(writer = self.writer_id, error = %e, "close on drop failed");
            }
        }
    }
}

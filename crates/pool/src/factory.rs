use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use config::{Config, WriterSettings};
use seqfile::StorageBackend;
use writer::{CrawlWriter, WriteError};

use crate::{PoolError, WriterFactory};

/// Builds [`CrawlWriter`]s that share one backend, one set of settings and
/// one filename serial counter.
pub struct CrawlWriterFactory {
    backend: Arc<dyn StorageBackend>,
    settings: Arc<WriterSettings>,
    serials: Arc<AtomicU64>,
    next_id: AtomicUsize,
}

impl CrawlWriterFactory {
    pub fn new(backend: Arc<dyn StorageBackend>, settings: WriterSettings) -> Self {
        Self {
            backend,
            settings: Arc::new(settings),
            serials: Arc::new(AtomicU64::new(0)),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Resolves the configured endpoint and validates the writer settings.
    pub fn from_config(config: &Config) -> Result<Self, PoolError> {
        let backend = seqfile::open_backend(&config.writer.endpoint)?;
        let settings = config.writer.settings()?;
        tracing::info!(
            endpoint = %backend.endpoint(),
            output = %settings.output_path,
            prefix = %settings.prefix,
            max_size = settings.max_file_size,
            "writer factory ready"
        );
        Ok(Self::new(backend, settings))
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn settings(&self) -> &WriterSettings {
        &self.settings
    }

    /// Files opened by all writers of this factory so far.
    pub fn files_started(&self) -> u64 {
        self.serials.load(Ordering::Relaxed)
    }
}

impl WriterFactory for CrawlWriterFactory {
    type Writer = CrawlWriter;
    type Error = WriteError;

    fn create(&self) -> Result<CrawlWriter, WriteError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        CrawlWriter::new(
            id,
            Arc::clone(&self.backend),
            Arc::clone(&self.settings),
            Arc::clone(&self.serials),
        )
    }

    fn destroy(&self, mut writer: CrawlWriter) -> Result<(), WriteError> {
        let closed = writer.close()?;
        tracing::debug!(
            writer = writer.id(),
            records = writer.records_written(),
            file = ?closed.map(|f| f.path),
            "destroyed writer"
        );
        Ok(())
    }
}

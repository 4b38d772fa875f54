use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use config::{WriterParameters, WriterSettings};
use seqfile::{CreateOptions, LocalBackend, SeqFileReader, SequentialWriter, StorageBackend};

use crate::CrawlWriter;

pub fn settings(prefix: &str, max_size: u64) -> WriterSettings {
    WriterParameters {
        prefix: Some(prefix.to_string()),
        max_size: Some(max_size),
        ..WriterParameters::default()
    }
    .settings()
    .unwrap()
}

pub fn writer_with(backend: Arc<dyn StorageBackend>, settings: WriterSettings) -> CrawlWriter {
    CrawlWriter::new(0, backend, Arc::new(settings), Arc::new(AtomicU64::new(0))).unwrap()
}

pub fn local_writer(root: &Path, max_size: u64) -> CrawlWriter {
    writer_with(Arc::new(LocalBackend::new(root)), settings("TEST", max_size))
}

/// Sorted file names in `root/crawl`.
pub fn list_output(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root.join("crawl"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Every entry of the container at backend path `path` under `root`.
pub fn read_entries(root: &Path, path: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
    SeqFileReader::open(root.join(path.trim_start_matches('/')))
        .unwrap()
        .read_all()
        .unwrap()
}

// -------------------- Fault injection --------------------

#[derive(Debug, Default)]
pub struct Faults {
    pub fail_sync: AtomicBool,
    pub refuse_rename: AtomicBool,
    pub fail_create: AtomicBool,
}

fn injected() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "injected fault")
}

/// Local backend whose operations can be made to fail on demand.
pub struct FaultyBackend {
    inner: LocalBackend,
    pub faults: Arc<Faults>,
}

impl FaultyBackend {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: LocalBackend::new(root),
            faults: Arc::new(Faults::default()),
        }
    }
}

impl StorageBackend for FaultyBackend {
    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn create(&self, path: &str, opts: &CreateOptions) -> io::Result<Box<dyn SequentialWriter>> {
        if self.faults.fail_create.load(Ordering::SeqCst) {
            return Err(injected());
        }
        Ok(Box::new(FaultyWriter {
            inner: self.inner.create(path, opts)?,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<bool> {
        if self.faults.refuse_rename.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.rename(from, to)
    }

    fn exists(&self, path: &str) -> io::Result<bool> {
        self.inner.exists(path)
    }

    fn default_compression(&self) -> seqfile::Compression {
        self.inner.default_compression()
    }

    fn endpoint(&self) -> String {
        self.inner.endpoint()
    }
}

struct FaultyWriter {
    inner: Box<dyn SequentialWriter>,
    faults: Arc<Faults>,
}

impl SequentialWriter for FaultyWriter {
    fn append(&mut self, key: &[u8], value: &[u8]) -> io::Result<()> {
        self.inner.append(key, value)
    }

    fn sync(&mut self) -> io::Result<()> {
        if self.faults.fail_sync.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.sync()
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.faults.fail_sync.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.flush()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        self.inner.close()
    }
}

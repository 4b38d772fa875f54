use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use config::{Config, WriterSettings, DEFAULT_MAX_SIZE};
use pool::{CrawlWriterFactory, WriterPool};
use seqfile::{LocalBackend, SeqFileReader};
use writer::naming::OCCUPIED_SUFFIX;
use writer::{CrawlDocument, CrawlRecord};

/// Prefix used when `CRAWLLOG_PREFIX` is not set.
pub const FALLBACK_PREFIX: &str = "CRAWL";
/// Endpoint used when `CRAWLLOG_ENDPOINT` is not set.
pub const FALLBACK_ENDPOINT: &str = "file://data";

/// Size of the synthetic response body written by `LOAD`.
const LOAD_BODY_SIZE: usize = 512;

pub enum Outcome {
    Print(String),
    Exit(String),
}

/// Interactive front end over a writer pool on a local backend.
pub struct Shell {
    pool: WriterPool<CrawlWriterFactory>,
    root: PathBuf,
}

impl Shell {
    /// Builds a shell from `CRAWLLOG_*` settings, filling in a prefix, a
    /// maximum size and a local endpoint when they were left unset.
    pub fn from_config(mut config: Config, endpoint_set: bool) -> Result<Self> {
        if config.writer.prefix.as_deref().map_or(true, str::is_empty) {
            config.writer.prefix = Some(FALLBACK_PREFIX.to_string());
        }
        if config.writer.max_size.map_or(true, |m| m == 0) {
            config.writer.max_size = Some(DEFAULT_MAX_SIZE);
        }
        if !endpoint_set {
            config.writer.endpoint = FALLBACK_ENDPOINT.to_string();
        }

        let backend = LocalBackend::from_endpoint(&config.writer.endpoint)
            .context("the shell only writes to local endpoints")?;
        let root = backend.root().to_path_buf();
        let settings = config.writer.settings()?;
        let factory = CrawlWriterFactory::new(Arc::new(backend), settings);
        Ok(Self {
            pool: WriterPool::new(factory, config.pool),
            root,
        })
    }

    pub fn settings(&self) -> &WriterSettings {
        self.pool.factory().settings()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root
            .join(self.settings().output_path.trim_start_matches('/'))
    }

    pub fn banner(&self) -> String {
        let s = self.settings();
        format!(
            "crawl log shell started (root={}, output={}, prefix={}, max_size={}, compression={}, pool={})",
            self.root.display(),
            s.output_path,
            s.prefix,
            s.max_file_size,
            if s.compress {
                s.compression_type.to_string()
            } else {
                "NONE".to_string()
            },
            self.pool.params().max_active
        )
    }

    /// Runs one command line.
    pub fn execute(&self, line: &str) -> Outcome {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            return Outcome::Print(String::new());
        };
        let args: Vec<&str> = parts.collect();

        let result = match cmd.to_uppercase().as_str() {
            "WRITE" => self.write(&args),
            "LOAD" => self.load(&args),
            "ROTATE" => self.rotate(),
            "LS" => self.ls(),
            "DUMP" => self.dump(&args),
            "STATS" => Ok(self.stats()),
            "EXIT" | "QUIT" => {
                self.pool.shutdown();
                return Outcome::Exit("bye".to_string());
            }
            other => Ok(format!("unknown command: {}", other)),
        };
        Outcome::Print(result.unwrap_or_else(|e| format!("ERR {:#}", e)))
    }

    fn write(&self, args: &[&str]) -> Result<String> {
        let (uri, body) = match args {
            [uri, rest @ ..] if !rest.is_empty() => (*uri, rest.join(" ")),
            _ => bail!("usage: WRITE uri body..."),
        };

        let mut w = self.pool.checkout()?;
        w.write_record(&CrawlRecord::new(uri, body.as_bytes()))?;
        Ok(format!(
            "OK (writer={}, file={}, pos={})",
            w.id(),
            w.current_path().unwrap_or("-"),
            w.position()
        ))
    }

    fn load(&self, args: &[&str]) -> Result<String> {
        let (threads, records) = match args {
            [t, r] => (
                t.parse::<usize>().context("threads must be a number")?,
                r.parse::<usize>().context("records must be a number")?,
            ),
            _ => bail!("usage: LOAD threads records"),
        };
        if threads == 0 {
            bail!("threads must be at least 1");
        }

        let body = vec![b'x'; LOAD_BODY_SIZE];
        let start = Instant::now();
        let written: Result<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let body = &body;
                    s.spawn(move || -> Result<usize> {
                        for i in 0..records {
                            let uri = format!("http://load.example/{}/{}", t, i);
                            let mut w = self.pool.checkout()?;
                            w.write_record(&CrawlRecord::new(&uri, body))?;
                        }
                        Ok(records)
                    })
                })
                .collect();

            let mut total = 0;
            for h in handles {
                match h.join() {
                    Ok(n) => total += n?,
                    Err(_) => bail!("load thread panicked"),
                }
            }
            Ok(total)
        });
        let written = written?;

        let elapsed = start.elapsed();
        tracing::info!(threads, records = written, ?elapsed, "load finished");
        Ok(format!(
            "OK {} records from {} threads in {}ms",
            written,
            threads,
            elapsed.as_millis()
        ))
    }

    fn rotate(&self) -> Result<String> {
        let mut w = self.pool.checkout()?;
        match w.rotate()? {
            Some(closed) if closed.finalized => Ok(format!("OK closed {}", closed.path)),
            Some(closed) => Ok(format!("OK closed {} (rename failed)", closed.path)),
            None => Ok("OK opened first file".to_string()),
        }
    }

    fn ls(&self) -> Result<String> {
        let files = list_files(&self.output_dir())?;
        if files.is_empty() {
            return Ok("(empty)".to_string());
        }
        let mut out = String::new();
        for (name, size) in &files {
            let state = if name.ends_with(OCCUPIED_SUFFIX) { "open" } else { "final" };
            out.push_str(&format!("{}  {} bytes  [{}]\n", name, size, state));
        }
        out.push_str(&format!("({} files)", files.len()));
        Ok(out)
    }

    fn dump(&self, args: &[&str]) -> Result<String> {
        let [name] = args else {
            bail!("usage: DUMP file");
        };
        let path = self.output_dir().join(name);
        let mut reader = SeqFileReader::open(&path)
            .with_context(|| format!("cannot open {}", path.display()))?;

        let mut out = String::new();
        let mut count = 0usize;
        reader.replay(|key, value| {
            count += 1;
            let key = String::from_utf8_lossy(&key);
            match CrawlDocument::parse(&value) {
                Ok(doc) => out.push_str(&format!(
                    "{}  fields={} response={} bytes charset={}\n",
                    key,
                    doc.fields().len(),
                    doc.response().len(),
                    doc.charset().as_deref().unwrap_or("-")
                )),
                Err(e) => out.push_str(&format!("{}  unreadable: {}\n", key, e)),
            }
        })?;
        out.push_str(&format!("({} records)", count));
        Ok(out)
    }

    fn stats(&self) -> String {
        let s = self.pool.stats();
        format!(
            "live={} idle={} checked_out={} max_active={} created={} destroyed={} timeouts={} files_started={}",
            s.live,
            s.idle,
            s.checked_out,
            s.max_active,
            s.created,
            s.destroyed,
            s.timeouts,
            self.pool.factory().files_started()
        )
    }
}

/// `(name, size)` of every file in `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<(String, u64)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() {
            files.push((entry.file_name().to_string_lossy().into_owned(), meta.len()));
        }
    }
    files.sort();
    Ok(files)
}

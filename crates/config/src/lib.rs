//! # Config - writer and pool parameters
//!
//! [`WriterParameters`] is the mutable, user-facing configuration surface.
//! Once validated it is frozen into an immutable [`WriterSettings`] that every
//! pooled writer shares. [`PoolParameters`] bounds the writer pool.
//!
//! ## Environment
//!
//! [`Config::from_env`] reads the following variables; unset variables keep
//! their defaults.
//!
//! ```text
//! CRAWLLOG_PREFIX            filename prefix          (required, no default)
//! CRAWLLOG_MAX_SIZE          rotation size in bytes   (required, no default)
//! CRAWLLOG_SUFFIX            filename suffix          (default: ".seq")
//! CRAWLLOG_COMPRESS          compress values          (default: false)
//! CRAWLLOG_COMPRESSION_TYPE  DEFAULT|NONE|RECORD|BLOCK (default: DEFAULT)
//! CRAWLLOG_REPLICATION       replication factor      (default: 3)
//! CRAWLLOG_OUTPUT_PATH       output directory         (default: "/crawl")
//! CRAWLLOG_ENDPOINT          storage endpoint         (default: "hdfs://localhost:9000")
//! CRAWLLOG_FREQUENT_FLUSHES  sync after every record  (default: false)
//! CRAWLLOG_BUFFER_SIZE       write buffer bytes       (default: 16384)
//! CRAWLLOG_METADATA          comma separated list     (default: empty)
//! CRAWLLOG_POOL_MAX_ACTIVE   max live writers         (default: 5)
//! CRAWLLOG_POOL_MAX_WAIT_MS  checkout wait in ms      (default: 300000)
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use seqfile::Compression;
use thiserror::Error;

pub const NAMED_FIELD_CRAWL_TIME: &str = "Crawl-Time";
pub const NAMED_FIELD_IP: &str = "Ip-Address";
pub const NAMED_FIELD_PATH_FROM_SEED: &str = "Path-From-Seed";
pub const NAMED_FIELD_IS_SEED: &str = "Is-Seed";
pub const NAMED_FIELD_URL: &str = "URL";
pub const NAMED_FIELD_VIA: &str = "Via";
pub const NAMED_FIELD_SEED_URL: &str = "Seed-Url";
pub const NAMED_FIELD_REQUEST: &str = "Request";
pub const NAMED_FIELD_RESPONSE: &str = "Response";

/// Default filename suffix.
pub const DEFAULT_SUFFIX: &str = ".seq";
/// Suggested rotation size (63 MiB), a little under a 64 MiB storage block.
pub const DEFAULT_MAX_SIZE: u64 = 63 * 1024 * 1024;
pub const DEFAULT_REPLICATION: u16 = 3;
pub const DEFAULT_OUTPUT_PATH: &str = "/crawl";
pub const DEFAULT_ENDPOINT: &str = "hdfs://localhost:9000";
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 16 * 1024;
pub const DEFAULT_POOL_MAX_ACTIVE: usize = 5;
/// Five minutes.
pub const DEFAULT_POOL_MAX_WAIT: Duration = Duration::from_millis(5 * 60 * 1000);

/// Errors raised while reading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was read before it was set.
    #[error("{0} was never set; define one before trying to access it")]
    NotConfigured(&'static str),

    /// A value could not be parsed.
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },

    #[error(transparent)]
    Compression(#[from] seqfile::SeqFileError),
}

/// Compression mode as configured: either an explicit container mode or a
/// request to use whatever the storage backend defaults to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionSetting {
    #[default]
    Default,
    Explicit(Compression),
}

impl CompressionSetting {
    /// Resolves against the backend's default mode.
    #[must_use]
    pub fn resolve(self, backend_default: Compression) -> Compression {
        match self {
            CompressionSetting::Default => backend_default,
            CompressionSetting::Explicit(c) => c,
        }
    }
}

impl FromStr for CompressionSetting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("default") {
            return Ok(CompressionSetting::Default);
        }
        Ok(CompressionSetting::Explicit(s.parse()?))
    }
}

impl fmt::Display for CompressionSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionSetting::Default => f.write_str("DEFAULT"),
            CompressionSetting::Explicit(c) => write!(f, "{}", c),
        }
    }
}

/// Names used for the fields of a crawl record's field block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNames {
    pub url: String,
    pub crawl_time: String,
    pub ip: String,
    pub path_from_seed: String,
    pub is_seed: String,
    pub via: String,
    pub seed_url: String,
    pub request: String,
    pub response: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            url: NAMED_FIELD_URL.to_string(),
            crawl_time: NAMED_FIELD_CRAWL_TIME.to_string(),
            ip: NAMED_FIELD_IP.to_string(),
            path_from_seed: NAMED_FIELD_PATH_FROM_SEED.to_string(),
            is_seed: NAMED_FIELD_IS_SEED.to_string(),
            via: NAMED_FIELD_VIA.to_string(),
            seed_url: NAMED_FIELD_SEED_URL.to_string(),
            request: NAMED_FIELD_REQUEST.to_string(),
            response: NAMED_FIELD_RESPONSE.to_string(),
        }
    }
}

/// Mutable writer configuration.
///
/// `prefix` and `max_size` have no usable default: reading them through
/// [`prefix`](Self::prefix) / [`max_size`](Self::max_size) before they are set
/// yields [`ConfigError::NotConfigured`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterParameters {
    pub prefix: Option<String>,
    pub suffix: String,
    pub compression: bool,
    pub max_size: Option<u64>,
    pub replication: u16,
    pub compression_type: CompressionSetting,
    pub output_path: String,
    pub endpoint: String,
    pub field_names: FieldNames,
    pub frequent_flushes: bool,
    pub write_buffer_size: usize,
    pub metadata: Vec<String>,
}

impl Default for WriterParameters {
    fn default() -> Self {
        Self {
            prefix: None,
            suffix: DEFAULT_SUFFIX.to_string(),
            compression: false,
            max_size: None,
            replication: DEFAULT_REPLICATION,
            compression_type: CompressionSetting::Default,
            output_path: DEFAULT_OUTPUT_PATH.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            field_names: FieldNames::default(),
            frequent_flushes: false,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            metadata: Vec::new(),
        }
    }
}

impl WriterParameters {
    /// Returns the filename prefix, or `NotConfigured` if it was never set.
    pub fn prefix(&self) -> Result<&str, ConfigError> {
        match self.prefix.as_deref() {
            Some(p) if !p.is_empty() => Ok(p),
            _ => Err(ConfigError::NotConfigured("filename prefix")),
        }
    }

    /// Returns the rotation size, or `NotConfigured` if it was never set.
    pub fn max_size(&self) -> Result<u64, ConfigError> {
        match self.max_size {
            Some(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::NotConfigured("max size")),
        }
    }

    /// Validates the parameters and freezes them into [`WriterSettings`].
    pub fn settings(&self) -> Result<WriterSettings, ConfigError> {
        let output_path = match self.output_path.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        if self.write_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                key: "write_buffer_size".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(WriterSettings {
            max_file_size: self.max_size()?,
            prefix: self.prefix()?.to_string(),
            suffix: self.suffix.clone(),
            compress: self.compression,
            compression_type: self.compression_type,
            replication: self.replication,
            output_path,
            frequent_flushes: self.frequent_flushes,
            write_buffer_size: self.write_buffer_size,
            metadata: self.metadata.clone(),
            field_names: self.field_names.clone(),
        })
    }
}

/// Immutable writer configuration shared by every writer in a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterSettings {
    pub max_file_size: u64,
    pub prefix: String,
    pub suffix: String,
    pub compress: bool,
    pub compression_type: CompressionSetting,
    pub replication: u16,
    /// Output directory without a trailing `/`.
    pub output_path: String,
    pub frequent_flushes: bool,
    pub write_buffer_size: usize,
    pub metadata: Vec<String>,
    pub field_names: FieldNames,
}

impl WriterSettings {
    /// Container compression for new files: `NONE` unless compression is
    /// switched on, in which case the configured type wins and `DEFAULT`
    /// defers to the backend.
    #[must_use]
    pub fn container_compression(&self, backend_default: Compression) -> Compression {
        if self.compress {
            self.compression_type.resolve(backend_default)
        } else {
            Compression::None
        }
    }
}

/// Bounds for the writer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolParameters {
    /// Maximum number of writers alive at once.
    pub max_active: usize,
    /// How long `checkout` blocks when every writer is busy.
    pub max_wait: Duration,
}

impl Default for PoolParameters {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_POOL_MAX_ACTIVE,
            max_wait: DEFAULT_POOL_MAX_WAIT,
        }
    }
}

/// Full configuration: writer parameters plus pool bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub writer: WriterParameters,
    pub pool: PoolParameters,
}

impl Config {
    /// Reads configuration from `CRAWLLOG_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        let w = &mut cfg.writer;

        if let Some(v) = lookup("CRAWLLOG_PREFIX") {
            w.prefix = Some(v);
        }
        if let Some(v) = lookup("CRAWLLOG_MAX_SIZE") {
            w.max_size = Some(parse("CRAWLLOG_MAX_SIZE", &v)?);
        }
        if let Some(v) = lookup("CRAWLLOG_SUFFIX") {
            w.suffix = v;
        }
        if let Some(v) = lookup("CRAWLLOG_COMPRESS") {
            w.compression = parse("CRAWLLOG_COMPRESS", &v)?;
        }
        if let Some(v) = lookup("CRAWLLOG_COMPRESSION_TYPE") {
            w.compression_type = v.parse()?;
        }
        if let Some(v) = lookup("CRAWLLOG_REPLICATION") {
            w.replication = parse("CRAWLLOG_REPLICATION", &v)?;
        }
        if let Some(v) = lookup("CRAWLLOG_OUTPUT_PATH") {
            w.output_path = v;
        }
        if let Some(v) = lookup("CRAWLLOG_ENDPOINT") {
            w.endpoint = v;
        }
        if let Some(v) = lookup("CRAWLLOG_FREQUENT_FLUSHES") {
            w.frequent_flushes = parse("CRAWLLOG_FREQUENT_FLUSHES", &v)?;
        }
        if let Some(v) = lookup("CRAWLLOG_BUFFER_SIZE") {
            w.write_buffer_size = parse("CRAWLLOG_BUFFER_SIZE", &v)?;
        }
        if let Some(v) = lookup("CRAWLLOG_METADATA") {
            w.metadata = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(v) = lookup("CRAWLLOG_POOL_MAX_ACTIVE") {
            cfg.pool.max_active = parse("CRAWLLOG_POOL_MAX_ACTIVE", &v)?;
        }
        if let Some(v) = lookup("CRAWLLOG_POOL_MAX_WAIT_MS") {
            let ms: u64 = parse("CRAWLLOG_POOL_MAX_WAIT_MS", &v)?;
            cfg.pool.max_wait = Duration::from_millis(ms);
        }
        if cfg.pool.max_active == 0 {
            return Err(ConfigError::Invalid {
                key: "CRAWLLOG_POOL_MAX_ACTIVE".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(cfg)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    })
}

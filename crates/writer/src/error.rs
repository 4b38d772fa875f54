use std::io;

use config::ConfigError;
use thiserror::Error;

/// Errors that abort a write or the construction of a writer.
///
/// `ShortRead`, `RecordLengthMismatch` and `RecordTooLarge` mean the record
/// bytes cannot be trusted; the record is never appended when one of them is
/// returned.
#[derive(Debug, Error)]
pub enum WriteError {
    /// An underlying I/O error from the storage backend.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A captured stream produced fewer bytes than the caller asked for.
    #[error("read {actual} but expected {expected}")]
    ShortRead { expected: u64, actual: u64 },

    /// The response stream did not deliver its declared length.
    #[error("gap between expected and actual for {uri}: {remaining} of {declared} bytes never arrived")]
    RecordLengthMismatch {
        uri: String,
        declared: u64,
        remaining: u64,
    },

    /// The framed payload would not fit the 4-byte length prefix.
    #[error("record payload of {0} bytes does not fit a 4-byte length prefix")]
    RecordTooLarge(u64),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Resource-lifecycle faults that are logged and absorbed by the sink.
#[derive(Debug, Error)]
pub enum SinkFault {
    /// Syncing or measuring the open file failed; the sink rotates instead.
    #[error("failed to read the length of {path}: {source}")]
    RotationProbe {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The occupied marker could not be stripped from a closed file.
    #[error("failed rename of {from} to {to}: {reason}")]
    RenameFailure {
        from: String,
        to: String,
        reason: String,
    },
}

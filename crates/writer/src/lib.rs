//! # Writer - crawl record framing and file rotation
//!
//! Turns one fetched document into one key/value entry in a rotating,
//! append-only container on a [`seqfile::StorageBackend`].
//!
//! ## Architecture
//!
//! ```text
//! CrawlWriter::write(uri, fields, request, response)
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                  WRITER                       │
//! │                                               │
//! │ sink.ensure_capacity()                        │
//! │    |  (no file, or size > max?)  yes          │
//! │    v                                          │
//! │ close → rename x.open → x → open next x.open  │
//! │                                               │
//! │ RecordBuffer: [len][header][fields][req][resp]│
//! │    |  (response short?)  yes → error, drop    │
//! │    v                                          │
//! │ finish() patches len → sink.append(uri, val)  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module     | Purpose                                                 |
//! |------------|---------------------------------------------------------|
//! | [`buffer`] | `RecordBuffer`: growable, length-prefixed accumulator   |
//! | [`sink`]   | `FileSink`: open/rotate/close with the occupied marker  |
//! | [`writer`] | `CrawlWriter`: record assembly and validation           |
//! | [`record`] | field blocks, `CrawlRecord`, `CrawlDocument` parsing    |
//! | [`naming`] | filename scheme and serial padding                      |
//!
//! A `CrawlWriter` holds no locks. It is `Send`, so a pool can hand it from
//! thread to thread, but only one caller may use it at a time.

pub mod buffer;
mod error;
pub mod naming;
pub mod record;
pub mod sink;
pub mod writer;

pub use buffer::RecordBuffer;
pub use error::{SinkFault, WriteError};
pub use record::{CrawlDocument, CrawlRecord, DocumentError, FieldBlock, WRITER_ID};
pub use sink::{FileSink, FinalizedFile};
pub use writer::{Capture, CrawlWriter};

#[cfg(test)]
mod tests;

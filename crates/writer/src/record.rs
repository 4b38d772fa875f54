//! Record values: building the field block on the way in, and taking a
//! framed value apart on the way out.
//!
//! ```text
//! [u32 BE payload length]
//! CrawlLogWriter/0.3\r\n
//! Name: value\r\n        ┐
//! ...                    ├ field block
//! \r\n                   ┘
//! request bytes          (only for http/https URIs)
//! response bytes
//! ```

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};
use config::FieldNames;
use thiserror::Error;

use crate::buffer::PREFIX_LEN;
use crate::naming::timestamp14;

/// Header line that opens every record payload.
pub const WRITER_ID: &str = "CrawlLogWriter/0.3";
pub const CRLF: &[u8] = b"\r\n";

/// `true` if the first four characters of `uri` are `http`, in any case.
#[must_use]
pub fn is_http(uri: &str) -> bool {
    uri.as_bytes()
        .get(..4)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case(b"http"))
}

/// `Name: value` lines terminated by an empty line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldBlock {
    bytes: Vec<u8>,
}

impl FieldBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one field. Line breaks inside `value` are replaced by spaces so
    /// a value can never end the block early.
    pub fn push(&mut self, name: &str, value: impl fmt::Display) -> &mut Self {
        let value = value.to_string();
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.extend_from_slice(b": ");
        self.bytes.extend(
            value
                .bytes()
                .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
        );
        self.bytes.extend_from_slice(CRLF);
        self
    }

    /// The encoded block, terminator included.
    #[must_use]
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.bytes.extend_from_slice(CRLF);
        self.bytes
    }
}

/// A fetched document with the metadata a crawler knows about it.
#[derive(Debug, Clone)]
pub struct CrawlRecord<'a> {
    pub uri: &'a str,
    pub crawl_time: DateTime<Utc>,
    pub ip: Option<&'a str>,
    /// Hop path from the seed, e.g. `LLE`.
    pub path_from_seed: &'a str,
    pub is_seed: bool,
    pub via: Option<&'a str>,
    pub seed_url: Option<&'a str>,
    pub request: &'a [u8],
    pub response: &'a [u8],
}

impl<'a> CrawlRecord<'a> {
    pub fn new(uri: &'a str, response: &'a [u8]) -> Self {
        Self {
            uri,
            crawl_time: Utc::now(),
            ip: None,
            path_from_seed: "",
            is_seed: false,
            via: None,
            seed_url: None,
            request: &[],
            response,
        }
    }

    /// Builds the field block using `names` for the field names.
    ///
    /// The request length is only written when the request will actually be
    /// stored, i.e. for http URIs.
    pub fn field_block(&self, names: &FieldNames) -> FieldBlock {
        let mut block = FieldBlock::new();
        block.push(&names.crawl_time, timestamp14(self.crawl_time));
        if let Some(ip) = self.ip {
            block.push(&names.ip, ip);
        }
        block.push(&names.path_from_seed, self.path_from_seed);
        block.push(&names.is_seed, self.is_seed);
        block.push(&names.url, self.uri);
        if let Some(via) = self.via {
            block.push(&names.via, via);
        }
        if let Some(seed) = self.seed_url {
            block.push(&names.seed_url, seed);
        }
        if is_http(self.uri) {
            block.push(&names.request, self.request.len());
        }
        block.push(&names.response, self.response.len());
        block
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("value is shorter than its length prefix")]
    Truncated,

    #[error("length prefix says {declared} bytes but {actual} follow")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("header line '{0}' is not a crawl log record")]
    BadHeader(String),

    #[error("field block has no terminating blank line")]
    UnterminatedFields,

    #[error("field '{name}' has non-numeric length '{value}'")]
    BadLength { name: String, value: String },
}

/// Borrowed, parsed view of one record value.
#[derive(Debug, Clone)]
pub struct CrawlDocument<'a> {
    header: &'a str,
    fields: Vec<(&'a str, &'a str)>,
    field_block: &'a [u8],
    body: &'a [u8],
    split: Option<usize>,
}

impl<'a> CrawlDocument<'a> {
    /// Parses with the default field names.
    pub fn parse(value: &'a [u8]) -> Result<Self, DocumentError> {
        Self::parse_with(value, &FieldNames::default())
    }

    /// Parses `value`, using `names` to find the request/response length
    /// fields that split the body.
    pub fn parse_with(value: &'a [u8], names: &FieldNames) -> Result<Self, DocumentError> {
        if value.len() < PREFIX_LEN {
            return Err(DocumentError::Truncated);
        }
        let declared = u64::from(BigEndian::read_u32(&value[..PREFIX_LEN]));
        let payload = &value[PREFIX_LEN..];
        if declared != payload.len() as u64 {
            return Err(DocumentError::LengthMismatch {
                declared,
                actual: payload.len() as u64,
            });
        }

        let header_end = find(payload, CRLF).ok_or(DocumentError::UnterminatedFields)?;
        let header = std::str::from_utf8(&payload[..header_end])
            .map_err(|_| DocumentError::BadHeader(String::from_utf8_lossy(&payload[..header_end]).into_owned()))?;
        if !header.starts_with("CrawlLogWriter/") {
            return Err(DocumentError::BadHeader(header.to_string()));
        }

        let fields_start = header_end + CRLF.len();
        let mut fields = Vec::new();
        let mut pos = fields_start;
        loop {
            let rest = &payload[pos..];
            let line_len = find(rest, CRLF).ok_or(DocumentError::UnterminatedFields)?;
            if line_len == 0 {
                break;
            }
            let line = std::str::from_utf8(&rest[..line_len]).unwrap_or("");
            if let Some((name, value)) = line.split_once(':') {
                fields.push((name.trim(), value.trim()));
            }
            pos += line_len + CRLF.len();
        }
        let body_start = pos + CRLF.len();

        let mut doc = Self {
            header,
            fields,
            field_block: &payload[fields_start..body_start],
            body: &payload[body_start..],
            split: None,
        };
        doc.split = doc.locate_split(names)?;
        Ok(doc)
    }

    fn locate_split(&self, names: &FieldNames) -> Result<Option<usize>, DocumentError> {
        let length_of = |name: &str| -> Result<Option<usize>, DocumentError> {
            match self.field(name) {
                None => Ok(None),
                Some(v) => v.parse().map(Some).map_err(|_| DocumentError::BadLength {
                    name: name.to_string(),
                    value: v.to_string(),
                }),
            }
        };
        let request = length_of(&names.request)?;
        let response = length_of(&names.response)?;
        Ok(match (request, response) {
            (Some(req), _) if req <= self.body.len() => Some(req),
            (None, Some(resp)) if resp <= self.body.len() => Some(self.body.len() - resp),
            _ => None,
        })
    }

    pub fn header(&self) -> &'a str {
        self.header
    }

    /// First field with this name, compared case-insensitively.
    pub fn field(&self, name: &str) -> Option<&'a str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    pub fn fields(&self) -> &[(&'a str, &'a str)] {
        &self.fields
    }

    /// Raw field block, terminator included.
    pub fn field_block(&self) -> &'a [u8] {
        self.field_block
    }

    /// Request and response bytes together.
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Request bytes, if the length fields allow the body to be split.
    pub fn request(&self) -> Option<&'a [u8]> {
        self.split.map(|at| &self.body[..at])
    }

    /// Response bytes. Falls back to the whole body when the body cannot be
    /// split.
    pub fn response(&self) -> &'a [u8] {
        match self.split {
            Some(at) => &self.body[at..],
            None => self.body,
        }
    }

    /// Character set named by the response, lowercased.
    ///
    /// Looks for a `charset=` parameter in a `Content-Type` header first, then
    /// anywhere in the first 4 KiB of the entity (HTML meta tags).
    pub fn charset(&self) -> Option<String> {
        let response = self.response();
        let (headers, entity) = match find(response, b"\r\n\r\n") {
            Some(at) => (&response[..at], &response[at + 4..]),
            None => (&response[..0], response),
        };

        for line in headers.split(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(line);
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-type") {
                    if let Some(cs) = charset_param(value) {
                        return Some(cs);
                    }
                }
            }
        }

        let head = &entity[..entity.len().min(4096)];
        charset_param(&String::from_utf8_lossy(head))
    }
}

fn charset_param(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let at = lower.find("charset=")? + "charset=".len();
    let value: String = lower[at..]
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        .collect();
    (!value.is_empty()).then_some(value)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

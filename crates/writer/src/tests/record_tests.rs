use crate::buffer::RecordBuffer;
use crate::record::*;
use chrono::{TimeZone, Utc};
use config::FieldNames;

fn framed(payload: &[u8]) -> Vec<u8> {
    let mut buf = RecordBuffer::with_capacity(64);
    buf.write(payload);
    buf.finish().unwrap().to_vec()
}

#[test]
fn http_scheme_check_is_case_insensitive() {
    assert!(is_http("http://a/"));
    assert!(is_http("HTTPS://a/"));
    assert!(is_http("hTtP://a/"));
    assert!(!is_http("ftp://a/"));
    assert!(!is_http("htt"));
    assert!(!is_http(""));
}

#[test]
fn field_block_ends_with_blank_line() {
    let mut block = FieldBlock::new();
    block.push("URL", "http://a/").push("Is-Seed", true);
    assert_eq!(block.into_bytes(), b"URL: http://a/\r\nIs-Seed: true\r\n\r\n".to_vec());
}

#[test]
fn field_values_cannot_break_lines() {
    let mut block = FieldBlock::new();
    block.push("Via", "a\r\nb");
    assert_eq!(block.into_bytes(), b"Via: a  b\r\n\r\n".to_vec());
}

#[test]
fn crawl_record_field_order_and_lengths() {
    let mut rec = CrawlRecord::new("http://example.com/", b"resp");
    rec.crawl_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    rec.request = b"req";
    rec.is_seed = true;
    rec.seed_url = Some("http://example.com/");

    let bytes = rec.field_block(&FieldNames::default()).into_bytes();
    let text = String::from_utf8(bytes).unwrap();
    assert_eq!(
        text,
        "Crawl-Time: 20240101000000\r\n\
         Path-From-Seed: \r\n\
         Is-Seed: true\r\n\
         URL: http://example.com/\r\n\
         Seed-Url: http://example.com/\r\n\
         Request: 3\r\n\
         Response: 4\r\n\
         \r\n"
    );
}

#[test]
fn non_http_record_has_no_request_field() {
    let rec = CrawlRecord::new("dns:example.com", b"1.2.3.4");
    let text = String::from_utf8(rec.field_block(&FieldNames::default()).into_bytes()).unwrap();
    assert!(!text.contains("Request:"));
    assert!(text.contains("Response: 7\r\n"));
}

// -------------------- Parsing --------------------

#[test]
fn parse_splits_header_fields_and_body() {
    let value = framed(b"CrawlLogWriter/0.3\r\nURL: x\r\nRequest: 2\r\n\r\nGOresponse");
    let doc = CrawlDocument::parse(&value).unwrap();
    assert_eq!(doc.header(), "CrawlLogWriter/0.3");
    assert_eq!(doc.fields(), &[("URL", "x"), ("Request", "2")]);
    assert_eq!(doc.field("url"), Some("x"));
    assert_eq!(doc.field_block(), b"URL: x\r\nRequest: 2\r\n\r\n");
    assert_eq!(doc.body(), b"GOresponse");
    assert_eq!(doc.request(), Some(&b"GO"[..]));
    assert_eq!(doc.response(), b"response");
}

#[test]
fn parse_without_lengths_treats_body_as_response() {
    let value = framed(b"CrawlLogWriter/0.3\r\n\r\nbody");
    let doc = CrawlDocument::parse(&value).unwrap();
    assert!(doc.fields().is_empty());
    assert_eq!(doc.request(), None);
    assert_eq!(doc.response(), b"body");
}

#[test]
fn parse_rejects_bad_values() {
    assert_eq!(CrawlDocument::parse(b"\x00\x00").unwrap_err(), DocumentError::Truncated);

    let mut value = framed(b"CrawlLogWriter/0.3\r\n\r\n");
    value.push(b'!');
    assert!(matches!(
        CrawlDocument::parse(&value),
        Err(DocumentError::LengthMismatch { .. })
    ));

    let value = framed(b"SomethingElse/1.0\r\n\r\n");
    assert!(matches!(CrawlDocument::parse(&value), Err(DocumentError::BadHeader(_))));

    let value = framed(b"CrawlLogWriter/0.3\r\nURL: x\r\n");
    assert_eq!(
        CrawlDocument::parse(&value).unwrap_err(),
        DocumentError::UnterminatedFields
    );

    let value = framed(b"CrawlLogWriter/0.3\r\nResponse: many\r\n\r\n");
    assert!(matches!(
        CrawlDocument::parse(&value),
        Err(DocumentError::BadLength { .. })
    ));
}

#[test]
fn charset_from_meta_tag() {
    let value = framed(
        b"CrawlLogWriter/0.3\r\n\r\nHTTP/1.0 200 OK\r\nContent-Type: text/html\r\n\r\n\
          <meta http-equiv=\"Content-Type\" content=\"text/html; charset=Shift_JIS\">",
    );
    let doc = CrawlDocument::parse(&value).unwrap();
    assert_eq!(doc.charset().as_deref(), Some("shift_jis"));
}

#[test]
fn charset_absent() {
    let value = framed(b"CrawlLogWriter/0.3\r\n\r\nHTTP/1.0 200 OK\r\n\r\nplain");
    assert_eq!(CrawlDocument::parse(&value).unwrap().charset(), None);
}

use crate::buffer::*;
use crate::WriteError;
use byteorder::{BigEndian, ByteOrder};
use std::io::Cursor;

#[test]
fn fresh_buffer_holds_only_the_prefix() {
    let buf = RecordBuffer::new();
    assert_eq!(buf.current_length(), PREFIX_LEN);
    assert_eq!(buf.payload_len(), 0);
    assert!(buf.capacity() >= DEFAULT_CAPACITY);
}

#[test]
fn writes_accumulate_in_order() {
    let mut buf = RecordBuffer::with_capacity(64);
    buf.write(b"abc");
    buf.write_byte(b'-');
    buf.write_range(b"0123456789", 2, 3).unwrap();
    assert_eq!(buf.current_length(), PREFIX_LEN + 7);
    assert_eq!(&buf.finish().unwrap()[PREFIX_LEN..], b"abc-234");
}

#[test]
fn write_range_rejects_out_of_bounds() {
    let mut buf = RecordBuffer::with_capacity(64);
    assert!(buf.write_range(b"short", 3, 10).is_err());
    assert!(buf.write_range(b"short", usize::MAX, 2).is_err());
    assert_eq!(buf.payload_len(), 0);
}

#[test]
fn growth_adds_shortfall_plus_slack() {
    let mut buf = RecordBuffer::with_capacity(16);
    let before = buf.capacity();
    // 12 bytes of spare room, so 20 bytes leave a shortfall of 8
    buf.write(&[7u8; 20]);
    assert!(buf.capacity() >= before + 8 + GROWTH_SLACK);
    assert_eq!(buf.payload_len(), 20);
}

#[test]
fn finish_patches_big_endian_length() {
    let mut buf = RecordBuffer::with_capacity(64);
    buf.write(&[1u8; 300]);
    let framed = buf.finish().unwrap();
    assert_eq!(BigEndian::read_u32(&framed[..PREFIX_LEN]), 300);
    assert_eq!(framed.len(), PREFIX_LEN + 300);
}

#[test]
fn read_fully_from_reports_short_read() {
    let mut buf = RecordBuffer::with_capacity(64);
    let err = buf
        .read_fully_from(&mut Cursor::new(b"abc".to_vec()), 10)
        .unwrap_err();
    assert!(matches!(
        err,
        WriteError::ShortRead {
            expected: 10,
            actual: 3
        }
    ));
}

#[test]
fn read_fully_from_reads_exact_length() {
    let mut buf = RecordBuffer::with_capacity(8);
    let mut src = Cursor::new(vec![9u8; 100]);
    buf.read_fully_from(&mut src, 40).unwrap();
    assert_eq!(buf.payload_len(), 40);
    assert_eq!(src.position(), 40);
}

#[test]
fn copy_from_stops_at_limit_or_eof() {
    let mut buf = RecordBuffer::with_capacity(8);
    let copied = buf.copy_from(&mut Cursor::new(vec![1u8; 50]), 20).unwrap();
    assert_eq!(copied, 20);

    let copied = buf.copy_from(&mut Cursor::new(vec![1u8; 5]), 20).unwrap();
    assert_eq!(copied, 5);
    assert_eq!(buf.payload_len(), 25);
}

#[test]
fn reset_keeps_allocation() {
    let mut buf = RecordBuffer::with_capacity(64);
    buf.write(&[0u8; 40]);
    let cap = buf.capacity();
    buf.reset();
    assert_eq!(buf.current_length(), PREFIX_LEN);
    assert_eq!(buf.capacity(), cap);
}

#[test]
fn recycle_shrinks_after_oversized_record() {
    let mut buf = RecordBuffer::new();
    buf.write(&vec![0u8; 2 * HIGH_WATER_MARK]);
    assert!(buf.capacity() > HIGH_WATER_MARK);

    buf.recycle();
    assert_eq!(buf.current_length(), PREFIX_LEN);
    assert!(buf.capacity() <= HIGH_WATER_MARK);
    assert!(buf.capacity() >= DEFAULT_CAPACITY);
}

#[test]
fn recycle_keeps_moderate_growth() {
    let mut buf = RecordBuffer::new();
    buf.write(&vec![0u8; DEFAULT_CAPACITY + 1]);
    let grown = buf.capacity();
    assert!(grown <= HIGH_WATER_MARK);

    buf.recycle();
    assert_eq!(buf.capacity(), grown);
}

#[test]
fn ensure_capacity_preallocates_with_slack() {
    let mut buf = RecordBuffer::with_capacity(16);
    buf.ensure_capacity(1000);
    assert!(buf.capacity() >= 1000 + GROWTH_SLACK);

    let cap = buf.capacity();
    buf.write(&[0u8; 900]);
    assert_eq!(buf.capacity(), cap);
}

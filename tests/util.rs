use isobmff_codec::util::{format_value, hex_dump, read_slice};
use isobmff_codec::{Record, Value};
use std::io::Cursor;

#[test]
fn read_slice_within_bounds() {
    let mut cur = Cursor::new((0u8..64).collect::<Vec<_>>());
    let data = read_slice(&mut cur, 16, 4).expect("read_slice failed");
    assert_eq!(data, [16, 17, 18, 19]);
}

#[test]
fn read_slice_past_eof_fails() {
    let mut cur = Cursor::new((0u8..32).collect::<Vec<_>>());
    let err = read_slice(&mut cur, 24, 16).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[test]
fn hex_dump_rows() {
    let dump = hex_dump(b"ftypisom\x00\x01", 0x20);
    assert_eq!(
        dump,
        "00000020  66 74 79 70 69 73 6f 6d 00 01                    |ftypisom..|\n"
    );
}

#[test]
fn long_values_are_truncated() {
    let items = Value::Array((0..5).map(Value::Uint).collect());
    assert_eq!(format_value(&items, 2), "[0, 1, ... (5 total)]");

    let bytes = Value::Bytes(vec![0xab; 4]);
    assert_eq!(format_value(&bytes, 2), "abab... (4 bytes)");

    let rec = Value::Struct(Record::new().with("x", Value::Int(-1)));
    assert_eq!(format_value(&rec, 2), "{x: -1}");
}

use hex_literal::hex;
use isobmff_codec::schema::{DynBitReader, FieldOverride, StringMode, unresolved};
use isobmff_codec::{
    BoxValue, Context, Error, FieldDef, FourCC, Record, Registry, Result, Schema, SchemaHooks,
    Value, marshal,
};
use proptest::prelude::*;
use std::io::{Cursor, Seek, SeekFrom};
use std::sync::Arc;

const TEST: FourCC = FourCC::new(b"test");

fn registry(schema: Schema, versions: &[u8]) -> Registry {
    Registry::builder()
        .register(TEST, schema, versions)
        .unwrap()
        .build()
}

fn decode(reg: &Registry, payload: &[u8]) -> Result<(BoxValue, u64)> {
    let mut value = reg.new_box(TEST).unwrap();
    let mut cur = Cursor::new(payload.to_vec());
    let bits = marshal::decode(
        &mut cur,
        payload.len() as u64,
        &mut value,
        reg,
        &Context::default(),
    )?;
    Ok((value, bits))
}

fn encode(value: &BoxValue) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    marshal::encode(&mut out, value, &Context::default())?;
    Ok(out)
}

fn versioned_schema() -> Schema {
    Schema::full_box(vec![
        FieldDef::uint("a", 32).version(0),
        FieldDef::uint("a", 64).version(1),
        FieldDef::uint("b", 16),
    ])
}

#[test]
fn version_selects_field_width() {
    let reg = registry(versioned_schema(), &[0, 1]);

    let (v0, bits) = decode(&reg, &hex!("00 000000 00000005 0007")).unwrap();
    assert_eq!(bits, 80);
    assert_eq!(v0.version(), Some(0));
    assert_eq!(v0.fields.get_u64("a"), Some(5));
    assert_eq!(v0.fields.get_u64("b"), Some(7));

    let (v1, bits) = decode(&reg, &hex!("01 000000 0000000000000005 0007")).unwrap();
    assert_eq!(bits, 112);
    assert_eq!(v1.fields.get_u64("a"), Some(5));

    assert_eq!(encode(&v1).unwrap(), hex!("01 000000 0000000000000005 0007"));
}

#[test]
fn unsupported_version_rewinds_and_is_recoverable() {
    let reg = registry(versioned_schema(), &[0, 1]);
    let mut data = b"pre".to_vec();
    data.extend_from_slice(&hex!("02 000000 00000005 0007"));
    let mut cur = Cursor::new(data);
    cur.seek(SeekFrom::Start(3)).unwrap();

    let mut value = reg.new_box(TEST).unwrap();
    let err = marshal::decode(&mut cur, 10, &mut value, &reg, &Context::default()).unwrap_err();

    assert!(matches!(err, Error::UnsupportedVersion { version: 2, .. }));
    assert!(err.is_recoverable());
    assert_eq!(cur.position(), 3);
    assert!(value.fields.is_empty());
}

#[test]
fn unregistered_versions_are_accepted() {
    let reg = registry(versioned_schema(), &[]);
    let (v, _) = decode(&reg, &hex!("07 000000 0005")).unwrap();
    // no field is declared for version 7, so only "b" follows the header
    assert_eq!(v.fields.get_u64("a"), None);
    assert_eq!(v.fields.get_u64("b"), Some(5));
}

#[test]
fn decoding_one_byte_short_overruns() {
    let reg = registry(Schema::new(vec![FieldDef::uint("x", 32)]), &[]);
    let mut value = reg.new_box(TEST).unwrap();
    let mut cur = Cursor::new(hex!("01020304").to_vec());

    let err = marshal::decode(&mut cur, 3, &mut value, &reg, &Context::default()).unwrap_err();

    assert!(matches!(
        err,
        Error::Overrun {
            limit_bits: 24,
            needed_bits: 32,
            ..
        }
    ));
    assert!(!err.is_recoverable());
}

#[test]
fn flag_gates_select_fields() {
    let schema = Schema::full_box(vec![
        FieldDef::uint("x", 16).flags(0x1),
        FieldDef::uint("y", 16).not_flags(0x1),
    ]);
    let reg = registry(schema, &[0]);

    let (with, _) = decode(&reg, &hex!("00 000001 abcd")).unwrap();
    assert_eq!(with.fields.get_u64("x"), Some(0xabcd));
    assert!(!with.fields.contains("y"));

    let (without, _) = decode(&reg, &hex!("00 000000 abcd")).unwrap();
    assert_eq!(without.fields.get_u64("y"), Some(0xabcd));

    let mut built = reg.new_box(TEST).unwrap();
    built.set_version(0);
    built.set_flags(1);
    built.set("x", Value::Uint(0x1234));
    assert_eq!(encode(&built).unwrap(), hex!("00 000001 1234"));
}

struct CountHooks;

impl SchemaHooks for CountHooks {
    fn dynamic_length(&self, field: &str, rec: &Record) -> Result<u64> {
        match field {
            "items" => Ok(rec.get_u64("count").unwrap_or(0)),
            _ => Err(unresolved(field)),
        }
    }

    fn is_present(&self, field: &str, rec: &Record, _ctx: &Context) -> Result<bool> {
        match field {
            "extra" => Ok(rec.get_u64("count") == Some(0)),
            _ => Err(unresolved(field)),
        }
    }
}

#[test]
fn dynamic_length_and_presence_come_from_hooks() {
    let schema = Schema::new(vec![
        FieldDef::uint("count", 8),
        FieldDef::uint("items", 16).dynamic_length(),
        FieldDef::uint("extra", 8).optional(),
    ])
    .with_hooks(CountHooks);
    let reg = registry(schema, &[]);

    let (v, _) = decode(&reg, &hex!("02 0001 0002")).unwrap();
    assert_eq!(
        v.fields.get("items"),
        Some(&Value::Array(vec![Value::Uint(1), Value::Uint(2)]))
    );
    assert!(!v.fields.contains("extra"));

    let (v, _) = decode(&reg, &hex!("00 09")).unwrap();
    assert_eq!(v.fields.get_u64("extra"), Some(9));
}

#[test]
fn declared_count_must_match_stored_elements() {
    let schema = Schema::new(vec![
        FieldDef::uint("count", 8),
        FieldDef::uint("items", 16).dynamic_length(),
    ])
    .with_hooks(CountHooks);
    let reg = registry(schema, &[]);
    let mut v = reg.new_box(TEST).unwrap();
    v.set("count", Value::Uint(3));
    v.set("items", Value::Array(vec![Value::Uint(1)]));

    assert!(matches!(encode(&v), Err(Error::FieldValue { field, .. }) if field == "items"));
}

#[test]
fn unknown_dynamic_field_fails_loudly() {
    let schema =
        Schema::new(vec![FieldDef::uint("other", 8).dynamic_length()]).with_hooks(CountHooks);
    let reg = registry(schema, &[]);
    let err = decode(&reg, &hex!("00")).unwrap_err();
    assert!(matches!(err, Error::UnresolvedField { field } if field == "other"));
}

#[test]
fn zero_width_field_is_a_schema_error() {
    let reg = registry(Schema::new(vec![FieldDef::uint("x", 0)]), &[]);
    assert!(matches!(decode(&reg, &hex!("00")), Err(Error::Schema(_))));
}

#[test]
fn partial_byte_payload_is_a_schema_error() {
    let reg = registry(Schema::new(vec![FieldDef::uint("x", 4)]), &[]);
    assert!(matches!(decode(&reg, &hex!("f0")), Err(Error::Schema(_))));

    let mut v = reg.new_box(TEST).unwrap();
    v.set("x", Value::Uint(1));
    assert!(matches!(encode(&v), Err(Error::Schema(_))));
}

#[test]
fn signed_fields_sign_extend() {
    let schema = Schema::new(vec![FieldDef::int("a", 12), FieldDef::int("b", 4)]);
    let reg = registry(schema, &[]);

    let (v, _) = decode(&reg, &hex!("fff7")).unwrap();
    assert_eq!(v.fields.get_i64("a"), Some(-1));
    assert_eq!(v.fields.get_i64("b"), Some(7));
    assert_eq!(encode(&v).unwrap(), hex!("fff7"));

    let mut v = reg.new_box(TEST).unwrap();
    v.set("a", Value::Int(2048));
    v.set("b", Value::Int(0));
    assert!(matches!(encode(&v), Err(Error::FieldValue { .. })));
}

#[test]
fn out_of_range_and_missing_values_are_rejected() {
    let reg = registry(Schema::new(vec![FieldDef::uint("x", 8)]), &[]);
    let mut v = reg.new_box(TEST).unwrap();
    assert!(matches!(encode(&v), Err(Error::FieldValue { .. })));

    v.set("x", Value::Uint(256));
    assert!(matches!(encode(&v), Err(Error::FieldValue { .. })));
}

#[test]
fn constants_fill_missing_values() {
    let schema = Schema::new(vec![
        FieldDef::uint("reserved", 8).constant(0xff),
        FieldDef::uint("zeros", 16).count(2).constant(0),
    ]);
    let reg = registry(schema, &[]);
    let v = reg.new_box(TEST).unwrap();
    assert_eq!(encode(&v).unwrap(), hex!("ff 0000 0000"));
    assert_eq!(marshal::encoded_len(&v, &Context::default()).unwrap(), 5);
}

#[test]
fn unaligned_byte_arrays_are_read_bitwise() {
    let schema = Schema::new(vec![
        FieldDef::uint("hi", 4),
        FieldDef::uint("arr", 8).count(2),
        FieldDef::uint("lo", 4),
    ]);
    let reg = registry(schema, &[]);

    let (v, _) = decode(&reg, &hex!("a1234b")).unwrap();
    assert_eq!(v.fields.get("arr"), Some(&Value::Bytes(vec![0x12, 0x34])));
    assert_eq!(v.fields.get_u64("lo"), Some(0xb));
    assert_eq!(encode(&v).unwrap(), hex!("a1234b"));
}

#[test]
fn arrays_without_length_run_to_payload_end() {
    let schema = Schema::new(vec![
        FieldDef::uint("head", 8),
        FieldDef::uint("rest", 16).to_end(),
    ]);
    let reg = registry(schema, &[]);
    let (v, bits) = decode(&reg, &hex!("01 0002 0003")).unwrap();
    assert_eq!(bits, 40);
    assert_eq!(v.fields.get("rest").and_then(Value::len), Some(2));

    // an odd byte cannot hold another 16-bit element
    assert!(matches!(
        decode(&reg, &hex!("01 0002 00")),
        Err(Error::Overrun { .. })
    ));
}

#[test]
fn varint_fields_use_minimal_groups() {
    let schema = Schema::new(vec![FieldDef::varint("n"), FieldDef::uint("x", 8)]);
    let reg = registry(schema, &[]);

    let (v, bits) = decode(&reg, &hex!("8100 07")).unwrap();
    assert_eq!(bits, 24);
    assert_eq!(v.fields.get_u64("n"), Some(128));
    assert_eq!(encode(&v).unwrap(), hex!("8100 07"));

    // padded encodings decode to the same value but re-encode minimally
    let (v, _) = decode(&reg, &hex!("80808005 07")).unwrap();
    assert_eq!(v.fields.get_u64("n"), Some(5));
    assert_eq!(encode(&v).unwrap(), hex!("05 07"));
}

#[test]
fn varint_cannot_run_past_payload() {
    let reg = registry(Schema::new(vec![FieldDef::varint("n")]), &[]);
    assert!(matches!(decode(&reg, &hex!("8181")), Err(Error::Overrun { .. })));
}

#[test]
fn c_strings_stop_at_nul_or_payload_end() {
    let schema = Schema::new(vec![
        FieldDef::string("s", StringMode::CStyle),
        FieldDef::uint("x", 8),
    ]);
    let reg = registry(schema, &[]);
    let (v, _) = decode(&reg, b"abc\0\x07").unwrap();
    assert_eq!(v.fields.get("s"), Some(&Value::Str(b"abc".to_vec())));
    assert_eq!(v.fields.get_u64("x"), Some(7));
    assert_eq!(encode(&v).unwrap(), b"abc\0\x07");

    let reg = registry(Schema::new(vec![FieldDef::string("s", StringMode::CStyle)]), &[]);
    let (v, _) = decode(&reg, b"abc").unwrap();
    assert_eq!(v.fields.get("s"), Some(&Value::Str(b"abc".to_vec())));
}

#[test]
fn fixed_strings_take_declared_length() {
    let schema = Schema::new(vec![
        FieldDef::string("code", StringMode::Fixed).count(4),
        FieldDef::uint("x", 8),
    ]);
    let reg = registry(schema, &[]);
    let (v, _) = decode(&reg, b"ab\0d\x01").unwrap();
    assert_eq!(v.fields.get_bytes("code"), Some(&b"ab\0d"[..]));

    let reg = registry(Schema::new(vec![FieldDef::string("s", StringMode::Fixed)]), &[]);
    assert!(matches!(decode(&reg, b"ab"), Err(Error::Schema(_))));
}

#[test]
fn length_prefixed_string_is_detected_and_preserved() {
    let schema = Schema::new(vec![FieldDef::string("name", StringMode::CStyleOrPascal)]);
    let reg = registry(schema, &[]);

    let (v, _) = decode(&reg, b"\x03abc").unwrap();
    assert_eq!(v.fields.get("name"), Some(&Value::PascalStr(b"abc".to_vec())));
    assert_eq!(encode(&v).unwrap(), b"\x03abc");

    // first byte larger than what is left: parsed as a C string
    let (v, _) = decode(&reg, b"ab\0").unwrap();
    assert_eq!(v.fields.get("name"), Some(&Value::Str(b"ab".to_vec())));
    assert_eq!(encode(&v).unwrap(), b"ab\0");
}

struct RejectPascal;

impl SchemaHooks for RejectPascal {
    fn accept_pascal_string(
        &self,
        _field: &str,
        _data: &[u8],
        _remaining_bytes: u64,
        _rec: &Record,
        _ctx: &Context,
    ) -> bool {
        false
    }
}

#[test]
fn rejected_length_prefix_rewinds_to_c_string() {
    let schema = Schema::new(vec![FieldDef::string("name", StringMode::CStyleOrPascal)])
        .with_hooks(RejectPascal);
    let reg = registry(schema, &[]);
    let (v, bits) = decode(&reg, b"\x02ab\0").unwrap();
    assert_eq!(v.fields.get("name"), Some(&Value::Str(b"\x02ab".to_vec())));
    assert_eq!(bits, 32);
}

/// Skips a two-byte 0xffff marker some writers put before the count.
struct SkipMarker;

impl SchemaHooks for SkipMarker {
    fn before_field(
        &self,
        field: &str,
        r: &mut DynBitReader<'_>,
        remaining_bits: u64,
        _rec: &mut Record,
        _ctx: &Context,
    ) -> Result<FieldOverride> {
        if field != "count" || remaining_bits < 16 {
            return Ok(FieldOverride::Continue);
        }
        let start = r.position()?;
        if r.read_bits_u64(16)? == 0xffff {
            return Ok(FieldOverride::Handled { bits: 16 });
        }
        r.seek(SeekFrom::Start(start))?;
        Ok(FieldOverride::Continue)
    }
}

#[test]
fn before_field_hook_can_consume_bits() {
    let schema = Schema::new(vec![FieldDef::uint("count", 8), FieldDef::uint("x", 8)])
        .with_hooks(SkipMarker);
    let reg = registry(schema, &[]);

    let (v, bits) = decode(&reg, &hex!("ffff 09")).unwrap();
    assert_eq!(bits, 24);
    assert!(!v.fields.contains("count"));
    assert_eq!(v.fields.get_u64("x"), Some(9));

    let (v, _) = decode(&reg, &hex!("01 09")).unwrap();
    assert_eq!(v.fields.get_u64("count"), Some(1));
}

#[test]
fn nested_structures_and_inline_extension() {
    let point = Arc::new(Schema::new(vec![
        FieldDef::uint("x", 8),
        FieldDef::uint("y", 8),
    ]));
    let schema = Schema::new(vec![
        FieldDef::structure("origin", point.clone()).extend(),
        FieldDef::structure("points", point).to_end(),
    ]);
    let reg = registry(schema, &[]);

    let (v, _) = decode(&reg, &hex!("0102 0304 0506")).unwrap();
    assert_eq!(v.fields.get_u64("x"), Some(1));
    assert_eq!(v.fields.get_u64("y"), Some(2));
    let points = v.fields.get("points").and_then(Value::as_array).unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[1].as_record().and_then(|r| r.get_u64("y")), Some(6));
    assert_eq!(encode(&v).unwrap(), hex!("0102 0304 0506"));
}

#[test]
fn nested_fields_follow_the_box_version() {
    let entry = Arc::new(Schema::new(vec![
        FieldDef::uint("t", 16).version(0),
        FieldDef::uint("t", 32).version(1),
    ]));
    let schema = Schema::full_box(vec![FieldDef::structure("entries", entry).to_end()]);
    let reg = registry(schema, &[0, 1]);

    let (v, _) = decode(&reg, &hex!("01 000000 00000001 00000002")).unwrap();
    assert_eq!(v.fields.get("entries").and_then(Value::len), Some(2));
}

fn mixed_schema() -> Schema {
    Schema::full_box(vec![
        FieldDef::uint("a", 3),
        FieldDef::int("b", 13),
        FieldDef::boolean("c", 1),
        FieldDef::uint("d", 7),
        FieldDef::uint("e", 64).version(1),
        FieldDef::varint("f"),
        FieldDef::string("g", StringMode::CStyle),
        FieldDef::uint("h", 8).to_end(),
    ])
}

proptest! {
    #[test]
    fn encoded_values_decode_back(
        version in 0u8..2,
        a in 0u64..8,
        b in -4096i64..4096,
        c in any::<bool>(),
        d in 0u64..128,
        e in any::<u64>(),
        f in any::<u64>(),
        g in prop::collection::vec(1u8..=255, 0..12),
        h in prop::collection::vec(any::<u8>(), 0..12),
    ) {
        let reg = registry(mixed_schema(), &[0, 1]);
        let mut v = reg.new_box(TEST).unwrap();
        v.set_version(version);
        v.set_flags(0);
        v.set("a", Value::Uint(a));
        v.set("b", Value::Int(b));
        v.set("c", Value::Bool(c));
        v.set("d", Value::Uint(d));
        if version == 1 {
            v.set("e", Value::Uint(e));
        }
        v.set("f", Value::Uint(f));
        v.set("g", Value::Str(g));
        v.set("h", Value::Bytes(h));

        let bytes = encode(&v).unwrap();
        prop_assert_eq!(
            marshal::encoded_len(&v, &Context::default()).unwrap(),
            bytes.len() as u64
        );
        let (back, bits) = decode(&reg, &bytes).unwrap();
        prop_assert_eq!(bits, bytes.len() as u64 * 8);
        prop_assert_eq!(back, v);
    }
}

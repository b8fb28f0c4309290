//! The generic marshal/unmarshal engine.
//!
//! Walks a [`Schema`] in declaration order and packs or unpacks each present
//! field at its exact bit width, big-endian and MSB-first. Full-box version and
//! flags are tracked while walking so later fields can be gated on them.

use crate::bitio::{BitReader, BitWriter, MAX_VARINT_GROUPS, ReadSeek};
use crate::boxes::FourCC;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::schema::{
    Context, DynBitReader, FieldKind, FieldLength, FieldOverride, FieldRole, Gate, ResolvedField,
    Schema, SchemaHooks, StringMode, resolve,
};
use crate::value::{BoxValue, Record, Value};
use std::io::{Seek, SeekFrom, Write};
use tracing::trace;

/// Most elements a counted structure array may hold when they occupy no
/// payload bits (every field gated off), since the payload size does not bound
/// their count.
pub const MAX_EMPTY_ELEMENTS: u64 = 1 << 20;

/// Decodes a payload of `payload_size` bytes into `value`, replacing its fields.
///
/// Returns the number of bits consumed. Trailing payload bytes the schema does
/// not describe are left unread. On [`Error::UnsupportedVersion`] the stream is
/// rewound to where decoding started and `value` is left untouched.
pub fn decode(
    r: &mut dyn ReadSeek,
    payload_size: u64,
    value: &mut BoxValue,
    registry: &Registry,
    ctx: &Context,
) -> Result<u64> {
    let start = r.stream_position()?;
    let box_type = value.box_type();
    let schema = value.schema().clone();
    let limit = payload_size
        .checked_mul(8)
        .ok_or(Error::InvalidSize { offset: start, size: payload_size })?;

    let mut u = Unmarshaller {
        r: BitReader::new(&mut *r),
        box_type,
        limit,
        consumed: 0,
        gate: Gate::default(),
        registry,
        ctx,
    };

    let mut rec = Record::new();
    if let Err(err) = u.decode_struct(&schema, &mut rec) {
        if matches!(err, Error::UnsupportedVersion { .. }) {
            u.r.get_mut().seek(SeekFrom::Start(start))?;
        }
        return Err(err);
    }
    if u.consumed % 8 != 0 {
        return Err(Error::Schema(format!(
            "'{box_type}' decoded {} bits, not a whole number of bytes",
            u.consumed
        )));
    }

    value.fields = rec;
    Ok(u.consumed)
}

/// Encodes the fields of `value` (payload only, no box header). Returns bits written.
pub fn encode<W: Write>(w: &mut W, value: &BoxValue, ctx: &Context) -> Result<u64> {
    let out: &mut dyn Write = w;
    let mut m = Marshaller {
        w: BitWriter::new(out),
        written: 0,
        gate: Gate::default(),
        ctx,
    };
    m.encode_struct(value.schema(), &value.fields)?;
    if m.written % 8 != 0 {
        return Err(Error::Schema(format!(
            "'{}' encodes to {} bits, not a whole number of bytes",
            value.box_type(),
            m.written
        )));
    }
    Ok(m.written)
}

/// Payload size in bytes `value` encodes to.
pub fn encoded_len(value: &BoxValue, ctx: &Context) -> Result<u64> {
    Ok(encode(&mut std::io::sink(), value, ctx)? / 8)
}

fn sign_extend(raw: u64, width: u32) -> i64 {
    if width >= 64 {
        raw as i64
    } else {
        let shift = 64 - width;
        ((raw << shift) as i64) >> shift
    }
}

fn missing(field: &str) -> Error {
    Error::field(field, "no value and no constant to fall back on")
}

struct Unmarshaller<'r, 'c> {
    r: DynBitReader<'r>,
    box_type: FourCC,
    limit: u64,
    consumed: u64,
    gate: Gate,
    registry: &'c Registry,
    ctx: &'c Context,
}

impl Unmarshaller<'_, '_> {
    fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.consumed)
    }

    fn overrun(&self, needed_bits: u64) -> Error {
        Error::Overrun {
            box_type: self.box_type,
            limit_bits: self.limit,
            needed_bits,
        }
    }

    fn ensure(&self, bits: u64) -> Result<()> {
        match self.consumed.checked_add(bits) {
            Some(n) if n <= self.limit => Ok(()),
            Some(n) => Err(self.overrun(n)),
            None => Err(self.overrun(u64::MAX)),
        }
    }

    fn read_raw(&mut self, width: u32) -> Result<u64> {
        self.ensure(width as u64)?;
        let v = self.r.read_bits_u64(width)?;
        self.consumed += width as u64;
        Ok(v)
    }

    fn decode_struct(&mut self, schema: &Schema, out: &mut Record) -> Result<()> {
        let hooks = schema.hooks();
        for def in &schema.fields {
            let remaining = self.remaining();
            match hooks.before_field(def.name, &mut self.r, remaining, out, self.ctx)? {
                FieldOverride::Handled { bits } => {
                    self.consumed += bits;
                    if self.consumed > self.limit {
                        return Err(self.overrun(self.consumed));
                    }
                }
                FieldOverride::Continue => {
                    let Some(field) = resolve(def, self.gate, hooks, out, self.ctx)? else {
                        continue;
                    };
                    let before = self.consumed;
                    self.decode_field(&field, hooks, out)?;
                    trace!(
                        box_type = %self.box_type,
                        field = def.name,
                        bits = self.consumed - before,
                        "decoded field"
                    );
                }
            }
            self.apply_role(def.role, def.name, out)?;
        }
        Ok(())
    }

    fn apply_role(&mut self, role: Option<FieldRole>, name: &str, rec: &Record) -> Result<()> {
        match role {
            Some(FieldRole::Version) => {
                self.gate.version = rec.get_u64(name).unwrap_or(0) as u8;
            }
            Some(FieldRole::Flags) => {
                self.gate.flags = rec.get_u64(name).unwrap_or(0) as u32;
                if !self.registry.is_supported_version(self.box_type, self.gate.version) {
                    return Err(Error::UnsupportedVersion {
                        box_type: self.box_type,
                        version: self.gate.version,
                    });
                }
            }
            None => {}
        }
        Ok(())
    }

    fn decode_field(
        &mut self,
        f: &ResolvedField<'_>,
        hooks: &dyn SchemaHooks,
        out: &mut Record,
    ) -> Result<()> {
        let def = f.def;
        match &def.kind {
            FieldKind::Struct(schema) => {
                if def.extend {
                    return self.decode_struct(schema, out);
                }
                let v = match f.length {
                    FieldLength::Scalar => {
                        let mut rec = Record::new();
                        self.decode_struct(schema, &mut rec)?;
                        Value::Struct(rec)
                    }
                    FieldLength::Count(n) => {
                        let mut items = Vec::with_capacity(n.min(1024) as usize);
                        let mut empty = 0u64;
                        for _ in 0..n {
                            let before = self.consumed;
                            let mut rec = Record::new();
                            self.decode_struct(schema, &mut rec)?;
                            if self.consumed == before {
                                empty += 1;
                                if empty > MAX_EMPTY_ELEMENTS
                                    || (items.is_empty() && n > MAX_EMPTY_ELEMENTS)
                                {
                                    return Err(Error::Structure(format!(
                                        "'{}' in '{}' counts {n} elements that occupy no bits",
                                        def.name, self.box_type
                                    )));
                                }
                            }
                            items.push(Value::Struct(rec));
                        }
                        Value::Array(items)
                    }
                    FieldLength::ToEnd => {
                        let mut items = Vec::new();
                        while self.consumed < self.limit {
                            let before = self.consumed;
                            let mut rec = Record::new();
                            self.decode_struct(schema, &mut rec)?;
                            if self.consumed == before {
                                return Err(Error::Schema(format!(
                                    "structure array '{}' makes no progress",
                                    def.name
                                )));
                            }
                            items.push(Value::Struct(rec));
                        }
                        Value::Array(items)
                    }
                };
                out.set(def.name, v);
            }
            FieldKind::String(mode) => {
                let v = self.decode_string(f, *mode, hooks, out)?;
                out.set(def.name, v);
            }
            FieldKind::Uint | FieldKind::Int | FieldKind::Bool => {
                let v = match f.length {
                    FieldLength::Scalar => self.decode_scalar(f)?,
                    FieldLength::Count(n) => self.decode_numeric_array(f, Some(n))?,
                    FieldLength::ToEnd => self.decode_numeric_array(f, None)?,
                };
                out.set(def.name, v);
            }
        }
        Ok(())
    }

    fn decode_scalar(&mut self, f: &ResolvedField<'_>) -> Result<Value> {
        if f.def.varint {
            return self.decode_varint().map(Value::Uint);
        }
        let raw = self.read_raw(f.bit_width)?;
        Ok(match f.def.kind {
            FieldKind::Int => Value::Int(sign_extend(raw, f.bit_width)),
            FieldKind::Bool => Value::Bool(raw != 0),
            _ => Value::Uint(raw),
        })
    }

    fn decode_varint(&mut self) -> Result<u64> {
        let mut v: u64 = 0;
        for _ in 0..MAX_VARINT_GROUPS {
            let octet = self.read_raw(8)? as u8;
            if v >> 57 != 0 {
                break;
            }
            v = (v << 7) | (octet & 0x7f) as u64;
            if octet & 0x80 == 0 {
                return Ok(v);
            }
        }
        Err(Error::VarintTooLong {
            max_groups: MAX_VARINT_GROUPS,
        })
    }

    fn decode_numeric_array(&mut self, f: &ResolvedField<'_>, count: Option<u64>) -> Result<Value> {
        let is_bytes =
            matches!(f.def.kind, FieldKind::Uint) && !f.def.varint && f.bit_width == 8;
        if is_bytes {
            let n = count.unwrap_or_else(|| self.remaining().div_ceil(8));
            return self.read_byte_array(n).map(Value::Bytes);
        }

        let mut items = Vec::new();
        match count {
            Some(n) => {
                if !f.def.varint {
                    self.ensure(n.saturating_mul(f.bit_width as u64))?;
                }
                items.reserve(n.min(1024) as usize);
                for _ in 0..n {
                    items.push(self.decode_scalar(f)?);
                }
            }
            None => {
                while self.consumed < self.limit {
                    items.push(self.decode_scalar(f)?);
                }
            }
        }
        Ok(Value::Array(items))
    }

    fn read_byte_array(&mut self, n: u64) -> Result<Vec<u8>> {
        self.ensure(n.saturating_mul(8))?;
        let mut buf = vec![0u8; n as usize];
        if self.r.is_aligned() {
            self.r.read_bytes(&mut buf)?;
        } else {
            for b in buf.iter_mut() {
                *b = self.r.read_bits_u64(8)? as u8;
            }
        }
        self.consumed += n * 8;
        Ok(buf)
    }

    fn decode_string(
        &mut self,
        f: &ResolvedField<'_>,
        mode: StringMode,
        hooks: &dyn SchemaHooks,
        rec: &Record,
    ) -> Result<Value> {
        match mode {
            StringMode::CStyle => self.read_cstring().map(Value::Str),
            StringMode::Fixed => {
                let n = match f.length {
                    FieldLength::Count(n) => n,
                    _ => self.remaining().div_ceil(8),
                };
                self.read_byte_array(n).map(Value::Str)
            }
            StringMode::CStyleOrPascal => match self.try_pascal(f.def.name, hooks, rec)? {
                Some(b) => Ok(Value::PascalStr(b)),
                None => self.read_cstring().map(Value::Str),
            },
        }
    }

    /// Reads up to a NUL or the end of the payload, whichever comes first.
    fn read_cstring(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        while self.remaining() >= 8 {
            let c = self.read_raw(8)? as u8;
            if c == 0 {
                break;
            }
            data.push(c);
        }
        Ok(data)
    }

    /// Attempts a length-prefixed parse, rewinding when it does not fit or the
    /// schema rejects it.
    fn try_pascal(
        &mut self,
        name: &str,
        hooks: &dyn SchemaHooks,
        rec: &Record,
    ) -> Result<Option<Vec<u8>>> {
        let remaining = self.remaining() / 8;
        if remaining < 2 || !self.r.is_aligned() {
            return Ok(None);
        }
        let start = self.r.position()?;
        let len = self.r.read_bits_u64(8)?;
        let left = remaining - 1;
        if len > left {
            self.r.seek(SeekFrom::Start(start))?;
            return Ok(None);
        }
        let mut buf = vec![0u8; len as usize];
        self.r.read_bytes(&mut buf)?;
        if hooks.accept_pascal_string(name, &buf, left - len, rec, self.ctx) {
            self.consumed += (len + 1) * 8;
            Ok(Some(buf))
        } else {
            self.r.seek(SeekFrom::Start(start))?;
            Ok(None)
        }
    }
}

struct Marshaller<'w, 'c> {
    w: BitWriter<&'w mut dyn Write>,
    written: u64,
    gate: Gate,
    ctx: &'c Context,
}

impl Marshaller<'_, '_> {
    fn write_raw(&mut self, v: u64, width: u32) -> Result<()> {
        self.w.write_bits_u64(v, width)?;
        self.written += width as u64;
        Ok(())
    }

    fn write_byte_slice(&mut self, b: &[u8]) -> Result<()> {
        if self.w.is_aligned() {
            self.w.write_bytes(b)?;
        } else {
            for &c in b {
                self.w.write_bits_u64(c as u64, 8)?;
            }
        }
        self.written += b.len() as u64 * 8;
        Ok(())
    }

    fn encode_struct(&mut self, schema: &Schema, rec: &Record) -> Result<()> {
        let hooks = schema.hooks();
        for def in &schema.fields {
            let Some(field) = resolve(def, self.gate, hooks, rec, self.ctx)? else {
                continue;
            };
            self.encode_field(&field, rec)?;
            let stored = || rec.get_u64(def.name).or(def.constant).unwrap_or(0);
            match def.role {
                Some(FieldRole::Version) => self.gate.version = stored() as u8,
                Some(FieldRole::Flags) => self.gate.flags = stored() as u32,
                None => {}
            }
        }
        Ok(())
    }

    fn encode_field(&mut self, f: &ResolvedField<'_>, rec: &Record) -> Result<()> {
        let def = f.def;
        let value = rec.get(def.name);
        match &def.kind {
            FieldKind::Struct(schema) => {
                if def.extend {
                    return self.encode_struct(schema, rec);
                }
                let v = value.ok_or_else(|| missing(def.name))?;
                if f.length == FieldLength::Scalar {
                    let inner = v
                        .as_record()
                        .ok_or_else(|| Error::field(def.name, "expected a structure"))?;
                    return self.encode_struct(schema, inner);
                }
                let items = v
                    .as_array()
                    .ok_or_else(|| Error::field(def.name, "expected an array of structures"))?;
                self.check_count(def.name, f.length, items.len())?;
                for item in items {
                    let inner = item
                        .as_record()
                        .ok_or_else(|| Error::field(def.name, "expected a structure element"))?;
                    self.encode_struct(schema, inner)?;
                }
                Ok(())
            }
            FieldKind::String(mode) => {
                let v = value.ok_or_else(|| missing(def.name))?;
                self.encode_string(f, *mode, v)
            }
            FieldKind::Uint | FieldKind::Int | FieldKind::Bool => match (f.length, value) {
                (FieldLength::Scalar, Some(v)) => self.encode_scalar(f, v),
                (FieldLength::Scalar, None) => {
                    let c = def.constant.ok_or_else(|| missing(def.name))?;
                    self.encode_scalar(f, &Value::Uint(c))
                }
                (FieldLength::Count(n), None) => {
                    let c = def.constant.ok_or_else(|| missing(def.name))?;
                    for _ in 0..n {
                        self.encode_scalar(f, &Value::Uint(c))?;
                    }
                    Ok(())
                }
                (FieldLength::ToEnd, None) => Err(missing(def.name)),
                (len, Some(Value::Bytes(b))) => {
                    self.check_count(def.name, len, b.len())?;
                    if f.bit_width != 8 || def.varint {
                        return Err(Error::field(def.name, "byte data for a non-8-bit array"));
                    }
                    self.write_byte_slice(b)
                }
                (len, Some(Value::Array(items))) => {
                    self.check_count(def.name, len, items.len())?;
                    for item in items {
                        self.encode_scalar(f, item)?;
                    }
                    Ok(())
                }
                (_, Some(_)) => Err(Error::field(def.name, "expected an array")),
            },
        }
    }

    fn check_count(&self, name: &str, len: FieldLength, actual: usize) -> Result<()> {
        match len {
            FieldLength::Count(n) if n != actual as u64 => Err(Error::field(
                name,
                format!("declared length {n} but value holds {actual} elements"),
            )),
            _ => Ok(()),
        }
    }

    fn encode_scalar(&mut self, f: &ResolvedField<'_>, v: &Value) -> Result<()> {
        let def = f.def;
        let width = f.bit_width;
        if def.varint {
            let n = v
                .as_u64()
                .ok_or_else(|| Error::field(def.name, "expected an unsigned integer"))?;
            let len = self.w.write_uvarint(n)?;
            self.written += len as u64 * 8;
            return Ok(());
        }
        match def.kind {
            FieldKind::Int => {
                let i = v
                    .as_i64()
                    .ok_or_else(|| Error::field(def.name, "expected a signed integer"))?;
                if width < 64 {
                    let max = (1i64 << (width - 1)) - 1;
                    let min = -(1i64 << (width - 1));
                    if i < min || i > max {
                        return Err(Error::field(
                            def.name,
                            format!("{i} does not fit in {width} signed bits"),
                        ));
                    }
                }
                let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
                self.write_raw(i as u64 & mask, width)
            }
            FieldKind::Bool => {
                let b = match v {
                    Value::Bool(b) => *b,
                    Value::Uint(n) => *n != 0,
                    _ => return Err(Error::field(def.name, "expected a boolean")),
                };
                self.write_raw(b as u64, width)
            }
            _ => {
                let n = match v {
                    Value::Uint(n) => *n,
                    Value::Bool(b) => *b as u64,
                    _ => return Err(Error::field(def.name, "expected an unsigned integer")),
                };
                if width < 64 && n >> width != 0 {
                    return Err(Error::field(
                        def.name,
                        format!("{n} does not fit in {width} bits"),
                    ));
                }
                self.write_raw(n, width)
            }
        }
    }

    fn encode_string(&mut self, f: &ResolvedField<'_>, mode: StringMode, v: &Value) -> Result<()> {
        let name = f.def.name;
        let bytes = v
            .as_bytes()
            .ok_or_else(|| Error::field(name, "expected string bytes"))?;
        match (mode, v) {
            (StringMode::Fixed, _) => {
                self.check_count(name, f.length, bytes.len())?;
                self.write_byte_slice(bytes)
            }
            (StringMode::CStyleOrPascal, Value::PascalStr(b)) => {
                let len = u8::try_from(b.len())
                    .map_err(|_| Error::field(name, "pascal string longer than 255 bytes"))?;
                self.write_raw(len as u64, 8)?;
                self.write_byte_slice(b)
            }
            _ => {
                if bytes.contains(&0) {
                    return Err(Error::field(name, "C string contains a NUL byte"));
                }
                self.write_byte_slice(bytes)?;
                self.write_raw(0, 8)
            }
        }
    }
}

use crate::boxes::FourCC;
use crate::schema::Schema;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Uint(u64),
    Int(i64),
    Bool(bool),
    /// NUL-terminated or fixed-length string bytes, terminator excluded.
    Str(Vec<u8>),
    /// String that was (or will be) stored with a leading length byte.
    PascalStr(Vec<u8>),
    /// Array of 8-bit unsigned elements.
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Struct(Record),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::Bool(b) => Some(*b as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(b) | Value::PascalStr(b) | Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str_lossy(&self) -> Option<String> {
        match self {
            Value::Str(b) | Value::PascalStr(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Struct(r) => Some(r),
            _ => None,
        }
    }

    /// Element count for array-like values.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Bytes(b) => Some(b.len()),
            Value::Array(v) => Some(v.len()),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Uint(v) => s.serialize_u64(*v),
            Value::Int(v) => s.serialize_i64(*v),
            Value::Bool(v) => s.serialize_bool(*v),
            Value::Str(b) | Value::PascalStr(b) => s.serialize_str(&String::from_utf8_lossy(b)),
            Value::Bytes(b) => s.serialize_str(&hex::encode(b)),
            Value::Array(v) => v.serialize(s),
            Value::Struct(r) => r.serialize(s),
        }
    }
}

/// Ordered field values of one box or nested structure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(&'static str, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, v: Value) -> Self {
        self.set(name, v);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Value::as_u64)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        self.get(name).and_then(Value::as_bytes)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces an existing value in place, or appends a new field.
    pub fn set(&mut self, name: &'static str, v: Value) {
        match self.get_mut(name) {
            Some(slot) => *slot = v,
            None => self.fields.push((name, v)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(n, _)| *n == name)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.fields.iter().map(|(n, v)| (*n, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.fields.len()))?;
        for (name, v) in &self.fields {
            map.serialize_entry(name, v)?;
        }
        map.end()
    }
}

/// A box payload: its type, the schema that lays it out, and its field values.
#[derive(Clone)]
pub struct BoxValue {
    box_type: FourCC,
    schema: Arc<Schema>,
    pub fields: Record,
}

impl BoxValue {
    pub fn new(box_type: FourCC, schema: Arc<Schema>) -> Self {
        Self {
            box_type,
            schema,
            fields: Record::new(),
        }
    }

    pub fn with_fields(box_type: FourCC, schema: Arc<Schema>, fields: Record) -> Self {
        Self {
            box_type,
            schema,
            fields,
        }
    }

    pub fn box_type(&self) -> FourCC {
        self.box_type
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Full-box version, if the box has one.
    pub fn version(&self) -> Option<u8> {
        self.fields.get_u64(crate::schema::VERSION_FIELD).map(|v| v as u8)
    }

    pub fn flags(&self) -> Option<u32> {
        self.fields.get_u64(crate::schema::FLAGS_FIELD).map(|v| v as u32)
    }

    pub fn set_version(&mut self, v: u8) {
        self.fields.set(crate::schema::VERSION_FIELD, Value::Uint(v as u64));
    }

    pub fn set_flags(&mut self, f: u32) {
        self.fields.set(crate::schema::FLAGS_FIELD, Value::Uint((f & 0x00ff_ffff) as u64));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: &'static str, v: Value) {
        self.fields.set(name, v);
    }
}

impl PartialEq for BoxValue {
    fn eq(&self, other: &Self) -> bool {
        self.box_type == other.box_type && self.fields == other.fields
    }
}

impl fmt::Debug for BoxValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxValue")
            .field("box_type", &self.box_type)
            .field("fields", &self.fields)
            .finish()
    }
}

impl Serialize for BoxValue {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut st = s.serialize_struct("BoxValue", 2)?;
        st.serialize_field("type", &self.box_type)?;
        st.serialize_field("fields", &self.fields)?;
        st.end()
    }
}

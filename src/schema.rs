//! Declarative box layouts.
//!
//! A [`Schema`] is an ordered table of [`FieldDef`]s plus a [`SchemaHooks`]
//! implementation for whatever the table cannot express statically: dynamic
//! widths and counts, presence callbacks, and producer-dialect quirks. One
//! generic engine ([`crate::marshal`]) interprets every schema.
//!
//! ```
//! use isobmff_codec::schema::{FieldDef, Schema};
//!
//! let stco = Schema::full_box(vec![
//!     FieldDef::uint("entry_count", 32),
//!     FieldDef::uint("chunk_offset", 32).to_end(),
//! ]);
//! assert!(stco.is_full_box());
//! ```

use crate::bitio::{BitReader, ReadSeek};
use crate::error::{Error, Result};
use crate::value::Record;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub const VERSION_FIELD: &str = "version";
pub const FLAGS_FIELD: &str = "flags";

pub type DynBitReader<'a> = BitReader<&'a mut dyn ReadSeek>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringMode {
    /// NUL-terminated.
    CStyle,
    /// Exactly `length` bytes, no terminator.
    Fixed,
    /// Length-prefixed when the data allows it, otherwise NUL-terminated.
    CStyleOrPascal,
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    Uint,
    Int,
    Bool,
    String(StringMode),
    Struct(Arc<Schema>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Bits(u32),
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Scalar,
    Fixed(u64),
    Dynamic,
    /// Elements until the payload budget is used up.
    ToEnd,
}

/// Presentation hint for numeric fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumberFormat {
    #[default]
    Dec,
    Hex,
    FourCC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Version,
    Flags,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub width: Width,
    pub length: Length,
    pub version: Option<u8>,
    pub not_version: Option<u8>,
    pub flag_mask: Option<u32>,
    pub not_flag_mask: Option<u32>,
    pub optional: bool,
    pub constant: Option<u64>,
    pub varint: bool,
    pub extend: bool,
    pub format: NumberFormat,
    pub role: Option<FieldRole>,
}

impl FieldDef {
    fn base(name: &'static str, kind: FieldKind, width: Width) -> Self {
        Self {
            name,
            kind,
            width,
            length: Length::Scalar,
            version: None,
            not_version: None,
            flag_mask: None,
            not_flag_mask: None,
            optional: false,
            constant: None,
            varint: false,
            extend: false,
            format: NumberFormat::Dec,
            role: None,
        }
    }

    pub fn uint(name: &'static str, bits: u32) -> Self {
        Self::base(name, FieldKind::Uint, Width::Bits(bits))
    }

    pub fn int(name: &'static str, bits: u32) -> Self {
        Self::base(name, FieldKind::Int, Width::Bits(bits))
    }

    pub fn boolean(name: &'static str, bits: u32) -> Self {
        Self::base(name, FieldKind::Bool, Width::Bits(bits))
    }

    pub fn string(name: &'static str, mode: StringMode) -> Self {
        Self::base(name, FieldKind::String(mode), Width::Bits(8))
    }

    /// 8-bit unsigned array running to the end of the payload.
    pub fn bytes(name: &'static str) -> Self {
        Self::uint(name, 8).to_end()
    }

    pub fn structure(name: &'static str, schema: Arc<Schema>) -> Self {
        Self::base(name, FieldKind::Struct(schema), Width::Bits(0))
    }

    pub fn varint(name: &'static str) -> Self {
        let mut f = Self::base(name, FieldKind::Uint, Width::Bits(0));
        f.varint = true;
        f
    }

    pub fn version(mut self, v: u8) -> Self {
        self.version = Some(v);
        self
    }

    pub fn not_version(mut self, v: u8) -> Self {
        self.not_version = Some(v);
        self
    }

    pub fn flags(mut self, mask: u32) -> Self {
        self.flag_mask = Some(mask);
        self
    }

    pub fn not_flags(mut self, mask: u32) -> Self {
        self.not_flag_mask = Some(mask);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn dynamic_size(mut self) -> Self {
        self.width = Width::Dynamic;
        self
    }

    pub fn dynamic_length(mut self) -> Self {
        self.length = Length::Dynamic;
        self
    }

    pub fn count(mut self, n: u64) -> Self {
        self.length = Length::Fixed(n);
        self
    }

    pub fn to_end(mut self) -> Self {
        self.length = Length::ToEnd;
        self
    }

    pub fn constant(mut self, c: u64) -> Self {
        self.constant = Some(c);
        self
    }

    /// Nested structure whose fields are stored inline in the parent record.
    pub fn extend(mut self) -> Self {
        self.extend = true;
        self
    }

    pub fn hex(mut self) -> Self {
        self.format = NumberFormat::Hex;
        self
    }

    pub fn fourcc(mut self) -> Self {
        self.format = NumberFormat::FourCC;
        self
    }

    pub fn is_array(&self) -> bool {
        self.length != Length::Scalar
    }
}

/// What a [`SchemaHooks::before_field`] call decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOverride {
    /// Decode the field normally.
    Continue,
    /// The hook consumed `bits` itself and stored (or omitted) the field.
    Handled { bits: u64 },
}

/// Decoding state shared across sibling boxes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Context {
    /// Set once an `ftyp` carrying the `qt  ` brand has been seen.
    pub quicktime_compatible: bool,
}

/// Per-schema capabilities the engine calls into.
///
/// Every method has a default. The resolvers default to failing: a schema
/// that declares a dynamic attribute must say how to resolve it.
pub trait SchemaHooks: Send + Sync {
    fn dynamic_size(&self, field: &str, _rec: &Record) -> Result<u32> {
        Err(unresolved(field))
    }

    fn dynamic_length(&self, field: &str, _rec: &Record) -> Result<u64> {
        Err(unresolved(field))
    }

    fn is_present(&self, field: &str, _rec: &Record, _ctx: &Context) -> Result<bool> {
        Err(unresolved(field))
    }

    /// Called before each field is decoded.
    fn before_field(
        &self,
        _field: &str,
        _r: &mut DynBitReader<'_>,
        _remaining_bits: u64,
        _rec: &mut Record,
        _ctx: &Context,
    ) -> Result<FieldOverride> {
        Ok(FieldOverride::Continue)
    }

    /// Second opinion on a candidate length-prefixed string.
    fn accept_pascal_string(
        &self,
        _field: &str,
        _data: &[u8],
        _remaining_bytes: u64,
        _rec: &Record,
        _ctx: &Context,
    ) -> bool {
        true
    }

    fn updates_context(&self) -> bool {
        false
    }

    fn update_context(&self, _rec: &Record, _ctx: &mut Context) {}
}

pub fn unresolved(field: &str) -> Error {
    Error::UnresolvedField {
        field: field.to_string(),
    }
}

pub struct NoHooks;

impl SchemaHooks for NoHooks {}

pub struct Schema {
    pub fields: Vec<FieldDef>,
    /// Child boxes follow the fields inside the payload.
    pub children: bool,
    hooks: Arc<dyn SchemaHooks>,
}

impl Schema {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self {
            fields,
            children: false,
            hooks: Arc::new(NoHooks),
        }
    }

    /// Prepends the 8-bit version and 24-bit flags header.
    pub fn full_box(fields: Vec<FieldDef>) -> Self {
        let mut all = Vec::with_capacity(fields.len() + 2);
        let mut version = FieldDef::uint(VERSION_FIELD, 8);
        version.role = Some(FieldRole::Version);
        let mut flags = FieldDef::uint(FLAGS_FIELD, 24).hex();
        flags.role = Some(FieldRole::Flags);
        all.push(version);
        all.push(flags);
        all.extend(fields);
        Self::new(all)
    }

    pub fn container() -> Self {
        Self::new(Vec::new()).with_children()
    }

    pub fn with_children(mut self) -> Self {
        self.children = true;
        self
    }

    pub fn with_hooks(mut self, hooks: impl SchemaHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn hooks(&self) -> &dyn SchemaHooks {
        self.hooks.as_ref()
    }

    pub fn is_full_box(&self) -> bool {
        self.fields.iter().any(|f| f.role == Some(FieldRole::Flags))
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("fields", &self.fields)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

/// Active full-box version and flags while walking a box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Gate {
    pub version: u8,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLength {
    Scalar,
    Count(u64),
    ToEnd,
}

/// A field occurrence with every gate and dynamic attribute settled.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedField<'a> {
    pub def: &'a FieldDef,
    pub bit_width: u32,
    pub length: FieldLength,
}

/// Resolves `def` against the current gate and record.
///
/// Returns `None` when the field is absent. Gates are checked in order:
/// version, flags, then the presence callback.
pub fn resolve<'a>(
    def: &'a FieldDef,
    gate: Gate,
    hooks: &dyn SchemaHooks,
    rec: &Record,
    ctx: &Context,
) -> Result<Option<ResolvedField<'a>>> {
    if def.version.is_some_and(|v| gate.version != v) {
        return Ok(None);
    }
    if def.not_version.is_some_and(|v| gate.version == v) {
        return Ok(None);
    }
    if def.flag_mask.is_some_and(|m| gate.flags & m == 0) {
        return Ok(None);
    }
    if def.not_flag_mask.is_some_and(|m| gate.flags & m != 0) {
        return Ok(None);
    }
    if def.optional && !hooks.is_present(def.name, rec, ctx)? {
        return Ok(None);
    }

    let bit_width = match def.width {
        Width::Bits(n) => n,
        Width::Dynamic => hooks.dynamic_size(def.name, rec)?,
    };
    let numeric = matches!(def.kind, FieldKind::Uint | FieldKind::Int | FieldKind::Bool);
    if numeric && !def.varint {
        if bit_width == 0 {
            return Err(Error::Schema(format!("field '{}' has zero bit width", def.name)));
        }
        if bit_width > 64 {
            return Err(Error::Schema(format!(
                "field '{}' is {bit_width} bits wide, more than 64",
                def.name
            )));
        }
    }

    let length = match def.length {
        Length::Scalar => FieldLength::Scalar,
        Length::Fixed(n) => FieldLength::Count(n),
        Length::Dynamic => FieldLength::Count(hooks.dynamic_length(def.name, rec)?),
        Length::ToEnd => FieldLength::ToEnd,
    };
    if matches!(def.kind, FieldKind::String(StringMode::Fixed)) && length == FieldLength::Scalar {
        return Err(Error::Schema(format!(
            "fixed string '{}' declares no length",
            def.name
        )));
    }
    if matches!(
        def.kind,
        FieldKind::String(StringMode::CStyle | StringMode::CStyleOrPascal)
    ) && length != FieldLength::Scalar
    {
        return Err(Error::Schema(format!(
            "terminated string '{}' cannot be an array",
            def.name
        )));
    }
    if def.extend && (!matches!(def.kind, FieldKind::Struct(_)) || length != FieldLength::Scalar) {
        return Err(Error::Schema(format!(
            "only scalar structures can be inlined ('{}')",
            def.name
        )));
    }

    Ok(Some(ResolvedField {
        def,
        bit_width,
        length,
    }))
}

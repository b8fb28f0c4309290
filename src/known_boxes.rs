//! Schemas for common MP4 / ISOBMFF boxes.
//!
//! [`default_registry`] is enough to walk and re-encode the structure of a
//! typical progressive or fragmented MP4. Sample entries and codec
//! configuration boxes are left opaque. `mdat`, `free` and `skip` declare no
//! fields, so their payloads are never pulled into memory; copy them with
//! [`Writer::copy_box`].
//!
//! [`Writer::copy_box`]: crate::writer::Writer::copy_box

use crate::boxes::FourCC;
use crate::error::Result;
use crate::registry::Registry;
use crate::schema::{
    Context, DynBitReader, FLAGS_FIELD, FieldDef, FieldOverride, Schema, SchemaHooks, StringMode,
    VERSION_FIELD, unresolved,
};
use crate::value::{Record, Value};
use std::io::SeekFrom;
use std::sync::{Arc, OnceLock};

pub const QUICKTIME_BRAND: FourCC = FourCC::new(b"qt  ");

const CONTAINERS: &[&[u8; 4]] = &[
    b"moov", b"trak", b"mdia", b"minf", b"stbl", b"dinf", b"edts", b"udta", b"mvex", b"moof",
    b"traf", b"mfra", b"sinf", b"schi",
];

/// Process-wide registry with every schema in this module.
pub fn default_registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        standard_registry().expect("standard box catalog registers each type once")
    })
}

/// Builds a fresh registry holding the standard catalog.
pub fn standard_registry() -> Result<Registry> {
    let mut b = Registry::builder();
    for t in CONTAINERS {
        b = b.register(FourCC::new(t), Schema::container(), &[])?;
    }
    b.register(FourCC::new(b"ftyp"), file_type(), &[])?
        .register(FourCC::new(b"styp"), file_type(), &[])?
        .register(FourCC::new(b"free"), unread(), &[])?
        .register(FourCC::new(b"skip"), unread(), &[])?
        .register(FourCC::new(b"mdat"), unread(), &[])?
        .register(FourCC::new(b"mvhd"), mvhd(), &[0, 1])?
        .register(FourCC::new(b"tkhd"), tkhd(), &[0, 1])?
        .register(FourCC::new(b"mdhd"), mdhd(), &[0, 1])?
        .register(FourCC::new(b"hdlr"), hdlr(), &[0])?
        .register(FourCC::new(b"meta"), meta(), &[0])?
        .register(FourCC::new(b"stsd"), entry_container(), &[0])?
        .register(FourCC::new(b"dref"), entry_container(), &[0])?
        .register(FourCC::new(b"url "), url(), &[0])?
        .register(FourCC::new(b"stts"), stts(), &[0])?
        .register(FourCC::new(b"stsz"), stsz(), &[0])?
        .register(FourCC::new(b"stco"), chunk_offsets(32), &[0])?
        .register(FourCC::new(b"co64"), chunk_offsets(64), &[0])?
        .register(FourCC::new(b"elst"), elst(), &[0, 1])?
        .register(FourCC::new(b"mfhd"), mfhd(), &[0])?
        .register(FourCC::new(b"tfhd"), tfhd(), &[0])?
        .register(FourCC::new(b"tfdt"), tfdt(), &[0, 1])?
        .register(FourCC::new(b"trun"), trun(), &[0, 1])?
        .register(FourCC::new(b"mehd"), mehd(), &[0, 1])?
        .register(FourCC::new(b"trex"), trex(), &[0])?
        .register(FourCC::new(b"esds"), esds(), &[0])
        .map(|b| b.build())
}

/// Human-readable name for a box type, used by the dump tool.
pub fn describe(box_type: FourCC) -> Option<&'static str> {
    let name = match &box_type.0 {
        b"ftyp" => "File Type Box",
        b"styp" => "Segment Type Box",
        b"moov" => "Movie Box",
        b"mvhd" => "Movie Header Box",
        b"trak" => "Track Box",
        b"tkhd" => "Track Header Box",
        b"edts" => "Edit Box",
        b"elst" => "Edit List Box",
        b"mdia" => "Media Box",
        b"mdhd" => "Media Header Box",
        b"hdlr" => "Handler Reference Box",
        b"minf" => "Media Information Box",
        b"dinf" => "Data Information Box",
        b"dref" => "Data Reference Box",
        b"url " => "Data Entry URL Box",
        b"stbl" => "Sample Table Box",
        b"stsd" => "Sample Description Box",
        b"stts" => "Decoding Time to Sample Box",
        b"stsz" => "Sample Size Box",
        b"stco" => "Chunk Offset Box",
        b"co64" => "64-bit Chunk Offset Box",
        b"udta" => "User Data Box",
        b"meta" => "Meta Box",
        b"mvex" => "Movie Extends Box",
        b"mehd" => "Movie Extends Header Box",
        b"trex" => "Track Extends Box",
        b"moof" => "Movie Fragment Box",
        b"mfhd" => "Movie Fragment Header Box",
        b"traf" => "Track Fragment Box",
        b"tfhd" => "Track Fragment Header Box",
        b"tfdt" => "Track Fragment Decode Time Box",
        b"trun" => "Track Fragment Run Box",
        b"mfra" => "Movie Fragment Random Access Box",
        b"sinf" => "Protection Scheme Information Box",
        b"schi" => "Scheme Information Box",
        b"esds" => "Elementary Stream Descriptor Box",
        b"free" | b"skip" => "Free Space Box",
        b"mdat" => "Media Data Box",
        _ => return None,
    };
    Some(name)
}

fn u(name: &'static str, bits: u32) -> FieldDef {
    FieldDef::uint(name, bits)
}

fn reserved(name: &'static str, bits: u32) -> FieldDef {
    FieldDef::uint(name, bits).constant(0)
}

/// A field that is 32 bits wide in version 0 and 64 bits wide in version 1.
fn versioned(name: &'static str) -> [FieldDef; 2] {
    [u(name, 32).version(0), u(name, 64).version(1)]
}

/// No fields: the payload is left in the file.
fn unread() -> Schema {
    Schema::new(Vec::new())
}

fn entry_container() -> Schema {
    Schema::full_box(vec![u("entry_count", 32)]).with_children()
}

struct FileTypeHooks;

impl SchemaHooks for FileTypeHooks {
    fn updates_context(&self) -> bool {
        true
    }

    fn update_context(&self, rec: &Record, ctx: &mut Context) {
        let qt = QUICKTIME_BRAND.to_u32() as u64;
        let compatible = rec
            .get("compatible_brands")
            .and_then(Value::as_array)
            .is_some_and(|brands| brands.iter().any(|b| b.as_u64() == Some(qt)));
        if rec.get_u64("major_brand") == Some(qt) || compatible {
            ctx.quicktime_compatible = true;
        }
    }
}

fn file_type() -> Schema {
    Schema::new(vec![
        u("major_brand", 32).fourcc(),
        u("minor_version", 32),
        u("compatible_brands", 32).to_end().fourcc(),
    ])
    .with_hooks(FileTypeHooks)
}

fn mvhd() -> Schema {
    let mut fields = Vec::new();
    fields.extend(versioned("creation_time"));
    fields.extend(versioned("modification_time"));
    fields.push(u("timescale", 32));
    fields.extend(versioned("duration"));
    fields.extend([
        FieldDef::int("rate", 32),
        FieldDef::int("volume", 16),
        reserved("reserved", 16),
        reserved("reserved2", 32).count(2),
        FieldDef::int("matrix", 32).count(9),
        reserved("pre_defined", 32).count(6),
        u("next_track_id", 32),
    ]);
    Schema::full_box(fields)
}

fn tkhd() -> Schema {
    let mut fields = Vec::new();
    fields.extend(versioned("creation_time"));
    fields.extend(versioned("modification_time"));
    fields.push(u("track_id", 32));
    fields.push(reserved("reserved0", 32));
    fields.extend(versioned("duration"));
    fields.extend([
        reserved("reserved1", 32).count(2),
        FieldDef::int("layer", 16),
        FieldDef::int("alternate_group", 16),
        FieldDef::int("volume", 16),
        reserved("reserved2", 16),
        FieldDef::int("matrix", 32).count(9),
        u("width", 32),
        u("height", 32),
    ]);
    Schema::full_box(fields)
}

fn mdhd() -> Schema {
    let mut fields = Vec::new();
    fields.extend(versioned("creation_time"));
    fields.extend(versioned("modification_time"));
    fields.push(u("timescale", 32));
    fields.extend(versioned("duration"));
    fields.extend([
        reserved("pad", 1),
        u("language", 5).count(3),
        reserved("pre_defined", 16),
    ]);
    Schema::full_box(fields)
}

/// Decodes the packed ISO-639-2/T language code of an `mdhd` box.
pub fn mdhd_language(rec: &Record) -> Option<String> {
    let letters = rec.get("language")?.as_array()?;
    letters
        .iter()
        .map(|l| l.as_u64().map(|c| (c as u8 + 0x60) as char))
        .collect()
}

struct HandlerHooks;

impl SchemaHooks for HandlerHooks {
    /// QuickTime handlers store the name length-prefixed and fill the rest
    /// of the box with it; they also set the component type, which ISO
    /// files leave zero.
    fn accept_pascal_string(
        &self,
        _field: &str,
        _data: &[u8],
        remaining_bytes: u64,
        rec: &Record,
        _ctx: &Context,
    ) -> bool {
        remaining_bytes == 0 && rec.get_u64("pre_defined").unwrap_or(0) != 0
    }
}

fn hdlr() -> Schema {
    Schema::full_box(vec![
        u("pre_defined", 32).fourcc(),
        u("handler_type", 32).fourcc(),
        reserved("reserved", 32).count(3),
        FieldDef::string("name", StringMode::CStyleOrPascal),
    ])
    .with_hooks(HandlerHooks)
}

struct MetaHooks;

impl SchemaHooks for MetaHooks {
    /// QuickTime `meta` boxes omit version and flags and start straight
    /// with a child box, whose size field is never zero.
    fn before_field(
        &self,
        field: &str,
        r: &mut DynBitReader<'_>,
        remaining_bits: u64,
        rec: &mut Record,
        _ctx: &Context,
    ) -> Result<FieldOverride> {
        if field == FLAGS_FIELD && rec.contains(FLAGS_FIELD) {
            return Ok(FieldOverride::Handled { bits: 0 });
        }
        if field != VERSION_FIELD || remaining_bits < 32 || !r.is_aligned() {
            return Ok(FieldOverride::Continue);
        }
        let start = r.position()?;
        let peek = r.read_bits_u64(32)?;
        r.seek(SeekFrom::Start(start))?;
        if peek == 0 {
            return Ok(FieldOverride::Continue);
        }
        rec.set(VERSION_FIELD, Value::Uint(0));
        rec.set(FLAGS_FIELD, Value::Uint(0));
        Ok(FieldOverride::Handled { bits: 0 })
    }
}

fn meta() -> Schema {
    Schema::full_box(Vec::new())
        .with_children()
        .with_hooks(MetaHooks)
}

fn url() -> Schema {
    // flag 0x1: media data is in the same file, no location follows
    Schema::full_box(vec![
        FieldDef::string("location", StringMode::CStyle).not_flags(0x1),
    ])
}

/// Array lengths taken from a count field earlier in the same record.
struct CountedBy(&'static [(&'static str, &'static str)]);

impl SchemaHooks for CountedBy {
    fn dynamic_length(&self, field: &str, rec: &Record) -> Result<u64> {
        let (_, count) = self
            .0
            .iter()
            .find(|(f, _)| *f == field)
            .ok_or_else(|| unresolved(field))?;
        rec.get_u64(count).ok_or_else(|| unresolved(count))
    }
}

fn stts() -> Schema {
    let entry = Schema::new(vec![u("sample_count", 32), u("sample_delta", 32)]);
    Schema::full_box(vec![
        u("entry_count", 32),
        FieldDef::structure("entries", Arc::new(entry)).dynamic_length(),
    ])
    .with_hooks(CountedBy(&[("entries", "entry_count")]))
}

struct SampleSizeHooks;

impl SchemaHooks for SampleSizeHooks {
    fn is_present(&self, field: &str, rec: &Record, _ctx: &Context) -> Result<bool> {
        match field {
            "entry_size" => Ok(rec.get_u64("sample_size") == Some(0)),
            _ => Err(unresolved(field)),
        }
    }

    fn dynamic_length(&self, field: &str, rec: &Record) -> Result<u64> {
        match field {
            "entry_size" => rec.get_u64("sample_count").ok_or_else(|| unresolved(field)),
            _ => Err(unresolved(field)),
        }
    }
}

fn stsz() -> Schema {
    Schema::full_box(vec![
        u("sample_size", 32),
        u("sample_count", 32),
        u("entry_size", 32).optional().dynamic_length(),
    ])
    .with_hooks(SampleSizeHooks)
}

fn chunk_offsets(bits: u32) -> Schema {
    Schema::full_box(vec![
        u("entry_count", 32),
        u("chunk_offset", bits).dynamic_length(),
    ])
    .with_hooks(CountedBy(&[("chunk_offset", "entry_count")]))
}

fn elst() -> Schema {
    let entry = Schema::new(vec![
        u("segment_duration", 32).version(0),
        u("segment_duration", 64).version(1),
        FieldDef::int("media_time", 32).version(0),
        FieldDef::int("media_time", 64).version(1),
        FieldDef::int("media_rate_integer", 16),
        FieldDef::int("media_rate_fraction", 16),
    ]);
    Schema::full_box(vec![
        u("entry_count", 32),
        FieldDef::structure("entries", Arc::new(entry)).dynamic_length(),
    ])
    .with_hooks(CountedBy(&[("entries", "entry_count")]))
}

fn mfhd() -> Schema {
    Schema::full_box(vec![u("sequence_number", 32)])
}

fn tfhd() -> Schema {
    Schema::full_box(vec![
        u("track_id", 32),
        u("base_data_offset", 64).flags(0x00_0001),
        u("sample_description_index", 32).flags(0x00_0002),
        u("default_sample_duration", 32).flags(0x00_0008),
        u("default_sample_size", 32).flags(0x00_0010),
        u("default_sample_flags", 32).flags(0x00_0020).hex(),
    ])
}

fn tfdt() -> Schema {
    Schema::full_box(versioned("base_media_decode_time").into())
}

fn trun() -> Schema {
    let entry = Schema::new(vec![
        u("sample_duration", 32).flags(0x00_0100),
        u("sample_size", 32).flags(0x00_0200),
        u("sample_flags", 32).flags(0x00_0400).hex(),
        u("sample_composition_time_offset", 32)
            .version(0)
            .flags(0x00_0800),
        FieldDef::int("sample_composition_time_offset", 32)
            .not_version(0)
            .flags(0x00_0800),
    ]);
    Schema::full_box(vec![
        u("sample_count", 32),
        FieldDef::int("data_offset", 32).flags(0x00_0001),
        u("first_sample_flags", 32).flags(0x00_0004).hex(),
        FieldDef::structure("entries", Arc::new(entry)).dynamic_length(),
    ])
    .with_hooks(CountedBy(&[("entries", "sample_count")]))
}

fn mehd() -> Schema {
    Schema::full_box(versioned("fragment_duration").into())
}

fn trex() -> Schema {
    Schema::full_box(vec![
        u("track_id", 32),
        u("default_sample_description_index", 32),
        u("default_sample_duration", 32),
        u("default_sample_size", 32),
        u("default_sample_flags", 32).hex(),
    ])
}

const ES_DESCRIPTOR_TAG: u64 = 0x03;
const DECODER_CONFIG_TAG: u64 = 0x04;

struct EsDescriptorHooks;

impl SchemaHooks for EsDescriptorHooks {
    fn is_present(&self, field: &str, rec: &Record, _ctx: &Context) -> Result<bool> {
        let flag = match field {
            "depends_on_es_id" => "stream_dependence_flag",
            "url_length" | "url_string" => "url_flag",
            "ocr_es_id" => "ocr_stream_flag",
            _ => return Err(unresolved(field)),
        };
        Ok(rec.get_u64(flag).unwrap_or(0) != 0)
    }

    fn dynamic_length(&self, field: &str, rec: &Record) -> Result<u64> {
        match field {
            "url_string" => rec.get_u64("url_length").ok_or_else(|| unresolved(field)),
            _ => Err(unresolved(field)),
        }
    }
}

struct DescriptorHooks;

impl SchemaHooks for DescriptorHooks {
    fn is_present(&self, field: &str, rec: &Record, _ctx: &Context) -> Result<bool> {
        let tag = rec.get_u64("tag").ok_or_else(|| unresolved("tag"))?;
        match field {
            "es_descriptor" => Ok(tag == ES_DESCRIPTOR_TAG),
            "decoder_config" => Ok(tag == DECODER_CONFIG_TAG),
            "data" => Ok(tag != ES_DESCRIPTOR_TAG && tag != DECODER_CONFIG_TAG),
            _ => Err(unresolved(field)),
        }
    }

    fn dynamic_length(&self, field: &str, rec: &Record) -> Result<u64> {
        match field {
            "data" => rec.get_u64("size").ok_or_else(|| unresolved("size")),
            _ => Err(unresolved(field)),
        }
    }
}

/// MPEG-4 descriptors, flattened: an ES descriptor's size also covers the
/// descriptors that follow it in the list.
fn esds() -> Schema {
    let es = Schema::new(vec![
        u("es_id", 16),
        FieldDef::boolean("stream_dependence_flag", 1),
        FieldDef::boolean("url_flag", 1),
        FieldDef::boolean("ocr_stream_flag", 1),
        u("stream_priority", 5),
        u("depends_on_es_id", 16).optional(),
        u("url_length", 8).optional(),
        FieldDef::string("url_string", StringMode::Fixed)
            .optional()
            .dynamic_length(),
        u("ocr_es_id", 16).optional(),
    ])
    .with_hooks(EsDescriptorHooks);

    let decoder_config = Schema::new(vec![
        u("object_type_indication", 8).hex(),
        u("stream_type", 6),
        FieldDef::boolean("up_stream", 1),
        FieldDef::uint("reserved", 1).constant(1),
        u("buffer_size_db", 24),
        u("max_bitrate", 32),
        u("avg_bitrate", 32),
    ]);

    let descriptor = Schema::new(vec![
        u("tag", 8).hex(),
        FieldDef::varint("size"),
        FieldDef::structure("es_descriptor", Arc::new(es)).optional(),
        FieldDef::structure("decoder_config", Arc::new(decoder_config)).optional(),
        FieldDef::bytes("data").optional().dynamic_length(),
    ])
    .with_hooks(DescriptorHooks);

    Schema::full_box(vec![
        FieldDef::structure("descriptors", Arc::new(descriptor)).to_end(),
    ])
}

//! Lazy box-tree traversal.
//!
//! [`traverse`] walks sibling boxes and hands each one to a [`BoxVisitor`] as
//! a [`BoxNode`]. Nothing is decoded unless the visitor asks for it; children
//! are only visited when the visitor calls [`BoxNode::expand`].

use crate::bitio::ReadSeek;
use crate::boxes::{BoxHeader, BoxPath, FourCC};
use crate::error::{Error, Result};
use crate::header::{SMALL_HEADER_SIZE, read_box_header_in};
use crate::marshal;
use crate::registry::Registry;
use crate::schema::Context;
use crate::value::BoxValue;
use serde::Serialize;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

pub trait BoxVisitor {
    type Output;

    fn visit(&mut self, node: &mut BoxNode<'_>) -> Result<Self::Output>;
}

/// One box encountered during traversal.
pub struct BoxNode<'a> {
    r: &'a mut dyn ReadSeek,
    registry: &'a Registry,
    header: BoxHeader,
    path: BoxPath,
    ctx: Context,
    scope_end: u64,
    fields_bits: Option<u64>,
}

impl BoxNode<'_> {
    pub fn header(&self) -> &BoxHeader {
        &self.header
    }

    pub fn path(&self) -> &BoxPath {
        &self.path
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Bytes left in the enclosing scope, counted from the start of this box.
    pub fn remaining_budget(&self) -> u64 {
        self.scope_end.saturating_sub(self.header.offset)
    }

    pub fn is_supported_type(&self) -> bool {
        self.registry.is_supported_type(self.header.box_type)
    }

    /// Decodes the payload fields. Returns `None` for unregistered types.
    pub fn decode_payload(&mut self) -> Result<Option<BoxValue>> {
        Ok(self.decode_fields()?.map(|(value, _)| value))
    }

    /// Payload bytes taken by the fields, once they have been decoded.
    pub fn fields_len(&self) -> Option<u64> {
        self.fields_bits.map(|bits| bits / 8)
    }

    /// True when child boxes tile the payload after the fields exactly, with no
    /// short trailing bytes for the walker to skip.
    pub fn children_fill_payload(&mut self) -> Result<bool> {
        let Some(bits) = self.ensure_fields_decoded()? else {
            return Ok(false);
        };
        let end = self.header.end();
        let mut pos = self.header.payload_offset() + bits / 8;
        while pos < end {
            if end - pos < SMALL_HEADER_SIZE {
                return Ok(false);
            }
            self.r.seek(SeekFrom::Start(pos))?;
            let child = read_box_header_in(&mut *self.r, end)?;
            if child.size > end - pos {
                return Ok(false);
            }
            pos = child.end();
        }
        Ok(true)
    }

    fn ensure_fields_decoded(&mut self) -> Result<Option<u64>> {
        if self.fields_bits.is_some() {
            return Ok(self.fields_bits);
        }
        Ok(self.decode_fields()?.map(|(_, bits)| bits))
    }

    fn decode_fields(&mut self) -> Result<Option<(BoxValue, u64)>> {
        let Some(mut value) = self.registry.new_box(self.header.box_type) else {
            return Ok(None);
        };
        self.r.seek(SeekFrom::Start(self.header.payload_offset()))?;
        let bits = marshal::decode(
            &mut *self.r,
            self.header.payload_size(),
            &mut value,
            self.registry,
            &self.ctx,
        )?;
        self.fields_bits = Some(bits);
        Ok(Some((value, bits)))
    }

    /// Copies the payload verbatim into `sink`. Returns the number of bytes copied.
    pub fn read_raw<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<u64> {
        let want = self.header.payload_size();
        self.r.seek(SeekFrom::Start(self.header.payload_offset()))?;
        let copied = io::copy(&mut (&mut *self.r).take(want), sink)?;
        if copied != want {
            return Err(Error::EndOfData);
        }
        Ok(copied)
    }

    /// Visits the children of a container box.
    ///
    /// The node's own fields are decoded first, unless [`decode_payload`] already
    /// did, to find where the children start. Unregistered and non-container
    /// types have no children.
    ///
    /// [`decode_payload`]: BoxNode::decode_payload
    pub fn expand<V: BoxVisitor + ?Sized>(&mut self, visitor: &mut V) -> Result<Vec<V::Output>> {
        let has_children = self
            .registry
            .lookup(self.header.box_type)
            .is_some_and(|reg| reg.schema.children);
        if !has_children {
            return Ok(Vec::new());
        }
        let Some(bits) = self.ensure_fields_decoded()? else {
            return Ok(Vec::new());
        };
        let first_child = self.header.payload_offset() + bits / 8;
        self.r.seek(SeekFrom::Start(first_child))?;

        let mut ctx = self.ctx;
        walk(
            &mut *self.r,
            self.registry,
            visitor,
            &self.path,
            self.header.end(),
            false,
            &mut ctx,
        )
    }
}

/// Walks every root box from the current position to the end of the stream.
pub fn traverse<R, V>(r: &mut R, registry: &Registry, visitor: &mut V) -> Result<Vec<V::Output>>
where
    R: Read + Seek,
    V: BoxVisitor + ?Sized,
{
    let start = r.stream_position()?;
    let end = r.seek(SeekFrom::End(0))?;
    r.seek(SeekFrom::Start(start))?;
    let mut ctx = Context::default();
    walk(r, registry, visitor, &BoxPath::new(), end, true, &mut ctx)
}

fn walk<V: BoxVisitor + ?Sized>(
    r: &mut dyn ReadSeek,
    registry: &Registry,
    visitor: &mut V,
    parent: &BoxPath,
    end: u64,
    root: bool,
    ctx: &mut Context,
) -> Result<Vec<V::Output>> {
    let mut out = Vec::new();
    loop {
        let pos = r.stream_position()?;
        if pos >= end {
            break;
        }
        let left = end - pos;
        if left < SMALL_HEADER_SIZE {
            if ctx.quicktime_compatible {
                // QuickTime writers pad some scopes with a short terminator
                r.seek(SeekFrom::Start(end))?;
                break;
            }
            return Err(Error::Structure(format!(
                "{left} trailing bytes at offset {pos} under '{parent}'"
            )));
        }

        let hdr = read_box_header_in(r, end)?;
        if root && hdr.extends_to_end && hdr.box_type == FourCC::ANY {
            return Err(Error::Structure(format!(
                "all-zero box header at offset {pos}"
            )));
        }
        if hdr.size > left {
            return Err(Error::Structure(format!(
                "'{}' at offset {pos} is {} bytes but only {left} remain",
                hdr.box_type, hdr.size
            )));
        }

        let path = parent.child(hdr.box_type);
        debug!(path = %path, offset = hdr.offset, size = hdr.size, "box");

        update_context(r, registry, &hdr, ctx)?;

        let mut node = BoxNode {
            r: &mut *r,
            registry,
            header: hdr,
            path,
            ctx: *ctx,
            scope_end: end,
            fields_bits: None,
        };
        out.push(visitor.visit(&mut node)?);
        r.seek(SeekFrom::Start(hdr.end()))?;
    }
    Ok(out)
}

/// Boxes whose schema feeds the decoding context are decoded up front.
fn update_context(
    r: &mut dyn ReadSeek,
    registry: &Registry,
    hdr: &BoxHeader,
    ctx: &mut Context,
) -> Result<()> {
    let Some(reg) = registry.lookup(hdr.box_type) else {
        return Ok(());
    };
    if !reg.schema.hooks().updates_context() {
        return Ok(());
    }
    let mut value = BoxValue::new(hdr.box_type, reg.schema.clone());
    r.seek(SeekFrom::Start(hdr.payload_offset()))?;
    match marshal::decode(r, hdr.payload_size(), &mut value, registry, ctx) {
        Ok(_) => reg.schema.hooks().update_context(&value.fields, ctx),
        Err(err) if err.is_recoverable() => {
            warn!(box_type = %hdr.box_type, offset = hdr.offset, "{err}");
        }
        Err(err) => return Err(err),
    }
    r.seek(SeekFrom::Start(hdr.payload_offset()))?;
    Ok(())
}

/// Headers of every box whose path matches one of `paths`.
///
/// [`FourCC::ANY`] in a pattern matches any box type at that depth.
pub fn extract_boxes<R: Read + Seek>(
    r: &mut R,
    registry: &Registry,
    paths: &[BoxPath],
) -> Result<Vec<BoxHeader>> {
    let mut ex = Extractor { paths };
    let found = traverse(r, registry, &mut ex)?;
    Ok(found.into_iter().flatten().collect())
}

struct Extractor<'p> {
    paths: &'p [BoxPath],
}

impl BoxVisitor for Extractor<'_> {
    type Output = Vec<BoxHeader>;

    fn visit(&mut self, node: &mut BoxNode<'_>) -> Result<Vec<BoxHeader>> {
        let mut found = Vec::new();
        let path = node.path();
        if self.paths.iter().any(|p| path.matches(p)) {
            found.push(*node.header());
        }
        let descend = self
            .paths
            .iter()
            .any(|p| path.len() < p.len() && path.is_prefix_of(p));
        if descend {
            for below in node.expand(self)? {
                found.extend(below);
            }
        }
        Ok(found)
    }
}

/// How much of a box [`read_box_tree`] managed to decode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Payload {
    Decoded { value: BoxValue },
    /// No schema is registered for the type.
    Opaque,
    UnsupportedVersion { version: u8 },
}

/// An owned, fully decoded box and its descendants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxTree {
    pub header: BoxHeader,
    pub path: BoxPath,
    pub payload: Payload,
    pub children: Vec<BoxTree>,
}

impl BoxTree {
    pub fn value(&self) -> Option<&BoxValue> {
        match &self.payload {
            Payload::Decoded { value } => Some(value),
            _ => None,
        }
    }

    /// Depth-first search for the first box of `box_type`.
    pub fn find(&self, box_type: FourCC) -> Option<&BoxTree> {
        if self.header.box_type == box_type {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(box_type))
    }
}

/// Decodes the whole stream into owned trees, one per root box.
///
/// Boxes with unsupported versions are kept undecoded and traversal continues
/// with their next sibling.
pub fn read_box_tree<R: Read + Seek>(r: &mut R, registry: &Registry) -> Result<Vec<BoxTree>> {
    traverse(r, registry, &mut TreeBuilder)
}

struct TreeBuilder;

impl BoxVisitor for TreeBuilder {
    type Output = BoxTree;

    fn visit(&mut self, node: &mut BoxNode<'_>) -> Result<BoxTree> {
        let header = *node.header();
        let path = node.path().clone();
        let (payload, children) = match node.decode_payload() {
            Ok(Some(value)) => {
                let children = node.expand(self)?;
                (Payload::Decoded { value }, children)
            }
            Ok(None) => (Payload::Opaque, Vec::new()),
            Err(Error::UnsupportedVersion { version, .. }) => {
                warn!(path = %path, version, "skipping box with unsupported version");
                (Payload::UnsupportedVersion { version }, Vec::new())
            }
            Err(err) => return Err(err),
        };
        Ok(BoxTree {
            header,
            path,
            payload,
            children,
        })
    }
}

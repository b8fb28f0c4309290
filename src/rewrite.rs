//! Box-by-box re-encoding of a whole file.
//!
//! Every box whose payload the registry fully describes is decoded and written
//! back through [`Writer`]; anything else is copied verbatim, so a file the
//! codec only partly understands still comes out intact.

use crate::boxes::BoxHeader;
use crate::error::{Error, Result};
use crate::marshal;
use crate::parser::{BoxNode, BoxVisitor, traverse};
use crate::registry::Registry;
use crate::writer::Writer;
use std::io::{Read, Seek, Write};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Boxes written from their decoded fields.
    pub encoded: usize,
    /// Boxes copied byte for byte, children included.
    pub copied: usize,
}

/// A [`BoxVisitor`] that writes each visited box to `W`.
pub struct Rewriter<W> {
    out: Writer<W>,
    stats: RewriteStats,
}

impl<W: Write + Seek> Rewriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Writer::new(out),
            stats: RewriteStats::default(),
        }
    }

    pub fn stats(&self) -> RewriteStats {
        self.stats
    }

    pub fn finish(self) -> Result<(W, RewriteStats)> {
        Ok((self.out.finish()?, self.stats))
    }

    /// Opens a box with the same header form as `src`.
    fn open_like(&mut self, src: &BoxHeader) -> Result<()> {
        let mut hdr = BoxHeader::new(src.box_type);
        hdr.header_size = src.header_size;
        hdr.extends_to_end = src.extends_to_end;
        self.out.start_box_with(hdr)?;
        Ok(())
    }

    fn copy(&mut self, node: &mut BoxNode<'_>) -> Result<()> {
        self.open_like(node.header())?;
        node.read_raw(&mut self.out)?;
        self.out.end_box()?;
        self.stats.copied += 1;
        Ok(())
    }
}

impl<W: Write + Seek> BoxVisitor for Rewriter<W> {
    type Output = ();

    fn visit(&mut self, node: &mut BoxNode<'_>) -> Result<()> {
        let value = match node.decode_payload() {
            Ok(Some(value)) => value,
            Ok(None) | Err(Error::UnsupportedVersion { .. }) => return self.copy(node),
            Err(err) => return Err(err),
        };
        let hdr = *node.header();
        let encoded_len = marshal::encoded_len(&value, node.context())?;

        if value.schema().children {
            let fields_len = node.fields_len().unwrap_or(0);
            if encoded_len != fields_len || !node.children_fill_payload()? {
                debug!(path = %node.path(), encoded_len, fields_len, "container copied verbatim");
                return self.copy(node);
            }
            self.open_like(&hdr)?;
            marshal::encode(&mut self.out, &value, node.context())?;
            node.expand(self)?;
            self.out.end_box()?;
            self.stats.encoded += 1;
            return Ok(());
        }

        // trailing bytes the schema does not describe would be lost
        if encoded_len != hdr.payload_size() {
            return self.copy(node);
        }
        self.open_like(&hdr)?;
        marshal::encode(&mut self.out, &value, node.context())?;
        self.out.end_box()?;
        self.stats.encoded += 1;
        Ok(())
    }
}

/// Rewrites every root box of `input` into `output`.
pub fn rewrite<R, W>(input: &mut R, output: W, registry: &Registry) -> Result<(W, RewriteStats)>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut rewriter = Rewriter::new(output);
    traverse(input, registry, &mut rewriter)?;
    rewriter.finish()
}

use crate::boxes::{BoxHeader, FourCC};
use crate::error::{Error, Result};
use crate::header::{encoded_header_size, write_box_header};
use crate::marshal;
use crate::schema::Context;
use crate::value::BoxValue;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::debug;

struct Frame {
    header: BoxHeader,
    /// Bytes written inside the box so far, nested boxes included.
    written: u64,
}

/// Writes nested boxes, patching each header with its final size when the box
/// is closed.
///
/// Everything written through the [`Write`] impl counts toward the innermost
/// open box.
pub struct Writer<W> {
    inner: W,
    frames: Vec<Frame>,
}

impl<W: Write + Seek> Writer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            frames: Vec::new(),
        }
    }

    /// Number of boxes currently open.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Opens a box with a provisional 8-byte header.
    pub fn start_box(&mut self, box_type: FourCC) -> Result<BoxHeader> {
        self.start_box_with(BoxHeader::new(box_type))
    }

    /// Opens a box with a caller-chosen provisional header.
    ///
    /// Use a 16-byte `header_size` to reserve room for a 64-bit size, or
    /// `extends_to_end` to leave the size field zero.
    pub fn start_box_with(&mut self, hdr: BoxHeader) -> Result<BoxHeader> {
        let written = write_box_header(&mut self.inner, &hdr)?;
        debug!(
            box_type = %written.box_type,
            offset = written.offset,
            depth = self.frames.len(),
            "start box"
        );
        self.frames.push(Frame {
            header: written,
            written: 0,
        });
        Ok(written)
    }

    /// Closes the innermost box and rewrites its header with the final size.
    pub fn end_box(&mut self) -> Result<BoxHeader> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Error::Structure("end_box called with no open box".into()))?;
        let mut hdr = frame.header;
        hdr.size = hdr.header_size + frame.written;

        if !hdr.extends_to_end {
            let actual = encoded_header_size(&hdr);
            if actual != hdr.header_size {
                return Err(Error::HeaderSizeChanged {
                    box_type: hdr.box_type,
                    provisional: hdr.header_size,
                    actual,
                });
            }
            let end = self.inner.stream_position()?;
            self.inner.seek(SeekFrom::Start(hdr.offset))?;
            write_box_header(&mut self.inner, &hdr)?;
            self.inner.seek(SeekFrom::Start(end))?;
        }

        if let Some(parent) = self.frames.last_mut() {
            parent.written += hdr.size;
        }
        debug!(box_type = %hdr.box_type, offset = hdr.offset, size = hdr.size, "end box");
        Ok(hdr)
    }

    /// Writes `value` as a complete box.
    pub fn write_box(&mut self, value: &BoxValue, ctx: &Context) -> Result<BoxHeader> {
        self.start_box(value.box_type())?;
        marshal::encode(self, value, ctx)?;
        self.end_box()
    }

    /// Copies the box described by `header` from `src` byte for byte.
    pub fn copy_box<R: Read + Seek>(&mut self, src: &mut R, header: &BoxHeader) -> Result<u64> {
        header.seek_to_start(src)?;
        let copied = io::copy(&mut src.take(header.size), self)?;
        if copied != header.size {
            return Err(Error::EndOfData);
        }
        Ok(copied)
    }

    /// Returns the underlying stream. Fails while any box is still open.
    pub fn finish(mut self) -> Result<W> {
        if let Some(open) = self.frames.last() {
            return Err(Error::Structure(format!(
                "{} box(es) still open, innermost '{}'",
                self.frames.len(),
                open.header.box_type
            )));
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if let Some(frame) = self.frames.last_mut() {
            frame.written += n as u64;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

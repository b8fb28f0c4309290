use crate::boxes::{BoxHeader, FourCC};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};

pub const SMALL_HEADER_SIZE: u64 = 8;
pub const LARGE_HEADER_SIZE: u64 = 16;

/// Reads a box header. A zero size field extends the box to the end of the stream.
pub fn read_box_header<R: Read + Seek + ?Sized>(r: &mut R) -> Result<BoxHeader> {
    read_header(r, None)
}

/// Reads a box header whose zero size field extends to `scope_end`.
pub fn read_box_header_in<R: Read + Seek + ?Sized>(
    r: &mut R,
    scope_end: u64,
) -> Result<BoxHeader> {
    read_header(r, Some(scope_end))
}

fn read_header<R: Read + Seek + ?Sized>(r: &mut R, scope_end: Option<u64>) -> Result<BoxHeader> {
    let offset = r.stream_position()?;
    let size32 = r.read_u32::<BigEndian>().map_err(Error::from_read)?;
    let mut typ = [0u8; 4];
    r.read_exact(&mut typ).map_err(Error::from_read)?;

    let mut header_size = SMALL_HEADER_SIZE;
    let mut extends_to_end = false;
    let size = match size32 {
        0 => {
            extends_to_end = true;
            let end = match scope_end {
                Some(end) => end,
                None => {
                    let end = r.seek(SeekFrom::End(0))?;
                    r.seek(SeekFrom::Start(offset + SMALL_HEADER_SIZE))?;
                    end
                }
            };
            end.saturating_sub(offset)
        }
        1 => {
            header_size = LARGE_HEADER_SIZE;
            r.read_u64::<BigEndian>().map_err(Error::from_read)?
        }
        n => n as u64,
    };

    if size < header_size {
        return Err(Error::InvalidSize { offset, size });
    }

    Ok(BoxHeader {
        offset,
        size,
        header_size,
        box_type: FourCC(typ),
        extends_to_end,
    })
}

/// Size of the header `write_box_header` would emit for `hdr`.
///
/// The 16-byte form is used when the size does not fit the 32-bit field, when
/// the size would be mistaken for the large-size marker, or when `hdr` already
/// carries a 16-byte header (so a reserved large header keeps its layout).
pub fn encoded_header_size(hdr: &BoxHeader) -> u64 {
    let fits_small = hdr.size <= u32::MAX as u64 && hdr.size != 1;
    if hdr.extends_to_end || (fits_small && hdr.header_size != LARGE_HEADER_SIZE) {
        SMALL_HEADER_SIZE
    } else {
        LARGE_HEADER_SIZE
    }
}

/// Writes `hdr` at the current position and returns the header as written.
pub fn write_box_header<W: Write + Seek>(w: &mut W, hdr: &BoxHeader) -> Result<BoxHeader> {
    let offset = w.stream_position()?;
    let header_size = encoded_header_size(hdr);
    if hdr.extends_to_end {
        w.write_u32::<BigEndian>(0)?;
        w.write_all(&hdr.box_type.0)?;
    } else if header_size == SMALL_HEADER_SIZE {
        w.write_u32::<BigEndian>(hdr.size as u32)?;
        w.write_all(&hdr.box_type.0)?;
    } else {
        w.write_u32::<BigEndian>(1)?;
        w.write_all(&hdr.box_type.0)?;
        w.write_u64::<BigEndian>(hdr.size)?;
    }

    Ok(BoxHeader {
        offset,
        size: hdr.size,
        header_size,
        box_type: hdr.box_type,
        extends_to_end: hdr.extends_to_end,
    })
}

//! Bit-granular reading and writing over byte streams.
//!
//! Bits are consumed MSB-first. Multi-bit values use a byte-aligned,
//! big-endian buffer: the value occupies the low bits and any unused high bits
//! of the first byte are zero. Byte operations and seeks require the cursor to
//! sit on a byte boundary.

use crate::error::{Error, Result};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};

/// Object-safe `Read + Seek`, used where hooks need a reader without generics.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// Maximum number of 7-bit groups accepted in a varint (enough for a u64).
pub const MAX_VARINT_GROUPS: usize = 10;

pub struct BitReader<R> {
    inner: R,
    octet: u8,
    left: u8, // unread bits remaining in `octet`
}

impl<R: Read> BitReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            octet: 0,
            left: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn is_aligned(&self) -> bool {
        self.left == 0
    }

    fn fetch(&mut self) -> Result<()> {
        self.octet = self.inner.read_u8().map_err(Error::from_read)?;
        self.left = 8;
        Ok(())
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        if self.left == 0 {
            self.fetch()?;
        }
        self.left -= 1;
        Ok((self.octet >> self.left) & 1 != 0)
    }

    /// Reads up to 64 bits into the low bits of a u64.
    pub fn read_bits_u64(&mut self, n: u32) -> Result<u64> {
        if n > 64 {
            return Err(Error::Schema(format!("cannot read {n} bits into a u64")));
        }
        let mut v: u64 = 0;
        let mut need = n;
        while need > 0 {
            if self.left == 0 {
                self.fetch()?;
            }
            let take = need.min(self.left as u32);
            let shift = self.left as u32 - take;
            let mask = ((1u16 << take) - 1) as u8;
            let bits = (self.octet >> shift) & mask;
            // take == 64 is impossible here, a single octet yields at most 8 bits
            v = (v << take) | bits as u64;
            self.left -= take as u8;
            need -= take;
        }
        Ok(v)
    }

    pub fn read_bits(&mut self, n: u32) -> Result<Vec<u8>> {
        let len = n.div_ceil(8) as usize;
        let mut data = vec![0u8; len];
        let offset = len as u32 * 8 - n;
        if offset == 0 && self.is_aligned() {
            self.read_bytes(&mut data)?;
            return Ok(data);
        }
        for i in 0..n {
            if self.read_bit()? {
                let pos = offset + i;
                data[(pos / 8) as usize] |= 0x80 >> (pos % 8);
            }
        }
        Ok(data)
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        if !self.is_aligned() {
            return Err(Error::Alignment);
        }
        self.inner.read_exact(buf).map_err(Error::from_read)
    }

    /// Reads a base-128 varint. Returns the value and the number of bytes used.
    pub fn read_uvarint(&mut self) -> Result<(u64, usize)> {
        let mut v: u64 = 0;
        for i in 0..MAX_VARINT_GROUPS {
            let octet = self.read_bits_u64(8)? as u8;
            if v >> 57 != 0 {
                return Err(Error::VarintTooLong {
                    max_groups: MAX_VARINT_GROUPS,
                });
            }
            v = (v << 7) | (octet & 0x7f) as u64;
            if octet & 0x80 == 0 {
                return Ok((v, i + 1));
            }
        }
        Err(Error::VarintTooLong {
            max_groups: MAX_VARINT_GROUPS,
        })
    }
}

impl<R: Read + Seek> BitReader<R> {
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if !self.is_aligned() {
            return Err(Error::Alignment);
        }
        Ok(self.inner.seek(pos)?)
    }

    pub fn position(&mut self) -> Result<u64> {
        if !self.is_aligned() {
            return Err(Error::Alignment);
        }
        Ok(self.inner.stream_position()?)
    }
}

pub struct BitWriter<W> {
    inner: W,
    octet: u8,
    filled: u8, // bits already placed in `octet`
}

impl<W: Write> BitWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            octet: 0,
            filled: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn is_aligned(&self) -> bool {
        self.filled == 0
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        if bit {
            self.octet |= 0x80 >> self.filled;
        }
        self.filled += 1;
        if self.filled == 8 {
            self.inner.write_u8(self.octet)?;
            self.octet = 0;
            self.filled = 0;
        }
        Ok(())
    }

    /// Writes the low `n` bits of `v`.
    pub fn write_bits_u64(&mut self, v: u64, n: u32) -> Result<()> {
        if n > 64 {
            return Err(Error::Schema(format!("cannot write {n} bits from a u64")));
        }
        if n % 8 == 0 && self.is_aligned() {
            let bytes = v.to_be_bytes();
            return self.write_bytes(&bytes[8 - (n / 8) as usize..]);
        }
        for i in (0..n).rev() {
            self.write_bit((v >> i) & 1 != 0)?;
        }
        Ok(())
    }

    /// Writes the low `n` bits of the big-endian buffer `buf`.
    pub fn write_bits(&mut self, buf: &[u8], n: u32) -> Result<()> {
        let total = buf.len() as u32 * 8;
        if n > total {
            return Err(Error::Schema(format!(
                "cannot write {n} bits from a {}-byte buffer",
                buf.len()
            )));
        }
        let start = total - n;
        if start % 8 == 0 && self.is_aligned() {
            return self.write_bytes(&buf[(start / 8) as usize..]);
        }
        for i in start..total {
            self.write_bit(buf[(i / 8) as usize] & (0x80 >> (i % 8)) != 0)?;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        if !self.is_aligned() {
            return Err(Error::Alignment);
        }
        self.inner.write_all(buf)?;
        Ok(())
    }

    /// Writes `v` in the fewest base-128 groups. Returns the number of bytes.
    pub fn write_uvarint(&mut self, v: u64) -> Result<usize> {
        let len = uvarint_len(v);
        for i in (0..len).rev() {
            let mut octet = ((v >> (7 * i)) & 0x7f) as u8;
            if i > 0 {
                octet |= 0x80;
            }
            self.write_bits_u64(octet as u64, 8)?;
        }
        Ok(len)
    }
}

impl<W: Write + Seek> BitWriter<W> {
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if !self.is_aligned() {
            return Err(Error::Alignment);
        }
        Ok(self.inner.seek(pos)?)
    }
}

pub fn uvarint_len(v: u64) -> usize {
    let bits = 64 - v.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

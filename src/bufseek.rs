use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::trace;

pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;
pub const DEFAULT_HISTORY: usize = 4;

struct Block {
    offset: u64,
    data: Vec<u8>,
}

/// Read-ahead cache of fixed-size blocks with least-recently-used eviction.
///
/// Box traversal seeks back and forth over small regions (headers, then
/// payloads, then the next header); keeping a few blocks around turns those
/// into memory copies. Reads and seeks behave exactly like the wrapped source.
pub struct BufferedSeekReader<R> {
    inner: R,
    block_size: usize,
    history: usize,
    /// Most recently used first.
    blocks: VecDeque<Block>,
    pos: u64,
    len: Option<u64>,
}

impl<R: Read + Seek> BufferedSeekReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_HISTORY)
    }

    /// `block_size` and `history` are clamped to at least one.
    pub fn with_capacity(inner: R, block_size: usize, history: usize) -> Self {
        Self {
            inner,
            block_size: block_size.max(1),
            history: history.max(1),
            blocks: VecDeque::new(),
            pos: 0,
            len: None,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fetch(&mut self, offset: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; self.block_size];
        let mut filled = 0;
        while filled < data.len() {
            match self.inner.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        data.truncate(filled);
        trace!(offset, len = filled, "cached block");
        self.blocks.push_front(Block { offset, data });
        self.blocks.truncate(self.history);
        Ok(())
    }

    fn stream_len(&mut self) -> io::Result<u64> {
        if let Some(len) = self.len {
            return Ok(len);
        }
        let len = self.inner.seek(SeekFrom::End(0))?;
        self.len = Some(len);
        Ok(len)
    }
}

impl<R: Read + Seek> Read for BufferedSeekReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let block_offset = self.pos - self.pos % self.block_size as u64;
        match self.blocks.iter().position(|b| b.offset == block_offset) {
            Some(0) => {}
            Some(i) => {
                if let Some(b) = self.blocks.remove(i) {
                    self.blocks.push_front(b);
                }
            }
            None => self.fetch(block_offset)?,
        }

        let Some(block) = self.blocks.front() else {
            return Ok(0);
        };
        let start = (self.pos - block.offset) as usize;
        if start >= block.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(block.data.len() - start);
        buf[..n].copy_from_slice(&block.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for BufferedSeekReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => self.stream_len()?.checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        self.pos = target;
        Ok(target)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }
}

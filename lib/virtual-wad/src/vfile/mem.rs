use std::io::SeekFrom;

use super::StreamBackend;
use crate::{FsError, Result};

/// A growable in-memory byte buffer.
///
/// Writes grow the logical length to the new high-water mark; truncation
/// only shrinks the logical length and keeps the allocation.
#[derive(Debug, Default)]
pub struct MemoryStream {
    buf: Vec<u8>,
    len: usize,
    pos: usize,
}

impl MemoryStream {
    pub fn new(buf: Vec<u8>) -> Self {
        let len = buf.len();
        Self { buf, len, pos: 0 }
    }

    pub fn contents(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl StreamBackend for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.len.saturating_sub(self.pos));
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let new_pos = self.pos + buf.len();
        if new_pos > self.buf.len() {
            self.buf.resize(new_pos, 0);
        }
        self.buf[self.pos..new_pos].copy_from_slice(buf);
        self.pos = new_pos;
        self.len = self.len.max(new_pos);
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => self.pos as i128 + i128::from(delta),
            SeekFrom::End(delta) => self.len as i128 + i128::from(delta),
        };
        if target < 0 || target > self.len as i128 {
            return Err(FsError::OutOfRange);
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos as u64)
    }

    fn truncate(&mut self) -> Result<()> {
        self.len = self.pos;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

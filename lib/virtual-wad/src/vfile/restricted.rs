//! A window onto a byte range of another stream.

use std::io::SeekFrom;

use super::{ContextId, Multiplexed, SharedStream, StreamBackend};
use crate::{FsError, Result};

#[derive(Debug)]
pub(super) struct RestrictedStream {
    inner: SharedStream,
    ctx: ContextId,
    start: u64,
    end: Option<u64>,
    pos: u64,
    read_only: bool,
}

impl RestrictedStream {
    pub(super) fn new(
        inner: SharedStream,
        ctx: ContextId,
        start: u64,
        end: Option<u64>,
        read_only: bool,
    ) -> Self {
        Self {
            inner,
            ctx,
            start,
            end,
            pos: 0,
            read_only,
        }
    }

    fn len(&self) -> Option<u64> {
        self.end.map(|end| end - self.start)
    }

    /// How many of `requested` bytes fit before the end of the view.
    fn clip(&self, requested: usize) -> usize {
        match self.len() {
            Some(len) => {
                let remaining = len.saturating_sub(self.pos);
                requested.min(usize::try_from(remaining).unwrap_or(usize::MAX))
            }
            None => requested,
        }
    }

    /// Run `f` on the inner stream with this view's context active.
    fn with_context<T>(&self, f: impl FnOnce(&mut Multiplexed) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.borrow_mut();
        let saved = inner.enter_context(self.ctx);
        let result = f(&mut *inner);
        inner.leave_context(saved);
        result
    }
}

impl StreamBackend for RestrictedStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.clip(buf.len());
        if n == 0 {
            return Ok(0);
        }
        let read = self.with_context(|inner| inner.read(&mut buf[..n]))?;
        self.pos += read as u64;
        Ok(read)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.clip(buf.len());
        if n == 0 {
            return Err(FsError::OutOfRange);
        }
        let written = self.with_context(|inner| inner.write(&buf[..n]))?;
        self.pos += written as u64;
        Ok(written)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
            SeekFrom::End(delta) => match self.len() {
                Some(len) => i128::from(len) + i128::from(delta),
                None => return Err(FsError::Unsupported("seek from end of unbounded view")),
            },
        };
        if target < 0 || matches!(self.len(), Some(len) if target > i128::from(len)) {
            return Err(FsError::OutOfRange);
        }
        let target = u64::try_from(target).map_err(|_| FsError::OutOfRange)?;
        let absolute = self.start.checked_add(target).ok_or(FsError::OutOfRange)?;

        self.with_context(|inner| inner.seek(SeekFrom::Start(absolute)))?;
        self.pos = target;
        Ok(target)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos)
    }

    fn truncate(&mut self) -> Result<()> {
        Err(FsError::Unsupported("truncate on a restricted view"))
    }

    fn sync(&mut self) -> Result<()> {
        self.with_context(|inner| inner.sync())
    }

    fn close(&mut self) -> Result<()> {
        self.inner.borrow_mut().release_context(self.ctx)
    }
}

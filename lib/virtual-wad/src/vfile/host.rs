use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};

use tracing::debug;

use super::StreamBackend;
use crate::Result;

/// A thin wrapper around `std::fs::File`
#[derive(Debug)]
pub struct HostStream {
    inner: fs::File,
}

impl HostStream {
    pub fn new(inner: fs::File) -> Self {
        Self { inner }
    }
}

impl StreamBackend for HostStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.inner.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.inner.write(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.inner.seek(pos)?)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    fn truncate(&mut self) -> Result<()> {
        let pos = self.inner.stream_position()?;
        self.inner.set_len(pos)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.flush()?;
        // Durability is best-effort; some files (pipes, read-only handles)
        // cannot be synced at all.
        if let Err(err) = self.inner.sync_data() {
            debug!("sync_data failed: {err}");
        }
        Ok(())
    }
}

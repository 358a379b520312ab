use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use super::{SerialGenerator, WadFile};
use crate::vfile::VFile;
use crate::Result;

/// Number of old directory slots scanned when re-matching entries after the
/// table was re-read.
pub const DEFAULT_LOOKAHEAD: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WadOpenOptionsConfig {
    read_only: bool,
    lookahead: usize,
}

impl WadOpenOptionsConfig {
    pub const fn read_only(&self) -> bool {
        self.read_only
    }

    pub const fn lookahead(&self) -> usize {
        self.lookahead
    }
}

/// Builder for opening a [`WadFile`].
///
/// ```no_run
/// # use virtual_wad::{WadOpenOptions, SerialGenerator};
/// let serials = SerialGenerator::new();
/// let wad = WadOpenOptions::new()
///     .read_only(true)
///     .serials(serials.clone())
///     .open("doom2.wad")?;
/// # Ok::<(), virtual_wad::FsError>(())
/// ```
#[derive(Debug, Clone)]
pub struct WadOpenOptions {
    conf: WadOpenOptionsConfig,
    serials: Option<SerialGenerator>,
}

impl WadOpenOptions {
    pub fn new() -> Self {
        Self {
            conf: WadOpenOptionsConfig {
                read_only: false,
                lookahead: DEFAULT_LOOKAHEAD,
            },
            serials: None,
        }
    }

    pub fn read_only(&mut self, read_only: bool) -> &mut Self {
        self.conf.read_only = read_only;
        self
    }

    pub fn lookahead(&mut self, lookahead: usize) -> &mut Self {
        self.conf.lookahead = lookahead;
        self
    }

    /// Share a serial-number generator with other archives.
    pub fn serials(&mut self, serials: SerialGenerator) -> &mut Self {
        self.serials = Some(serials);
        self
    }

    pub fn config(&self) -> &WadOpenOptionsConfig {
        &self.conf
    }

    /// Open the archive at `path`. Falls back to read-only access when the
    /// file may not be written.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<WadFile> {
        let path = path.as_ref();
        let mut read_only = self.conf.read_only;
        let file = if read_only {
            fs::File::open(path)?
        } else {
            match fs::OpenOptions::new().read(true).write(true).open(path) {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                    debug!(path = %path.display(), "no write access, opening read-only");
                    read_only = true;
                    fs::File::open(path)?
                }
                Err(err) => return Err(err.into()),
            }
        };
        let conf = WadOpenOptionsConfig {
            read_only,
            ..self.conf
        };
        WadFile::from_stream(VFile::from_file(file), conf, self.serials_or_default())
    }

    /// Open an archive held by an arbitrary stream, e.g. a memory buffer.
    pub fn open_stream(&self, stream: VFile) -> Result<WadFile> {
        WadFile::from_stream(stream, self.conf, self.serials_or_default())
    }

    /// Write an empty PWAD into `stream`, replacing its contents, and open it.
    pub fn create_stream(&self, stream: VFile) -> Result<WadFile> {
        WadFile::init_empty(stream, self.conf, self.serials_or_default())
    }

    fn serials_or_default(&self) -> SerialGenerator {
        self.serials.clone().unwrap_or_default()
    }
}

impl Default for WadOpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

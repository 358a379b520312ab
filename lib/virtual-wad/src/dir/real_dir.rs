//! A thin wrapper around a directory on the host filesystem.

use std::cmp::Ordering;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::trace;

use super::{has_wad_extension, Capabilities, DirEntry, Directory, DirectoryBackend, FileType};
use crate::vfile::VFile;
use crate::{FsError, Result};

#[derive(Debug, Clone)]
pub struct RealDirectory {
    path: PathBuf,
}

impl RealDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entry_path(&self, entry: &DirEntry) -> PathBuf {
        self.path.join(&entry.name)
    }
}

#[cfg(unix)]
fn serial_no(entry: &fs::DirEntry) -> u64 {
    use std::os::unix::fs::DirEntryExt;
    entry.ino()
}

#[cfg(not(unix))]
fn serial_no(entry: &fs::DirEntry) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    entry.file_name().hash(&mut hasher);
    hasher.finish()
}

/// Directories first, then by name ignoring case.
fn order_by_name(a: &DirEntry, b: &DirEntry) -> Ordering {
    let a_dir = a.file_type == FileType::Dir;
    let b_dir = b.file_type == FileType::Dir;
    b_dir
        .cmp(&a_dir)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
}

impl DirectoryBackend for RealDirectory {
    fn file_type(&self) -> FileType {
        FileType::Dir
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::OPEN | Capabilities::OPEN_DIR | Capabilities::REMOVE | Capabilities::RENAME
    }

    fn refresh(&mut self) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.path)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }

            // `fs::metadata` follows symlinks, so links to directories
            // list as directories.
            let metadata = fs::metadata(dirent.path()).ok();
            let is_dir = match &metadata {
                Some(metadata) => metadata.is_dir(),
                None => dirent.file_type().is_ok_and(|t| t.is_dir()),
            };
            let file_type = if is_dir {
                FileType::Dir
            } else if has_wad_extension(Path::new(&name)) {
                FileType::Wad
            } else {
                FileType::File
            };
            let size = match metadata {
                Some(metadata) if !is_dir => i64::try_from(metadata.len()).unwrap_or(i64::MAX),
                _ => -1,
            };

            entries.push(DirEntry {
                file_type,
                name,
                size,
                serial_no: serial_no(&dirent),
            });
        }
        entries.sort_by(order_by_name);
        trace!(path = %self.path.display(), entries = entries.len(), "listed directory");
        Ok(entries)
    }

    fn open(&mut self, _index: usize, entry: &DirEntry) -> Result<VFile> {
        if entry.file_type == FileType::Dir {
            return Err(FsError::Unsupported("open on a directory"));
        }
        VFile::open(self.entry_path(entry))
    }

    fn open_dir(&mut self, _index: usize, entry: &DirEntry) -> Result<Directory> {
        let path = self.entry_path(entry);
        match entry.file_type {
            FileType::Dir => Directory::open_real(path),
            FileType::Wad => Directory::open_wad(path),
            FileType::File | FileType::Lump => Err(FsError::Unsupported("open_dir on a file")),
        }
    }

    fn remove(&mut self, _index: usize, entry: &DirEntry) -> Result<()> {
        let path = self.entry_path(entry);
        if entry.file_type == FileType::Dir {
            fs::remove_dir(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn rename(&mut self, _index: usize, entry: &DirEntry, new_name: &str) -> Result<String> {
        let mut components = Path::new(new_name).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(FsError::InvalidName(new_name.to_string()));
        }
        fs::rename(self.entry_path(entry), self.path.join(new_name))?;
        Ok(new_name.to_string())
    }

    fn describe_entries(&self, count: usize) -> String {
        match count {
            1 => "1 file".to_string(),
            n => format!("{n} files"),
        }
    }
}

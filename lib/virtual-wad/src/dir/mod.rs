//! Directories: real filesystem directories and WAD archives behind one
//! interface.
//!
//! A [`Directory`] owns a snapshot of its entries and a boxed
//! [`DirectoryBackend`] that does the actual work. Backends advertise what
//! they can do through [`Capabilities`]; calling anything else fails with
//! [`FsError::Unsupported`].

mod path;
mod real_dir;
mod wad_dir;

pub use path::{has_wad_extension, parent_path, sanitize_path};
pub use real_dir::RealDirectory;
pub use wad_dir::WadDirectory;

use std::fmt;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::vfile::VFile;
use crate::wad::WadFile;
use crate::{check_index, FsError, Result};

const FIRST_REVISION: &str = "First revision";
const NO_HISTORY: &str = "No history";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    Dir,
    Wad,
    File,
    Lump,
}

impl FileType {
    /// Whether entries of this type can be opened as a [`Directory`].
    pub fn is_directory(self) -> bool {
        matches!(self, FileType::Dir | FileType::Wad)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub file_type: FileType,
    pub name: String,
    /// Size in bytes, `-1` when unknown (e.g. for directories).
    pub size: i64,
    /// Opaque identifier, see [`FileSet`](crate::FileSet).
    pub serial_no: u64,
}

/// Names an entry for [`Directory::open_dir`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryRef {
    /// The directory's own parent, whatever the backend.
    Parent,
    Index(usize),
}

bitflags! {
    /// Optional operations a backend implements.
    pub struct Capabilities: u32 {
        const OPEN = 1 << 0;
        const OPEN_DIR = 1 << 1;
        const REMOVE = 1 << 2;
        const RENAME = 1 << 3;
        const COMMIT = 1 << 4;
        const SWAP = 1 << 5;
        const SNAPSHOT = 1 << 6;
    }
}

/// The operations behind a [`Directory`].
///
/// Only [`refresh`](DirectoryBackend::refresh) is mandatory. Everything
/// else defaults to [`FsError::Unsupported`] and should be listed in
/// [`capabilities`](DirectoryBackend::capabilities) when overridden.
pub trait DirectoryBackend: fmt::Debug {
    fn file_type(&self) -> FileType;

    fn capabilities(&self) -> Capabilities;

    /// Re-read the entries from the backend's source of truth.
    fn refresh(&mut self) -> Result<Vec<DirEntry>>;

    fn is_read_only(&self) -> bool {
        false
    }

    fn open(&mut self, _index: usize, _entry: &DirEntry) -> Result<VFile> {
        Err(FsError::Unsupported("open"))
    }

    fn open_dir(&mut self, _index: usize, _entry: &DirEntry) -> Result<Directory> {
        Err(FsError::Unsupported("open_dir"))
    }

    fn remove(&mut self, _index: usize, _entry: &DirEntry) -> Result<()> {
        Err(FsError::Unsupported("remove"))
    }

    /// Returns the name the entry ended up with.
    fn rename(&mut self, _index: usize, _entry: &DirEntry, _new_name: &str) -> Result<String> {
        Err(FsError::Unsupported("rename"))
    }

    fn need_commit(&self) -> bool {
        false
    }

    fn commit(&mut self) -> Result<()> {
        Err(FsError::Unsupported("commit"))
    }

    /// Human-readable description of `count` entries, e.g. `"3 files"`.
    fn describe_entries(&self, count: usize) -> String {
        format!("{count} entries")
    }

    fn swap_entries(&mut self, _a: usize, _b: usize) -> Result<()> {
        Err(FsError::Unsupported("swap_entries"))
    }

    fn save_snapshot(&mut self) -> Result<VFile> {
        Err(FsError::Unsupported("save_snapshot"))
    }

    fn restore_snapshot(&mut self, _snapshot: &mut VFile) -> Result<()> {
        Err(FsError::Unsupported("restore_snapshot"))
    }

    fn wad_file(&mut self) -> Option<&mut WadFile> {
        None
    }

    /// Release backend resources. Called once, when the directory closes.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct Revision {
    snapshot: Vec<u8>,
    description: String,
}

/// Named backend snapshots taken after each commit.
#[derive(Debug)]
struct History {
    revisions: Vec<Revision>,
    current: usize,
}

impl History {
    fn can_undo(&self) -> usize {
        self.current
    }

    fn can_redo(&self) -> usize {
        self.revisions.len() - 1 - self.current
    }
}

/// An open directory: a list of entries plus the backend that produced them.
#[derive(Debug)]
pub struct Directory {
    file_type: FileType,
    path: PathBuf,
    entries: Vec<DirEntry>,
    readonly: bool,
    history: Option<History>,
    backend: Box<dyn DirectoryBackend>,
    closed: bool,
}

impl Directory {
    /// Open `path` as a directory. Paths ending in `.wad` are opened as WAD
    /// archives, anything else as a real directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = sanitize_path(path.as_ref());
        if has_wad_extension(&path) {
            Self::open_wad(path)
        } else {
            Self::open_real(path)
        }
    }

    pub fn open_real(path: impl AsRef<Path>) -> Result<Self> {
        let path = sanitize_path(path.as_ref());
        let backend = RealDirectory::new(&path);
        Self::from_backend(path, Box::new(backend))
    }

    pub fn open_wad(path: impl AsRef<Path>) -> Result<Self> {
        let path = sanitize_path(path.as_ref());
        let backend = WadDirectory::new(WadFile::open(&path)?);
        Self::from_backend(path, Box::new(backend))
    }

    /// Wrap an arbitrary backend. Backends that can take snapshots get a
    /// first history entry right away.
    pub fn from_backend(
        path: impl Into<PathBuf>,
        mut backend: Box<dyn DirectoryBackend>,
    ) -> Result<Self> {
        let entries = backend.refresh()?;
        let mut dir = Self {
            file_type: backend.file_type(),
            path: path.into(),
            entries,
            readonly: backend.is_read_only(),
            history: None,
            backend,
            closed: false,
        };
        if dir.capabilities().contains(Capabilities::SNAPSHOT) {
            dir.clear_history()?;
        }
        debug!(
            path = %dir.path.display(),
            entries = dir.entries.len(),
            "opened directory"
        );
        Ok(dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Result<&DirEntry> {
        check_index(index, self.entries.len())?;
        Ok(&self.entries[index])
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        self.readonly = readonly;
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            Err(FsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Reload the entries. Returns the first index whose name or size
    /// changed, if any. When only trailing entries disappeared this is the
    /// new length.
    pub fn refresh(&mut self) -> Result<Option<usize>> {
        let entries = self.backend.refresh()?;
        let first_change = entries
            .iter()
            .enumerate()
            .position(|(i, new)| {
                self.entries
                    .get(i)
                    .is_none_or(|old| old.name != new.name || old.size != new.size)
            })
            .or_else(|| (entries.len() < self.entries.len()).then_some(entries.len()));
        self.entries = entries;
        Ok(first_change)
    }

    pub fn open_entry(&mut self, index: usize) -> Result<VFile> {
        check_index(index, self.entries.len())?;
        let entry = self.entries[index].clone();
        self.backend.open(index, &entry)
    }

    pub fn open_dir(&mut self, entry: EntryRef) -> Result<Directory> {
        match entry {
            EntryRef::Parent => Directory::open(parent_path(&self.path)),
            EntryRef::Index(index) => {
                check_index(index, self.entries.len())?;
                let entry = self.entries[index].clone();
                self.backend.open_dir(index, &entry)
            }
        }
    }

    pub fn remove(&mut self, index: usize) -> Result<()> {
        self.check_writable()?;
        check_index(index, self.entries.len())?;
        let entry = self.entries[index].clone();
        self.backend.remove(index, &entry)?;
        self.entries.remove(index);
        Ok(())
    }

    pub fn rename(&mut self, index: usize, new_name: &str) -> Result<()> {
        self.check_writable()?;
        check_index(index, self.entries.len())?;
        let entry = self.entries[index].clone();
        let name = self.backend.rename(index, &entry, new_name)?;
        self.entries[index].name = name;
        Ok(())
    }

    pub fn swap_entries(&mut self, a: usize, b: usize) -> Result<()> {
        self.check_writable()?;
        check_index(a, self.entries.len())?;
        check_index(b, self.entries.len())?;
        self.backend.swap_entries(a, b)?;
        self.entries.swap(a, b);
        Ok(())
    }

    pub fn need_commit(&self) -> bool {
        self.backend.need_commit()
    }

    /// Persist pending changes and record them in the history under
    /// `message`. Does nothing when there is nothing to commit.
    pub fn commit(&mut self, message: &str) -> Result<()> {
        if !self.need_commit() {
            return Ok(());
        }
        self.check_writable()?;
        self.backend.commit()?;
        if self.history.is_some() {
            let revision = self.take_revision(message)?;
            if let Some(history) = &mut self.history {
                history.revisions.truncate(history.current + 1);
                history.revisions.push(revision);
                history.current = history.revisions.len() - 1;
            }
        }
        debug!(path = %self.path.display(), msg = message, "committed");
        Ok(())
    }

    fn take_revision(&mut self, description: &str) -> Result<Revision> {
        let mut snapshot = self.backend.save_snapshot()?;
        let bytes = snapshot.read_all()?;
        snapshot.close()?;
        Ok(Revision {
            snapshot: bytes,
            description: description.to_string(),
        })
    }

    pub fn can_undo(&self) -> usize {
        match &self.history {
            Some(history) if !self.readonly => history.can_undo(),
            _ => 0,
        }
    }

    /// Pending writes in the backend invalidate anything that was undone,
    /// so nothing is redoable until they are committed or undone.
    pub fn can_redo(&self) -> usize {
        match &self.history {
            Some(history) if !self.readonly && !self.need_commit() => history.can_redo(),
            _ => 0,
        }
    }

    /// Go back `levels` commits and refresh. Returns the first changed
    /// entry index, as [`refresh`](Directory::refresh) does.
    pub fn undo(&mut self, levels: usize) -> Result<Option<usize>> {
        self.discard_stale_redo();
        let available = self.can_undo();
        let current = self.history_current()?;
        if levels > available {
            return Err(FsError::NoHistory {
                requested: levels,
                available,
            });
        }
        self.restore_revision(current - levels)
    }

    /// Re-apply `levels` undone commits and refresh.
    pub fn redo(&mut self, levels: usize) -> Result<Option<usize>> {
        self.discard_stale_redo();
        let available = self.can_redo();
        let current = self.history_current()?;
        if levels > available {
            return Err(FsError::NoHistory {
                requested: levels,
                available,
            });
        }
        self.restore_revision(current + levels)
    }

    /// Forget undone revisions once the backend has uncommitted changes;
    /// the backend drops its own redo data at that point.
    fn discard_stale_redo(&mut self) {
        if !self.need_commit() {
            return;
        }
        if let Some(history) = &mut self.history {
            history.revisions.truncate(history.current + 1);
        }
    }

    fn history_current(&self) -> Result<usize> {
        self.check_writable()?;
        self.history
            .as_ref()
            .map(|history| history.current)
            .ok_or(FsError::Unsupported("restore_snapshot"))
    }

    fn restore_revision(&mut self, target: usize) -> Result<Option<usize>> {
        let snapshot = match &self.history {
            Some(history) => history.revisions[target].snapshot.clone(),
            None => return Err(FsError::Unsupported("restore_snapshot")),
        };
        let mut snapshot = VFile::from_bytes(snapshot);
        self.backend.restore_snapshot(&mut snapshot)?;
        snapshot.close()?;
        if let Some(history) = &mut self.history {
            history.current = target;
        }
        self.refresh()
    }

    pub fn last_commit_message(&self) -> &str {
        match &self.history {
            Some(history) => &history.revisions[history.current].description,
            None => NO_HISTORY,
        }
    }

    /// Forget all history and start again from the current state.
    pub fn clear_history(&mut self) -> Result<()> {
        if !self.capabilities().contains(Capabilities::SNAPSHOT) {
            return Ok(());
        }
        let revision = self.take_revision(FIRST_REVISION)?;
        self.history = Some(History {
            revisions: vec![revision],
            current: 0,
        });
        Ok(())
    }

    /// Index of the entry with the given serial number.
    pub fn entry_by_serial(&self, serial_no: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.serial_no == serial_no)
    }

    /// Index of the first entry named exactly `name`.
    pub fn entry_by_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn entry_path(&self, index: usize) -> Result<PathBuf> {
        Ok(self.path.join(&self.entry(index)?.name))
    }

    pub fn describe_entries(&self, count: usize) -> String {
        self.backend.describe_entries(count)
    }

    /// The WAD archive behind this directory, if it is one.
    pub fn wad_file(&mut self) -> Option<&mut WadFile> {
        self.backend.wad_file()
    }

    /// Compact the WAD archive behind this directory. History is reset,
    /// since older revisions no longer exist in the file.
    pub fn compact(&mut self) -> Result<bool> {
        self.check_writable()?;
        let wad = self
            .backend
            .wad_file()
            .ok_or(FsError::Unsupported("compact"))?;
        if !wad.compact()? {
            return Ok(false);
        }
        self.refresh()?;
        self.clear_history()?;
        Ok(true)
    }

    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.backend.close()
    }
}

impl Drop for Directory {
    fn drop(&mut self) {
        if let Err(err) = self.close_inner() {
            warn!("failed to close directory {}: {err}", self.path.display());
        }
    }
}

const SIZE_UNITS: [(u64, &str); 3] = [
    (1_000, "K"),
    (1_000_000, "M"),
    (1_000_000_000, "G"),
];

/// Format `size` for a narrow column using SI units. `shorter` leaves room
/// for about two fewer digits. Unknown (negative) sizes give an empty string.
pub fn describe_size(size: i64, shorter: bool) -> String {
    let Ok(size) = u64::try_from(size) else {
        return String::new();
    };
    let adjusted = size.saturating_mul(if shorter { 100 } else { 1 });
    if adjusted < 100_000 {
        return size.to_string();
    }
    for (unit, suffix) in SIZE_UNITS {
        if adjusted < unit.saturating_mul(10_000) {
            return format!("{}{suffix}", size / unit);
        }
    }
    "big!".to_string()
}

#[cfg(test)]
mod test_dir {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ErrorKind;

    #[derive(Debug, Default)]
    struct ListBackend {
        names: Vec<&'static str>,
    }

    impl DirectoryBackend for ListBackend {
        fn file_type(&self) -> FileType {
            FileType::Dir
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::empty()
        }

        fn refresh(&mut self) -> Result<Vec<DirEntry>> {
            Ok(self
                .names
                .iter()
                .enumerate()
                .map(|(i, name)| DirEntry {
                    file_type: FileType::File,
                    name: name.to_string(),
                    size: 10 * i as i64,
                    serial_no: 100 + i as u64,
                })
                .collect())
        }
    }

    fn list_dir(names: &[&'static str]) -> Directory {
        let backend = ListBackend {
            names: names.to_vec(),
        };
        Directory::from_backend("/list", Box::new(backend)).unwrap()
    }

    #[test]
    fn test_describe_size() {
        assert_eq!(describe_size(-1, false), "");
        assert_eq!(describe_size(0, false), "0");
        assert_eq!(describe_size(99_999, false), "99999");
        assert_eq!(describe_size(100_000, false), "100K");
        assert_eq!(describe_size(9_999_999, false), "9999K");
        assert_eq!(describe_size(10_000_000, false), "10M");
        assert_eq!(describe_size(12_345_678_901, false), "12G");
        assert_eq!(describe_size(10_000_000_000_000, false), "big!");
        assert_eq!(describe_size(999, true), "999");
        assert_eq!(describe_size(1_000, true), "1K");
    }

    #[test]
    fn test_lookups() {
        let dir = list_dir(&["ALPHA", "BETA"]);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.entry_by_name("BETA"), Some(1));
        assert_eq!(dir.entry_by_name("beta"), None);
        assert_eq!(dir.entry_by_serial(100), Some(0));
        assert_eq!(dir.entry_by_serial(7), None);
        assert_eq!(dir.entry_path(1).unwrap(), PathBuf::from("/list/BETA"));
        assert!(dir.entry(2).is_err());
    }

    #[test]
    fn test_unsupported_operations() {
        let mut dir = list_dir(&["ONLY"]);
        assert_eq!(dir.open_entry(0).unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(dir.remove(0).unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(dir.len(), 1, "entries untouched on failure");
        assert!(dir.wad_file().is_none());
        assert_eq!(dir.compact().unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(dir.last_commit_message(), "No history");
        assert_eq!(dir.can_undo(), 0);
        assert!(dir.undo(1).is_err());
        dir.commit("nothing to do").unwrap();
    }

    #[test]
    fn test_readonly_blocks_mutation() {
        let mut dir = list_dir(&["A", "B"]);
        dir.set_readonly(true);
        assert!(matches!(dir.rename(0, "C"), Err(FsError::ReadOnly)));
        assert!(matches!(dir.swap_entries(0, 1), Err(FsError::ReadOnly)));
        assert!(matches!(dir.remove(0), Err(FsError::ReadOnly)));
    }

    #[test]
    fn test_refresh_reports_first_change() {
        let mut dir = list_dir(&["A", "B"]);
        assert_eq!(dir.refresh().unwrap(), None);
        dir.entries[1].name = "X".to_string();
        assert_eq!(dir.refresh().unwrap(), Some(1));
        dir.entries.push(dir.entries[0].clone());
        assert_eq!(dir.refresh().unwrap(), Some(2));
    }
}

//! Multi-selections of directory entries.
//!
//! A [`FileSet`] holds entry serial numbers rather than indices, so a
//! selection survives a directory being refreshed or reordered.

use crate::dir::{Directory, FileType};
use crate::glob::NameGlob;

/// A sorted, duplicate-free set of entry serial numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    entries: Vec<u64>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set of every non-directory entry of `dir` whose name matches
    /// `pattern`.
    pub fn from_glob(dir: &Directory, pattern: &str) -> Self {
        let mut set = Self::new();
        set.add_glob(dir, pattern);
        set
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serial numbers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().copied()
    }

    pub fn has(&self, serial_no: u64) -> bool {
        self.entries.binary_search(&serial_no).is_ok()
    }

    pub fn add(&mut self, serial_no: u64) {
        if let Err(index) = self.entries.binary_search(&serial_no) {
            self.entries.insert(index, serial_no);
        }
    }

    pub fn remove(&mut self, serial_no: u64) {
        if let Ok(index) = self.entries.binary_search(&serial_no) {
            self.entries.remove(index);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Add every non-directory entry of `dir` matching the case-insensitive
    /// shell pattern. Returns the index of the first match.
    pub fn add_glob(&mut self, dir: &Directory, pattern: &str) -> Option<usize> {
        let glob = NameGlob::new(pattern);
        let mut first = None;
        for (index, entry) in dir.entries().iter().enumerate() {
            if entry.file_type != FileType::Dir && glob.matches(&entry.name) {
                self.add(entry.serial_no);
                first.get_or_insert(index);
            }
        }
        first
    }

    /// Find the next entry of `dir`, at or after `*cursor`, that is in the
    /// set. The cursor is advanced past the returned index.
    pub fn iterate(&self, dir: &Directory, cursor: &mut usize) -> Option<usize> {
        let entries = dir.entries();
        while *cursor < entries.len() {
            let index = *cursor;
            *cursor += 1;
            if self.has(entries[index].serial_no) {
                return Some(index);
            }
        }
        None
    }

    /// A short description such as `nothing`, `'E1M1'` or `3 lumps`.
    pub fn describe(&self, dir: &Directory) -> String {
        match self.entries.as_slice() {
            [] => "nothing".to_string(),
            [serial_no] => match dir.entry_by_serial(*serial_no) {
                Some(index) => format!("'{}'", dir.entries()[index].name),
                None => "nothing?".to_string(),
            },
            entries => dir.describe_entries(entries.len()),
        }
    }
}

impl FromIterator<u64> for FileSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut entries: Vec<u64> = iter.into_iter().collect();
        entries.sort_unstable();
        entries.dedup();
        Self { entries }
    }
}

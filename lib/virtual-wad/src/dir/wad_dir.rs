//! A WAD archive presented as a directory of lumps.

use super::{Capabilities, DirEntry, DirectoryBackend, FileType};
use crate::vfile::VFile;
use crate::wad::WadFile;
use crate::Result;

#[derive(Debug)]
pub struct WadDirectory {
    wad: WadFile,
}

impl WadDirectory {
    pub fn new(wad: WadFile) -> Self {
        Self { wad }
    }
}

impl DirectoryBackend for WadDirectory {
    fn file_type(&self) -> FileType {
        FileType::Wad
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::OPEN
            | Capabilities::REMOVE
            | Capabilities::RENAME
            | Capabilities::COMMIT
            | Capabilities::SWAP
            | Capabilities::SNAPSHOT
    }

    fn refresh(&mut self) -> Result<Vec<DirEntry>> {
        Ok(self
            .wad
            .directory()
            .iter()
            .map(|lump| DirEntry {
                file_type: FileType::Lump,
                name: lump.name.to_string(),
                size: i64::from(lump.size),
                serial_no: lump.serial_no,
            })
            .collect())
    }

    fn is_read_only(&self) -> bool {
        self.wad.is_read_only()
    }

    fn open(&mut self, index: usize, _entry: &DirEntry) -> Result<VFile> {
        self.wad.open_lump_read(index)
    }

    fn remove(&mut self, index: usize, _entry: &DirEntry) -> Result<()> {
        self.wad.delete_entry(index)
    }

    fn rename(&mut self, index: usize, _entry: &DirEntry, new_name: &str) -> Result<String> {
        self.wad.rename(index, new_name)?;
        Ok(self.wad.entry(index)?.name.to_string())
    }

    fn need_commit(&self) -> bool {
        self.wad.is_dirty()
    }

    fn commit(&mut self) -> Result<()> {
        self.wad.commit()
    }

    fn describe_entries(&self, count: usize) -> String {
        match count {
            1 => "1 lump".to_string(),
            n => format!("{n} lumps"),
        }
    }

    fn swap_entries(&mut self, a: usize, b: usize) -> Result<()> {
        self.wad.swap_entries(a, b)
    }

    fn save_snapshot(&mut self) -> Result<VFile> {
        self.wad.save_snapshot()
    }

    fn restore_snapshot(&mut self, snapshot: &mut VFile) -> Result<()> {
        self.wad.restore_snapshot(snapshot).map(|_| ())
    }

    fn wad_file(&mut self) -> Option<&mut WadFile> {
        Some(&mut self.wad)
    }

    fn close(&mut self) -> Result<()> {
        self.wad.close()
    }
}

#[cfg(test)]
mod test_wad_dir {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dir::{Directory, EntryRef};
    use crate::wad::WadOpenOptions;
    use crate::FsError;

    fn memory_wad_dir() -> Directory {
        let wad = WadOpenOptions::new()
            .create_stream(VFile::memory())
            .unwrap();
        Directory::from_backend("/tmp/test.wad", Box::new(WadDirectory::new(wad))).unwrap()
    }

    fn add_lump(dir: &mut Directory, name: &str, data: &[u8]) {
        let wad = dir.wad_file().unwrap();
        let index = wad.num_lumps();
        wad.add_entries(index, 1).unwrap();
        wad.rename(index, name).unwrap();
        let mut lump = wad.open_lump_rewrite(index).unwrap();
        lump.write_all(data).unwrap();
        lump.close().unwrap();
    }

    fn names(dir: &Directory) -> Vec<&str> {
        dir.entries().iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_entries_follow_the_archive() {
        let mut dir = memory_wad_dir();
        assert_eq!(dir.file_type(), FileType::Wad);
        assert!(dir.is_empty());

        add_lump(&mut dir, "MAP01", b"");
        add_lump(&mut dir, "things", b"1234567890");
        assert!(dir.need_commit());
        dir.commit("add lumps").unwrap();
        assert_eq!(dir.refresh().unwrap(), Some(0));

        assert_eq!(names(&dir), vec!["MAP01", "THINGS"]);
        assert_eq!(dir.entry(1).unwrap().size, 10);
        assert_eq!(dir.entry(1).unwrap().file_type, FileType::Lump);
        assert_eq!(dir.describe_entries(1), "1 lump");
        assert_eq!(dir.describe_entries(3), "3 lumps");

        let mut lump = dir.open_entry(1).unwrap();
        assert_eq!(lump.read_all().unwrap(), b"1234567890".to_vec());
        lump.close().unwrap();
    }

    #[test]
    fn test_history_messages_and_undo() {
        let mut dir = memory_wad_dir();
        assert_eq!(dir.last_commit_message(), "First revision");
        assert_eq!(dir.can_undo(), 0);

        add_lump(&mut dir, "ONE", b"1");
        dir.commit("add ONE").unwrap();
        dir.refresh().unwrap();
        dir.rename(0, "uno").unwrap();
        assert_eq!(names(&dir), vec!["UNO"]);
        dir.commit("rename ONE").unwrap();
        assert_eq!(dir.last_commit_message(), "rename ONE");
        assert_eq!(dir.can_undo(), 2);

        dir.undo(1).unwrap();
        assert_eq!(dir.last_commit_message(), "add ONE");
        assert_eq!(names(&dir), vec!["ONE"]);
        assert_eq!(dir.can_redo(), 1);

        dir.redo(1).unwrap();
        assert_eq!(names(&dir), vec!["UNO"]);

        dir.undo(2).unwrap();
        assert!(dir.is_empty());
        assert!(dir.undo(1).is_err());
    }

    #[test]
    fn test_rewrite_after_undo_drops_redo() {
        let mut dir = memory_wad_dir();
        add_lump(&mut dir, "ONE", b"1");
        dir.commit("one").unwrap();
        dir.refresh().unwrap();
        dir.rename(0, "TWO").unwrap();
        dir.commit("two").unwrap();

        dir.undo(1).unwrap();
        assert_eq!(dir.can_redo(), 1);
        let mut lump = dir.wad_file().unwrap().open_lump_rewrite(0).unwrap();
        lump.write_all(b"rewritten").unwrap();
        lump.close().unwrap();

        assert_eq!(dir.can_redo(), 0);
        let err = dir.redo(1).unwrap_err();
        assert!(matches!(
            err,
            FsError::NoHistory {
                requested: 1,
                available: 0
            }
        ));

        dir.undo(1).unwrap();
        assert_eq!(dir.last_commit_message(), "First revision");
        assert_eq!(dir.can_redo(), 1, "only the surviving revision");
        dir.redo(1).unwrap();
        assert_eq!(names(&dir), vec!["ONE"]);
        assert_eq!(dir.can_redo(), 0);
    }

    #[test]
    fn test_remove_and_swap() {
        let mut dir = memory_wad_dir();
        add_lump(&mut dir, "A", b"a");
        add_lump(&mut dir, "B", b"b");
        add_lump(&mut dir, "C", b"c");
        dir.commit("abc").unwrap();
        dir.refresh().unwrap();

        dir.swap_entries(0, 2).unwrap();
        assert_eq!(names(&dir), vec!["C", "B", "A"]);
        dir.remove(1).unwrap();
        assert_eq!(names(&dir), vec!["C", "A"]);
        dir.commit("shuffle").unwrap();
        assert_eq!(dir.refresh().unwrap(), None, "in-memory entries stayed in sync");
    }

    #[test]
    fn test_compact_resets_history() {
        let mut dir = memory_wad_dir();
        add_lump(&mut dir, "DATA", &[7u8; 64]);
        dir.commit("first").unwrap();
        add_lump(&mut dir, "DATA2", &[8u8; 64]);
        dir.wad_file().unwrap().delete_entry(0).unwrap();
        dir.commit("second").unwrap();

        assert!(dir.compact().unwrap());
        assert_eq!(dir.can_undo(), 0);
        assert_eq!(dir.last_commit_message(), "First revision");
        assert_eq!(names(&dir), vec!["DATA2"]);
        assert!(!dir.compact().unwrap());
    }

    #[test]
    fn test_lumps_are_not_directories() {
        let mut dir = memory_wad_dir();
        add_lump(&mut dir, "A", b"a");
        dir.commit("a").unwrap();
        dir.refresh().unwrap();
        assert!(dir.open_dir(EntryRef::Index(0)).is_err());
    }
}

//! The WAD archive engine.
//!
//! Writes are append-only: rewriting a lump places its new bytes at the
//! write cursor, and [`WadFile::commit`] writes a complete new directory
//! table after them before repointing the header. Every committed table is
//! kept as a [`revision`](revision::Revision), so undo and redo only have to
//! re-read an older (or newer) table and rewrite the 12-byte header.
//! Superseded lump data and tables stay in the file as junk until
//! [`WadFile::compact`] packs the live lumps together again.

mod format;
mod options;
mod revision;
mod serial;

pub use format::{LumpName, WadHeader, ENTRY_LEN, HEADER_LEN, IWAD_MAGIC, PWAD_MAGIC};
pub use options::{WadOpenOptions, WadOpenOptionsConfig, DEFAULT_LOOKAHEAD};
pub use serial::SerialGenerator;

use std::cell::RefCell;
use std::fs;
use std::io::SeekFrom;
use std::path::Path;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::vfile::VFile;
use crate::{check_index, FsError, Result};
use format::{encode_table, RawEntry};
use revision::{Revision, RevisionChain};

/// Number of leading lump bytes cached in each directory entry.
pub const LUMP_HEADER_LEN: usize = 8;

const UNNAMED: &str = "UNNAMED";

/// One slot of the in-memory directory table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WadEntry {
    pub position: u32,
    pub size: u32,
    pub name: LumpName,
    /// Process-local identifier, kept across re-reads of the table when the
    /// entry can be re-matched.
    pub serial_no: u64,
    lump_header: [u8; LUMP_HEADER_LEN],
}

impl WadEntry {
    fn from_raw(raw: &RawEntry, serial_no: u64) -> Self {
        Self {
            position: raw.position,
            size: raw.size,
            name: raw.name,
            serial_no,
            lump_header: [0; LUMP_HEADER_LEN],
        }
    }

    fn raw(&self) -> RawEntry {
        RawEntry {
            position: self.position,
            size: self.size,
            name: self.name,
        }
    }

    pub fn end(&self) -> u64 {
        u64::from(self.position) + u64::from(self.size)
    }

    /// The cached leading bytes of the lump, at most [`LUMP_HEADER_LEN`].
    pub fn lump_header(&self) -> &[u8] {
        let len = LUMP_HEADER_LEN.min(self.size as usize);
        &self.lump_header[..len]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WadSnapshot {
    revision: usize,
    state: Revision,
}

/// Match a freshly read table against the previous one.
///
/// Each new row is looked up in a window of `lookahead` old slots starting
/// just past the last match; matched rows keep their serial number and
/// cached lump header. Returns the new entries, the indices that need their
/// lump header read from disk, and the first index that differs.
fn match_entries(
    old: &[WadEntry],
    raws: &[RawEntry],
    lookahead: usize,
    serials: &SerialGenerator,
) -> (Vec<WadEntry>, Vec<usize>, Option<usize>) {
    let mut entries = Vec::with_capacity(raws.len());
    let mut unmatched = Vec::new();
    let mut first_change = None;
    let mut base: usize = 0;

    for (index, raw) in raws.iter().enumerate() {
        let window_end = old.len().min(base.saturating_add(lookahead));
        let found = (base..window_end).find(|&k| old[k].raw() == *raw);
        match found {
            Some(k) => {
                if k != index {
                    first_change.get_or_insert(index);
                }
                entries.push(old[k]);
                base = k + 1;
            }
            None => {
                first_change.get_or_insert(index);
                unmatched.push(index);
                entries.push(WadEntry::from_raw(raw, serials.next_serial()));
            }
        }
    }
    if first_change.is_none() && raws.len() != old.len() {
        first_change = Some(raws.len());
    }
    (entries, unmatched, first_change)
}

#[derive(Debug)]
struct WadState {
    stream: VFile,
    directory: Vec<WadEntry>,
    revisions: RevisionChain,
    /// Where the next lump rewrite or directory table goes.
    write_pos: u64,
    lump_open_count: usize,
    writer: Option<usize>,
    dirty: bool,
    conf: WadOpenOptionsConfig,
    serials: SerialGenerator,
    closed: bool,
}

impl WadState {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(FsError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.conf.read_only() {
            Err(FsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn check_no_writer(&self) -> Result<()> {
        match self.writer {
            Some(_) => Err(FsError::WriterBusy),
            None => Ok(()),
        }
    }

    fn stream_len(&mut self) -> Result<u64> {
        self.stream.seek(SeekFrom::End(0))
    }

    fn read_exact_at(&mut self, pos: u64, buf: &mut [u8], what: &'static str) -> Result<()> {
        self.stream.seek(SeekFrom::Start(pos))?;
        if self.stream.read_full(buf)? < buf.len() {
            return Err(FsError::Truncated(what));
        }
        Ok(())
    }

    fn write_at(&mut self, pos: u64, buf: &[u8]) -> Result<()> {
        self.stream.seek(SeekFrom::Start(pos))?;
        self.stream.write_all(buf)
    }

    fn read_lump_header(&mut self, entry: &WadEntry) -> Result<[u8; LUMP_HEADER_LEN]> {
        let mut header = [0u8; LUMP_HEADER_LEN];
        let len = LUMP_HEADER_LEN.min(entry.size as usize);
        if len > 0 {
            self.read_exact_at(u64::from(entry.position), &mut header[..len], "lump data")?;
        }
        Ok(header)
    }

    /// Parse the table `header` points at without installing it.
    fn load_directory(&mut self, header: &WadHeader) -> Result<(Vec<WadEntry>, Option<usize>)> {
        let file_len = self.stream_len()?;
        if header.table_end() > file_len {
            return Err(FsError::Truncated("directory table"));
        }

        let mut table = vec![0u8; header.num_lumps as usize * ENTRY_LEN];
        self.read_exact_at(u64::from(header.table_offset), &mut table, "directory table")?;
        let raws: Vec<RawEntry> = table.chunks_exact(ENTRY_LEN).map(RawEntry::decode).collect();
        if let Some(index) = raws
            .iter()
            .position(|raw| raw.size > 0 && raw.end() > file_len)
        {
            return Err(FsError::LumpOutOfBounds { index });
        }

        let (mut entries, unmatched, first_change) = match_entries(
            &self.directory,
            &raws,
            self.conf.lookahead(),
            &self.serials,
        );
        for index in unmatched {
            let entry = entries[index];
            entries[index].lump_header = self.read_lump_header(&entry)?;
        }
        trace!(
            lumps = entries.len(),
            first_change = ?first_change,
            "read directory table"
        );
        Ok((entries, first_change))
    }

    fn write_header(&mut self, header: &WadHeader) -> Result<()> {
        self.write_at(0, &header.encode())
    }

    /// Write the in-memory table at the write cursor, record it as a new
    /// revision and point the header at it.
    fn write_directory(&mut self) -> Result<()> {
        let table_offset = u32::try_from(self.write_pos).map_err(|_| FsError::TooLarge)?;
        let num_lumps = u32::try_from(self.directory.len()).map_err(|_| FsError::TooLarge)?;
        let raws: Vec<RawEntry> = self.directory.iter().map(WadEntry::raw).collect();
        let table = encode_table(raws.iter());

        self.write_at(self.write_pos, &table)?;
        let eof = self.write_pos + table.len() as u64;
        let header = WadHeader {
            magic: self.revisions.current().header.magic,
            num_lumps,
            table_offset,
        };
        self.stream.sync()?;
        self.write_header(&header)?;

        self.revisions.push(Revision { header, eof });
        self.write_pos = eof;
        self.dirty = false;
        debug!(num_lumps, table_offset, eof, "committed directory");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.check_writable()?;
        if !self.dirty {
            return Ok(());
        }
        self.check_no_writer()?;
        self.write_directory()
    }

    /// Make revision `target` current, on disk as well as in memory.
    fn move_to_revision(&mut self, target: usize) -> Result<Option<usize>> {
        let revision = *self.revisions.get(target).ok_or(FsError::InvalidSnapshot)?;
        let (directory, first_change) = self.load_directory(&revision.header)?;
        self.write_header(&revision.header)?;

        self.directory = directory;
        self.revisions.set_current(target);
        self.write_pos = revision.eof;
        self.dirty = false;
        debug!(
            revision = target,
            num_lumps = revision.header.num_lumps,
            eof = revision.eof,
            "moved to revision"
        );
        Ok(first_change)
    }

    fn check_history_move(&self) -> Result<()> {
        self.check_writable()?;
        self.check_no_writer()
    }

    fn minimum_size(&self) -> u64 {
        let table = (ENTRY_LEN * self.directory.len()) as u64;
        let lumps: u64 = self.directory.iter().map(|e| u64::from(e.size)).sum();
        HEADER_LEN as u64 + table + lumps
    }

    /// Copy every live lump to consecutive positions from `start` and
    /// commit a table pointing at the copies. The in-memory table is left
    /// untouched on failure.
    fn rewrite_all_lumps(&mut self, start: u64) -> Result<()> {
        let saved_directory = self.directory.clone();
        let saved_write_pos = self.write_pos;
        let result = self.copy_lumps_to(start);
        if result.is_err() {
            self.directory = saved_directory;
            self.write_pos = saved_write_pos;
            self.dirty = true;
        }
        result
    }

    fn copy_lumps_to(&mut self, start: u64) -> Result<()> {
        let mut pos = start;
        for index in 0..self.directory.len() {
            let entry = self.directory[index];
            let new_position = u32::try_from(pos).map_err(|_| FsError::TooLarge)?;
            if entry.size > 0 {
                let mut lump = self
                    .stream
                    .restrict(u64::from(entry.position), Some(entry.end()), true)?;
                self.stream.seek(SeekFrom::Start(pos))?;
                let copied = VFile::copy(&mut lump, &mut self.stream)?;
                lump.close()?;
                if copied != u64::from(entry.size) {
                    return Err(FsError::Truncated("lump data"));
                }
                trace!(index, from = entry.position, to = new_position, size = entry.size, "moved lump");
            }
            self.directory[index].position = new_position;
            pos += u64::from(entry.size);
        }
        self.write_pos = pos;
        self.dirty = true;
        self.write_directory()
    }

    fn compact(&mut self) -> Result<bool> {
        self.check_writable()?;
        self.check_no_writer()?;
        if self.lump_open_count > 0 {
            return Err(FsError::LumpsOpen(self.lump_open_count));
        }

        let min_size = self.minimum_size();
        let file_len = self.stream_len()?;
        if file_len <= min_size {
            return Ok(false);
        }
        debug!(file_len, min_size, "compacting");

        // The first pass moves everything out of the way of the packed
        // layout, so the second pass never reads bytes it already overwrote.
        self.rewrite_all_lumps(self.write_pos.max(min_size))?;
        self.rewrite_all_lumps(HEADER_LEN as u64)?;

        self.stream.seek(SeekFrom::Start(self.write_pos))?;
        self.stream.truncate()?;
        self.revisions.discard_backward();
        debug!(len = self.write_pos, "compacted");
        Ok(true)
    }

    fn finish_rewrite(&mut self, index: usize, written: u64) -> Result<()> {
        self.lump_open_count = self.lump_open_count.saturating_sub(1);
        self.writer = None;
        if self.closed {
            return Ok(());
        }
        let size = u32::try_from(written).map_err(|_| FsError::TooLarge)?;
        let len = self.directory.len();
        let entry = self
            .directory
            .get_mut(index)
            .ok_or(FsError::IndexOutOfRange { index, len })?;
        entry.size = size;
        let entry = *entry;
        self.write_pos = entry.end();
        self.dirty = true;
        self.directory[index].lump_header = self.read_lump_header(&entry)?;
        trace!(index, position = entry.position, size, "lump rewritten");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.lump_open_count > 0 {
            return Err(FsError::LumpsOpen(self.lump_open_count));
        }
        // Anything past the current revision is redo data, which does not
        // outlive the archive handle.
        let truncated = if self.conf.read_only() {
            Ok(())
        } else {
            let eof = self.revisions.current().eof;
            self.stream
                .seek(SeekFrom::Start(eof))
                .and_then(|_| self.stream.truncate())
        };
        self.closed = true;
        let closed = self.stream.close_inner();
        truncated.and(closed)
    }
}

/// An open WAD archive.
///
/// Lump streams handed out by [`open_lump_read`](WadFile::open_lump_read)
/// and [`open_lump_rewrite`](WadFile::open_lump_rewrite) are restricted
/// views of the archive's stream and must be closed before the archive is.
#[derive(Debug)]
pub struct WadFile {
    state: Rc<RefCell<WadState>>,
}

impl WadFile {
    /// Open the archive at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        WadOpenOptions::new().open(path)
    }

    /// Create an empty PWAD at `path`, replacing any existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let options = WadOpenOptions::new();
        let mut wad = Self::init_empty(
            VFile::from_file(file),
            *options.config(),
            SerialGenerator::new(),
        )?;
        debug!(path = %path.display(), "created WAD");
        wad.close()
    }

    pub(crate) fn init_empty(
        mut stream: VFile,
        conf: WadOpenOptionsConfig,
        serials: SerialGenerator,
    ) -> Result<Self> {
        stream.seek(SeekFrom::Start(0))?;
        stream.write_all(&[0u8; HEADER_LEN])?;
        stream.truncate()?;
        let placeholder = Revision {
            header: WadHeader::empty_pwad(0),
            eof: HEADER_LEN as u64,
        };
        let mut state = WadState {
            stream,
            directory: Vec::new(),
            revisions: RevisionChain::new(placeholder),
            write_pos: HEADER_LEN as u64,
            lump_open_count: 0,
            writer: None,
            dirty: true,
            conf,
            serials,
            closed: false,
        };
        state.write_directory()?;
        state.revisions.discard_backward();
        Ok(Self::from_state(state))
    }

    pub(crate) fn from_stream(
        mut stream: VFile,
        conf: WadOpenOptionsConfig,
        serials: SerialGenerator,
    ) -> Result<Self> {
        let mut buf = [0u8; HEADER_LEN];
        stream.seek(SeekFrom::Start(0))?;
        if stream.read_full(&mut buf)? < HEADER_LEN {
            return Err(FsError::Truncated("header"));
        }
        let header = WadHeader::decode(&buf)?;
        let eof = stream.seek(SeekFrom::End(0))?;

        let mut state = WadState {
            stream,
            directory: Vec::new(),
            revisions: RevisionChain::new(Revision { header, eof }),
            write_pos: eof,
            lump_open_count: 0,
            writer: None,
            dirty: false,
            conf,
            serials,
            closed: false,
        };
        let (directory, _) = state.load_directory(&header)?;
        state.directory = directory;
        debug!(
            num_lumps = header.num_lumps,
            table_offset = header.table_offset,
            eof,
            read_only = conf.read_only(),
            "opened WAD"
        );
        Ok(Self::from_state(state))
    }

    fn from_state(state: WadState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn is_iwad(&self) -> bool {
        self.state.borrow().revisions.current().header.is_iwad()
    }

    pub fn is_read_only(&self) -> bool {
        self.state.borrow().conf.read_only()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.borrow().dirty
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn num_lumps(&self) -> usize {
        self.state.borrow().directory.len()
    }

    /// A copy of the current directory table.
    pub fn directory(&self) -> Vec<WadEntry> {
        self.state.borrow().directory.clone()
    }

    pub fn entry(&self, index: usize) -> Result<WadEntry> {
        let state = self.state.borrow();
        check_index(index, state.directory.len())?;
        Ok(state.directory[index])
    }

    /// Index of the last lump called `name`, ignoring case.
    pub fn num_for_name(&self, name: &str) -> Option<usize> {
        self.state
            .borrow()
            .directory
            .iter()
            .rposition(|entry| entry.name.eq_ignore_case(name))
    }

    /// Copy the cached leading bytes of lump `index` into `buf`.
    pub fn read_lump_header(&self, index: usize, buf: &mut [u8]) -> Result<usize> {
        let state = self.state.borrow();
        check_index(index, state.directory.len())?;
        let header = state.directory[index].lump_header();
        let len = header.len().min(buf.len());
        buf[..len].copy_from_slice(&header[..len]);
        Ok(len)
    }

    /// Insert `count` empty lumps named `UNNAMED` before `before_index`.
    pub fn add_entries(&mut self, before_index: usize, count: usize) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_writable()?;
        state.check_no_writer()?;
        check_index(before_index, state.directory.len() + 1)?;

        let name = LumpName::new(UNNAMED);
        let new_entries: Vec<WadEntry> = (0..count)
            .map(|_| WadEntry {
                position: 0,
                size: 0,
                name,
                serial_no: state.serials.next_serial(),
                lump_header: [0; LUMP_HEADER_LEN],
            })
            .collect();
        let tail = state.directory.split_off(before_index);
        state.directory.extend(new_entries);
        state.directory.extend(tail);
        state.dirty = true;
        Ok(())
    }

    pub fn delete_entries(&mut self, index: usize, count: usize) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_writable()?;
        state.check_no_writer()?;
        let len = state.directory.len();
        match index.checked_add(count) {
            Some(end) if end <= len => {
                state.directory.drain(index..end);
            }
            _ => return Err(FsError::IndexOutOfRange { index, len }),
        }
        state.dirty = true;
        Ok(())
    }

    pub fn delete_entry(&mut self, index: usize) -> Result<()> {
        self.delete_entries(index, 1)
    }

    /// Rename lump `index`. The name is upper-cased and cut to 8 bytes.
    pub fn rename(&mut self, index: usize, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_writable()?;
        check_index(index, state.directory.len())?;
        state.directory[index].name = LumpName::new(name);
        state.dirty = true;
        Ok(())
    }

    pub fn swap_entries(&mut self, a: usize, b: usize) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_writable()?;
        let len = state.directory.len();
        check_index(a, len)?;
        check_index(b, len)?;
        if a == b {
            return Ok(());
        }
        state.check_no_writer()?;
        state.directory.swap(a, b);
        state.dirty = true;
        Ok(())
    }

    /// Open a read-only stream over the bytes of lump `index`.
    pub fn open_lump_read(&self, index: usize) -> Result<VFile> {
        let mut lump = {
            let mut state = self.state.borrow_mut();
            state.check_open()?;
            check_index(index, state.directory.len())?;
            let entry = state.directory[index];
            let start = if entry.size > 0 {
                u64::from(entry.position)
            } else {
                0
            };
            let view = state
                .stream
                .restrict(start, Some(start + u64::from(entry.size)), true)?;
            state.lump_open_count += 1;
            view
        };

        let state = Rc::downgrade(&self.state);
        lump.on_close(move |_| {
            if let Some(state) = state.upgrade() {
                let mut state = state.borrow_mut();
                state.lump_open_count = state.lump_open_count.saturating_sub(1);
            }
            Ok(())
        });
        Ok(lump)
    }

    /// Open an unbounded stream that replaces the contents of lump `index`.
    ///
    /// The new bytes are appended at the write cursor. When the stream is
    /// closed the lump's size becomes the number of bytes written and the
    /// archive is marked dirty. Only one lump can be rewritten at a time.
    /// Redo history is discarded, since the new bytes may overwrite it.
    pub fn open_lump_rewrite(&mut self, index: usize) -> Result<VFile> {
        let mut lump = {
            let mut state = self.state.borrow_mut();
            state.check_writable()?;
            check_index(index, state.directory.len())?;
            state.check_no_writer()?;

            let start = state.write_pos;
            let position = u32::try_from(start).map_err(|_| FsError::TooLarge)?;
            let view = state.stream.restrict(start, None, false)?;
            state.revisions.truncate_forward();
            state.directory[index].position = position;
            state.writer = Some(index);
            state.lump_open_count += 1;
            trace!(index, position, "lump opened for rewrite");
            view
        };

        let state = Rc::downgrade(&self.state);
        lump.on_close(move |lump| {
            let written = lump.tell()?;
            finish_rewrite(&state, index, written)
        });
        Ok(lump)
    }

    /// Persist the in-memory table as a new revision. A no-op when nothing
    /// changed since the last commit.
    pub fn commit(&mut self) -> Result<()> {
        self.state.borrow_mut().commit()
    }

    /// Bytes in the file not used by the header, the table or a live lump.
    pub fn num_junk_bytes(&self) -> u64 {
        let state = self.state.borrow();
        state
            .revisions
            .current()
            .eof
            .saturating_sub(state.minimum_size())
    }

    /// Pack the live lumps at the start of the file and truncate it.
    ///
    /// Returns `false` if the file is already as small as it can be. Undo
    /// history before this point is lost.
    pub fn compact(&mut self) -> Result<bool> {
        self.state.borrow_mut().compact()
    }

    pub fn can_undo(&self) -> usize {
        self.state.borrow().revisions.can_undo()
    }

    pub fn can_redo(&self) -> usize {
        self.state.borrow().revisions.can_redo()
    }

    /// Step back `levels` revisions. Returns the first table index that
    /// differs from the table before the call, if any. The index may equal
    /// the new lump count when only trailing lumps went away.
    pub fn undo(&mut self, levels: usize) -> Result<Option<usize>> {
        let mut state = self.state.borrow_mut();
        state.check_history_move()?;
        let target = state.revisions.undo_target(levels)?;
        state.move_to_revision(target)
    }

    /// Step forward `levels` revisions; see [`undo`](WadFile::undo).
    pub fn redo(&mut self, levels: usize) -> Result<Option<usize>> {
        let mut state = self.state.borrow_mut();
        state.check_history_move()?;
        let target = state.revisions.redo_target(levels)?;
        state.move_to_revision(target)
    }

    /// Serialise the position in the revision chain into a memory stream.
    pub fn save_snapshot(&self) -> Result<VFile> {
        let state = self.state.borrow();
        state.check_open()?;
        let snapshot = WadSnapshot {
            revision: state.revisions.current_index(),
            state: *state.revisions.current(),
        };
        let bytes = bincode::serialize(&snapshot).map_err(|_| FsError::InvalidSnapshot)?;
        Ok(VFile::from_bytes(bytes))
    }

    /// Move to the revision recorded by [`save_snapshot`](WadFile::save_snapshot).
    pub fn restore_snapshot(&mut self, snapshot: &mut VFile) -> Result<Option<usize>> {
        snapshot.seek(SeekFrom::Start(0))?;
        let bytes = snapshot.read_all()?;
        let snapshot: WadSnapshot =
            bincode::deserialize(&bytes).map_err(|_| FsError::InvalidSnapshot)?;

        let mut state = self.state.borrow_mut();
        state.check_history_move()?;
        match state.revisions.get(snapshot.revision) {
            Some(revision) if *revision == snapshot.state => {
                state.move_to_revision(snapshot.revision)
            }
            _ => Err(FsError::InvalidSnapshot),
        }
    }

    /// Close the archive, dropping any redo data past the current revision.
    /// Fails while lump streams are still open.
    pub fn close(&mut self) -> Result<()> {
        self.state.borrow_mut().close()
    }
}

fn finish_rewrite(state: &Weak<RefCell<WadState>>, index: usize, written: u64) -> Result<()> {
    match state.upgrade() {
        Some(state) => state.borrow_mut().finish_rewrite(index, written),
        None => Ok(()),
    }
}

impl Drop for WadFile {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("failed to close WAD on drop: {err}");
        }
    }
}

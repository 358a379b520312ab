//! Seekable byte streams.
//!
//! A [`VFile`] wraps one [`StreamBackend`]: an OS file ([`HostStream`]), a
//! growable memory buffer ([`MemoryStream`]) or a restricted view onto a
//! byte range of another stream (see [`VFile::restrict`]).
//!
//! Several restricted views may share a single underlying stream, each with
//! its own logical position. The underlying stream keeps one saved position
//! per *context* (its own local context plus one per live view) and switches
//! between them lazily: the first operation after the active context changed
//! stores the backend position into the stale context and seeks the backend
//! to the position saved for the new one.

mod host;
mod mem;
mod restricted;

pub use host::HostStream;
pub use mem::MemoryStream;

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::{FsError, Result};
use restricted::RestrictedStream;

const COPY_CHUNK_LEN: usize = 8 * 1024;

/// The operations a stream implementation has to provide.
///
/// Positions are absolute within the backend's own byte space.
pub trait StreamBackend: fmt::Debug + Upcastable {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    fn tell(&mut self) -> Result<u64>;

    /// Cut the stream off at the current position.
    fn truncate(&mut self) -> Result<()>;

    /// Flush buffered data. Durability is best-effort.
    fn sync(&mut self) -> Result<()>;

    /// Release the backing resource. Called exactly once.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// Implementation of `Upcastable` taken from https://users.rust-lang.org/t/why-does-downcasting-not-work-for-subtraits/33286/7 .
/// Trait needed to get downcasting from `StreamBackend` to work.
pub trait Upcastable {
    fn upcast_any_ref(&'_ self) -> &'_ dyn Any;
    fn upcast_any_mut(&'_ mut self) -> &'_ mut dyn Any;
}

impl<T: Any + fmt::Debug + 'static> Upcastable for T {
    #[inline]
    fn upcast_any_ref(&'_ self) -> &'_ dyn Any {
        self
    }
    #[inline]
    fn upcast_any_mut(&'_ mut self) -> &'_ mut dyn Any {
        self
    }
}

impl dyn StreamBackend + 'static {
    #[inline]
    pub fn downcast_ref<T: 'static>(&'_ self) -> Option<&'_ T> {
        self.upcast_any_ref().downcast_ref::<T>()
    }
    #[inline]
    pub fn downcast_mut<T: 'static>(&'_ mut self) -> Option<&'_ mut T> {
        self.upcast_any_mut().downcast_mut::<T>()
    }
}

pub(crate) type ContextId = u64;

/// The context every stream starts in; used by direct calls on the stream.
pub(crate) const LOCAL_CONTEXT: ContextId = 0;

/// A backend plus the bookkeeping that lets several cursors share it.
#[derive(Debug)]
pub(crate) struct Multiplexed {
    backend: Box<dyn StreamBackend>,
    current_ctx: ContextId,
    last_ctx: ContextId,
    saved: HashMap<ContextId, u64>,
    next_ctx: ContextId,
    closed: bool,
}

pub(crate) type SharedStream = Rc<RefCell<Multiplexed>>;

impl Multiplexed {
    fn new(backend: Box<dyn StreamBackend>) -> Self {
        Self {
            backend,
            current_ctx: LOCAL_CONTEXT,
            last_ctx: LOCAL_CONTEXT,
            saved: HashMap::new(),
            next_ctx: LOCAL_CONTEXT + 1,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(FsError::Closed)
        } else {
            Ok(())
        }
    }

    /// Lazily save the stale context's position and restore the current one.
    fn switch_saved_pos(&mut self, do_seek: bool) -> Result<()> {
        if self.current_ctx == self.last_ctx {
            return Ok(());
        }

        let pos = self.backend.tell()?;
        self.saved.insert(self.last_ctx, pos);
        if do_seek {
            let target = self.saved.get(&self.current_ctx).copied().unwrap_or(0);
            self.backend.seek(SeekFrom::Start(target))?;
        }
        trace!(
            from = self.last_ctx,
            to = self.current_ctx,
            saved = pos,
            "stream context switch"
        );
        self.last_ctx = self.current_ctx;
        Ok(())
    }

    /// Make `ctx` the active context, returning the one it replaced.
    pub(crate) fn enter_context(&mut self, ctx: ContextId) -> ContextId {
        std::mem::replace(&mut self.current_ctx, ctx)
    }

    pub(crate) fn leave_context(&mut self, saved: ContextId) {
        self.current_ctx = saved;
    }

    pub(crate) fn new_context(&mut self) -> Result<ContextId> {
        self.check_open()?;
        let ctx = self.next_ctx;
        self.next_ctx += 1;
        self.saved.insert(ctx, 0);
        Ok(ctx)
    }

    /// Forget a context, making sure the backend is no longer parked on it.
    pub(crate) fn release_context(&mut self, ctx: ContextId) -> Result<()> {
        let result = if !self.closed && self.last_ctx == ctx {
            self.switch_saved_pos(true)
        } else {
            Ok(())
        };
        self.saved.remove(&ctx);
        result
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        self.switch_saved_pos(true)?;
        self.backend.read(buf)
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        self.switch_saved_pos(true)?;
        self.backend.write(buf)
    }

    pub(crate) fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_open()?;
        // An absolute seek overrides whatever position the context had.
        self.switch_saved_pos(!matches!(pos, SeekFrom::Start(_)))?;
        self.backend.seek(pos)
    }

    pub(crate) fn tell(&mut self) -> Result<u64> {
        self.check_open()?;
        self.switch_saved_pos(true)?;
        self.backend.tell()
    }

    pub(crate) fn truncate(&mut self) -> Result<()> {
        self.check_open()?;
        self.switch_saved_pos(true)?;
        self.backend.truncate()
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        self.check_open()?;
        self.switch_saved_pos(true)?;
        self.backend.sync()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let switched = self.switch_saved_pos(true);
        self.closed = true;
        let closed = self.backend.close();
        switched.and(closed)
    }
}

type OnClose = Box<dyn FnOnce(&mut VFile) -> Result<()>>;

/// A seekable byte stream.
///
/// Closing happens through [`VFile::close`], or implicitly on drop (errors
/// are then only logged).
#[derive(derive_more::Debug)]
pub struct VFile {
    shared: SharedStream,
    #[debug(ignore)]
    on_close: Option<OnClose>,
    closed: bool,
}

impl VFile {
    pub fn new(backend: impl StreamBackend + 'static) -> Self {
        Self::from_backend(Box::new(backend))
    }

    pub fn from_backend(backend: Box<dyn StreamBackend>) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Multiplexed::new(backend))),
            on_close: None,
            closed: false,
        }
    }

    /// Wrap an already open OS file.
    pub fn from_file(file: fs::File) -> Self {
        Self::new(HostStream::new(file))
    }

    /// Open an existing file for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        Ok(Self::from_file(file))
    }

    /// An in-memory stream holding a copy of `data`, positioned at 0.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::new(MemoryStream::new(data.into()))
    }

    /// An empty in-memory stream.
    pub fn memory() -> Self {
        Self::new(MemoryStream::default())
    }

    /// Create a view exposing bytes `[start, end)` of this stream as an
    /// independent stream whose position 0 is `start`. `end == None` means
    /// the view is unbounded. The view starts out positioned at 0.
    pub fn restrict(&self, start: u64, end: Option<u64>, read_only: bool) -> Result<VFile> {
        if matches!(end, Some(end) if end < start) {
            return Err(FsError::OutOfRange);
        }
        let ctx = self.shared.borrow_mut().new_context()?;
        let backend = RestrictedStream::new(self.shared.clone(), ctx, start, end, read_only);
        let mut view = VFile::new(backend);
        view.seek(SeekFrom::Start(0))?;
        Ok(view)
    }

    /// Register a callback that runs once, right before the backend is
    /// released. Replaces any earlier callback.
    pub fn on_close(&mut self, callback: impl FnOnce(&mut VFile) -> Result<()> + 'static) {
        self.on_close = Some(Box::new(callback));
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.shared.borrow_mut().read(buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.shared.borrow_mut().write(buf)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.shared.borrow_mut().seek(pos)
    }

    pub fn tell(&mut self) -> Result<u64> {
        self.shared.borrow_mut().tell()
    }

    /// Truncate the stream at the current position.
    pub fn truncate(&mut self) -> Result<()> {
        self.shared.borrow_mut().truncate()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.shared.borrow_mut().sync()
    }

    /// Read until `buf` is full or the stream is exhausted.
    pub fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }

    /// Copy everything from the current position of `from` to `to`.
    /// Returns the number of bytes copied.
    pub fn copy(from: &mut VFile, to: &mut VFile) -> Result<u64> {
        let mut buf = vec![0u8; COPY_CHUNK_LEN];
        let mut total = 0u64;
        loop {
            let n = from.read(&mut buf)?;
            if n == 0 {
                return Ok(total);
            }
            to.write_all(&buf[..n])?;
            total += n as u64;
        }
    }

    /// Read the rest of the stream into memory.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = VFile::memory();
        VFile::copy(self, &mut out)?;
        let contents = out.with_memory_contents(|data| data.to_vec());
        out.close()?;
        Ok(contents.unwrap_or_default())
    }

    /// Run `f` on the contents of a memory-backed stream. Returns `None` for
    /// other kinds of stream.
    pub fn with_memory_contents<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let shared = self.shared.borrow();
        shared
            .backend
            .downcast_ref::<MemoryStream>()
            .map(|mem| f(mem.contents()))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the stream, running the on-close callback first.
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    pub(crate) fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let switched = self.shared.borrow_mut().switch_saved_pos(true);
        let callback = match self.on_close.take() {
            Some(callback) => callback(self),
            None => Ok(()),
        };
        self.closed = true;
        let closed = self.shared.borrow_mut().close();
        switched.and(callback).and(closed)
    }
}

impl Drop for VFile {
    fn drop(&mut self) {
        if let Err(err) = self.close_inner() {
            warn!("failed to close stream on drop: {err}");
        }
    }
}

impl io::Read for VFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        VFile::read(self, buf).map_err(Into::into)
    }
}

impl io::Write for VFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        VFile::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync().map_err(Into::into)
    }
}

impl io::Seek for VFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        VFile::seek(self, pos).map_err(Into::into)
    }
}

#[cfg(test)]
mod test_vfile {
    use std::io::{Read, SeekFrom, Write};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ErrorKind;

    fn numbered(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn test_memory_read_write_seek() {
        let mut f = VFile::memory();
        f.write_all(b"hello world").unwrap();
        assert_eq!(f.tell().unwrap(), 11);

        f.seek(SeekFrom::Start(6)).unwrap();
        let mut buf = [0u8; 16];
        let n = f.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
        assert_eq!(f.read(&mut buf).unwrap(), 0, "exhausted");

        f.seek(SeekFrom::Start(5)).unwrap();
        f.truncate().unwrap();
        assert_eq!(
            f.with_memory_contents(|data| data.to_vec()),
            Some(b"hello".to_vec())
        );
        assert!(f.seek(SeekFrom::Start(6)).is_err(), "beyond the end");
    }

    #[test]
    fn test_restricted_read_is_clipped() {
        let f = VFile::from_bytes(numbered(64));
        let mut view = f.restrict(10, Some(20), true).unwrap();

        let mut buf = [0u8; 32];
        let n = view.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &numbered(64)[10..20]);
        assert_eq!(view.read(&mut buf).unwrap(), 0);
        assert_eq!(view.tell().unwrap(), 10);
    }

    #[test]
    fn test_restricted_read_only_rejects_writes() {
        let f = VFile::from_bytes(numbered(8));
        let mut view = f.restrict(0, Some(8), true).unwrap();
        let err = view.write(b"x").unwrap_err();
        assert!(matches!(err, FsError::ReadOnly));
    }

    #[test]
    fn test_restricted_bounded_write_never_spills() {
        let mut f = VFile::from_bytes(vec![0xaa; 16]);
        {
            let mut view = f.restrict(4, Some(8), false).unwrap();
            assert_eq!(view.write(b"123456").unwrap(), 4, "shortened to fit");
            let err = view.write(b"7").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
            view.close().unwrap();
        }

        f.seek(SeekFrom::Start(0)).unwrap();
        let contents = f.read_all().unwrap();
        let mut expected = vec![0xaa; 16];
        expected[4..8].copy_from_slice(b"1234");
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_restricted_seek_bounds() {
        let f = VFile::from_bytes(numbered(32));
        let mut view = f.restrict(8, Some(16), true).unwrap();
        assert_eq!(view.seek(SeekFrom::Start(8)).unwrap(), 8, "end is allowed");
        assert!(view.seek(SeekFrom::Start(9)).is_err());

        view.seek(SeekFrom::Start(2)).unwrap();
        let mut byte = [0u8; 1];
        view.read(&mut byte).unwrap();
        assert_eq!(byte[0], 10);

        view.seek(SeekFrom::End(-1)).unwrap();
        view.read(&mut byte).unwrap();
        assert_eq!(byte[0], 15);
    }

    #[test]
    fn test_unbounded_view_grows_inner() {
        let mut f = VFile::from_bytes(b"abc".to_vec());
        let mut view = f.restrict(3, None, false).unwrap();
        view.write_all(b"defgh").unwrap();
        assert_eq!(view.tell().unwrap(), 5);
        view.close().unwrap();

        f.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(f.read_all().unwrap(), b"abcdefgh".to_vec());
    }

    #[test]
    fn test_interleaved_views_keep_their_positions() {
        let mut data = numbered(16);
        data.extend(vec![0u8; 8]);
        let f = VFile::from_bytes(data);

        let mut reader = f.restrict(0, Some(8), true).unwrap();
        let mut writer = f.restrict(16, Some(24), false).unwrap();

        let mut read = Vec::new();
        for i in 0..8u8 {
            let mut byte = [0u8; 1];
            assert_eq!(reader.read(&mut byte).unwrap(), 1);
            read.push(byte[0]);
            assert_eq!(writer.write(&[0xf0 | i]).unwrap(), 1);
        }
        assert_eq!(read, numbered(8));
        reader.close().unwrap();
        writer.close().unwrap();

        let mut check = f.restrict(16, Some(24), true).unwrap();
        let written = check.read_all().unwrap();
        assert_eq!(written, (0..8u8).map(|i| 0xf0 | i).collect::<Vec<_>>());
    }

    #[test]
    fn test_local_position_survives_view_activity() {
        let mut f = VFile::from_bytes(numbered(32));
        f.seek(SeekFrom::Start(3)).unwrap();

        let mut view = f.restrict(20, Some(30), true).unwrap();
        let mut buf = [0u8; 4];
        view.read_full(&mut buf).unwrap();
        assert_eq!(buf, [20, 21, 22, 23]);

        let mut byte = [0u8; 1];
        f.read(&mut byte).unwrap();
        assert_eq!(byte[0], 3, "local cursor was restored");

        view.read(&mut byte).unwrap();
        assert_eq!(byte[0], 24, "view cursor was restored");
    }

    #[test]
    fn test_on_close_runs_once_with_final_position() {
        use std::cell::Cell;

        let f = VFile::from_bytes(vec![0u8; 4]);
        let seen = Rc::new(Cell::new(None));
        let mut view = f.restrict(0, None, false).unwrap();
        let seen2 = seen.clone();
        view.on_close(move |stream| {
            seen2.set(Some(stream.tell()?));
            Ok(())
        });
        view.write_all(b"0123456").unwrap();
        drop(view);
        assert_eq!(seen.get(), Some(7));
    }

    #[test]
    fn test_restricted_truncate_is_unsupported() {
        let f = VFile::from_bytes(numbered(4));
        let mut view = f.restrict(0, Some(4), false).unwrap();
        assert_eq!(view.truncate().unwrap_err().kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_std_io_traits() {
        let mut f = VFile::memory();
        f.write_all(b"line one\n").unwrap();
        Write::flush(&mut f).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut s = String::new();
        Read::read_to_string(&mut f, &mut s).unwrap();
        assert_eq!(s, "line one\n");
    }

    #[test]
    fn test_host_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut f = VFile::open(&path).unwrap();
        f.seek(SeekFrom::Start(4)).unwrap();
        f.truncate().unwrap();
        f.sync().unwrap();
        f.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"0123");
    }
}

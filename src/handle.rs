use crate::prelude::*;
use std::io;

/// Per-file capability table. Backends implement the slots they support; a
/// method left at its default is reported to callers as `NotSupported`
/// without reaching the backend.
pub trait FileOps: Send {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::NotSupported)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::NotSupported)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn tell(&mut self) -> Result<u64> {
        Err(Error::NotSupported)
    }

    fn seek(&mut self, _pos: u64) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn length(&mut self) -> Result<u64> {
        Err(Error::NotSupported)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

impl OpenMode {
    fn writable(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::Append)
    }
}

// Keeps the owning reader's live-handle count (and, for write handles, the
// global open-write count) accurate without a back-pointer to the reader.
// Counts are bumped on construction and released exactly once, on drop.
pub(crate) struct HandleGuard {
    counters: Vec<Arc<AtomicUsize>>,
}

impl HandleGuard {
    pub(crate) fn new(counters: Vec<Arc<AtomicUsize>>) -> HandleGuard {
        for counter in &counters {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        HandleGuard { counters }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        for counter in &self.counters {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// An open file within some root (or the write directory).
///
/// A handle is tied to the reader that produced it: the search-path entry
/// cannot be removed, and the owning [`Vfs`](crate::Vfs) cannot be
/// deinitialized, while the handle is alive. Dropping the handle closes it;
/// [`FileHandle::close`] does the same but surfaces flush failures.
///
/// Handles are not shareable between threads; use one handle per thread.
pub struct FileHandle {
    ops: Box<dyn FileOps>,
    mode: OpenMode,
    _guard: HandleGuard,
}

impl FileHandle {
    pub(crate) fn new(ops: Box<dyn FileOps>, mode: OpenMode, guard: HandleGuard) -> FileHandle {
        FileHandle {
            ops,
            mode,
            _guard: guard,
        }
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Reads up to `buf.len()` bytes. Fails with `InvalidArgument` on a
    /// write or append handle.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.mode != OpenMode::Read {
            return Err(Error::InvalidArgument).latch();
        }
        self.ops.read(buf).latch()
    }

    /// Writes `buf`. Fails with `InvalidArgument` on a read handle.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.mode.writable() {
            return Err(Error::InvalidArgument).latch();
        }
        self.ops.write(buf).latch()
    }

    pub fn tell(&mut self) -> Result<u64> {
        self.ops.tell().latch()
    }

    /// Seeks to an absolute position. Backends may refuse positions past the
    /// end of the file with `PastEof`.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.ops.seek(pos).latch()
    }

    pub fn length(&mut self) -> Result<u64> {
        self.ops.length().latch()
    }

    pub fn eof(&mut self) -> Result<bool> {
        let pos = self.ops.tell().latch()?;
        let len = self.ops.length().latch()?;
        Ok(pos >= len)
    }

    /// Flushes (for write handles) and closes. Dropping the handle closes it
    /// too, but swallows flush errors.
    pub fn close(mut self) -> Result<()> {
        self.ops.flush().latch()
    }
}

impl io::Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        FileHandle::read(self, buf).map_err(Into::into)
    }
}

impl io::Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FileHandle::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ops.flush().latch().map_err(Into::into)
    }
}

impl io::Seek for FileHandle {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(n) => Some(n),
            io::SeekFrom::End(offset) => {
                let len = self.length()?;
                len.checked_add_signed(offset)
            }
            io::SeekFrom::Current(offset) => {
                let cur = self.tell()?;
                cur.checked_add_signed(offset)
            }
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        FileHandle::seek(self, target)?;
        Ok(target)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct NullOps;
    impl FileOps for NullOps {}

    fn null_handle(mode: OpenMode) -> (FileHandle, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = HandleGuard::new(vec![counter.clone()]);
        (FileHandle::new(Box::new(NullOps), mode, guard), counter)
    }

    #[test]
    fn test_absent_slots_are_unsupported() {
        let (mut h, _counter) = null_handle(OpenMode::Read);
        assert!(matches!(h.read(&mut [0u8; 4]), Err(Error::NotSupported)));
        assert!(matches!(h.tell(), Err(Error::NotSupported)));
        assert!(matches!(h.seek(0), Err(Error::NotSupported)));
    }

    #[test]
    fn test_mode_gating() {
        let (mut h, _counter) = null_handle(OpenMode::Read);
        assert!(matches!(h.write(b"x"), Err(Error::InvalidArgument)));
        let (mut h, _counter) = null_handle(OpenMode::Write);
        assert!(matches!(h.read(&mut [0u8; 4]), Err(Error::InvalidArgument)));
    }

    #[test]
    fn test_guard_tracks_lifetime() {
        let (h, counter) = null_handle(OpenMode::Read);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        h.close().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let (h, counter) = null_handle(OpenMode::Write);
        drop(h);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}

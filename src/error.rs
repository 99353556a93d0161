use std::cell::RefCell;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("already initialized")]
    IsInitialized,
    #[error("not initialized")]
    NotInitialized,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid logical path")]
    InvalidPath,
    #[error("files still open")]
    FilesStillOpen,
    #[error("files open for writing")]
    FilesOpenWrite,
    #[error("no write directory set")]
    NoWriteDir,
    #[error("failed to create directory")]
    NoDirCreate,
    #[error("no such path")]
    NoSuchPath,
    #[error("no such file")]
    NoSuchFile,
    #[error("not a directory")]
    NotADir,
    #[error("not a file")]
    NotAFile,
    #[error("not an archive")]
    NotAnArchive,
    #[error("unsupported archive type")]
    UnsupportedArchive,
    #[error("not in search path")]
    NotInSearchPath,
    #[error("operation not supported by this backend")]
    NotSupported,
    #[error("seek past end of file")]
    PastEof,
    #[error("corrupt archive")]
    Corrupt,
    #[error("symbolic links are disabled")]
    SymlinkForbidden,
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

// Each thread keeps its own latched "last error" message. Failing public
// operations latch here before returning Err; reading is one-shot. Slots
// are thread-local, so no locking is involved anywhere.
thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = RefCell::new(None);
}

/// Returns and clears the calling thread's latched error message, if any.
///
/// Two reads without an intervening failure: the second returns `None`.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}

pub(crate) fn set_error(err: &Error) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(err.to_string()));
}

pub(crate) fn clear_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

pub(crate) trait Latch: Sized {
    /// Latch the error (if any) for the calling thread, then pass it through.
    fn latch(self) -> Self;
}

impl<T> Latch for Result<T> {
    fn latch(self) -> Self {
        if let Err(err) = &self {
            set_error(err);
        }
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_latch_is_one_shot() {
        clear_error();
        let _: Result<()> = Err(Error::NoSuchFile).latch();
        assert_eq!(last_error().as_deref(), Some("no such file"));
        assert_eq!(last_error(), None);
    }

    #[test]
    fn test_ok_does_not_stomp() {
        clear_error();
        let _: Result<()> = Err(Error::NoWriteDir).latch();
        let _: Result<u8> = Ok(3).latch();
        assert_eq!(last_error().as_deref(), Some("no write directory set"));
    }

    #[test]
    fn test_errors_are_thread_local() {
        clear_error();
        let _: Result<()> = Err(Error::PastEof).latch();
        let other = std::thread::spawn(|| {
            let _: Result<()> = Err(Error::Corrupt).latch();
            last_error()
        })
        .join()
        .unwrap();
        assert_eq!(other.as_deref(), Some("corrupt archive"));
        // the other thread's failure did not perturb ours
        assert_eq!(last_error().as_deref(), Some("seek past end of file"));
    }
}

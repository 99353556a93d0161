use crate::handle::FileOps;
use crate::prelude::*;

pub mod dir;
pub mod zip;

/// An opened root: a real directory or an archive. Logical paths handed to a
/// reader are already normalized and relative to the reader's root.
///
/// The write family defaults to `NotSupported`; archive backends are
/// read-only and simply leave those slots alone.
pub trait DirReader: Send + Sync {
    /// Child names of a directory, in whatever order the backend produces.
    fn enumerate(&self, path: &VfsPath) -> Result<Vec<String>>;

    fn exists(&self, path: &VfsPath) -> bool;

    fn is_dir(&self, path: &VfsPath) -> bool;

    /// Whether the terminal component really is a symbolic link, regardless
    /// of the symlink policy. The search path uses this to skip roots.
    fn is_symlink(&self, path: &VfsPath) -> bool;

    fn open_read(&self, path: &VfsPath) -> Result<Box<dyn FileOps>>;

    fn open_write(&self, _path: &VfsPath) -> Result<Box<dyn FileOps>> {
        Err(Error::NotSupported)
    }

    fn open_append(&self, _path: &VfsPath) -> Result<Box<dyn FileOps>> {
        Err(Error::NotSupported)
    }

    fn remove(&self, _path: &VfsPath) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn mkdir(&self, _path: &VfsPath) -> Result<()> {
        Err(Error::NotSupported)
    }
}

/// Static description of a registered archive backend.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveInfo {
    pub extension: &'static str,
    pub description: &'static str,
    pub author: &'static str,
    pub url: &'static str,
}

struct BackendSpec {
    info: &'static ArchiveInfo,
    probe: fn(&Path) -> bool,
    open: fn(&Path, Arc<AtomicBool>) -> Result<Box<dyn DirReader>>,
}

static ZIP_INFO: ArchiveInfo = ArchiveInfo {
    extension: "zip",
    description: "PkZip/WinZip/Info-Zip compatible",
    author: "packfs developers",
    url: "https://github.com/packfs/packfs",
};

static ARCHIVE_TYPES: &[ArchiveInfo] = &[ZIP_INFO];

// Backends are consulted in this fixed order when opening a root.
static BACKENDS: &[BackendSpec] = &[BackendSpec {
    info: &ZIP_INFO,
    probe: zip::probe,
    open: zip::open,
}];

/// The archive formats this build can mount.
pub fn supported_archive_types() -> &'static [ArchiveInfo] {
    ARCHIVE_TYPES
}

/// Opens a native path as a root: each archive backend probes in
/// registration order, a plain directory falls back to the directory
/// backend, and anything else that exists is `UnsupportedArchive`.
pub(crate) fn open_root(
    path: &Path,
    follow_symlinks: Arc<AtomicBool>,
) -> Result<Box<dyn DirReader>> {
    for backend in BACKENDS {
        if (backend.probe)(path) {
            trace!(root = %path.display(), format = backend.info.extension, "probed archive root");
            return (backend.open)(path, follow_symlinks.clone());
        }
    }
    let meta = std::fs::metadata(path).map_err(|_| Error::NoSuchPath)?;
    if meta.is_dir() {
        Ok(Box::new(dir::DirBackend::new(path, follow_symlinks)))
    } else {
        Err(Error::UnsupportedArchive)
    }
}

use crate::backend::DirReader;
use crate::handle::FileOps;
use crate::prelude::*;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};

/// A root backed by a real directory.
///
/// Lookups are byte-exact even on case-insensitive filesystems: every
/// component is located by enumerating its parent and requiring an
/// identically-spelled entry, so `Save.DAT` never answers for `save.dat`.
pub struct DirBackend {
    root: PathBuf,
    follow_symlinks: Arc<AtomicBool>,
}

impl DirBackend {
    pub fn new(root: &Path, follow_symlinks: Arc<AtomicBool>) -> DirBackend {
        DirBackend {
            root: root.to_path_buf(),
            follow_symlinks,
        }
    }

    fn follow(&self) -> bool {
        self.follow_symlinks.load(Ordering::SeqCst)
    }

    fn find_entry(parent: &Path, name: &str) -> Result<PathBuf> {
        for entry in fs::read_dir(parent)? {
            let entry = entry?;
            if entry.file_name().to_str() == Some(name) {
                return Ok(entry.path());
            }
        }
        Err(Error::NoSuchPath)
    }

    // Walks the logical path one component at a time. When symlinks are
    // disabled, hitting one anywhere along the walk fails the whole lookup.
    fn resolve(&self, path: &VfsPath) -> Result<PathBuf> {
        let mut current = self.root.clone();
        for piece in path.pieces() {
            let next = Self::find_entry(&current, piece)?;
            if !self.follow() && is_native_symlink(&next) {
                return Err(Error::SymlinkForbidden);
            }
            current = next;
        }
        Ok(current)
    }

    // Write-side translation: no case-exact walk (the point is to create
    // files that don't exist yet), parents created as needed.
    fn translate_for_write(&self, path: &VfsPath) -> Result<PathBuf> {
        let native = path.to_native(&self.root);
        if let Some(parent) = native.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(native)
    }
}

fn is_native_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

impl DirReader for DirBackend {
    fn enumerate(&self, path: &VfsPath) -> Result<Vec<String>> {
        let native = self.resolve(path)?;
        if !native.is_dir() {
            return Err(Error::NotADir);
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&native)? {
            let entry = entry?;
            if !self.follow() && is_native_symlink(&entry.path()) {
                continue;
            }
            // native names that aren't valid utf8 can never match a logical
            // path, so they aren't part of the namespace
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn exists(&self, path: &VfsPath) -> bool {
        self.resolve(path).is_ok()
    }

    fn is_dir(&self, path: &VfsPath) -> bool {
        self.resolve(path).map(|p| p.is_dir()).unwrap_or(false)
    }

    fn is_symlink(&self, path: &VfsPath) -> bool {
        let Some(parent) = path.parent() else {
            return false;
        };
        let Some(name) = path.name() else {
            return false;
        };
        let mut current = self.root.clone();
        for piece in parent.pieces() {
            match Self::find_entry(&current, piece) {
                Ok(next) => current = next,
                Err(_) => return false,
            }
        }
        Self::find_entry(&current, name)
            .map(|p| is_native_symlink(&p))
            .unwrap_or(false)
    }

    fn open_read(&self, path: &VfsPath) -> Result<Box<dyn FileOps>> {
        let native = self.resolve(path).map_err(|err| match err {
            Error::NoSuchPath => Error::NoSuchFile,
            other => other,
        })?;
        if native.is_dir() {
            return Err(Error::NotAFile);
        }
        let file = fs::File::open(&native)?;
        Ok(Box::new(NativeFile { file }))
    }

    fn open_write(&self, path: &VfsPath) -> Result<Box<dyn FileOps>> {
        let native = self.translate_for_write(path)?;
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&native)?;
        Ok(Box::new(NativeFile { file }))
    }

    fn open_append(&self, path: &VfsPath) -> Result<Box<dyn FileOps>> {
        let native = self.translate_for_write(path)?;
        let file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&native)?;
        Ok(Box::new(NativeFile { file }))
    }

    fn remove(&self, path: &VfsPath) -> Result<()> {
        let native = path.to_native(&self.root);
        let meta = fs::symlink_metadata(&native).map_err(|_| Error::NoSuchPath)?;
        if meta.is_dir() {
            fs::remove_dir(&native)?;
        } else {
            fs::remove_file(&native)?;
        }
        Ok(())
    }

    fn mkdir(&self, path: &VfsPath) -> Result<()> {
        fs::create_dir_all(path.to_native(&self.root)).map_err(|_| Error::NoDirCreate)
    }
}

struct NativeFile {
    file: fs::File,
}

impl FileOps for NativeFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.file.write(buf)?)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.file.flush()?)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn length(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

use crate::backend::DirReader;
use crate::handle::FileOps;
use crate::prelude::*;
use indexmap::{IndexMap, IndexSet};
use std::fs;
use std::io::{Cursor, Read};
use std::sync::{Mutex, PoisonError};
use typed_path::unix::UnixComponent;
use typed_path::UnixPath;
use zip::result::ZipError;
use zip::ZipArchive;

const MAX_LINK_DEPTH: usize = 16;

/// Returns true when the file starts with the zip local-file-header magic.
pub(crate) fn probe(path: &Path) -> bool {
    let mut magic = [0u8; 2];
    match fs::File::open(path).and_then(|mut f| f.read_exact(&mut magic)) {
        Ok(()) => &magic == b"PK",
        Err(_) => false,
    }
}

pub(crate) fn open(path: &Path, follow_symlinks: Arc<AtomicBool>) -> Result<Box<dyn DirReader>> {
    Ok(Box::new(ZipBackend::new(path, follow_symlinks)?))
}

fn zip_err(err: ZipError) -> Error {
    match err {
        ZipError::Io(e) => Error::Io(e),
        ZipError::UnsupportedArchive(_) => Error::UnsupportedArchive,
        ZipError::InvalidArchive(_) => Error::Corrupt,
        _ => Error::NoSuchFile,
    }
}

#[derive(Debug, Clone, Copy)]
struct ZipFileMeta {
    index: usize,
    symlink: bool,
}

// Zip archives don't really contain directories, just entry names with
// slashes in them (and sometimes explicit "dir/" markers). We scan the table
// of contents once and precompute the directory tree, so existence and
// enumeration questions never touch the archive again.
struct ZipIndex {
    files: IndexMap<String, ZipFileMeta>,
    dirs: IndexSet<String>,
}

impl ZipIndex {
    fn build(archive: &mut ZipArchive<fs::File>) -> Result<ZipIndex> {
        let mut files = IndexMap::new();
        let mut dirs = IndexSet::new();
        dirs.insert(String::new());
        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(zip_err)?;
            let Some(pieces) = normalize_name(entry.name_raw()) else {
                warn!(name = %String::from_utf8_lossy(entry.name_raw()), "skipping unsafe zip member name");
                continue;
            };
            if pieces.is_empty() {
                continue;
            }
            for parents in 1..pieces.len() {
                dirs.insert(pieces[..parents].join("/"));
            }
            let key = pieces.join("/");
            if entry.is_dir() {
                dirs.insert(key);
            } else {
                let symlink = entry
                    .unix_mode()
                    .map(|mode| mode & 0xf000 == 0xa000)
                    .unwrap_or(false);
                files.insert(key, ZipFileMeta { index: i, symlink });
            }
        }
        Ok(ZipIndex { files, dirs })
    }
}

// Member names are unix paths whatever the host; anything trying to climb
// out of the archive is dropped rather than mounted somewhere surprising.
fn normalize_name(raw: &[u8]) -> Option<Vec<String>> {
    let mut pieces = Vec::new();
    for component in UnixPath::new(raw).components() {
        match component {
            UnixComponent::RootDir | UnixComponent::CurDir => (),
            UnixComponent::ParentDir => return None,
            UnixComponent::Normal(piece) => {
                pieces.push(std::str::from_utf8(piece).ok()?.to_string());
            }
        }
    }
    Some(pieces)
}

// A symlink member's content is its target, resolved against the member's
// parent directory. Escaping the archive root is a dead link.
fn resolve_link(parent: &[String], target: &[u8]) -> Result<String> {
    let mut pieces = parent.to_vec();
    for component in UnixPath::new(target).components() {
        match component {
            UnixComponent::RootDir => return Err(Error::NoSuchFile),
            UnixComponent::CurDir => (),
            UnixComponent::ParentDir => {
                if pieces.pop().is_none() {
                    return Err(Error::NoSuchFile);
                }
            }
            UnixComponent::Normal(piece) => {
                let piece = std::str::from_utf8(piece).map_err(|_| Error::NoSuchFile)?;
                pieces.push(piece.to_string());
            }
        }
    }
    Ok(pieces.join("/"))
}

fn child_of<'a>(key: &'a str, dir: &str) -> Option<&'a str> {
    let rest = if dir.is_empty() {
        key
    } else {
        key.strip_prefix(dir)?.strip_prefix('/')?
    };
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

pub struct ZipBackend {
    archive: Mutex<ZipArchive<fs::File>>,
    index: ZipIndex,
    follow_symlinks: Arc<AtomicBool>,
}

impl ZipBackend {
    pub fn new(path: &Path, follow_symlinks: Arc<AtomicBool>) -> Result<ZipBackend> {
        if !probe(path) {
            return Err(Error::NotAnArchive);
        }
        let file = fs::File::open(path)?;
        let mut archive = ZipArchive::new(file).map_err(zip_err)?;
        let index = ZipIndex::build(&mut archive)?;
        Ok(ZipBackend {
            archive: Mutex::new(archive),
            index,
            follow_symlinks,
        })
    }

    fn follow(&self) -> bool {
        self.follow_symlinks.load(Ordering::SeqCst)
    }

    fn read_member(&self, index: usize) -> Result<Vec<u8>> {
        let mut archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
        let mut member = archive.by_index(index).map_err(zip_err)?;
        let mut data = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl DirReader for ZipBackend {
    fn enumerate(&self, path: &VfsPath) -> Result<Vec<String>> {
        let key = path.join_key();
        if !self.index.dirs.contains(&key) {
            return if self.index.files.contains_key(&key) {
                Err(Error::NotADir)
            } else {
                Err(Error::NoSuchPath)
            };
        }
        let mut names = IndexSet::new();
        for dir in &self.index.dirs {
            if let Some(child) = child_of(dir, &key) {
                names.insert(child.to_string());
            }
        }
        for (file, meta) in &self.index.files {
            if meta.symlink && !self.follow() {
                continue;
            }
            if let Some(child) = child_of(file, &key) {
                names.insert(child.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    fn exists(&self, path: &VfsPath) -> bool {
        let key = path.join_key();
        if self.index.dirs.contains(&key) {
            return true;
        }
        match self.index.files.get(&key) {
            Some(meta) => self.follow() || !meta.symlink,
            None => false,
        }
    }

    fn is_dir(&self, path: &VfsPath) -> bool {
        self.index.dirs.contains(&path.join_key())
    }

    fn is_symlink(&self, path: &VfsPath) -> bool {
        self.index
            .files
            .get(&path.join_key())
            .map(|meta| meta.symlink)
            .unwrap_or(false)
    }

    fn open_read(&self, path: &VfsPath) -> Result<Box<dyn FileOps>> {
        let mut key = path.join_key();
        for _hop in 0..MAX_LINK_DEPTH {
            if self.index.dirs.contains(&key) {
                return Err(Error::NotAFile);
            }
            let meta = *self.index.files.get(&key).ok_or(Error::NoSuchFile)?;
            if meta.symlink {
                if !self.follow() {
                    return Err(Error::SymlinkForbidden);
                }
                let target = self.read_member(meta.index)?;
                let pieces: Vec<String> = key.split('/').map(String::from).collect();
                key = resolve_link(&pieces[..pieces.len() - 1], &target)?;
                continue;
            }
            let data = self.read_member(meta.index)?;
            return Ok(Box::new(ZipMember {
                data: Cursor::new(data),
            }));
        }
        // a link cycle can only come from a hand-crafted archive
        Err(Error::Corrupt)
    }
}

struct ZipMember {
    data: Cursor<Vec<u8>>,
}

impl FileOps for ZipMember {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.data.read(buf)?)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.data.position())
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.data.get_ref().len() as u64 {
            return Err(Error::PastEof);
        }
        self.data.set_position(pos);
        Ok(())
    }

    fn length(&mut self) -> Result<u64> {
        Ok(self.data.get_ref().len() as u64)
    }
}

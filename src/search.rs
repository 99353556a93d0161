use crate::backend::{self, DirReader};
use crate::handle::FileOps;
use crate::prelude::*;
use indexmap::IndexSet;

// One mounted root. `root` keeps the exact path the caller passed so that
// removal and real_dir answers match it byte-for-byte.
pub(crate) struct SearchEntry {
    root: PathBuf,
    reader: Box<dyn DirReader>,
    live_handles: Arc<AtomicUsize>,
}

/// The ordered list of roots consulted for reads. First match wins; later
/// roots only show through during enumeration, where identically named
/// directories interpolate into one listing.
pub(crate) struct SearchPath {
    entries: Vec<SearchEntry>,
}

impl SearchPath {
    pub(crate) fn new() -> SearchPath {
        SearchPath {
            entries: Vec::new(),
        }
    }

    pub(crate) fn add(
        &mut self,
        root: &Path,
        append: bool,
        follow_symlinks: Arc<AtomicBool>,
    ) -> Result<()> {
        let reader = backend::open_root(root, follow_symlinks)?;
        let entry = SearchEntry {
            root: root.to_path_buf(),
            reader,
            live_handles: Arc::new(AtomicUsize::new(0)),
        };
        if append {
            self.entries.push(entry);
        } else {
            self.entries.insert(0, entry);
        }
        debug!(root = %root.display(), append, "added search path root");
        Ok(())
    }

    pub(crate) fn remove(&mut self, root: &Path) -> Result<()> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.root.as_path() == root)
            .ok_or(Error::NotInSearchPath)?;
        if self.entries[position].live_handles.load(Ordering::SeqCst) > 0 {
            return Err(Error::FilesStillOpen);
        }
        self.entries.remove(position);
        debug!(root = %root.display(), "removed search path root");
        Ok(())
    }

    pub(crate) fn roots(&self) -> Vec<PathBuf> {
        self.entries.iter().map(|entry| entry.root.clone()).collect()
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.live_handles.load(Ordering::SeqCst))
            .sum()
    }

    // Roots whose view of `path` is a forbidden symlink drop out of
    // resolution entirely; the next root gets its chance.
    fn visible_entries<'a>(
        &'a self,
        path: &'a VfsPath,
        allow_symlinks: bool,
    ) -> impl Iterator<Item = &'a SearchEntry> {
        self.entries
            .iter()
            .filter(move |entry| allow_symlinks || !entry.reader.is_symlink(path))
    }

    pub(crate) fn open_read(
        &self,
        path: &VfsPath,
        allow_symlinks: bool,
    ) -> Result<(Box<dyn FileOps>, Arc<AtomicUsize>)> {
        for entry in self.visible_entries(path, allow_symlinks) {
            if !entry.reader.exists(path) {
                continue;
            }
            // first root that knows the path answers authoritatively, even
            // if its answer is "that's a directory"
            let ops = entry.reader.open_read(path)?;
            trace!(path = %path, root = %entry.root.display(), "resolved read");
            return Ok((ops, entry.live_handles.clone()));
        }
        Err(Error::NoSuchFile)
    }

    /// The original root path of the entry that would answer reads of `path`.
    pub(crate) fn real_dir(&self, path: &VfsPath, allow_symlinks: bool) -> Result<PathBuf> {
        for entry in self.visible_entries(path, allow_symlinks) {
            if entry.reader.exists(path) {
                return Ok(entry.root.clone());
            }
        }
        Err(Error::NoSuchPath)
    }

    pub(crate) fn exists(&self, path: &VfsPath, allow_symlinks: bool) -> bool {
        self.visible_entries(path, allow_symlinks)
            .any(|entry| entry.reader.exists(path))
    }

    pub(crate) fn is_dir(&self, path: &VfsPath, allow_symlinks: bool) -> bool {
        for entry in self.visible_entries(path, allow_symlinks) {
            if entry.reader.exists(path) {
                return entry.reader.is_dir(path);
            }
        }
        false
    }

    pub(crate) fn is_symlink(&self, path: &VfsPath, allow_symlinks: bool) -> bool {
        for entry in self.visible_entries(path, allow_symlinks) {
            if entry.reader.exists(path) {
                return entry.reader.is_symlink(path);
            }
        }
        false
    }

    /// Merged listing of `path` across every root that has it as a
    /// directory. Names from earlier roots come first; a name seen again in
    /// a later root is reported once.
    pub(crate) fn enumerate(&self, path: &VfsPath, allow_symlinks: bool) -> Result<Vec<String>> {
        let mut names: IndexSet<String> = IndexSet::new();
        let mut found = false;
        for entry in self.visible_entries(path, allow_symlinks) {
            if !entry.reader.is_dir(path) {
                continue;
            }
            found = true;
            match entry.reader.enumerate(path) {
                Ok(children) => names.extend(children),
                Err(err) => {
                    warn!(path = %path, root = %entry.root.display(), %err, "enumeration failed in root");
                }
            }
        }
        if !found {
            return Err(Error::NoSuchPath);
        }
        Ok(names.into_iter().collect())
    }
}

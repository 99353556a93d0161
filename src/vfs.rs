use crate::backend::dir::DirBackend;
use crate::backend::DirReader;
use crate::error::clear_error;
use crate::handle::{FileHandle, HandleGuard, OpenMode};
use crate::platform;
use crate::prelude::*;
use crate::search::SearchPath;
use once_cell::sync::{Lazy, OnceCell};
use std::ffi::OsStr;
use std::fs;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// The process-wide configuration lives in one State value behind an RwLock:
// resolution and I/O take the read lock (and may run concurrently from many
// threads), configuration mutators take the write lock. `None` means "not
// initialized". An application that wants several independent namespaces can
// create more `Vfs` values; `Vfs::global()` is the conventional shared one.

struct WriteDir {
    root: PathBuf,
    backend: DirBackend,
}

struct State {
    base_dir: PathBuf,
    user_dir: OnceCell<PathBuf>,
    write_dir: Option<WriteDir>,
    search: SearchPath,
    allow_symlinks: Arc<AtomicBool>,
    open_write_files: Arc<AtomicUsize>,
}

impl State {
    fn allow(&self) -> bool {
        self.allow_symlinks.load(Ordering::SeqCst)
    }
}

/// A virtual filesystem: an ordered search path of mounted roots for reads
/// and an optional write directory for writes.
pub struct Vfs {
    state: RwLock<Option<State>>,
}

static GLOBAL: Lazy<Vfs> = Lazy::new(Vfs::new);

// Latch the error for the calling thread on the way out of every public
// operation.
fn latched<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    f().latch()
}

impl Default for Vfs {
    fn default() -> Vfs {
        Vfs::new()
    }
}

impl Vfs {
    /// A fresh, uninitialized instance.
    pub fn new() -> Vfs {
        Vfs {
            state: RwLock::new(None),
        }
    }

    /// The shared process-wide instance.
    pub fn global() -> &'static Vfs {
        &GLOBAL
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<State>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<State>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<T>(&self, f: impl FnOnce(&State) -> Result<T>) -> Result<T> {
        let guard = self.read();
        f(guard.as_ref().ok_or(Error::NotInitialized)?)
    }

    fn with_state_mut<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut guard = self.write();
        f(guard.as_mut().ok_or(Error::NotInitialized)?)
    }

    pub fn is_initialized(&self) -> bool {
        self.read().is_some()
    }

    /// Brings the instance up. `arg0` (the program's invocation path, if the
    /// caller has it) is only a fallback for locating the base directory.
    pub fn init(&self, arg0: Option<&Path>) -> Result<()> {
        latched(|| {
            let mut guard = self.write();
            if guard.is_some() {
                return Err(Error::IsInitialized);
            }
            let base_dir = platform::base_dir(arg0);
            debug!(base = %base_dir.display(), "vfs initialized");
            *guard = Some(State {
                base_dir,
                user_dir: OnceCell::new(),
                write_dir: None,
                search: SearchPath::new(),
                allow_symlinks: Arc::new(AtomicBool::new(false)),
                open_write_files: Arc::new(AtomicUsize::new(0)),
            });
            Ok(())
        })
    }

    /// Tears the instance down. Every [`FileHandle`] must be closed first;
    /// otherwise this fails with `FilesStillOpen` and changes nothing.
    pub fn deinit(&self) -> Result<()> {
        latched(|| {
            let mut guard = self.write();
            let state = guard.as_ref().ok_or(Error::NotInitialized)?;
            if state.search.live_handles() > 0
                || state.open_write_files.load(Ordering::SeqCst) > 0
            {
                return Err(Error::FilesStillOpen);
            }
            *guard = None;
            clear_error();
            debug!("vfs deinitialized");
            Ok(())
        })
    }

    /// Directory of the running program.
    pub fn base_dir(&self) -> Result<PathBuf> {
        latched(|| self.with_state(|state| Ok(state.base_dir.clone())))
    }

    /// The user's home directory, computed once; falls back to the base
    /// directory on platforms without a usable answer.
    pub fn user_dir(&self) -> Result<PathBuf> {
        latched(|| {
            self.with_state(|state| {
                let dir = state.user_dir.get_or_init(|| {
                    platform::user_dir().unwrap_or_else(|| state.base_dir.clone())
                });
                Ok(dir.clone())
            })
        })
    }

    pub fn cdrom_dirs(&self) -> Result<Vec<PathBuf>> {
        latched(|| self.with_state(|_| Ok(platform::cdrom_dirs())))
    }

    pub fn write_dir(&self) -> Result<Option<PathBuf>> {
        latched(|| {
            self.with_state(|state| Ok(state.write_dir.as_ref().map(|wd| wd.root.clone())))
        })
    }

    /// Points writes at an existing directory, or disables them with `None`.
    /// Refused with `FilesOpenWrite` while any write handle is open.
    pub fn set_write_dir(&self, dir: Option<&Path>) -> Result<()> {
        latched(|| {
            self.with_state_mut(|state| {
                if state.open_write_files.load(Ordering::SeqCst) > 0 {
                    return Err(Error::FilesOpenWrite);
                }
                match dir {
                    None => state.write_dir = None,
                    Some(dir) => {
                        if !fs::metadata(dir).map(|m| m.is_dir()).unwrap_or(false) {
                            return Err(Error::NotADir);
                        }
                        state.write_dir = Some(WriteDir {
                            root: dir.to_path_buf(),
                            backend: DirBackend::new(dir, state.allow_symlinks.clone()),
                        });
                        debug!(dir = %dir.display(), "write dir set");
                    }
                }
                Ok(())
            })
        })
    }

    /// Mounts a directory or archive. `append` puts it at the end of the
    /// search order, otherwise it goes in front.
    pub fn add_to_search_path(&self, root: impl AsRef<Path>, append: bool) -> Result<()> {
        latched(|| {
            self.with_state_mut(|state| {
                let policy = state.allow_symlinks.clone();
                state.search.add(root.as_ref(), append, policy)
            })
        })
    }

    /// Unmounts the first entry whose root matches byte-for-byte. Refused
    /// with `FilesStillOpen` while the entry has open handles.
    pub fn remove_from_search_path(&self, root: impl AsRef<Path>) -> Result<()> {
        latched(|| self.with_state_mut(|state| state.search.remove(root.as_ref())))
    }

    /// The mounted roots, in search order.
    pub fn search_path(&self) -> Result<Vec<PathBuf>> {
        latched(|| self.with_state(|state| Ok(state.search.roots())))
    }

    /// Globally allows or forbids traversing symbolic links. Off by default.
    pub fn permit_symlinks(&self, allow: bool) -> Result<()> {
        latched(|| {
            self.with_state(|state| {
                state.allow_symlinks.store(allow, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    pub fn symlinks_permitted(&self) -> Result<bool> {
        latched(|| self.with_state(|state| Ok(state.allow())))
    }

    /// Opens a logical path for reading from the first root that has it.
    pub fn open_read(&self, path: &str) -> Result<FileHandle> {
        latched(|| {
            let path = VfsPath::try_from(path)?;
            self.with_state(|state| {
                let (ops, handles) = state.search.open_read(&path, state.allow())?;
                Ok(FileHandle::new(
                    ops,
                    OpenMode::Read,
                    HandleGuard::new(vec![handles]),
                ))
            })
        })
    }

    /// Creates (truncating) a file under the write directory.
    pub fn open_write(&self, path: &str) -> Result<FileHandle> {
        self.open_for_writing(path, OpenMode::Write)
    }

    /// Opens a file under the write directory, appending to existing content.
    pub fn open_append(&self, path: &str) -> Result<FileHandle> {
        self.open_for_writing(path, OpenMode::Append)
    }

    fn open_for_writing(&self, path: &str, mode: OpenMode) -> Result<FileHandle> {
        latched(|| {
            let path = VfsPath::try_from(path)?;
            self.with_state(|state| {
                let write_dir = state.write_dir.as_ref().ok_or(Error::NoWriteDir)?;
                let ops = match mode {
                    OpenMode::Append => write_dir.backend.open_append(&path)?,
                    _ => write_dir.backend.open_write(&path)?,
                };
                Ok(FileHandle::new(
                    ops,
                    mode,
                    HandleGuard::new(vec![state.open_write_files.clone()]),
                ))
            })
        })
    }

    /// Creates a directory (and missing parents) under the write directory.
    pub fn mkdir(&self, path: &str) -> Result<()> {
        latched(|| {
            let path = VfsPath::try_from(path)?;
            self.with_state(|state| {
                let write_dir = state.write_dir.as_ref().ok_or(Error::NoWriteDir)?;
                write_dir.backend.mkdir(&path)
            })
        })
    }

    /// Removes a file or empty directory under the write directory.
    pub fn delete(&self, path: &str) -> Result<()> {
        latched(|| {
            let path = VfsPath::try_from(path)?;
            self.with_state(|state| {
                let write_dir = state.write_dir.as_ref().ok_or(Error::NoWriteDir)?;
                write_dir.backend.remove(&path)
            })
        })
    }

    /// The root (as originally mounted) that answers reads of `path`.
    pub fn real_dir(&self, path: &str) -> Result<PathBuf> {
        latched(|| {
            let path = VfsPath::try_from(path)?;
            self.with_state(|state| state.search.real_dir(&path, state.allow()))
        })
    }

    /// Merged directory listing across all mounted roots.
    pub fn enumerate(&self, path: &str) -> Result<Vec<String>> {
        latched(|| {
            let path = VfsPath::try_from(path)?;
            self.with_state(|state| state.search.enumerate(&path, state.allow()))
        })
    }

    pub fn exists(&self, path: &str) -> bool {
        latched(|| {
            let path = VfsPath::try_from(path)?;
            self.with_state(|state| Ok(state.search.exists(&path, state.allow())))
        })
        .unwrap_or(false)
    }

    pub fn is_directory(&self, path: &str) -> bool {
        latched(|| {
            let path = VfsPath::try_from(path)?;
            self.with_state(|state| Ok(state.search.is_dir(&path, state.allow())))
        })
        .unwrap_or(false)
    }

    pub fn is_symbolic_link(&self, path: &str) -> bool {
        latched(|| {
            let path = VfsPath::try_from(path)?;
            self.with_state(|state| Ok(state.search.is_symlink(&path, state.allow())))
        })
        .unwrap_or(false)
    }

    /// One-call setup for the common case: write dir at `~/.{app_name}`
    /// (created if missing), then the write dir, the base dir, optionally
    /// any mounted CD-ROMs, and every `*.{archive_ext}` archive found in
    /// those directories, mounted in front of or behind the plain
    /// directories per `archives_first`.
    pub fn set_sane_config(
        &self,
        app_name: &str,
        archive_ext: Option<&str>,
        include_cdroms: bool,
        archives_first: bool,
    ) -> Result<()> {
        latched(|| {
            if app_name.is_empty() || app_name.contains(['/', '\0']) {
                return Err(Error::InvalidArgument);
            }
            let user_dir = self.user_dir()?;
            self.sane_config_rooted(
                &user_dir,
                app_name,
                archive_ext,
                include_cdroms,
                archives_first,
            )
        })
    }

    fn sane_config_rooted(
        &self,
        user_dir: &Path,
        app_name: &str,
        archive_ext: Option<&str>,
        include_cdroms: bool,
        archives_first: bool,
    ) -> Result<()> {
        let write_root = user_dir.join(format!(".{app_name}"));
        fs::create_dir_all(&write_root).map_err(|_| Error::NoDirCreate)?;
        self.set_write_dir(Some(&write_root))?;

        let mut dirs = vec![write_root, self.base_dir()?];
        if include_cdroms {
            dirs.extend(platform::cdrom_dirs());
        }
        for dir in &dirs {
            if let Err(err) = self.add_to_search_path(dir, true) {
                warn!(dir = %dir.display(), %err, "skipping unusable root");
            }
        }

        if let Some(ext) = archive_ext {
            for dir in &dirs {
                let Ok(entries) = fs::read_dir(dir) else { continue };
                for entry in entries.flatten() {
                    let found = entry.path();
                    let matches_ext = found
                        .extension()
                        .and_then(OsStr::to_str)
                        .map(|e| e.eq_ignore_ascii_case(ext))
                        .unwrap_or(false);
                    if !matches_ext {
                        continue;
                    }
                    if let Err(err) = self.add_to_search_path(&found, !archives_first) {
                        warn!(archive = %found.display(), %err, "skipping unusable archive");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::last_error;
    use std::io::Write;

    fn ready() -> Vfs {
        let vfs = Vfs::new();
        vfs.init(None).unwrap();
        vfs
    }

    fn read_all(handle: &mut FileHandle) -> Vec<u8> {
        let len = handle.length().unwrap() as usize;
        let mut buf = vec![0u8; len];
        let mut done = 0;
        while done < len {
            done += handle.read(&mut buf[done..]).unwrap();
        }
        buf
    }

    #[test]
    fn test_lifecycle() {
        let vfs = Vfs::new();
        assert!(!vfs.is_initialized());
        assert!(matches!(vfs.deinit(), Err(Error::NotInitialized)));

        vfs.init(Some(Path::new("/opt/app/bin/app"))).unwrap();
        assert!(vfs.is_initialized());
        assert!(matches!(vfs.init(None), Err(Error::IsInitialized)));

        vfs.deinit().unwrap();
        assert!(!vfs.is_initialized());
        // reinit after teardown is fine
        vfs.init(None).unwrap();
        vfs.deinit().unwrap();
    }

    #[test]
    fn test_uninitialized_calls_latch_errors() {
        let vfs = Vfs::new();
        assert!(vfs.open_read("x").is_err());
        assert_eq!(last_error().as_deref(), Some("not initialized"));
        assert!(!vfs.exists("x"));
        assert_eq!(last_error().as_deref(), Some("not initialized"));
    }

    #[test]
    fn test_search_precedence_end_to_end() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(a.path().join("x.txt"), b"A").unwrap();
        fs::write(b.path().join("x.txt"), b"B").unwrap();

        let vfs = ready();
        vfs.add_to_search_path(a.path(), true).unwrap();
        vfs.add_to_search_path(b.path(), true).unwrap();
        assert_eq!(
            vfs.search_path().unwrap(),
            vec![a.path().to_path_buf(), b.path().to_path_buf()]
        );

        let mut handle = vfs.open_read("x.txt").unwrap();
        assert_eq!(read_all(&mut handle), b"A");
        assert_eq!(vfs.real_dir("x.txt").unwrap(), a.path());
        handle.close().unwrap();

        vfs.remove_from_search_path(a.path()).unwrap();
        let mut handle = vfs.open_read("x.txt").unwrap();
        assert_eq!(read_all(&mut handle), b"B");
        handle.close().unwrap();
    }

    #[test]
    fn test_bad_paths_rejected_before_io() {
        let vfs = ready();
        assert!(matches!(
            vfs.open_read("../etc/passwd"),
            Err(Error::InvalidPath)
        ));
        assert_eq!(last_error().as_deref(), Some("invalid logical path"));
        assert!(matches!(vfs.mkdir("a/./b"), Err(Error::InvalidPath)));
        assert!(!vfs.exists("bad\0path"));
    }

    #[test]
    fn test_write_dir_gating() {
        let w = tempfile::tempdir().unwrap();
        let w2 = tempfile::tempdir().unwrap();
        let vfs = ready();

        assert!(matches!(vfs.open_write("foo"), Err(Error::NoWriteDir)));
        assert!(matches!(vfs.mkdir("d"), Err(Error::NoWriteDir)));
        assert!(matches!(vfs.delete("foo"), Err(Error::NoWriteDir)));

        vfs.set_write_dir(Some(w.path())).unwrap();
        assert_eq!(vfs.write_dir().unwrap(), Some(w.path().to_path_buf()));

        let handle = vfs.open_write("foo").unwrap();
        // swapping the write dir is refused while a write handle is open
        assert!(matches!(
            vfs.set_write_dir(Some(w2.path())),
            Err(Error::FilesOpenWrite)
        ));
        assert_eq!(vfs.write_dir().unwrap(), Some(w.path().to_path_buf()));
        // ...and so is deinit
        assert!(matches!(vfs.deinit(), Err(Error::FilesStillOpen)));

        handle.close().unwrap();
        vfs.set_write_dir(Some(w2.path())).unwrap();
        vfs.deinit().unwrap();
    }

    #[test]
    fn test_write_read_round_trip() {
        let w = tempfile::tempdir().unwrap();
        let vfs = ready();
        vfs.set_write_dir(Some(w.path())).unwrap();
        vfs.add_to_search_path(w.path(), false).unwrap();

        vfs.mkdir("saves").unwrap();
        let mut handle = vfs.open_write("saves/slot1").unwrap();
        handle.write(b"checkpoint").unwrap();
        handle.close().unwrap();

        let mut handle = vfs.open_read("saves/slot1").unwrap();
        assert_eq!(read_all(&mut handle), b"checkpoint");
        assert!(matches!(handle.write(b"x"), Err(Error::InvalidArgument)));
        handle.close().unwrap();

        let mut handle = vfs.open_append("saves/slot1").unwrap();
        handle.write(b"+more").unwrap();
        handle.close().unwrap();
        let mut handle = vfs.open_read("saves/slot1").unwrap();
        assert_eq!(read_all(&mut handle), b"checkpoint+more");
        handle.close().unwrap();

        vfs.delete("saves/slot1").unwrap();
        assert!(!vfs.exists("saves/slot1"));
        vfs.delete("saves").unwrap();
    }

    #[test]
    fn test_enumerate_across_roots() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::create_dir(a.path().join("saves")).unwrap();
        fs::create_dir(b.path().join("saves")).unwrap();
        for name in ["x", "y", "z"] {
            fs::write(a.path().join("saves").join(name), b"").unwrap();
        }
        for name in ["w", "y"] {
            fs::write(b.path().join("saves").join(name), b"").unwrap();
        }

        let vfs = ready();
        vfs.add_to_search_path(a.path(), true).unwrap();
        vfs.add_to_search_path(b.path(), true).unwrap();

        let names = vfs.enumerate("saves").unwrap();
        assert_eq!(names.len(), 4);
        assert_eq!(names.iter().filter(|n| n.as_str() == "y").count(), 1);
        assert!(vfs.is_directory("saves"));
        assert!(!vfs.is_directory("saves/x"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_toggle() {
        let a = tempfile::tempdir().unwrap();
        fs::write(a.path().join("real.txt"), b"real").unwrap();
        std::os::unix::fs::symlink(a.path().join("real.txt"), a.path().join("link.txt"))
            .unwrap();

        let vfs = ready();
        vfs.add_to_search_path(a.path(), true).unwrap();

        // links are invisible by default
        assert!(!vfs.symlinks_permitted().unwrap());
        assert!(!vfs.exists("link.txt"));
        assert!(vfs.open_read("link.txt").is_err());
        assert!(vfs.real_dir("link.txt").is_err());
        assert!(!vfs
            .enumerate("")
            .unwrap()
            .contains(&"link.txt".to_string()));
        assert!(!vfs.is_symbolic_link("link.txt"));

        vfs.permit_symlinks(true).unwrap();
        assert!(vfs.exists("link.txt"));
        assert!(vfs.is_symbolic_link("link.txt"));
        let mut handle = vfs.open_read("link.txt").unwrap();
        assert_eq!(read_all(&mut handle), b"real");
        handle.close().unwrap();
    }

    #[test]
    fn test_zip_root_end_to_end() {
        use zip::write::FileOptions;
        use zip::ZipWriter;

        let dir = tempfile::tempdir().unwrap();
        let mut raw = std::io::Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut raw);
            writer
                .start_file("inside/file", FileOptions::default())
                .unwrap();
            writer.write_all(b"packed").unwrap();
            writer.finish().unwrap();
        }
        let archive = dir.path().join("a.zip");
        fs::write(&archive, raw.into_inner()).unwrap();

        let vfs = ready();
        vfs.add_to_search_path(&archive, true).unwrap();

        assert!(vfs.is_directory("inside"));
        let mut handle = vfs.open_read("inside/file").unwrap();
        assert_eq!(read_all(&mut handle), b"packed");

        // the archive entry can't be unmounted while the member is open
        assert!(matches!(
            vfs.remove_from_search_path(&archive),
            Err(Error::FilesStillOpen)
        ));
        handle.close().unwrap();
        vfs.remove_from_search_path(&archive).unwrap();
        assert!(matches!(
            vfs.remove_from_search_path(&archive),
            Err(Error::NotInSearchPath)
        ));
    }

    #[test]
    fn test_sane_config_composition() {
        let user = tempfile::tempdir().unwrap();
        let vfs = ready();
        // drop an archive next to where the write dir will land
        let write_root = user.path().join(".quest");
        fs::create_dir_all(&write_root).unwrap();
        let mut raw = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut raw);
            writer
                .start_file("pak0", zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(b"pak").unwrap();
            writer.finish().unwrap();
        }
        fs::write(write_root.join("data.pak"), raw.into_inner()).unwrap();

        vfs.sane_config_rooted(user.path(), "quest", Some("pak"), false, true)
            .unwrap();

        assert_eq!(vfs.write_dir().unwrap(), Some(write_root.clone()));
        let roots = vfs.search_path().unwrap();
        // archives_first puts the pak ahead of the plain directories
        assert_eq!(roots[0], write_root.join("data.pak"));
        assert!(roots.contains(&write_root));
        assert!(vfs.exists("pak0"));
    }

    #[test]
    fn test_user_dir_has_answer() {
        let vfs = ready();
        // whatever the platform says, there is always a user dir (the base
        // dir in the worst case) and it is stable across calls
        let first = vfs.user_dir().unwrap();
        assert_eq!(vfs.user_dir().unwrap(), first);
    }
}

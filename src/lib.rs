#![forbid(unsafe_code)]

//! A layered virtual filesystem for applications that read game-style
//! assets and write user-specific state.
//!
//! Reads resolve a forward-slash logical path against an ordered *search
//! path* of mounted roots (real directories or archives); the first root
//! containing the path wins. Writes go to a single *write directory*.
//! Identically named directories across roots interpolate into one merged
//! listing when enumerated.
//!
//! ```no_run
//! use packfs::Vfs;
//!
//! let vfs = Vfs::global();
//! vfs.init(None)?;
//! vfs.add_to_search_path("assets.zip", true)?;
//! vfs.add_to_search_path("/usr/share/game", true)?;
//! let sprite = vfs.open_read("sprites/hero.png")?;
//! # Ok::<(), packfs::Error>(())
//! ```
//!
//! Besides `Ok`/`Err` returns, every failing operation latches a short
//! message for the calling thread, readable (once) via [`last_error`].

mod backend;
mod error;
mod handle;
mod path;
mod platform;
mod prelude;
mod search;
mod vfs;

pub use backend::{supported_archive_types, ArchiveInfo};
pub use error::{last_error, Error, Result};
pub use handle::{FileHandle, OpenMode};
pub use path::VfsPath;
pub use vfs::Vfs;

/// Library version, split out for runtime compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

pub fn version() -> Version {
    fn piece(s: &str) -> u32 {
        s.parse().unwrap_or(0)
    }
    Version {
        major: piece(env!("CARGO_PKG_VERSION_MAJOR")),
        minor: piece(env!("CARGO_PKG_VERSION_MINOR")),
        patch: piece(env!("CARGO_PKG_VERSION_PATCH")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_version_matches_manifest() {
        let v = version();
        assert_eq!(
            format!("{}.{}.{}", v.major, v.minor, v.patch),
            env!("CARGO_PKG_VERSION")
        );
    }
}

use crate::prelude::*;

// A logical path: forward-slash separated, relative to the VFS root, one
// owned piece per component. Guaranteed free of "." and ".." components,
// interior empty components, and NUL bytes; always valid utf8. Matching
// against backend entries is byte-exact, even on case-insensitive hosts.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct VfsPath {
    pieces: Vec<String>,
}

impl VfsPath {
    /// The VFS root (an empty path).
    pub fn root() -> VfsPath {
        VfsPath { pieces: vec![] }
    }

    pub fn is_root(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn pieces(&self) -> &[String] {
        self.pieces.as_slice()
    }

    /// Everything but the final component. `None` for the root.
    pub fn parent(&self) -> Option<VfsPath> {
        if self.pieces.is_empty() {
            None
        } else {
            Some(VfsPath {
                pieces: self.pieces[..self.pieces.len() - 1].to_vec(),
            })
        }
    }

    /// The final component. `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.pieces.last().map(|s| s.as_str())
    }

    /// Appends the components to a native root, yielding the backend path.
    pub fn to_native(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for piece in &self.pieces {
            out.push(piece);
        }
        out
    }

    /// The slash-joined form used as a lookup key by archive backends.
    pub(crate) fn join_key(&self) -> String {
        self.pieces.join("/")
    }
}

fn check_piece(piece: &str) -> Result<&str> {
    match piece {
        "" | "." | ".." => Err(Error::InvalidPath),
        p if p.contains('\0') => Err(Error::InvalidPath),
        p => Ok(p),
    }
}

impl TryFrom<&str> for VfsPath {
    type Error = Error;

    // A single leading slash is optional and a single trailing slash is
    // tolerated; everything between separators must be a real name.
    fn try_from(value: &str) -> Result<Self> {
        let value = value.strip_prefix('/').unwrap_or(value);
        let value = value.strip_suffix('/').unwrap_or(value);
        if value.is_empty() {
            return Ok(VfsPath::root());
        }
        let pieces = value
            .split('/')
            .map(|piece| check_piece(piece).map(String::from))
            .collect::<Result<Vec<_>>>()?;
        Ok(VfsPath { pieces })
    }
}

impl std::str::FromStr for VfsPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.try_into()
    }
}

impl Display for VfsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.pieces.as_slice().join("/"))
    }
}

pub use std::fmt::Display;
pub use std::path::{Path, PathBuf};
pub use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
pub use std::sync::Arc;

pub use tracing::{debug, trace, warn};

pub(crate) use crate::error::{Error, Latch, Result};
pub use crate::path::VfsPath;

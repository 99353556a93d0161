use crate::prelude::*;
use directories::BaseDirs;
use std::env;

/// Directory holding the running executable, with `arg0`'s directory and
/// finally the current directory as fallbacks.
pub(crate) fn base_dir(arg0: Option<&Path>) -> PathBuf {
    if let Ok(exe) = env::current_exe() {
        if let Some(parent) = exe.parent() {
            return parent.to_path_buf();
        }
    }
    if let Some(arg0) = arg0 {
        if let Some(parent) = arg0.parent() {
            if !parent.as_os_str().is_empty() {
                return parent.to_path_buf();
            }
        }
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// The user's home directory, when the platform can name one.
pub(crate) fn user_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// Mount points of optical media currently mounted.
#[cfg(target_os = "linux")]
pub(crate) fn cdrom_dirs() -> Vec<PathBuf> {
    let Ok(mounts) = std::fs::read_to_string("/proc/mounts") else {
        return Vec::new();
    };
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            matches!(fs_type, "iso9660" | "udf")
                .then(|| PathBuf::from(unescape_mount_point(mount_point)))
        })
        .collect()
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn cdrom_dirs() -> Vec<PathBuf> {
    Vec::new()
}

// /proc/mounts octal-escapes whitespace and backslashes in mount points.
#[cfg(target_os = "linux")]
fn unescape_mount_point(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escape: String = chars.by_ref().take(3).collect();
        match escape.as_str() {
            "040" => out.push(' '),
            "011" => out.push('\t'),
            "012" => out.push('\n'),
            "134" => out.push('\\'),
            other => {
                out.push('\\');
                out.push_str(other);
            }
        }
    }
    out
}

//! Access layer over the `/proc` and `/sys` pseudo-filesystems.
//!
//! Collectors never touch `std::fs` directly. They go through [`PseudoFs`],
//! which resolves paths against the configured roots and delegates the actual
//! I/O to a [`FileSystem`] implementation: [`RealFs`] in production and
//! [`MockFs`] in tests.

pub mod mock;

pub use mock::MockFs;

use crate::error::AccessError;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Capacity of a mounted filesystem, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    /// Space available to unprivileged users.
    pub free: u64,
    pub used: u64,
}

/// Raw OS access used by the collectors.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory as full paths.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Queries capacity of the filesystem mounted at `path`.
    fn disk_usage(&self, path: &Path) -> io::Result<DiskUsage>;
}

impl<T: FileSystem + ?Sized> FileSystem for Arc<T> {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        (**self).read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        (**self).read_dir(path)
    }

    fn disk_usage(&self, path: &Path) -> io::Result<DiskUsage> {
        (**self).disk_usage(path)
    }
}

/// Real filesystem implementation backed by `std::fs` and `statvfs(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        // cmdline and comm may hold arbitrary bytes
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(path)? {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    fn disk_usage(&self, path: &Path) -> io::Result<DiskUsage> {
        use std::ffi::CString;
        use std::mem::MaybeUninit;

        let c_path = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut statvfs = MaybeUninit::<libc::statvfs>::uninit();

        let result = unsafe { libc::statvfs(c_path.as_ptr(), statvfs.as_mut_ptr()) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }

        let statvfs = unsafe { statvfs.assume_init() };
        let block_size = statvfs.f_frsize as u64;
        let total = statvfs.f_blocks as u64 * block_size;
        let free = statvfs.f_bavail as u64 * block_size;
        let used = total.saturating_sub(statvfs.f_bfree as u64 * block_size);

        Ok(DiskUsage { total, free, used })
    }
}

/// Stateless reader rooted at the proc and sys mount points.
///
/// Cloning is cheap; every collector owns its own handle.
pub struct PseudoFs<F: FileSystem> {
    fs: Arc<F>,
    proc_root: PathBuf,
    sys_root: PathBuf,
}

impl<F: FileSystem> Clone for PseudoFs<F> {
    fn clone(&self) -> Self {
        Self {
            fs: Arc::clone(&self.fs),
            proc_root: self.proc_root.clone(),
            sys_root: self.sys_root.clone(),
        }
    }
}

impl<F: FileSystem> std::fmt::Debug for PseudoFs<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PseudoFs")
            .field("proc_root", &self.proc_root)
            .field("sys_root", &self.sys_root)
            .finish()
    }
}

impl<F: FileSystem> PseudoFs<F> {
    /// Reader over the standard `/proc` and `/sys` mounts.
    pub fn new(fs: F) -> Self {
        Self::with_roots(fs, "/proc", "/sys")
    }

    pub fn with_roots(fs: F, proc_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            fs: Arc::new(fs),
            proc_root: proc_root.into(),
            sys_root: sys_root.into(),
        }
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    /// Path of `rel` under the proc root.
    pub fn proc_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.proc_root.join(rel)
    }

    /// Path of `rel` under the sys root.
    pub fn sys_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.sys_root.join(rel)
    }

    /// Whole file contents, untouched.
    pub fn read_raw(&self, path: &Path) -> Result<String, AccessError> {
        self.fs
            .read_to_string(path)
            .map_err(|e| AccessError::from_io(path, e))
    }

    pub fn read_lines(&self, path: &Path) -> Result<Vec<String>, AccessError> {
        Ok(self.read_raw(path)?.lines().map(str::to_string).collect())
    }

    /// First line of the file, or an empty string for an empty file.
    pub fn read_first_line(&self, path: &Path) -> Result<String, AccessError> {
        let content = self.read_raw(path)?;
        Ok(content.lines().next().unwrap_or_default().to_string())
    }

    /// Whole file with surrounding whitespace removed (sysfs attributes).
    pub fn read_trimmed(&self, path: &Path) -> Result<String, AccessError> {
        Ok(self.read_raw(path)?.trim().to_string())
    }

    /// Colon-delimited `key: value` lines; later duplicates overwrite earlier ones.
    pub fn read_key_value(&self, path: &Path) -> Result<HashMap<String, String>, AccessError> {
        Ok(parse_key_value(&self.read_raw(path)?))
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.fs.exists(path)
    }

    /// Entry names (not full paths) of a directory.
    pub fn list_dir(&self, path: &Path) -> Result<Vec<String>, AccessError> {
        let entries = self
            .fs
            .read_dir(path)
            .map_err(|e| AccessError::from_io(path, e))?;
        Ok(entries
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect())
    }

    pub fn disk_usage(&self, path: &Path) -> Result<DiskUsage, AccessError> {
        self.fs
            .disk_usage(path)
            .map_err(|e| AccessError::from_io(path, e))
    }
}

/// Parses `key: value` lines. Lines without a colon are ignored.
pub fn parse_key_value(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

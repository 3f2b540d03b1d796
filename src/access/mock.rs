//! In-memory filesystem for exercising collectors without a live kernel.

use super::{DiskUsage, FileSystem};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// In-memory filesystem for testing.
///
/// Files can be replaced after construction (interior mutability), so a test
/// can hand the mock to a collector, advance the counters, and collect again.
#[derive(Debug, Default)]
pub struct MockFs {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default, Clone)]
struct Inner {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
    usage: HashMap<PathBuf, DiskUsage>,
}

impl Clone for MockFs {
    fn clone(&self) -> Self {
        Self {
            inner: RwLock::new(self.read().clone()),
        }
    }
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds or replaces a file. Parent directories are created.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        let mut inner = self.write();
        insert_parents(&mut inner.directories, &path);
        inner.files.insert(path, content.into());
    }

    /// Removes a file, as when a process exits between enumeration and read.
    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.write().files.remove(path.as_ref());
    }

    /// Removes a directory and everything beneath it.
    pub fn remove_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut inner = self.write();
        inner.files.retain(|p, _| !p.starts_with(path));
        inner.directories.retain(|p| !p.starts_with(path));
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut inner = self.write();
        insert_parents(&mut inner.directories, &path);
        inner.directories.insert(path);
    }

    /// Registers the capacity reported for a mount point.
    pub fn set_disk_usage(&self, mountpoint: impl AsRef<Path>, usage: DiskUsage) {
        self.write()
            .usage
            .insert(mountpoint.as_ref().to_path_buf(), usage);
    }

    /// Adds `/proc/<pid>/{stat,status,cmdline}`.
    ///
    /// An empty `status` or `cmdline` is not written, mimicking files that
    /// are unreadable for another user's process.
    pub fn add_process(&self, pid: u32, stat: &str, status: &str, cmdline: &str) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_dir(&base);
        self.add_file(base.join("stat"), stat);
        if !status.is_empty() {
            self.add_file(base.join("status"), status);
        }
        if !cmdline.is_empty() {
            self.add_file(base.join("cmdline"), cmdline);
        }
    }
}

fn insert_parents(directories: &mut HashSet<PathBuf>, path: &Path) {
    let mut parent = path.parent();
    while let Some(p) = parent {
        if !p.as_os_str().is_empty() {
            directories.insert(p.to_path_buf());
        }
        parent = p.parent();
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.read().files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        let inner = self.read();
        inner.files.contains_key(path) || inner.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let inner = self.read();
        if !inner.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries: HashSet<PathBuf> = HashSet::new();
        for file_path in inner.files.keys() {
            if file_path.parent() == Some(path) {
                entries.insert(file_path.clone());
            }
        }
        for dir_path in &inner.directories {
            if dir_path.parent() == Some(path) {
                entries.insert(dir_path.clone());
            }
        }

        let mut entries: Vec<PathBuf> = entries.into_iter().collect();
        entries.sort();
        Ok(entries)
    }

    fn disk_usage(&self, path: &Path) -> io::Result<DiskUsage> {
        self.read().usage.get(path).copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no filesystem at {:?}", path),
            )
        })
    }
}

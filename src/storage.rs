//! Storage port for the small structured-text files the client owns.
//!
//! The descriptor store and the account resolver only ever see this trait, so
//! tests run against [`MemoryStorage`] while the binary uses [`FsStorage`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tempfile::NamedTempFile;
use tracing::trace;

/// Byte-level access to local files.
pub trait Storage: Send + Sync {
    /// Read the whole file at `path`.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the file at `path` with `bytes`.
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Succeeds if the file at `path` can be opened for reading.
    fn check_readable(&self, path: &Path) -> io::Result<()>;
}

/// [`Storage`] backed by the real file system.
///
/// Writes go through a temporary file in the target directory followed by a
/// rename, so readers never observe a half-written file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl Storage for FsStorage {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        trace!(path = %path.display(), "Reading file");
        std::fs::read(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(bytes)?;
        staged.flush()?;
        staged.persist(path).map_err(|e| e.error)?;

        trace!(path = %path.display(), bytes = bytes.len(), "Wrote file");
        Ok(())
    }

    fn check_readable(&self, path: &Path) -> io::Result<()> {
        File::open(path).map(|_| ())
    }
}

/// In-memory [`Storage`] used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file, replacing any previous contents.
    pub fn insert(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(path.into(), bytes.into());
        }
    }

    /// Contents of a file as UTF-8, if present.
    pub fn contents(&self, path: &Path) -> Option<String> {
        self.files
            .read()
            .ok()?
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "memory storage lock poisoned")
}

impl Storage for MemoryStorage {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let files = self.files.read().map_err(|_| poisoned())?;
        files.get(path).cloned().ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut files = self.files.write().map_err(|_| poisoned())?;
        files.insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn check_readable(&self, path: &Path) -> io::Result<()> {
        let files = self.files.read().map_err(|_| poisoned())?;
        if files.contains_key(path) {
            Ok(())
        } else {
            Err(not_found(path))
        }
    }
}

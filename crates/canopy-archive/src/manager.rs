//! File-backed archive management.
//!
//! [`ArchiveManager`] binds a [`SharedArchive`] to a history file. Opening
//! the file goes through a swappable [`Opener`] so tests can back the
//! archive with memory instead of disk.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::archive::Archive;
use crate::error::{ArchiveError, Result};

/// The archive handle shared by the session, the cursor and the manager.
pub type SharedArchive = Arc<RwLock<Archive>>;

/// A fresh, empty shared archive.
pub fn shared_archive() -> SharedArchive {
    Arc::new(RwLock::new(Archive::new()))
}

/// Read/write storage an archive can be loaded from and saved to.
pub trait Storage: Read + Write + Send {
    /// Discard existing contents before a save. Storage that is always
    /// fresh can leave this as a no-op.
    fn truncate(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Storage for File {
    fn truncate(&mut self) -> io::Result<()> {
        self.set_len(0)?;
        self.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

/// Opens the storage behind a path.
pub type Opener = Arc<dyn Fn(&Path) -> io::Result<Box<dyn Storage>> + Send + Sync>;

/// Open `path` for reading and writing, creating it and any missing parent
/// directories. Directories are created owner-only on unix.
pub fn open_file(path: &Path) -> io::Result<Box<dyn Storage>> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        create_private_dir(dir)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(Box::new(file))
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)
}

/// Loads and saves one archive file.
pub struct ArchiveManager {
    archive: SharedArchive,
    path: PathBuf,
    opener: Opener,
}

impl ArchiveManager {
    /// A manager for `path` with an empty archive and the default opener.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_archive(path, shared_archive())
    }

    /// A manager for `path` that loads into and saves from `archive`.
    pub fn with_archive(path: impl Into<PathBuf>, archive: SharedArchive) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(ArchiveError::EmptyPath);
        }
        Ok(Self {
            archive,
            path,
            opener: Arc::new(open_file),
        })
    }

    /// Replace the function used to open the history file.
    pub fn set_opener(&mut self, opener: Opener) {
        self.opener = opener;
    }

    pub fn archive(&self) -> SharedArchive {
        Arc::clone(&self.archive)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge the history file into the archive.
    pub fn load(&self) -> Result<()> {
        let storage = (self.opener)(&self.path)?;
        self.archive.write().populate(storage)?;
        tracing::info!(path = %self.path.display(), messages = self.archive.read().len(), "loaded history");
        Ok(())
    }

    /// Overwrite the history file with the full archive.
    pub fn save(&self) -> Result<()> {
        let mut storage = (self.opener)(&self.path)?;
        storage.truncate()?;
        self.archive.read().persist(&mut storage)?;
        tracing::debug!(path = %self.path.display(), "saved history");
        Ok(())
    }
}

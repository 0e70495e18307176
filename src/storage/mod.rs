//! Flat-namespace object store under a configured root directory.
//!
//! Objects are plain files named `<id><ext>`; there is no index. Names are
//! validated before touching the filesystem so a crafted request path can
//! never escape the root.

pub mod allocator;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};

/// Handle to the storage root. Cheap to clone into handlers.
#[derive(Clone)]
pub struct FileStore {
    root: Arc<PathBuf>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `name` is a plain single-segment object name. Anything with
    /// path separators or dot-dot sequences is rejected outright.
    pub fn valid_name(name: &str) -> bool {
        !name.is_empty()
            && !name.contains("..")
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    }

    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        if !Self::valid_name(name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid object name",
            ));
        }
        Ok(self.root.join(name))
    }

    /// Size of the stored (encrypted) object, or `None` when it is absent.
    /// A directory at the path counts as absent: callers must not be able
    /// to tell the two apart.
    pub async fn file_size(&self, name: &str) -> io::Result<Option<u64>> {
        let path = self.resolve(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Exclusively create the object. `Ok(None)` means a concurrent uploader
    /// (or an earlier one) already claimed the name — the caller treats that
    /// as an allocator collision, never as something to overwrite.
    pub async fn create_new(&self, name: &str) -> io::Result<Option<File>> {
        let path = self.resolve(name)?;
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn open(&self, name: &str) -> io::Result<File> {
        let path = self.resolve(name)?;
        File::open(&path).await
    }

    /// Remove a (possibly partially written) object. Missing files are fine:
    /// cleanup paths race with nothing.
    pub async fn remove(&self, name: &str) -> io::Result<()> {
        let path = self.resolve(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

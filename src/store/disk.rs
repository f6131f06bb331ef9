use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{PersistentStorage, StoreError};

/// SVR database kept in a single file on the local filesystem.
///
/// Writes go to `<path>.tmp` and are renamed over the database, and the
/// read-merge-write cycle is serialized through an advisory lock on
/// `<path>.lock`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    tmp_path: PathBuf,
    lock_path: PathBuf,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            tmp_path: with_suffix(&path, ".tmp"),
            lock_path: with_suffix(&path, ".lock"),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl PersistentStorage for FileStorage {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, bytes: &[u8]) -> Result<(), StoreError> {
        {
            let mut file = File::create(&self.tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if let Err(e) = std::fs::rename(&self.tmp_path, &self.path) {
            let _ = std::fs::remove_file(&self.tmp_path);
            return Err(e.into());
        }
        tracing::debug!(path = %self.path.display(), len = bytes.len(), "SVR database written");
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn with_write_lock(
        &self,
        op: &mut dyn FnMut() -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write()?;
        op()
    }
}

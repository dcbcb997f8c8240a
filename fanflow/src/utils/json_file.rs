//! Lock-protected JSON state files.

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::errors::StoreError;

/// A JSON document on disk, read and rewritten under an exclusive lock.
///
/// The lock is an advisory `flock` on a sibling `.lock` file, so separate
/// processes sharing the directory serialize their updates. A rewrite goes to
/// a temporary file in the same directory and is renamed over the document,
/// so readers never see a partial write.
#[derive(Debug, Clone)]
pub struct JsonFile {
    store: &'static str,
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFile {
    /// Opens `<dir>/<name>.json`, creating `dir` if needed. The document
    /// itself is created on the first write.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if `dir` cannot be created.
    pub fn open(store: &'static str, dir: &Path, name: &str) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|e| io_error(store, dir, &e))?;
        Ok(Self {
            store,
            path: dir.join(format!("{name}.json")),
            lock_path: dir.join(format!("{name}.lock")),
        })
    }

    /// Path of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document, or its default if nothing was written yet.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` on I/O failure or unparseable JSON.
    pub fn load<T>(&self) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                StoreError::unavailable(
                    self.store,
                    format!("corrupt state file {}: {e}", self.path.display()),
                )
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(io_error(self.store, &self.path, &e)),
        }
    }

    /// Runs `f` on the document while holding the lock.
    ///
    /// `f` returns its result and whether the document changed; a changed
    /// document is written back before the lock is released. An error from
    /// `f` leaves the file untouched.
    ///
    /// Blocks on the lock; call it from a blocking context.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or `StoreError::Unavailable` on I/O
    /// failure.
    pub fn update<T, R, F>(&self, f: F) -> Result<R, StoreError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<(R, bool), StoreError>,
    {
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| io_error(self.store, &self.lock_path, &e))?;
        lock.lock_exclusive()
            .map_err(|e| io_error(self.store, &self.lock_path, &e))?;

        let mut document: T = self.load()?;
        let (result, changed) = f(&mut document)?;
        if changed {
            self.write(&document)?;
        }

        // Closing the descriptor also releases the lock
        drop(lock);
        Ok(result)
    }

    fn write<T: Serialize>(&self, document: &T) -> Result<(), StoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| io_error(self.store, dir, &e))?;
        serde_json::to_writer_pretty(&mut tmp, document)
            .map_err(|e| StoreError::unavailable(self.store, e.to_string()))?;
        tmp.flush()
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| io_error(self.store, tmp.path(), &e))?;
        tmp.persist(&self.path)
            .map_err(|e| io_error(self.store, &self.path, &e.error))?;
        Ok(())
    }
}

fn io_error(store: &str, path: &Path, error: &io::Error) -> StoreError {
    StoreError::unavailable(store, format!("{}: {error}", path.display()))
}

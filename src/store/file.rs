//! Filesystem persistence.
//!
//! One batch per `<uuid>.json` file in the configured directory. Exclusive
//! advisory locks interlock writers and fetchers, including other agent
//! instances sharing the directory. Fetch picks a file at random rather than
//! oldest-first so that a persistently locked file cannot starve the rest of
//! the directory when several publishers compete.

use crate::error::StoreError;
use crate::store::{Fetched, Persister, Transaction};
use async_trait::async_trait;
use fs2::FileExt;
use rand::Rng;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filesystem-backed batch store.
pub struct FilePersister {
    directory: PathBuf,
}

impl FilePersister {
    /// Open the store rooted at `directory`, creating it if absent.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    /// Directory this store writes into.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn list_batches(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn is_lock_contention(err: &std::io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[async_trait]
impl Persister for FilePersister {
    async fn write(&self, batch: &str) -> Result<(), StoreError> {
        let path = self
            .directory
            .join(format!("{}.json", uuid::Uuid::new_v4()));
        let mut file = File::create(&path)?;
        debug!(path = %path.display(), "created a new batch file");
        file.try_lock_exclusive()?;
        let written = file.write_all(batch.as_bytes());
        if let Err(err) = file.unlock() {
            debug!(path = %path.display(), %err, "could not unlock the batch file");
        }
        written?;
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<Fetched>, StoreError> {
        let files = self.list_batches()?;
        if files.is_empty() {
            return Ok(None);
        }
        let path = files[rand::thread_rng().gen_range(0..files.len())].clone();

        let mut file = match OpenOptions::new().read(true).open(&path) {
            Ok(file) => file,
            // Deleted by a concurrent commit between listing and opening.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if let Err(err) = file.try_lock_exclusive() {
            if is_lock_contention(&err) {
                // Owned by another transaction.
                return Ok(None);
            }
            return Err(err.into());
        }

        let mut batch = String::new();
        file.read_to_string(&mut batch)?;
        if batch.is_empty() {
            if let Err(err) = fs::remove_file(&path) {
                debug!(path = %path.display(), %err, "could not remove the empty file");
            }
            return Err(StoreError::EmptyEntryRemoved { path });
        }

        let txn = FileTransaction { file, path };
        Ok(Some((batch, Box::new(txn))))
    }
}

/// Holds the lock on the fetched file for the lifetime of the transaction.
struct FileTransaction {
    file: File,
    path: PathBuf,
}

#[async_trait]
impl Transaction for FileTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        // The advisory lock dies with the file handle.
        fs::remove_file(&self.path)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.file.unlock()?;
        Ok(())
    }
}

//! File-backed backends
//!
//! Each key is stored as one file `<dir>/<key>.val`.
//!
//! # Crash Safety
//!
//! Every `set` follows the write-fsync-rename pattern:
//! 1. Write to a partial file (`.<key>.partial`)
//! 2. fsync the partial file
//! 3. Atomic rename to the final path
//! 4. fsync the parent directory
//!
//! A reader therefore sees either the old value or the new one, never a torn
//! write. Partial files left behind by a crash are removed on open.
//!
//! # Change Feed
//!
//! Each opened store is one writer. Its change feed carries its own writes
//! and, while a runtime is available, writes by any other process or handle
//! over the same directory found by a periodic scan (see [`DirWatch`]).

use crate::backend::{FallbackBackend, PrimaryBackend};
use crate::watch::{ChangeFeed, ChangeKind, DirWatch, WriterId};
use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use unidb_core::{StorageError, StorageResult};

const VALUE_EXT: &str = "val";
const PARTIAL_PREFIX: &str = ".";
const PARTIAL_SUFFIX: &str = ".partial";

fn check_key(backend: &'static str, key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::backend(
            backend,
            format!("key '{}' is not a valid file key", key),
        ))
    }
}

fn value_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.{}", key, VALUE_EXT))
}

fn partial_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}{}{}", PARTIAL_PREFIX, key, PARTIAL_SUFFIX))
}

fn not_found_as_none<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove partial files left behind by an interrupted write
fn cleanup_partial_files(dir: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(PARTIAL_PREFIX) && name.ends_with(PARTIAL_SUFFIX) {
            fs::remove_file(entry.path())?;
            count += 1;
        }
    }
    Ok(count)
}

fn open_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let removed = cleanup_partial_files(dir)?;
    if removed > 0 {
        debug!(target: "unidb::storage", dir = ?dir, removed, "Removed partial files");
    }
    Ok(())
}

fn rename_into_place(temp_path: &Path, final_path: &Path) -> io::Result<bool> {
    fs::rename(temp_path, final_path)?;
    Ok(true)
}

fn remove_value(path: &Path) -> io::Result<bool> {
    Ok(not_found_as_none(fs::remove_file(path))?.is_some())
}

/// Durable asynchronous backend over a directory
#[derive(Debug, Clone)]
pub struct FilePrimary {
    dir: PathBuf,
    watch: Arc<DirWatch>,
}

impl FilePrimary {
    /// Open (creating if needed) a store in `dir`
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        open_dir(&dir)?;
        let watch = DirWatch::new(&dir, VALUE_EXT)?;
        Ok(FilePrimary { dir, watch })
    }

    /// Directory holding the values
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// This store's writer id
    pub fn writer_id(&self) -> WriterId {
        self.watch.writer_id()
    }
}

#[async_trait]
impl PrimaryBackend for FilePrimary {
    fn name(&self) -> &'static str {
        "file-primary"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        check_key(self.name(), key)?;
        let read = tokio::fs::read(value_path(&self.dir, key)).await;
        Ok(not_found_as_none(read)?)
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        check_key(self.name(), key)?;
        let final_path = value_path(&self.dir, key);
        let temp_path = partial_path(&self.dir, key);

        // Step 1: Write to partial file
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(value).await?;

        // Step 2: fsync the file
        file.sync_all().await?;
        drop(file);

        // Step 3: Atomic rename
        self.watch.apply(key, ChangeKind::Set, || {
            rename_into_place(&temp_path, &final_path)
        })?;

        // Step 4: fsync parent directory
        let dir = tokio::fs::File::open(&self.dir).await?;
        dir.sync_all().await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        check_key(self.name(), key)?;
        let path = value_path(&self.dir, key);
        self.watch
            .apply(key, ChangeKind::Removed, || remove_value(&path))?;
        Ok(())
    }

    fn changes(&self) -> Option<ChangeFeed> {
        Some(self.watch.subscribe())
    }
}

/// Durable synchronous backend over a directory, bounded by a capacity ceiling
#[derive(Debug, Clone)]
pub struct FileFallback {
    dir: PathBuf,
    capacity: usize,
    watch: Arc<DirWatch>,
}

impl FileFallback {
    /// Open (creating if needed) a store in `dir` holding at most `capacity` bytes
    pub fn open(dir: impl Into<PathBuf>, capacity: usize) -> StorageResult<Self> {
        let dir = dir.into();
        open_dir(&dir)?;
        let watch = DirWatch::new(&dir, VALUE_EXT)?;
        Ok(FileFallback {
            dir,
            capacity,
            watch,
        })
    }

    /// Directory holding the values
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// This store's writer id
    pub fn writer_id(&self) -> WriterId {
        self.watch.writer_id()
    }

    fn value_files(&self) -> io::Result<Vec<fs::DirEntry>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let is_value = entry
                .path()
                .extension()
                .map(|ext| ext == VALUE_EXT)
                .unwrap_or(false);
            if is_value {
                files.push(entry);
            }
        }
        Ok(files)
    }

    /// Bytes held across all value files
    fn measure_usage(&self) -> io::Result<usize> {
        let mut total = 0;
        for entry in self.value_files()? {
            match entry.metadata() {
                Ok(meta) => total += meta.len() as usize,
                // Removed since the directory was listed
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}

impl FallbackBackend for FileFallback {
    fn name(&self) -> &'static str {
        "file-fallback"
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reports 0 if the directory cannot be read; `set` measures again and
    /// fails in that case
    fn used_bytes(&self) -> usize {
        self.measure_usage().unwrap_or(0)
    }

    fn stored_len(&self, key: &str) -> Option<usize> {
        fs::metadata(value_path(&self.dir, key))
            .ok()
            .map(|m| m.len() as usize)
    }

    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        check_key(self.name(), key)?;
        Ok(not_found_as_none(fs::read(value_path(&self.dir, key)))?)
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        check_key(self.name(), key)?;
        let used = self.measure_usage().map_err(|e| {
            StorageError::backend(self.name(), format!("cannot measure usage: {}", e))
        })?;
        let existing = self.stored_len(key).unwrap_or(0);
        let needed = used.saturating_sub(existing) + value.len();
        if needed > self.capacity {
            return Err(StorageError::CapacityExceeded {
                backend: self.name(),
                needed,
                capacity: self.capacity,
            });
        }

        let final_path = value_path(&self.dir, key);
        let temp_path = partial_path(&self.dir, key);

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&temp_path)?;
        file.write_all(value)?;
        file.sync_all()?;
        drop(file);

        self.watch.apply(key, ChangeKind::Set, || {
            rename_into_place(&temp_path, &final_path)
        })?;
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        check_key(self.name(), key)?;
        let path = value_path(&self.dir, key);
        self.watch
            .apply(key, ChangeKind::Removed, || remove_value(&path))?;
        Ok(())
    }

    fn changes(&self) -> Option<ChangeFeed> {
        Some(self.watch.subscribe())
    }
}

//! Testing utilities for backends
//!
//! [`FaultyPrimary`] wraps any primary backend and injects faults per key:
//! reads that come back missing, rewritten, tampered with or failing, and
//! writes that fail. Used to exercise the save protocol's verification and abort paths.
//!
//! # Example
//!
//! ```ignore
//! use unidb_storage::testing::{FaultyPrimary, ReadFault};
//! use unidb_storage::{MemoryPrimary, Slot};
//!
//! let backend = FaultyPrimary::new(MemoryPrimary::new());
//! backend.inject_read_fault(Slot::Tmp.key(), ReadFault::Missing);
//! ```

use crate::backend::PrimaryBackend;
use crate::watch::ChangeFeed;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use unidb_core::{StorageError, StorageResult};

/// How a read of a faulted key misbehaves
#[derive(Debug, Clone, PartialEq)]
pub enum ReadFault {
    /// The key reads as absent
    Missing,
    /// The key reads as these bytes
    Replace(Vec<u8>),
    /// The stored JSON is re-encoded with different formatting but the same structure
    Reformat,
    /// The read fails with a backend error
    Fail,
}

/// Primary backend wrapper with injectable faults
#[derive(Debug)]
pub struct FaultyPrimary<B> {
    inner: B,
    read_faults: Mutex<HashMap<String, ReadFault>>,
    write_failures: Mutex<HashSet<String>>,
}

impl<B: PrimaryBackend> FaultyPrimary<B> {
    /// Wrap a backend with no faults active
    pub fn new(inner: B) -> Self {
        FaultyPrimary {
            inner,
            read_faults: Mutex::new(HashMap::new()),
            write_failures: Mutex::new(HashSet::new()),
        }
    }

    /// The wrapped backend, bypassing faults
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Make reads of `key` misbehave
    pub fn inject_read_fault(&self, key: &str, fault: ReadFault) {
        self.read_faults.lock().insert(key.to_string(), fault);
    }

    /// Make writes to `key` fail
    pub fn fail_writes_to(&self, key: &str) {
        self.write_failures.lock().insert(key.to_string());
    }

    /// Remove every injected fault
    pub fn clear_faults(&self) {
        self.read_faults.lock().clear();
        self.write_failures.lock().clear();
    }

    fn check_write(&self, key: &str) -> StorageResult<()> {
        if self.write_failures.lock().contains(key) {
            return Err(StorageError::backend(
                self.inner.name(),
                format!("injected write failure for {}", key),
            ));
        }
        Ok(())
    }
}

fn reformat(bytes: Vec<u8>) -> Vec<u8> {
    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(value) => serde_json::to_vec_pretty(&value).unwrap_or(bytes),
        Err(_) => bytes,
    }
}

#[async_trait]
impl<B: PrimaryBackend> PrimaryBackend for FaultyPrimary<B> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let fault = self.read_faults.lock().get(key).cloned();
        if fault == Some(ReadFault::Fail) {
            return Err(StorageError::backend(
                self.inner.name(),
                format!("injected read failure for {}", key),
            ));
        }
        let value = self.inner.get(key).await?;
        Ok(match fault {
            None => value,
            Some(ReadFault::Missing) => None,
            Some(ReadFault::Replace(bytes)) => Some(bytes),
            Some(ReadFault::Reformat) => value.map(reformat),
            Some(ReadFault::Fail) => None,
        })
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.check_write(key)?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.check_write(key)?;
        self.inner.remove(key).await
    }

    fn changes(&self) -> Option<ChangeFeed> {
        self.inner.changes()
    }
}

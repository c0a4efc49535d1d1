//! Key/value backend abstraction
//!
//! The engine persists through two heterogeneous stores:
//!
//! - **Primary** ([`PrimaryBackend`]): large capacity, asynchronous, authoritative.
//! - **Fallback** ([`FallbackBackend`]): small capacity, synchronous, same process.
//!   Used as an emergency mirror of MAIN and as the legacy load path.
//!
//! Both expose the same `get`/`set`/`remove` surface over byte values.
//! The fallback additionally reports a capacity ceiling that callers check
//! before writing; `set` refuses writes that would exceed it.
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync`.

use crate::watch::ChangeFeed;
use async_trait::async_trait;
use unidb_core::StorageResult;

/// High-capacity asynchronous store
///
/// # Contract
///
/// - `get` returns `Ok(None)` for an absent key, never an error.
/// - `set` replaces the whole value; a reader never observes a partial value.
/// - `remove` of an absent key succeeds.
#[async_trait]
pub trait PrimaryBackend: Send + Sync {
    /// Backend name for logs and errors
    fn name(&self) -> &'static str;

    /// Read a value
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Write a value
    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Delete a value
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Subscribe to key changes, if this backend can observe them
    fn changes(&self) -> Option<ChangeFeed> {
        None
    }
}

/// Small-capacity synchronous store
///
/// # Contract
///
/// Same as [`PrimaryBackend`], plus: `set` fails with
/// `StorageError::CapacityExceeded` when the store would hold more than
/// [`capacity`](FallbackBackend::capacity) bytes afterwards.
pub trait FallbackBackend: Send + Sync {
    /// Backend name for logs and errors
    fn name(&self) -> &'static str;

    /// Capacity ceiling in bytes across all keys
    fn capacity(&self) -> usize;

    /// Bytes currently held across all keys
    fn used_bytes(&self) -> usize;

    /// Length of the value at `key`, if present
    fn stored_len(&self, key: &str) -> Option<usize>;

    /// Read a value
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Write a value
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Delete a value
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Subscribe to key changes, if this backend can observe them
    fn changes(&self) -> Option<ChangeFeed> {
        None
    }

    /// Bytes the store would hold after writing `len` bytes at `key`
    fn usage_after(&self, key: &str, len: usize) -> usize {
        let existing = self.stored_len(key).unwrap_or(0);
        self.used_bytes().saturating_sub(existing) + len
    }

    /// Whether writing `len` bytes at `key` stays within the ceiling
    fn fits(&self, key: &str, len: usize) -> bool {
        self.usage_after(key, len) <= self.capacity()
    }
}

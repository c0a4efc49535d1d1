//! In-memory backends
//!
//! Ephemeral stores for tests, caches and embedding without a data directory.
//! Data lives as long as any handle over it.
//!
//! `handle()` opens another writer over the same data. Writes made through
//! one handle are visible to every other handle and show up in their change
//! feeds with a different [`WriterId`].

use crate::backend::{FallbackBackend, PrimaryBackend};
use crate::watch::{ChangeFeed, ChangeHub, ChangeKind, WriterId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use unidb_core::{StorageError, StorageResult};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Shared {
    values: RwLock<HashMap<String, Vec<u8>>>,
    hub: ChangeHub,
}

impl Shared {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &[u8], writer: WriterId) {
        self.values.write().insert(key.to_string(), value.to_vec());
        self.hub.publish(key, ChangeKind::Set, writer);
    }

    fn remove(&self, key: &str, writer: WriterId) {
        let removed = self.values.write().remove(key);
        if removed.is_some() {
            self.hub.publish(key, ChangeKind::Removed, writer);
        }
    }

    fn feed(&self, writer: WriterId) -> ChangeFeed {
        ChangeFeed {
            source: writer,
            receiver: self.hub.subscribe(),
        }
    }
}

/// In-memory primary backend
#[derive(Debug)]
pub struct MemoryPrimary {
    shared: Arc<Shared>,
    writer: WriterId,
}

impl MemoryPrimary {
    /// Create an empty store
    pub fn new() -> Self {
        MemoryPrimary {
            shared: Arc::new(Shared::default()),
            writer: Uuid::new_v4(),
        }
    }

    /// Another writer over the same data
    pub fn handle(&self) -> Self {
        MemoryPrimary {
            shared: Arc::clone(&self.shared),
            writer: Uuid::new_v4(),
        }
    }

    /// This handle's writer id
    pub fn writer_id(&self) -> WriterId {
        self.writer
    }

    /// Synchronous read, for inspection in tests
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.shared.get(key)
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.shared.values.read().len()
    }

    /// True if no key is held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryPrimary {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrimaryBackend for MemoryPrimary {
    fn name(&self) -> &'static str {
        "memory-primary"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.shared.get(key))
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.shared.set(key, value, self.writer);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.shared.remove(key, self.writer);
        Ok(())
    }

    fn changes(&self) -> Option<ChangeFeed> {
        Some(self.shared.feed(self.writer))
    }
}

/// In-memory fallback backend with a capacity ceiling
#[derive(Debug)]
pub struct MemoryFallback {
    shared: Arc<Shared>,
    writer: WriterId,
    capacity: usize,
}

impl MemoryFallback {
    /// Create an empty store holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        MemoryFallback {
            shared: Arc::new(Shared::default()),
            writer: Uuid::new_v4(),
            capacity,
        }
    }

    /// Another writer over the same data
    pub fn handle(&self) -> Self {
        MemoryFallback {
            shared: Arc::clone(&self.shared),
            writer: Uuid::new_v4(),
            capacity: self.capacity,
        }
    }
}

impl FallbackBackend for MemoryFallback {
    fn name(&self) -> &'static str {
        "memory-fallback"
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn used_bytes(&self) -> usize {
        self.shared.values.read().values().map(Vec::len).sum()
    }

    fn stored_len(&self, key: &str) -> Option<usize> {
        self.shared.values.read().get(key).map(Vec::len)
    }

    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.shared.get(key))
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        {
            let mut values = self.shared.values.write();
            let used: usize = values.values().map(Vec::len).sum();
            let existing = values.get(key).map(Vec::len).unwrap_or(0);
            let needed = used - existing + value.len();
            if needed > self.capacity {
                return Err(StorageError::CapacityExceeded {
                    backend: self.name(),
                    needed,
                    capacity: self.capacity,
                });
            }
            values.insert(key.to_string(), value.to_vec());
        }
        self.shared.hub.publish(key, ChangeKind::Set, self.writer);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.shared.remove(key, self.writer);
        Ok(())
    }

    fn changes(&self) -> Option<ChangeFeed> {
        Some(self.shared.feed(self.writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_primary_set_get_remove() {
        let store = MemoryPrimary::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", b"v1").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v1".to_vec()));

        store.set("k", b"v2").await.unwrap();
        assert_eq!(store.peek("k"), Some(b"v2".to_vec()));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.remove("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_primary_handles_share_data() {
        let a = MemoryPrimary::new();
        let b = a.handle();
        assert_ne!(a.writer_id(), b.writer_id());

        a.set("k", b"v").await.unwrap();
        assert_eq!(b.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_change_feed_tags_writer() {
        let a = MemoryPrimary::new();
        let b = a.handle();
        let mut feed = a.changes().unwrap();
        assert_eq!(feed.source, a.writer_id());

        b.set("k", b"v").await.unwrap();
        let change = feed.receiver.recv().await.unwrap();
        assert_eq!(change.source, b.writer_id());
        assert_eq!(change.kind, ChangeKind::Set);
    }

    #[test]
    fn test_fallback_enforces_capacity() {
        let store = MemoryFallback::new(10);
        store.set("a", b"123456").unwrap();
        assert_eq!(store.used_bytes(), 6);

        let err = store.set("b", b"12345").unwrap_err();
        assert!(matches!(
            err,
            StorageError::CapacityExceeded { needed: 11, capacity: 10, .. }
        ));
        assert_eq!(store.get("b").unwrap(), None);

        // Replacing a key only counts the new length
        store.set("a", b"1234567890").unwrap();
        assert_eq!(store.used_bytes(), 10);
    }

    #[test]
    fn test_fallback_fits() {
        let store = MemoryFallback::new(8);
        store.set("a", b"1234").unwrap();
        assert!(store.fits("b", 4));
        assert!(!store.fits("b", 5));
        assert!(store.fits("a", 8));
        assert_eq!(store.usage_after("a", 2), 2);
    }
}

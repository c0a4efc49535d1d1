//! Key change notifications
//!
//! Backends that can observe writes publish a [`KeyChange`] for every `set` and
//! `remove`. Each backend handle carries its own [`WriterId`], so a subscriber
//! can tell its own writes apart from writes made through another handle over
//! the same data (a second application instance).
//!
//! Notifications are informational only. They never block or merge writes.
//!
//! File-backed stores cannot see writes made by another process directly.
//! [`DirWatch`] scans the store directory on a timer while anyone is
//! subscribed and reports value files that changed without this handle
//! writing them, attributed to [`UNKNOWN_WRITER`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

/// Buffered notifications per subscriber before the oldest are dropped
pub const CHANGE_FEED_CAPACITY: usize = 64;

/// Interval between scans of a watched directory
pub const DIR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Source reported for changes found by a directory scan
pub const UNKNOWN_WRITER: WriterId = Uuid::nil();

/// Identity of one backend handle
pub type WriterId = Uuid;

/// What happened to a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Key was written
    Set,
    /// Key was removed
    Removed,
}

/// A single key mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChange {
    /// Backend key
    pub key: String,
    /// Mutation type
    pub kind: ChangeKind,
    /// Handle that performed the mutation
    pub source: WriterId,
}

/// Broadcast point shared by every handle over the same data
#[derive(Debug, Clone)]
pub struct ChangeHub {
    sender: broadcast::Sender<KeyChange>,
}

impl ChangeHub {
    /// Create a hub with no subscribers
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        ChangeHub { sender }
    }

    /// Publish a change to every current subscriber
    pub fn publish(&self, key: &str, kind: ChangeKind, source: WriterId) {
        // Err only means nobody is listening
        let _ = self.sender.send(KeyChange {
            key: key.to_string(),
            kind,
            source,
        });
    }

    /// Subscribe to future changes
    pub fn subscribe(&self) -> broadcast::Receiver<KeyChange> {
        self.sender.subscribe()
    }

    /// Number of live subscriptions
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription handed out by a backend
#[derive(Debug)]
pub struct ChangeFeed {
    /// Writer id of the handle that created the subscription
    pub source: WriterId,
    /// Incoming changes from every handle, including this one
    pub receiver: broadcast::Receiver<KeyChange>,
}

// ============================================================================
// Directory watch
// ============================================================================

/// Size and modification time of a value file
type Fingerprint = (u64, Option<SystemTime>);

/// Change tracking for a directory of `<key>.<ext>` value files
///
/// Writes made through the owning handle go through [`DirWatch::apply`],
/// which updates the known state under the same lock a scan takes, so a scan
/// never mistakes them for foreign writes.
#[derive(Debug)]
pub struct DirWatch {
    dir: PathBuf,
    ext: &'static str,
    writer: WriterId,
    hub: ChangeHub,
    known: Mutex<HashMap<String, Fingerprint>>,
    polling: AtomicBool,
}

impl DirWatch {
    /// Start tracking `dir` from its current contents
    pub fn new(dir: impl Into<PathBuf>, ext: &'static str) -> io::Result<Arc<Self>> {
        let dir = dir.into();
        let known = scan_dir(&dir, ext)?;
        Ok(Arc::new(DirWatch {
            dir,
            ext,
            writer: Uuid::new_v4(),
            hub: ChangeHub::new(),
            known: Mutex::new(known),
            polling: AtomicBool::new(false),
        }))
    }

    /// Writer id of the owning handle
    pub fn writer_id(&self) -> WriterId {
        self.writer
    }

    /// Run a write or delete of `key` made by the owning handle.
    ///
    /// `op` returns whether it changed anything; if so the change is
    /// published under this handle's writer id.
    pub fn apply(
        &self,
        key: &str,
        kind: ChangeKind,
        op: impl FnOnce() -> io::Result<bool>,
    ) -> io::Result<()> {
        let changed = {
            let mut known = self.known.lock();
            let changed = op()?;
            match fingerprint(&self.value_path(key))? {
                Some(fp) => known.insert(key.to_string(), fp),
                None => known.remove(key),
            };
            changed
        };
        if changed {
            self.hub.publish(key, kind, self.writer);
        }
        Ok(())
    }

    /// Subscribe, starting the directory scan if it is not running.
    ///
    /// Outside a tokio runtime the feed only carries this handle's own writes.
    pub fn subscribe(self: &Arc<Self>) -> ChangeFeed {
        let feed = ChangeFeed {
            source: self.writer,
            receiver: self.hub.subscribe(),
        };
        self.start_polling();
        feed
    }

    fn start_polling(self: &Arc<Self>) {
        if self.polling.swap(true, Ordering::AcqRel) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(poll(Arc::downgrade(self)));
            }
            Err(_) => self.polling.store(false, Ordering::Release),
        }
    }

    /// Compare the directory against the known state and publish differences
    pub fn scan(&self) -> io::Result<usize> {
        let changes = {
            let mut known = self.known.lock();
            let current = scan_dir(&self.dir, self.ext)?;
            let mut changes = Vec::new();
            for (key, fp) in &current {
                if known.get(key) != Some(fp) {
                    changes.push((key.clone(), ChangeKind::Set));
                }
            }
            for key in known.keys() {
                if !current.contains_key(key) {
                    changes.push((key.clone(), ChangeKind::Removed));
                }
            }
            *known = current;
            changes
        };
        for (key, kind) in &changes {
            self.hub.publish(key, *kind, UNKNOWN_WRITER);
        }
        Ok(changes.len())
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, self.ext))
    }
}

/// Scan until the watch is dropped or nobody is subscribed
async fn poll(weak: Weak<DirWatch>) {
    let mut ticker = tokio::time::interval(DIR_POLL_INTERVAL);
    loop {
        ticker.tick().await;
        let Some(watch) = weak.upgrade() else {
            return;
        };
        if watch.hub.receiver_count() == 0 {
            watch.polling.store(false, Ordering::Release);
            // A subscriber may have arrived after the count was read
            if watch.hub.receiver_count() == 0 || watch.polling.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        if let Err(e) = watch.scan() {
            warn!(target: "unidb::storage", dir = ?watch.dir, error = %e, "Directory scan failed");
        }
    }
}

fn fingerprint(path: &Path) -> io::Result<Option<Fingerprint>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some((meta.len(), meta.modified().ok()))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn scan_dir(dir: &Path, ext: &str) -> io::Result<HashMap<String, Fingerprint>> {
    let mut found = HashMap::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == ext).unwrap_or(false) {
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(fp) = fingerprint(&path)? {
                found.insert(key.to_string(), fp);
            }
        }
    }
    Ok(found)
}

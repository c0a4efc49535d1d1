//! External change listener
//!
//! Reports writes to the MAIN slot made by another writer over the same
//! backend, such as a second application instance. Changes made by this
//! store's own handle are filtered out.
//!
//! The listener is informational only: it never blocks, merges or rejects a
//! write. A caller that sees a change typically reloads.

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;
use unidb_storage::{ChangeFeed, KeyChange, Slot};

/// Stream of MAIN-slot changes made by other writers
#[derive(Debug)]
pub struct ExternalChanges {
    feed: ChangeFeed,
}

impl ExternalChanges {
    pub(crate) fn new(feed: ChangeFeed) -> Self {
        ExternalChanges { feed }
    }

    fn is_external(&self, change: &KeyChange) -> bool {
        change.source != self.feed.source && change.key == Slot::Main.key()
    }

    /// Wait for the next external change
    ///
    /// Returns `None` once the backend is gone. Changes dropped because the
    /// listener fell behind are skipped with a warning.
    pub async fn next(&mut self) -> Option<KeyChange> {
        loop {
            match self.feed.receiver.recv().await {
                Ok(change) if self.is_external(&change) => return Some(change),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "unidb::db", skipped, "External change listener lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next external change already received, without waiting
    pub fn try_next(&mut self) -> Option<KeyChange> {
        loop {
            match self.feed.receiver.try_recv() {
                Ok(change) if self.is_external(&change) => return Some(change),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(target: "unidb::db", skipped, "External change listener lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

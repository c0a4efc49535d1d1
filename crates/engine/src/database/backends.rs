//! Primary/fallback backend pair
//!
//! The primary backend is authoritative. The fallback is optional and only
//! ever receives a copy of MAIN when it fits under its capacity ceiling; an
//! oversized mirror is skipped rather than attempted.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};
use unidb_core::StorageResult;
use unidb_storage::{ChangeFeed, FallbackBackend, PrimaryBackend, Slot};

/// What happened to the best-effort fallback mirror of a committed save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// MAIN was copied to the fallback
    Written,
    /// The document does not fit under the fallback's ceiling
    SkippedOverCapacity,
    /// Mirroring is turned off in the configuration
    SkippedDisabled,
    /// No fallback backend is configured
    NoFallback,
    /// The fallback rejected the write
    Failed,
}

/// Byte length of one slot on one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSize {
    /// Backend name
    pub backend: &'static str,
    /// Slot measured
    pub slot: Slot,
    /// Length in bytes, None if the slot is empty
    pub bytes: Option<usize>,
}

pub(crate) struct Backends {
    pub(crate) primary: Arc<dyn PrimaryBackend>,
    pub(crate) fallback: Option<Arc<dyn FallbackBackend>>,
    /// Serializes sync saves, restores and mirror writes on the fallback
    pub(crate) fallback_lock: Mutex<()>,
}

impl Backends {
    pub(crate) fn new(
        primary: Arc<dyn PrimaryBackend>,
        fallback: Option<Arc<dyn FallbackBackend>>,
    ) -> Self {
        Backends {
            primary,
            fallback,
            fallback_lock: Mutex::new(()),
        }
    }

    /// Copy committed MAIN bytes to the fallback if they fit
    pub(crate) fn mirror_main(&self, bytes: &[u8], enabled: bool) -> MirrorOutcome {
        if !enabled {
            return MirrorOutcome::SkippedDisabled;
        }
        let Some(fallback) = &self.fallback else {
            return MirrorOutcome::NoFallback;
        };

        let _guard = self.fallback_lock.lock();
        let key = Slot::Main.key();
        if !fallback.fits(key, bytes.len()) {
            debug!(
                target: "unidb::storage",
                backend = fallback.name(),
                bytes = bytes.len(),
                capacity = fallback.capacity(),
                "Fallback mirror skipped, document over capacity"
            );
            return MirrorOutcome::SkippedOverCapacity;
        }
        match fallback.set(key, bytes) {
            Ok(()) => MirrorOutcome::Written,
            Err(e) => {
                warn!(
                    target: "unidb::storage",
                    backend = fallback.name(),
                    error = %e,
                    "Fallback mirror failed"
                );
                MirrorOutcome::Failed
            }
        }
    }

    /// Change feed of whichever backend can provide one, primary first
    pub(crate) fn changes(&self) -> Option<ChangeFeed> {
        self.primary
            .changes()
            .or_else(|| self.fallback.as_ref().and_then(|f| f.changes()))
    }

    pub(crate) async fn slot_sizes(&self) -> StorageResult<Vec<SlotSize>> {
        let mut sizes = Vec::with_capacity(Slot::ALL.len() * 2);
        for slot in Slot::ALL {
            let bytes = self.primary.get(slot.key()).await?.map(|v| v.len());
            sizes.push(SlotSize {
                backend: self.primary.name(),
                slot,
                bytes,
            });
        }
        if let Some(fallback) = &self.fallback {
            for slot in Slot::ALL {
                sizes.push(SlotSize {
                    backend: fallback.name(),
                    slot,
                    bytes: fallback.stored_len(slot.key()),
                });
            }
        }
        Ok(sizes)
    }

    /// Remove every slot on both backends
    pub(crate) async fn clear(&self) -> StorageResult<()> {
        for slot in Slot::ALL {
            self.primary.remove(slot.key()).await?;
        }
        if let Some(fallback) = &self.fallback {
            let _guard = self.fallback_lock.lock();
            for slot in Slot::ALL {
                fallback.remove(slot.key())?;
            }
        }
        Ok(())
    }
}

//! Database struct: open, load, save and restore
//!
//! This module provides the store object that owns the persisted document:
//! - Backend setup (file-backed, in-memory, or caller-supplied)
//! - Recovery of interrupted saves on open
//! - Load with migration and one-time import from the fallback
//! - The staged save protocol and one-generation restore
//!
//! ## Save protocol
//!
//! ```text
//! Idle -> Validating -> WritingTemp -> Verifying -> SnapshottingPrev
//!      -> CommittingMain -> Cleanup -> Idle
//! ```
//!
//! A save aborts from `Validating`, `WritingTemp` or `Verifying`. Up to that
//! point MAIN has not been touched. MAIN is only ever replaced by a document
//! that passed the commit gate and read back intact from TMP.
//!
//! The async methods run against the primary backend. The `_sync` methods run
//! the same protocol against the fallback alone.

mod backends;
pub mod builder;
pub mod config;

pub use backends::{MirrorOutcome, SlotSize};
pub use builder::DatabaseBuilder;
pub use config::{StoreConfig, CONFIG_FILE_NAME, DEFAULT_FALLBACK_CAPACITY};

use crate::validation::validate;
use crate::watch::ExternalChanges;
use backends::Backends;
use chrono::{DateTime, Utc};
use parking_lot::Mutex as ParkingMutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use unidb_core::{
    Error, Integrity, Result, StorageError, StorageResult, UnifiedDocument, VerifyFailure,
};
use unidb_durability::{compare_readback, decode_raw, encode, Migrator};
use unidb_storage::{
    FallbackBackend, FileFallback, FilePrimary, MemoryFallback, MemoryPrimary, PrimaryBackend,
    Slot,
};

/// Directory under the data directory holding the primary backend
pub const PRIMARY_DIR: &str = "primary";

/// Directory under the data directory holding the fallback backend
pub const FALLBACK_DIR: &str = "fallback";

// ============================================================================
// Save State Machine
// ============================================================================

/// Phase of a save operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePhase {
    /// No save in flight
    Idle,
    /// Running the commit gate; no I/O yet
    Validating,
    /// Writing the candidate to TMP
    WritingTemp,
    /// Reading TMP back and comparing
    Verifying,
    /// Copying the current MAIN to PREV
    SnapshottingPrev,
    /// Writing the committed document to MAIN
    CommittingMain,
    /// Removing TMP
    Cleanup,
}

impl SavePhase {
    /// Whether a failure in this phase aborts the save with MAIN untouched
    pub fn can_abort(&self) -> bool {
        matches!(
            self,
            SavePhase::Validating | SavePhase::WritingTemp | SavePhase::Verifying
        )
    }
}

impl fmt::Display for SavePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SavePhase::Idle => "idle",
            SavePhase::Validating => "validating",
            SavePhase::WritingTemp => "writing-temp",
            SavePhase::Verifying => "verifying",
            SavePhase::SnapshottingPrev => "snapshotting-prev",
            SavePhase::CommittingMain => "committing-main",
            SavePhase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Tracks the phase of the save in flight; resets to Idle on drop
struct PhaseTracker<'a> {
    phase: &'a ParkingMutex<SavePhase>,
    backend: &'static str,
}

impl<'a> PhaseTracker<'a> {
    fn start(phase: &'a ParkingMutex<SavePhase>, backend: &'static str) -> Self {
        let tracker = PhaseTracker { phase, backend };
        tracker.enter(SavePhase::Validating);
        tracker
    }

    fn enter(&self, next: SavePhase) {
        *self.phase.lock() = next;
        debug!(target: "unidb::db", backend = self.backend, phase = %next, "Save phase");
    }

    fn current(&self) -> SavePhase {
        *self.phase.lock()
    }
}

impl Drop for PhaseTracker<'_> {
    fn drop(&mut self) {
        *self.phase.lock() = SavePhase::Idle;
    }
}

/// What a committed save did
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    /// The document as committed to MAIN, with `updatedAt` and `integrity` stamped
    pub document: UnifiedDocument,
    /// Serialized size recorded as `integrity.lastGoodBytes`
    pub bytes: u64,
    /// Commit time, equal to the document's `updatedAt`
    pub committed_at: DateTime<Utc>,
    /// True if the previous MAIN was copied to PREV
    pub prev_snapshot: bool,
    /// Fallback mirror result (always `NoFallback` for sync saves)
    pub mirror: MirrorOutcome,
}

/// A candidate that passed the gate and has been serialized for TMP
struct Staged {
    doc: UnifiedDocument,
    tmp_bytes: Vec<u8>,
}

impl Staged {
    /// Validate and stamp a candidate document
    fn prepare(mut doc: UnifiedDocument, tracker: &PhaseTracker<'_>) -> StorageResult<Self> {
        validate(&doc)?;
        tracker.enter(SavePhase::WritingTemp);
        doc.updated_at = Utc::now();
        let tmp_bytes = encode(&doc)?;
        Ok(Staged { doc, tmp_bytes })
    }

    /// Check what TMP read back as; a failed read counts as unreadable
    fn verify(
        &self,
        backend: &'static str,
        read: StorageResult<Option<Vec<u8>>>,
    ) -> StorageResult<()> {
        let reason = match read {
            Err(e) => {
                warn!(target: "unidb::db", backend, error = %e, "TMP read-back failed");
                VerifyFailure::Unreadable
            }
            Ok(None) => VerifyFailure::Unreadable,
            Ok(Some(read)) if compare_readback(&self.tmp_bytes, &read).is_verified() => {
                return Ok(())
            }
            Ok(Some(_)) => VerifyFailure::Mismatch,
        };
        Err(StorageError::VerificationFailed { backend, reason })
    }

    /// Stamp integrity and serialize the document for MAIN
    fn commit_bytes(mut self) -> StorageResult<(UnifiedDocument, Vec<u8>, u64)> {
        let bytes = self.tmp_bytes.len() as u64;
        self.doc.integrity = Integrity {
            last_good_write_at: Some(self.doc.updated_at),
            last_good_bytes: Some(bytes),
        };
        let main_bytes = encode(&self.doc)?;
        Ok((self.doc, main_bytes, bytes))
    }
}

// ============================================================================
// Database Struct
// ============================================================================

/// The persistence engine for one unified document
///
/// Owns a primary backend, an optional fallback and the configuration.
/// Only one save runs at a time per instance.
///
/// # Example
///
/// ```text
/// use unidb_engine::Database;
///
/// let db = Database::open("/path/to/data").await?;
/// let mut doc = db.load().await?;
/// doc.add_facility(FacilityMeta::new("f2", "East Wing"));
/// let outcome = db.save(doc).await?;
/// ```
pub struct Database {
    /// Data directory (None for ephemeral and custom-backend stores)
    data_dir: Option<PathBuf>,
    backends: Backends,
    config: StoreConfig,
    migrator: Migrator,
    /// One primary save or restore in flight
    save_lock: AsyncMutex<()>,
    /// Phase of the primary save, guarded by `save_lock`
    phase: ParkingMutex<SavePhase>,
    /// Phase of the fallback save, guarded by `fallback_lock`
    sync_phase: ParkingMutex<SavePhase>,
}

impl Database {
    /// Open a file-backed store in `path`.
    ///
    /// Creates the directory if missing, writes a default `unidb.toml` on
    /// first open and reads settings from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or a backend cannot be opened.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir).map_err(StorageError::from)?;

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        StoreConfig::write_default_if_missing(&config_path)?;
        let cfg = StoreConfig::from_file(&config_path)?;

        Self::open_with_config(path, cfg).await
    }

    /// Open a file-backed store in `path` with an explicit configuration.
    ///
    /// The supplied config is written to `unidb.toml` so that a later
    /// [`Database::open`] picks up the same settings.
    pub async fn open_with_config<P: AsRef<Path>>(path: P, cfg: StoreConfig) -> Result<Arc<Self>> {
        cfg.validate()?;
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir).map_err(StorageError::from)?;
        cfg.write_to_file(&data_dir.join(CONFIG_FILE_NAME))?;

        let primary = FilePrimary::open(data_dir.join(PRIMARY_DIR))?;
        let fallback = FileFallback::open(data_dir.join(FALLBACK_DIR), cfg.fallback_capacity_bytes)?;

        let mut db = Self::from_parts(Arc::new(primary), Some(Arc::new(fallback)), cfg);
        db.data_dir = Some(data_dir);
        db.recover_on_open().await;

        info!(
            target: "unidb::db",
            path = ?db.data_dir,
            "Database opened"
        );
        Ok(Arc::new(db))
    }

    /// Create an in-memory store with default settings.
    ///
    /// Nothing touches disk; data is lost when the store is dropped.
    pub fn ephemeral() -> Arc<Self> {
        let cfg = StoreConfig::default();
        let fallback = MemoryFallback::new(cfg.fallback_capacity_bytes);
        Arc::new(Self::from_parts(
            Arc::new(MemoryPrimary::new()),
            Some(Arc::new(fallback)),
            cfg,
        ))
    }

    /// Compose a store from caller-supplied backends
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    pub(crate) fn from_parts(
        primary: Arc<dyn PrimaryBackend>,
        fallback: Option<Arc<dyn FallbackBackend>>,
        config: StoreConfig,
    ) -> Self {
        let migrator = Migrator::new().with_default_facility_name(&config.default_facility_name);
        Database {
            data_dir: None,
            backends: Backends::new(primary, fallback),
            config,
            migrator,
            save_lock: AsyncMutex::new(()),
            phase: ParkingMutex::new(SavePhase::Idle),
            sync_phase: ParkingMutex::new(SavePhase::Idle),
        }
    }

    pub(crate) async fn recover_on_open(&self) {
        if let Err(e) = self.recover_interrupted_save().await {
            warn!(target: "unidb::db", error = %e, "Failed to clean up interrupted save");
        }
    }

    /// Data directory, if file-backed
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Active configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Phase of the [`Database::save`] currently in flight
    pub fn save_phase(&self) -> SavePhase {
        *self.phase.lock()
    }

    /// Phase of the [`Database::save_sync`] currently in flight
    pub fn sync_save_phase(&self) -> SavePhase {
        *self.sync_phase.lock()
    }

    /// A fresh document whose facility carries the configured default name
    pub fn create_empty_document(&self) -> UnifiedDocument {
        UnifiedDocument::empty_with_facility_name(&self.config.default_facility_name)
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Load the document from the primary backend.
    ///
    /// If the primary holds no document, the fallback's copy is imported once
    /// (migrated and written to the primary). If neither holds one, a fresh
    /// document is returned; nothing is written until the first save.
    ///
    /// # Errors
    ///
    /// - [`Error::Migration`] if the stored version cannot be upgraded
    /// - [`Error::Storage`] if a backend fails or the stored value is corrupt
    pub async fn load(&self) -> Result<UnifiedDocument> {
        let key = Slot::Main.key();
        if let Some(bytes) = self.backends.primary.get(key).await? {
            let raw = decode_raw(key, &bytes)?;
            return self.migrator.migrate(raw);
        }

        if self.config.import_from_fallback {
            if let Some(doc) = self.import_from_fallback().await? {
                return Ok(doc);
            }
        }
        Ok(self.create_empty_document())
    }

    /// Migrate the fallback's MAIN and write it to the primary
    async fn import_from_fallback(&self) -> Result<Option<UnifiedDocument>> {
        let Some(fallback) = &self.backends.fallback else {
            return Ok(None);
        };
        let key = Slot::Main.key();
        let Some(bytes) = fallback.get(key)? else {
            return Ok(None);
        };

        let raw = decode_raw(key, &bytes)?;
        let doc = self.migrator.migrate(raw)?;

        match self.write_import(&doc).await {
            Ok(written) => info!(
                target: "unidb::db",
                from = fallback.name(),
                to = self.backends.primary.name(),
                bytes = written,
                "Imported document from fallback"
            ),
            Err(e) => warn!(
                target: "unidb::db",
                from = fallback.name(),
                error = %e,
                "Failed to write imported document to primary"
            ),
        }
        Ok(Some(doc))
    }

    async fn write_import(&self, doc: &UnifiedDocument) -> StorageResult<usize> {
        let bytes = encode(doc)?;
        self.backends.primary.set(Slot::Main.key(), &bytes).await?;
        Ok(bytes.len())
    }

    /// Load the document from the fallback backend alone.
    ///
    /// # Errors
    ///
    /// `StorageError::Unavailable` if no fallback is configured; otherwise as
    /// [`Database::load`].
    pub fn load_sync(&self) -> Result<UnifiedDocument> {
        let fallback = self.require_fallback()?;
        let key = Slot::Main.key();
        match fallback.get(key)? {
            Some(bytes) => {
                let raw = decode_raw(key, &bytes)?;
                self.migrator.migrate(raw)
            }
            None => Ok(self.create_empty_document()),
        }
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Validate and persist `doc` as the new MAIN on the primary backend.
    ///
    /// The document is taken by value: it is the candidate next version and
    /// the committed form is handed back in [`SaveOutcome::document`].
    ///
    /// # Errors
    ///
    /// `StorageError::Validation` if the commit gate rejects the document,
    /// `StorageError::VerificationFailed` if TMP does not read back intact, or
    /// a backend error from the TMP or MAIN write. In every case MAIN holds
    /// its previous value.
    pub async fn save(&self, doc: UnifiedDocument) -> Result<SaveOutcome> {
        let _guard = self.save_lock.lock().await;
        let primary = &self.backends.primary;
        let tracker = PhaseTracker::start(&self.phase, primary.name());

        let result = self.save_primary(doc, &tracker).await;
        if let Err(e) = &result {
            let phase = tracker.current();
            warn!(target: "unidb::db", backend = primary.name(), %phase, error = %e, "Save aborted");
            if phase != SavePhase::Validating {
                if let Err(e) = primary.remove(Slot::Tmp.key()).await {
                    warn!(target: "unidb::db", error = %e, "Failed to remove TMP after abort");
                }
            }
        }
        result.map_err(Error::from)
    }

    async fn save_primary(
        &self,
        doc: UnifiedDocument,
        tracker: &PhaseTracker<'_>,
    ) -> StorageResult<SaveOutcome> {
        let primary = &self.backends.primary;
        let name = primary.name();

        let staged = Staged::prepare(doc, tracker)?;
        primary.set(Slot::Tmp.key(), &staged.tmp_bytes).await?;

        tracker.enter(SavePhase::Verifying);
        let read = primary.get(Slot::Tmp.key()).await;
        staged.verify(name, read)?;

        tracker.enter(SavePhase::SnapshottingPrev);
        let prev_snapshot = match snapshot_prev_async(primary.as_ref()).await {
            Ok(copied) => copied,
            Err(e) => {
                warn!(target: "unidb::db", backend = name, error = %e, "PREV snapshot failed");
                false
            }
        };

        tracker.enter(SavePhase::CommittingMain);
        let (document, main_bytes, bytes) = staged.commit_bytes()?;
        primary.set(Slot::Main.key(), &main_bytes).await?;

        tracker.enter(SavePhase::Cleanup);
        if let Err(e) = primary.remove(Slot::Tmp.key()).await {
            warn!(target: "unidb::db", backend = name, error = %e, "Failed to remove TMP");
        }

        let mirror = self
            .backends
            .mirror_main(&main_bytes, self.config.mirror_to_fallback);

        info!(
            target: "unidb::db",
            backend = name,
            bytes,
            prev_snapshot,
            mirror = ?mirror,
            "Save committed"
        );
        Ok(SaveOutcome {
            committed_at: document.updated_at,
            document,
            bytes,
            prev_snapshot,
            mirror,
        })
    }

    /// Validate and persist `doc` as the new MAIN on the fallback backend alone.
    ///
    /// Runs the same protocol as [`Database::save`]. A document that does not
    /// fit under the fallback's ceiling fails with `CapacityExceeded`.
    pub fn save_sync(&self, doc: UnifiedDocument) -> Result<SaveOutcome> {
        let fallback = self.require_fallback()?;
        let _guard = self.backends.fallback_lock.lock();
        let tracker = PhaseTracker::start(&self.sync_phase, fallback.name());

        let result = save_fallback(fallback.as_ref(), doc, &tracker);
        if let Err(e) = &result {
            let phase = tracker.current();
            warn!(target: "unidb::db", backend = fallback.name(), %phase, error = %e, "Save aborted");
            if phase != SavePhase::Validating {
                if let Err(e) = fallback.remove(Slot::Tmp.key()) {
                    warn!(target: "unidb::db", error = %e, "Failed to remove TMP after abort");
                }
            }
        }
        result.map_err(Error::from)
    }

    // ========================================================================
    // Restore
    // ========================================================================

    /// Copy PREV back onto MAIN.
    ///
    /// Uses the primary's PREV if it has one, the fallback's otherwise.
    /// Returns whether a snapshot existed and was restored. The caller must
    /// reload afterwards.
    pub async fn restore_prev(&self) -> bool {
        let _guard = self.save_lock.lock().await;
        match self.try_restore_prev().await {
            Ok(restored) => restored,
            Err(e) => {
                warn!(target: "unidb::db", error = %e, "Restore of PREV failed");
                false
            }
        }
    }

    async fn try_restore_prev(&self) -> StorageResult<bool> {
        let primary = &self.backends.primary;
        if let Some(prev) = primary.get(Slot::Prev.key()).await? {
            primary.set(Slot::Main.key(), &prev).await?;
            info!(target: "unidb::db", backend = primary.name(), bytes = prev.len(), "Restored PREV");
            return Ok(true);
        }
        match &self.backends.fallback {
            Some(fallback) => {
                let _guard = self.backends.fallback_lock.lock();
                restore_fallback(fallback.as_ref())
            }
            None => Ok(false),
        }
    }

    /// Copy PREV back onto MAIN on the fallback backend alone
    pub fn restore_prev_sync(&self) -> bool {
        let Some(fallback) = &self.backends.fallback else {
            warn!(target: "unidb::db", "Restore requested but no fallback is configured");
            return false;
        };
        let _guard = self.backends.fallback_lock.lock();
        match restore_fallback(fallback.as_ref()) {
            Ok(restored) => restored,
            Err(e) => {
                warn!(target: "unidb::db", error = %e, "Restore of PREV failed");
                false
            }
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Remove MAIN, PREV and TMP on both backends.
    ///
    /// The next load returns a fresh document.
    pub async fn hard_reset(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        self.backends.clear().await?;
        warn!(target: "unidb::db", "Hard reset: all slots removed");
        Ok(())
    }

    /// Remove a TMP slot left behind by a save that never finished.
    ///
    /// MAIN is authoritative, so a leftover TMP is discarded rather than
    /// promoted. Runs automatically on open. Returns whether anything was
    /// removed.
    pub async fn recover_interrupted_save(&self) -> Result<bool> {
        let _guard = self.save_lock.lock().await;
        let key = Slot::Tmp.key();
        let mut removed = false;

        let primary = &self.backends.primary;
        if primary.get(key).await?.is_some() {
            primary.remove(key).await?;
            warn!(target: "unidb::db", backend = primary.name(), "Removed TMP left by an interrupted save");
            removed = true;
        }
        if let Some(fallback) = &self.backends.fallback {
            let _guard = self.backends.fallback_lock.lock();
            if fallback.stored_len(key).is_some() {
                fallback.remove(key)?;
                warn!(target: "unidb::db", backend = fallback.name(), "Removed TMP left by an interrupted save");
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Listen for MAIN changes made by other writers.
    ///
    /// Returns `None` if neither backend can observe changes.
    pub fn external_changes(&self) -> Option<ExternalChanges> {
        self.backends.changes().map(ExternalChanges::new)
    }

    /// Byte length of every slot on every backend
    pub async fn slot_sizes(&self) -> Result<Vec<SlotSize>> {
        Ok(self.backends.slot_sizes().await?)
    }

    fn require_fallback(&self) -> StorageResult<&Arc<dyn FallbackBackend>> {
        self.backends
            .fallback
            .as_ref()
            .ok_or_else(|| StorageError::Unavailable("no fallback backend configured".into()))
    }
}

/// Copy MAIN to PREV on the primary; false if there is no MAIN yet
async fn snapshot_prev_async(primary: &dyn PrimaryBackend) -> StorageResult<bool> {
    match primary.get(Slot::Main.key()).await? {
        Some(main) => {
            primary.set(Slot::Prev.key(), &main).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn snapshot_prev_sync(fallback: &dyn FallbackBackend) -> StorageResult<bool> {
    match fallback.get(Slot::Main.key())? {
        Some(main) => {
            fallback.set(Slot::Prev.key(), &main)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn save_fallback(
    fallback: &dyn FallbackBackend,
    doc: UnifiedDocument,
    tracker: &PhaseTracker<'_>,
) -> StorageResult<SaveOutcome> {
    let name = fallback.name();

    let staged = Staged::prepare(doc, tracker)?;
    fallback.set(Slot::Tmp.key(), &staged.tmp_bytes)?;

    tracker.enter(SavePhase::Verifying);
    staged.verify(name, fallback.get(Slot::Tmp.key()))?;

    tracker.enter(SavePhase::SnapshottingPrev);
    let prev_snapshot = match snapshot_prev_sync(fallback) {
        Ok(copied) => copied,
        Err(e) => {
            warn!(target: "unidb::db", backend = name, error = %e, "PREV snapshot failed");
            false
        }
    };

    tracker.enter(SavePhase::CommittingMain);
    let (document, main_bytes, bytes) = staged.commit_bytes()?;
    fallback.set(Slot::Main.key(), &main_bytes)?;

    tracker.enter(SavePhase::Cleanup);
    if let Err(e) = fallback.remove(Slot::Tmp.key()) {
        warn!(target: "unidb::db", backend = name, error = %e, "Failed to remove TMP");
    }

    info!(target: "unidb::db", backend = name, bytes, prev_snapshot, "Save committed");
    Ok(SaveOutcome {
        committed_at: document.updated_at,
        document,
        bytes,
        prev_snapshot,
        mirror: MirrorOutcome::NoFallback,
    })
}

fn restore_fallback(fallback: &dyn FallbackBackend) -> StorageResult<bool> {
    let Some(prev) = fallback.get(Slot::Prev.key())? else {
        return Ok(false);
    };
    fallback.set(Slot::Main.key(), &prev)?;
    info!(target: "unidb::db", backend = fallback.name(), bytes = prev.len(), "Restored PREV");
    Ok(true)
}

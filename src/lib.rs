//! unidb - Schema-versioned, crash-consistent single-document store
//!
//! unidb persists one JSON document (the unified document: every facility and
//! all of its records) over two key/value backends: an async primary store and
//! a small synchronous fallback. Every load migrates the stored document to the
//! current schema version; every save passes an integrity gate and a staged
//! TMP/verify/PREV/MAIN write.
//!
//! # Quick Start
//!
//! ```ignore
//! use unidb::{Database, FacilityMeta};
//!
//! let db = Database::open("/data/unidb").await?;
//!
//! let mut doc = db.load().await?;
//! doc.add_facility(FacilityMeta::new("east", "East Wing"));
//! let outcome = db.save(doc).await?;
//!
//! // Roll back one generation, then reload
//! if db.restore_prev().await {
//!     let doc = db.load().await?;
//! }
//! ```
//!
//! # Architecture
//!
//! - `unidb-core`: document model and error types
//! - `unidb-storage`: backend traits and implementations
//! - `unidb-durability`: schema migration and write verification
//! - `unidb-engine`: commit gate and the save/load orchestrator

pub use unidb_core::{
    create_empty_document, is_quarantine_id, Attributes, CollectionKind, Error, FacilityMeta,
    FacilityStore, Integrity, LinkedRecord, Record, ResidentRef, Result, SchemaMigrationError,
    ScopedRecord, StorageError, UnifiedDocument, UnresolvedReason, ValidationError,
    CURRENT_SCHEMA_VERSION, DEFAULT_FACILITY_ID, QUARANTINE_ID_PREFIX,
};
pub use unidb_durability::{migrate, migrate_with_report, MigrationReport, Migrator};
pub use unidb_engine::{
    validate, validate_all, Database, DatabaseBuilder, ExternalChanges, MirrorOutcome,
    SaveOutcome, SavePhase, SlotSize, StoreConfig, ValidationReport, CONFIG_FILE_NAME,
};
pub use unidb_storage::{
    FallbackBackend, FileFallback, FilePrimary, KeyChange, MemoryFallback, MemoryPrimary,
    PrimaryBackend, Slot,
};

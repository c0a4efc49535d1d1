//! Core types for unidb
//!
//! This crate defines the foundational types used throughout the system:
//! - UnifiedDocument: the versioned root aggregate and its factory
//! - FacilityStore / CollectionKind: the per-facility collection bag
//! - ResidentRef, LinkedRecord, ScopedRecord: records carrying cross-references
//! - Error: error type hierarchy (migration, storage, validation)

#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod facility;
pub mod record;

pub use document::{
    create_empty_document, DocumentData, Facilities, FacilityMeta, Integrity, UnifiedDocument,
    CURRENT_SCHEMA_VERSION, DEFAULT_FACILITY_ID, DEFAULT_FACILITY_NAME, SCHEMA_NAME,
};
pub use error::{
    Error, Result, SchemaMigrationError, StorageError, StorageResult, UnresolvedReason,
    ValidationError, VerifyFailure,
};
pub use facility::{CollectionKind, FacilityStore};
pub use record::{
    is_quarantine_id, Attributes, Collection, LinkedRecord, Record, ResidentRef, ScopedRecord,
    QUARANTINE_ID_PREFIX,
};

//! Error types for unidb
//!
//! Two families reach callers:
//!
//! - [`SchemaMigrationError`]: a loaded document declares a version that cannot
//!   be upgraded. Fatal; needs operator intervention or a restore.
//! - [`StorageError`]: everything that can go wrong while reading or writing,
//!   including a rejected commit gate ([`ValidationError`]).
//!
//! Configuration problems surface as [`Error::Config`] when a store is opened.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::facility::CollectionKind;
use crate::record::ResidentRef;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for unidb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for backend and persistence operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Top-level error returned by load, save and migrate
#[derive(Debug, Error)]
pub enum Error {
    /// Loaded document cannot be brought to the current schema
    #[error(transparent)]
    Migration(#[from] SchemaMigrationError),

    /// Persistence failure or rejected write
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// True for errors that need operator intervention rather than a retry
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Migration(_))
    }

    /// The commit-gate violation behind this error, if any
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Error::Storage(StorageError::Validation(v)) => Some(v),
            _ => None,
        }
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Storage(StorageError::Validation(e))
    }
}

/// A document declares a schema version no upgrade path reaches
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Schema migration required: document version '{detected_version}' cannot be upgraded to '{current_version}'")]
pub struct SchemaMigrationError {
    /// Version tag found in the loaded document
    pub detected_version: String,
    /// Version the engine runs at
    pub current_version: &'static str,
}

/// Why a write could not be verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyFailure {
    /// The staged value could not be read back
    Unreadable,
    /// The staged value reads back as a different structure
    Mismatch,
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyFailure::Unreadable => f.write_str("staged value could not be read back"),
            VerifyFailure::Mismatch => f.write_str("staged value differs from what was written"),
        }
    }
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// The commit gate rejected the document
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Read-after-write of the staged copy failed; the committed copy is untouched
    #[error("Write could not be verified on {backend} ({reason}); the previous save is intact")]
    VerificationFailed {
        /// Backend that was written
        backend: &'static str,
        /// What went wrong
        reason: VerifyFailure,
    },

    /// Value does not fit in the backend's capacity ceiling
    #[error("Capacity exceeded on {backend}: need {needed} bytes, ceiling is {capacity}")]
    CapacityExceeded {
        /// Backend that refused the write
        backend: &'static str,
        /// Bytes the store would hold after the write
        needed: usize,
        /// Configured ceiling
        capacity: usize,
    },

    /// Backend-specific failure
    #[error("Backend {backend} failed: {message}")]
    Backend {
        /// Backend name
        backend: &'static str,
        /// Description
        message: String,
    },

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored value cannot be decoded
    #[error("Corrupt value at {key}: {message}")]
    Corrupt {
        /// Slot key holding the value
        key: String,
        /// Decoder message
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Requested backend is not configured
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Build a backend failure
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        StorageError::Backend {
            backend,
            message: message.into(),
        }
    }

    /// Build a decode failure for a slot key
    pub fn corrupt(key: impl Into<String>, message: impl fmt::Display) -> Self {
        StorageError::Corrupt {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// True if this is a commit-gate rejection
    pub fn is_validation(&self) -> bool {
        matches!(self, StorageError::Validation(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Why a resident reference does not resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// `mrn` reference with no matching resident
    MissingResident,
    /// `quarantine` reference with no matching quarantine record
    MissingQuarantine,
    /// `quarantine` reference whose id lacks the reserved prefix
    NotQuarantineId,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::MissingResident => f.write_str("no such resident"),
            UnresolvedReason::MissingQuarantine => f.write_str("no such quarantine record"),
            UnresolvedReason::NotQuarantineId => f.write_str("id lacks the quarantine prefix"),
        }
    }
}

/// Commit-gate violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A record points at a resident that does not exist
    #[error("{collection}/{record_id} in facility {facility_id} references {reference}: {reason}")]
    UnresolvedResidentRef {
        /// Facility store holding the record
        facility_id: String,
        /// Collection holding the record
        collection: CollectionKind,
        /// Record key
        record_id: String,
        /// The dangling reference
        reference: ResidentRef,
        /// Why it does not resolve
        reason: UnresolvedReason,
    },

    /// A record declares a facility other than the one storing it
    #[error("{collection}/{record_id} declares facility {declared} but is stored under {actual}")]
    CrossFacilityRecord {
        /// Collection holding the record
        collection: CollectionKind,
        /// Record key
        record_id: String,
        /// Embedded `facilityId`
        declared: String,
        /// Enclosing `facilityData` key
        actual: String,
    },

    /// A registered facility has no record store
    #[error("facility {facility_id} is registered but has no facility data")]
    MissingFacilityStore {
        /// Facility id from `facilities.byId`
        facility_id: String,
    },

    /// The document is not tagged with the schema this engine writes
    #[error("document {field} is '{found}', expected '{expected}'")]
    SchemaMismatch {
        /// `schemaName` or `schemaVersion`
        field: &'static str,
        /// Tag carried by the document
        found: String,
        /// Tag the engine writes
        expected: &'static str,
    },
}

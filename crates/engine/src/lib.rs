//! Persistence engine for unidb
//!
//! This crate orchestrates all lower layers:
//! - Database: the store object with open, load, save and restore
//! - Commit gate: integrity validation run before every write
//! - Primary/fallback backend pair with best-effort mirroring
//! - External change listener
//!
//! The engine is the only component that knows about:
//! - The MAIN/PREV/TMP save protocol
//! - When migration runs (on every load)
//! - Configuration (`unidb.toml`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod validation;
pub mod watch;

pub use database::{
    Database, DatabaseBuilder, MirrorOutcome, SaveOutcome, SavePhase, SlotSize, StoreConfig,
    CONFIG_FILE_NAME, DEFAULT_FALLBACK_CAPACITY, FALLBACK_DIR, PRIMARY_DIR,
};
pub use validation::{validate, validate_all, ValidationReport};
pub use watch::ExternalChanges;

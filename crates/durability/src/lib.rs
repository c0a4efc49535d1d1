//! Durability layer for unidb
//!
//! This crate turns bytes read from a backend back into a current document
//! and decides whether a staged write reads back intact:
//! - Codec: JSON encoding, slot decoding, read-back comparison
//! - Migration: chained schema upgrade steps ending at the current version

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod migration;

pub use codec::{compare_readback, decode_raw, encode, Readback};
pub use migration::{
    migrate, migrate_with_report, LegacyToV2, MigrationContext, MigrationReport, MigrationStep,
    Migrator, RawDocument, LEGACY_VERSION, NO_VERSION, VERSION_FIELD,
};

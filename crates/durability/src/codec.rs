//! Document encoding and read-back verification
//!
//! The persisted form of a document is its JSON serialization. A staged write
//! is verified by reading it back and comparing against the bytes written:
//!
//! - byte-identical: verified
//! - different bytes that parse to the same JSON structure: verified, treated as
//!   a benign re-encoding by something between us and the store
//! - anything else: mismatch
//!
//! The structural tolerance covers key order and whitespace only. Numbers,
//! strings and nesting must match exactly.

use serde_json::Value;
use unidb_core::{StorageError, StorageResult, UnifiedDocument};

/// Outcome of comparing a read-back value with what was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readback {
    /// Same bytes
    Identical,
    /// Different bytes, same JSON structure
    Equivalent,
    /// Different structure, or unparseable
    Mismatch,
}

impl Readback {
    /// Whether the write counts as verified
    pub fn is_verified(&self) -> bool {
        !matches!(self, Readback::Mismatch)
    }
}

/// Serialize a document to its persisted form
pub fn encode(doc: &UnifiedDocument) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(doc)?)
}

/// Parse stored bytes into a loose JSON tree
///
/// `key` names the slot the bytes came from, for error reporting.
pub fn decode_raw(key: &str, bytes: &[u8]) -> StorageResult<Value> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::corrupt(key, e))
}

/// Compare a read-back value with the bytes that were written
pub fn compare_readback(written: &[u8], read: &[u8]) -> Readback {
    if written == read {
        return Readback::Identical;
    }
    let parsed = (
        serde_json::from_slice::<Value>(written),
        serde_json::from_slice::<Value>(read),
    );
    match parsed {
        (Ok(a), Ok(b)) if a == b => Readback::Equivalent,
        _ => Readback::Mismatch,
    }
}

//! Persistence slots
//!
//! Every backend exposes the same three logical slots under stable keys:
//!
//! | Slot | Key | Holds |
//! |------|-----|-------|
//! | MAIN | `UNIFIED_DB_MAIN` | current committed document |
//! | PREV | `UNIFIED_DB_PREV` | one-generation-back snapshot |
//! | TMP  | `UNIFIED_DB_TMP`  | write-in-progress staging copy |

use std::fmt;

/// One of the three logical persistence slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Current committed document
    Main,
    /// Previous committed document
    Prev,
    /// Staging copy of an in-flight save
    Tmp,
}

impl Slot {
    /// All slots
    pub const ALL: [Slot; 3] = [Slot::Main, Slot::Prev, Slot::Tmp];

    /// Backend key of this slot
    pub const fn key(&self) -> &'static str {
        match self {
            Slot::Main => "UNIFIED_DB_MAIN",
            Slot::Prev => "UNIFIED_DB_PREV",
            Slot::Tmp => "UNIFIED_DB_TMP",
        }
    }

    /// Slot for a backend key, if it is one of ours
    pub fn from_key(key: &str) -> Option<Slot> {
        Slot::ALL.iter().copied().find(|s| s.key() == key)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

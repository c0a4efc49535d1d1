//! Key/value backends for unidb
//!
//! Provides the two backend roles the engine persists through and their
//! implementations:
//! - `PrimaryBackend`: async, high capacity (`MemoryPrimary`, `FilePrimary`)
//! - `FallbackBackend`: sync, capacity-bounded (`MemoryFallback`, `FileFallback`)
//! - `Slot`: the MAIN/PREV/TMP keys shared by all backends
//! - Change feeds for observing writes made by other handles or processes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod file;
pub mod memory;
pub mod slot;
pub mod testing;
pub mod watch;

pub use backend::{FallbackBackend, PrimaryBackend};
pub use file::{FileFallback, FilePrimary};
pub use memory::{MemoryFallback, MemoryPrimary};
pub use slot::Slot;
pub use watch::{
    ChangeFeed, ChangeHub, ChangeKind, DirWatch, KeyChange, WriterId, CHANGE_FEED_CAPACITY,
    DIR_POLL_INTERVAL, UNKNOWN_WRITER,
};

//! Database builder for caller-supplied backends
//!
//! [`Database::open`] and [`Database::ephemeral`] cover the common setups.
//! The builder composes any primary and fallback implementation, which is how
//! tests inject fault-injecting backends and how an embedder plugs in its own
//! store.

use std::sync::Arc;
use unidb_core::{Error, Result};
use unidb_storage::{FallbackBackend, PrimaryBackend};

use super::{Database, StoreConfig};

/// Builder for a [`Database`] over arbitrary backends
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use unidb_engine::Database;
/// use unidb_storage::{MemoryFallback, MemoryPrimary};
///
/// let db = Database::builder()
///     .primary(Arc::new(MemoryPrimary::new()))
///     .fallback(Arc::new(MemoryFallback::new(64 * 1024)))
///     .open()
///     .await?;
/// ```
#[derive(Default)]
pub struct DatabaseBuilder {
    primary: Option<Arc<dyn PrimaryBackend>>,
    fallback: Option<Arc<dyn FallbackBackend>>,
    config: StoreConfig,
}

impl DatabaseBuilder {
    /// Create a builder with default configuration and no backends
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the primary backend (required)
    pub fn primary(mut self, backend: Arc<dyn PrimaryBackend>) -> Self {
        self.primary = Some(backend);
        self
    }

    /// Set the fallback backend
    ///
    /// Without one, saves are not mirrored and the `_sync` methods fail
    /// with `Unavailable`.
    pub fn fallback(mut self, backend: Arc<dyn FallbackBackend>) -> Self {
        self.fallback = Some(backend);
        self
    }

    /// Replace the configuration
    ///
    /// `fallback_capacity_bytes` is ignored here; a supplied fallback carries
    /// its own ceiling.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Open the database
    ///
    /// Removes any TMP slot left by an interrupted save before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if no primary backend was set or the configuration
    /// is invalid.
    pub async fn open(self) -> Result<Arc<Database>> {
        let primary = self.primary.ok_or_else(|| {
            Error::config("DatabaseBuilder::open() requires a primary backend")
        })?;
        self.config.validate()?;

        let db = Database::from_parts(primary, self.fallback, self.config);
        db.recover_on_open().await;
        Ok(Arc::new(db))
    }
}

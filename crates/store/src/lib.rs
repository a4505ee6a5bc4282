//! Persistence backends for Kindred.
//!
//! All backends implement `kindred_core::Storage`. [`open`] picks one from
//! configuration at startup.

pub mod in_memory;
pub mod noop;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use noop::NoopStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use kindred_config::{StorageBackend, StorageConfig};
use kindred_core::Storage;
use kindred_core::error::StorageError;
use std::sync::Arc;

/// Build the configured storage backend.
pub async fn open(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
    match config.backend {
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => {
            let url = config.sqlite_url();
            if let Some(parent) = url
                .strip_prefix("sqlite://")
                .and_then(|p| std::path::Path::new(p).parent())
            {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Unavailable(format!("{}: {e}", parent.display())))?;
            }
            Ok(Arc::new(SqliteStore::new(&url).await?))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageBackend::Sqlite => Err(StorageError::Unavailable(
            "built without the sqlite feature".into(),
        )),
        StorageBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StorageBackend::None => Ok(Arc::new(NoopStore)),
    }
}

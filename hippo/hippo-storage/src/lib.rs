//! Storage backends for Hippo.
//!
//! Two interchangeable backends implement the store traits from `hippo-core`:
//!
//! - [`MemoryStorage`]: in-process maps behind a lock, for tests and ephemeral runs
//! - [`SqliteStorage`]: embedded SQLite through sqlx, the default on-disk store
//!
//! Both uphold the per-session "single active episode" rule atomically: the
//! memory backend checks and inserts under one write lock, the SQLite backend
//! relies on a partial unique index.

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use hippo_core::config::HippoConfig;
use hippo_core::error::{HippoError, Result};
use hippo_core::traits::{EpisodeStore, ExperienceStore, MessageStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Storage backend selection
#[derive(Debug, Clone, Default)]
pub enum StorageBackend {
    /// In-memory storage (not persistent)
    #[default]
    Memory,
    /// SQLite database storage with file path
    Sqlite {
        path: PathBuf,
        max_connections: u32,
    },
}

impl StorageBackend {
    /// Select the backend named in the configuration
    pub fn from_config(config: &HippoConfig) -> Result<Self> {
        match config.database.backend.as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite {
                path: config.database_path()?,
                max_connections: config.database.max_connections,
            }),
            other => Err(HippoError::config(format!(
                "Unknown database backend '{}'",
                other
            ))),
        }
    }
}

/// Handles to the three stores of one backend
#[derive(Clone)]
pub struct Stores {
    pub episodes: Arc<dyn EpisodeStore>,
    pub messages: Arc<dyn MessageStore>,
    pub experiences: Arc<dyn ExperienceStore>,
}

impl Stores {
    /// Open the selected backend
    pub async fn open(backend: &StorageBackend) -> Result<Self> {
        match backend {
            StorageBackend::Memory => {
                info!("Opening in-memory storage");
                Ok(Self::from_backend(MemoryStorage::new()))
            }
            StorageBackend::Sqlite {
                path,
                max_connections,
            } => {
                info!(path = %path.display(), "Opening SQLite storage");
                let storage = SqliteStorage::open(path, *max_connections).await?;
                Ok(Self::from_backend(storage))
            }
        }
    }

    /// Share a single backend value across the three store roles
    pub fn from_backend<S>(storage: S) -> Self
    where
        S: EpisodeStore + MessageStore + ExperienceStore + 'static,
    {
        let storage = Arc::new(storage);
        Self {
            episodes: storage.clone(),
            messages: storage.clone(),
            experiences: storage,
        }
    }
}

//! Error types for the Hippo system.

use crate::types::EpisodeStatus;

/// Result type alias for Hippo operations.
pub type Result<T> = std::result::Result<T, HippoError>;

/// Main error type for the Hippo system.
#[derive(Debug, thiserror::Error)]
pub enum HippoError {
    /// A non-global scope was requested but no identifier could be resolved
    #[error("Scope resolution error: {0}")]
    ScopeResolution(String),

    /// Not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Lifecycle call on an episode that already left the active state
    #[error("Episode {id} is already {status}")]
    AlreadyTerminal { id: String, status: EpisodeStatus },

    /// The session already owns an active episode
    #[error("Session {session_id} already has an active episode ({episode_id})")]
    ActiveEpisodeExists {
        session_id: String,
        episode_id: String,
    },

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage layer errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Wrapped anyhow errors for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HippoError {
    /// Create a new scope resolution error
    pub fn scope_resolution(msg: impl Into<String>) -> Self {
        Self::ScopeResolution(msg.into())
    }

    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a new already-terminal error
    pub fn already_terminal(id: impl Into<String>, status: EpisodeStatus) -> Self {
        Self::AlreadyTerminal {
            id: id.into(),
            status,
        }
    }

    /// Create a new active-episode conflict error
    pub fn active_episode_exists(
        session_id: impl Into<String>,
        episode_id: impl Into<String>,
    ) -> Self {
        Self::ActiveEpisodeExists {
            session_id: session_id.into(),
            episode_id: episode_id.into(),
        }
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is an already-terminal error
    pub fn is_already_terminal(&self) -> bool {
        matches!(self, Self::AlreadyTerminal { .. })
    }

    /// Check if this is a scope resolution error
    pub fn is_scope_resolution(&self) -> bool {
        matches!(self, Self::ScopeResolution(_))
    }

    /// Check if this is a persistence error
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

//! Store traits implemented by the storage backends.

use crate::error::Result;
use crate::id::HippoId;
use crate::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistence for episode records.
#[async_trait]
pub trait EpisodeStore: Send + Sync {
    /// Insert a new episode.
    ///
    /// For an active episode this is an atomic check-and-insert: it fails with
    /// `ActiveEpisodeExists` when the session already owns an active episode.
    async fn create(&self, episode: &Episode) -> Result<()>;

    /// Get an episode by ID
    async fn get(&self, id: HippoId) -> Result<Option<Episode>>;

    /// The active episode of a session, if any
    async fn get_active(&self, session_id: &str) -> Result<Option<Episode>>;

    /// Move an active episode to a terminal status.
    ///
    /// Only rows still `active` are updated. Fails with `NotFound` for an
    /// unknown id and `AlreadyTerminal` when the episode already left `active`.
    async fn set_status(
        &self,
        id: HippoId,
        status: EpisodeStatus,
        ended_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Episode>;

    /// List episodes matching every field present in the filter, by start time
    async fn list(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>>;

    /// The most recently ended episode of a session
    async fn latest_ended(&self, session_id: &str) -> Result<Option<Episode>>;
}

/// Persistence for conversation messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a message, stamping the episode association when given
    async fn insert(&self, message: &ConversationMessage, episode_id: Option<HippoId>)
    -> Result<()>;

    /// Insert a direct-path message, stamping the session's active episode in
    /// the same atomic step as the lookup. With no active episode `fallback`
    /// is stamped instead. Returns the association written.
    async fn insert_for_session(
        &self,
        message: &ConversationMessage,
        session_id: &str,
        fallback: Option<HippoId>,
    ) -> Result<Option<HippoId>>;

    /// Get a message by ID
    async fn get(&self, id: HippoId) -> Result<Option<ConversationMessage>>;

    /// Messages linked to an episode, ascending by parsed `created_at`
    async fn get_by_episode(&self, episode_id: HippoId) -> Result<Vec<ConversationMessage>>;

    /// Imported messages of a conversation with no episode association whose
    /// parsed timestamp falls inside `[start, end]`. Unparseable timestamps
    /// are excluded.
    async fn get_by_time_range(
        &self,
        conversation_id: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConversationMessage>>;

    /// Stamp the association on messages that do not have one yet.
    /// Returns the number of rows stamped.
    async fn link_to_episode(&self, message_ids: &[HippoId], episode_id: HippoId) -> Result<u64>;
}

/// Persistence for experience records.
#[async_trait]
pub trait ExperienceStore: Send + Sync {
    /// Store an experience
    async fn store(&self, experience: &Experience) -> Result<()>;

    /// Link an experience to its source episode. An experience is never
    /// re-parented: linking to a second, different episode fails.
    async fn link_to_episode(&self, experience_id: HippoId, episode_id: HippoId) -> Result<()>;

    /// Experiences whose `source_episode_id` is the given episode
    async fn get_by_episode(&self, episode_id: HippoId) -> Result<Vec<Experience>>;

    /// Experience in the same scope whose normalised title matches
    async fn find_by_title(
        &self,
        scope_type: ScopeType,
        scope_id: Option<&str>,
        title: &str,
    ) -> Result<Option<Experience>>;
}

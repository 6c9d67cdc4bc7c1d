//! Message to episode linking.
//!
//! Two mechanisms coexist. Direct linking stamps the session's active episode
//! on a message at insert time and never revisits the row. Time-range linking
//! runs after a bulk transcript import and stamps every unlinked imported
//! message whose parsed timestamp falls within
//! `[started_at, ended_at + import_grace]` of an episode.

use crate::transcript::TranscriptSource;
use chrono::Duration;
use hippo_core::config::{LinkingConfig, MAX_GRACE_SECS};
use hippo_core::error::{HippoError, Result};
use hippo_core::id::HippoId;
use hippo_core::traits::{EpisodeStore, MessageStore};
use hippo_core::types::{ConversationMessage, Episode, EpisodeFilter, MessageSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of a transcript import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    pub linked: usize,
    pub unlinked: usize,
}

/// Grace window in seconds, clamped so `ended_at + grace` cannot overflow
fn grace(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_GRACE_SECS) as i64)
}

pub struct MessageLinker {
    episodes: Arc<dyn EpisodeStore>,
    messages: Arc<dyn MessageStore>,
    import_grace: Duration,
    direct_grace: Duration,
}

impl MessageLinker {
    /// Linker with a 5 second import grace and no direct-path grace
    pub fn new(episodes: Arc<dyn EpisodeStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self::from_config(episodes, messages, &LinkingConfig::default())
    }

    pub fn from_config(
        episodes: Arc<dyn EpisodeStore>,
        messages: Arc<dyn MessageStore>,
        config: &LinkingConfig,
    ) -> Self {
        Self {
            episodes,
            messages,
            import_grace: grace(config.import_grace_secs),
            direct_grace: grace(config.direct_grace_secs),
        }
    }

    /// Record a message through the real-time path.
    ///
    /// The session's active episode, if any, is stamped on the row at insert
    /// time. With no active episode the association stays empty for good,
    /// unless a direct grace is configured and the message's own timestamp
    /// falls inside the most recently ended episode's window.
    pub async fn record(
        &self,
        session_id: &str,
        message: ConversationMessage,
    ) -> Result<ConversationMessage> {
        let mut message = message.with_source(MessageSource::Direct);

        let late = self.late_direct_episode(session_id, &message).await?;
        let episode_id = self
            .messages
            .insert_for_session(&message, session_id, late)
            .await?;
        message.episode_id = episode_id;

        debug!(
            message_id = %message.id,
            session_id,
            episode_id = ?episode_id,
            "Message recorded"
        );
        Ok(message)
    }

    async fn late_direct_episode(
        &self,
        session_id: &str,
        message: &ConversationMessage,
    ) -> Result<Option<HippoId>> {
        if self.direct_grace <= Duration::zero() {
            return Ok(None);
        }
        let (Some(instant), Some(previous)) = (
            message.instant(),
            self.episodes.latest_ended(session_id).await?,
        ) else {
            return Ok(None);
        };

        let within = previous.ended_at.is_some_and(|ended| {
            instant >= previous.started_at && instant <= ended + self.direct_grace
        });
        if within {
            debug!(episode_id = %previous.id, "Late direct message inside grace window");
        }
        Ok(within.then_some(previous.id))
    }

    /// Import a transcript and link its messages to the session's episodes
    pub async fn import_transcript(
        &self,
        session_id: &str,
        conversation_id: &str,
        source: &dyn TranscriptSource,
    ) -> Result<ImportReport> {
        let records = source.read().await?;
        let origin = MessageSource::Imported(source.name().to_string());

        for record in &records {
            let mut message =
                ConversationMessage::new(conversation_id, record.role, &record.content)
                    .with_created_at(&record.timestamp)
                    .with_source(origin.clone());
            message.metadata = record.metadata.clone();
            self.messages.insert(&message, None).await?;
        }

        let mut linked = 0;
        let episodes = self
            .episodes
            .list(&EpisodeFilter::new().session(session_id))
            .await?;
        for episode in &episodes {
            linked += self.link_episode_range(episode, conversation_id).await? as usize;
        }

        let report = ImportReport {
            imported: records.len(),
            linked,
            unlinked: records.len().saturating_sub(linked),
        };
        info!(
            session_id,
            conversation_id,
            source = source.name(),
            imported = report.imported,
            linked = report.linked,
            "Transcript imported"
        );
        Ok(report)
    }

    /// Link unlinked imported messages of a conversation to one episode by
    /// time range. The upper bound is open while the episode is active.
    pub async fn link_time_range(&self, episode_id: HippoId, conversation_id: &str) -> Result<u64> {
        let episode = self
            .episodes
            .get(episode_id)
            .await?
            .ok_or_else(|| HippoError::not_found("episode", episode_id.to_string()))?;
        self.link_episode_range(&episode, conversation_id).await
    }

    async fn link_episode_range(&self, episode: &Episode, conversation_id: &str) -> Result<u64> {
        let end = episode.ended_at.map(|ended| ended + self.import_grace);
        let candidates = self
            .messages
            .get_by_time_range(conversation_id, episode.started_at, end)
            .await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let ids: Vec<HippoId> = candidates.iter().map(|m| m.id).collect();
        let linked = self.messages.link_to_episode(&ids, episode.id).await?;
        debug!(episode_id = %episode.id, linked, "Time-range linking done");
        Ok(linked)
    }

    /// Messages linked to an episode, oldest first
    pub async fn messages_for_episode(
        &self,
        episode_id: HippoId,
    ) -> Result<Vec<ConversationMessage>> {
        self.messages.get_by_episode(episode_id).await
    }
}

//! In-memory storage backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hippo_core::error::{HippoError, Result};
use hippo_core::id::HippoId;
use hippo_core::traits::{EpisodeStore, ExperienceStore, MessageStore};
use hippo_core::types::*;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct Inner {
    episodes: HashMap<HippoId, Episode>,
    /// session id -> active episode id
    active: HashMap<String, HippoId>,
    /// insertion order is preserved
    messages: Vec<ConversationMessage>,
    experiences: Vec<Experience>,
}

/// In-memory storage (non-persistent)
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn push_message(
        &mut self,
        message: &ConversationMessage,
        episode_id: Option<HippoId>,
    ) -> Result<()> {
        if self.messages.iter().any(|m| m.id == message.id) {
            return Err(HippoError::persistence(format!(
                "message {} already exists",
                message.id
            )));
        }

        let mut stored = message.clone();
        stored.episode_id = episode_id;
        self.messages.push(stored);
        Ok(())
    }
}

#[async_trait]
impl EpisodeStore for MemoryStorage {
    async fn create(&self, episode: &Episode) -> Result<()> {
        episode.validate_scope()?;

        let mut inner = self.inner.write();
        if inner.episodes.contains_key(&episode.id) {
            return Err(HippoError::persistence(format!(
                "episode {} already exists",
                episode.id
            )));
        }

        if episode.is_active() {
            if let Some(existing) = inner.active.get(&episode.session_id) {
                return Err(HippoError::active_episode_exists(
                    &episode.session_id,
                    existing.to_string(),
                ));
            }
            inner.active.insert(episode.session_id.clone(), episode.id);
        }

        inner.episodes.insert(episode.id, episode.clone());
        Ok(())
    }

    async fn get(&self, id: HippoId) -> Result<Option<Episode>> {
        Ok(self.inner.read().episodes.get(&id).cloned())
    }

    async fn get_active(&self, session_id: &str) -> Result<Option<Episode>> {
        let inner = self.inner.read();
        Ok(inner
            .active
            .get(session_id)
            .and_then(|id| inner.episodes.get(id))
            .cloned())
    }

    async fn set_status(
        &self,
        id: HippoId,
        status: EpisodeStatus,
        ended_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Episode> {
        let mut inner = self.inner.write();
        let episode = inner
            .episodes
            .get_mut(&id)
            .ok_or_else(|| HippoError::not_found("episode", id.to_string()))?;

        if episode.status.is_terminal() {
            return Err(HippoError::already_terminal(id.to_string(), episode.status));
        }

        episode.status = status;
        episode.ended_at = Some(ended_at);
        episode.failure_reason = reason;
        let updated = episode.clone();

        if status.is_terminal() {
            inner.active.remove(&updated.session_id);
        }

        debug!(episode_id = %id, status = %status, "Episode status updated");
        Ok(updated)
    }

    async fn list(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>> {
        let inner = self.inner.read();
        let mut episodes: Vec<Episode> = inner
            .episodes
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        episodes.sort_by_key(|e| e.started_at);
        Ok(episodes)
    }

    async fn latest_ended(&self, session_id: &str) -> Result<Option<Episode>> {
        let inner = self.inner.read();
        Ok(inner
            .episodes
            .values()
            .filter(|e| e.session_id == session_id && e.ended_at.is_some())
            .max_by_key(|e| e.ended_at)
            .cloned())
    }
}

#[async_trait]
impl MessageStore for MemoryStorage {
    async fn insert(
        &self,
        message: &ConversationMessage,
        episode_id: Option<HippoId>,
    ) -> Result<()> {
        self.inner.write().push_message(message, episode_id)
    }

    async fn insert_for_session(
        &self,
        message: &ConversationMessage,
        session_id: &str,
        fallback: Option<HippoId>,
    ) -> Result<Option<HippoId>> {
        // lookup and push share one write lock, so a concurrent set_status
        // lands either before or after both
        let mut inner = self.inner.write();
        let episode_id = inner.active.get(session_id).copied().or(fallback);
        inner.push_message(message, episode_id)?;
        Ok(episode_id)
    }

    async fn get(&self, id: HippoId) -> Result<Option<ConversationMessage>> {
        let inner = self.inner.read();
        Ok(inner.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn get_by_episode(&self, episode_id: HippoId) -> Result<Vec<ConversationMessage>> {
        let mut messages: Vec<ConversationMessage> = self
            .inner
            .read()
            .messages
            .iter()
            .filter(|m| m.episode_id == Some(episode_id))
            .cloned()
            .collect();
        sort_by_instant(&mut messages);
        Ok(messages)
    }

    async fn get_by_time_range(
        &self,
        conversation_id: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConversationMessage>> {
        let mut messages: Vec<ConversationMessage> = self
            .inner
            .read()
            .messages
            .iter()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && m.episode_id.is_none()
                    && m.source.is_imported()
            })
            .filter(|m| match m.instant() {
                Some(t) => t >= start && end.map_or(true, |end| t <= end),
                None => false,
            })
            .cloned()
            .collect();
        sort_by_instant(&mut messages);
        Ok(messages)
    }

    async fn link_to_episode(&self, message_ids: &[HippoId], episode_id: HippoId) -> Result<u64> {
        let mut inner = self.inner.write();
        let mut linked = 0;
        for message in inner.messages.iter_mut() {
            if message.episode_id.is_none() && message_ids.contains(&message.id) {
                message.episode_id = Some(episode_id);
                linked += 1;
            }
        }
        Ok(linked)
    }
}

#[async_trait]
impl ExperienceStore for MemoryStorage {
    async fn store(&self, experience: &Experience) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.experiences.iter().any(|e| e.id == experience.id) {
            return Err(HippoError::persistence(format!(
                "experience {} already exists",
                experience.id
            )));
        }
        inner.experiences.push(experience.clone());
        Ok(())
    }

    async fn link_to_episode(&self, experience_id: HippoId, episode_id: HippoId) -> Result<()> {
        let mut inner = self.inner.write();
        let experience = inner
            .experiences
            .iter_mut()
            .find(|e| e.id == experience_id)
            .ok_or_else(|| HippoError::not_found("experience", experience_id.to_string()))?;

        match experience.source_episode_id {
            Some(existing) if existing != episode_id => Err(HippoError::invalid_input(format!(
                "experience {} is already linked to episode {}",
                experience_id, existing
            ))),
            _ => {
                experience.source_episode_id = Some(episode_id);
                Ok(())
            }
        }
    }

    async fn get_by_episode(&self, episode_id: HippoId) -> Result<Vec<Experience>> {
        let mut experiences: Vec<Experience> = self
            .inner
            .read()
            .experiences
            .iter()
            .filter(|e| e.source_episode_id == Some(episode_id))
            .cloned()
            .collect();
        experiences.sort_by_key(|e| e.created_at);
        Ok(experiences)
    }

    async fn find_by_title(
        &self,
        scope_type: ScopeType,
        scope_id: Option<&str>,
        title: &str,
    ) -> Result<Option<Experience>> {
        let wanted = normalize_title(title);
        Ok(self
            .inner
            .read()
            .experiences
            .iter()
            .find(|e| {
                e.scope_type == scope_type
                    && e.scope_id.as_deref() == scope_id
                    && e.normalized_title() == wanted
            })
            .cloned())
    }
}

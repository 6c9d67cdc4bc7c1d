//! Deterministic fallback experience.

use crate::capture::{FallbackReason, project_of};
use hippo_core::error::Result;
use hippo_core::traits::ExperienceStore;
use hippo_core::types::{Episode, Experience, ExperienceSource};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

const FALLBACK_SCENARIO: &str = "Episode activity recorded without structured extraction";

/// Writes the single generic experience of an episode whose extraction
/// produced nothing. Fields derive from the episode alone.
pub struct FallbackRecorder {
    experiences: Arc<dyn ExperienceStore>,
    agent_id: Option<String>,
}

impl FallbackRecorder {
    pub fn new(experiences: Arc<dyn ExperienceStore>) -> Self {
        Self {
            experiences,
            agent_id: None,
        }
    }

    pub fn with_agent_id(mut self, agent_id: Option<String>) -> Self {
        self.agent_id = agent_id;
        self
    }

    /// Build the fallback record without persisting it
    pub fn build(episode: &Episode, message_count: usize, reason: FallbackReason) -> Experience {
        let name = episode.name.trim();
        let title = if name.is_empty() {
            format!("Episode {}", episode.id)
        } else {
            format!("Episode: {}", name)
        };

        let mut experience = Experience::new(
            title,
            FALLBACK_SCENARIO,
            format!("Episode {}", episode.status),
            ExperienceSource::Fallback {
                reason: reason.to_string(),
            },
        );
        experience.trajectory = Some(json!({ "message_count": message_count }));
        experience.scope_type = episode.scope_type;
        experience.scope_id = episode.scope_id.clone();
        experience.project_id = project_of(episode);
        experience.session_id = Some(episode.session_id.clone());
        experience
    }

    /// Persist the fallback record and link it to the episode
    pub async fn record(
        &self,
        episode: &Episode,
        message_count: usize,
        reason: FallbackReason,
    ) -> Result<Experience> {
        let mut experience = Self::build(episode, message_count, reason);
        experience.agent_id = self.agent_id.clone();

        self.experiences.store(&experience).await?;
        self.experiences
            .link_to_episode(experience.id, episode.id)
            .await?;
        experience.source_episode_id = Some(episode.id);

        info!(
            episode_id = %episode.id,
            experience_id = %experience.id,
            reason = %reason,
            "Fallback experience recorded"
        );
        Ok(experience)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippo_core::types::{EpisodeStatus, ScopeType};
    use hippo_storage::MemoryStorage;

    #[test]
    fn test_build_is_deterministic() {
        let mut episode = Episode::new("s1", ScopeType::Project, Some("p1".into()), "Fix login");
        episode.status = EpisodeStatus::Completed;

        let a = FallbackRecorder::build(&episode, 1, FallbackReason::TooFewMessages);
        let b = FallbackRecorder::build(&episode, 1, FallbackReason::TooFewMessages);
        assert_eq!(a.title, "Episode: Fix login");
        assert_eq!(a.title, b.title);
        assert_eq!(a.scenario, b.scenario);
        assert_eq!(a.outcome, "Episode completed");
        assert_eq!(a.confidence, None);
        assert_eq!(a.project_id.as_deref(), Some("p1"));
        assert_eq!(a.trajectory, Some(json!({ "message_count": 1 })));
        assert!(a.provenance.is_fallback());
    }

    #[test]
    fn test_unnamed_episode_uses_id() {
        let episode = Episode::new("s1", ScopeType::Global, None, "  ");
        let experience = FallbackRecorder::build(&episode, 0, FallbackReason::NoExperiences);
        assert_eq!(experience.title, format!("Episode {}", episode.id));
    }

    #[tokio::test]
    async fn test_record_links_to_episode() {
        let storage = Arc::new(MemoryStorage::new());
        let recorder = FallbackRecorder::new(storage.clone()).with_agent_id(Some("agent-7".into()));
        let episode = Episode::new("s1", ScopeType::Session, Some("s1".into()), "work");

        let experience = recorder
            .record(&episode, 3, FallbackReason::Timeout)
            .await
            .unwrap();
        assert_eq!(experience.source_episode_id, Some(episode.id));

        let stored = ExperienceStore::get_by_episode(storage.as_ref(), episode.id)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].agent_id.as_deref(), Some("agent-7"));
        assert_eq!(
            stored[0].provenance,
            ExperienceSource::Fallback {
                reason: "timeout".into()
            }
        );
    }
}

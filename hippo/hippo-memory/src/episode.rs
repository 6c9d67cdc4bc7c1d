//! Episode lifecycle and scope resolution.

use crate::capture::{CapturePipeline, CaptureReport};
use chrono::Utc;
use hippo_core::error::{HippoError, Result};
use hippo_core::id::HippoId;
use hippo_core::traits::EpisodeStore;
use hippo_core::types::{Episode, EpisodeFilter, EpisodeStatus, ScopeType};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Caller-supplied scope for a new episode.
///
/// Both fields are optional. With no `scope_type` the episode is filed under
/// the session itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeHint {
    pub scope_type: Option<ScopeType>,
    pub scope_id: Option<String>,
}

impl ScopeHint {
    pub fn session() -> Self {
        Self {
            scope_type: Some(ScopeType::Session),
            scope_id: None,
        }
    }

    /// Project scope; the id comes from the [`ScopeContext`] when not given
    pub fn project(project_id: Option<String>) -> Self {
        Self {
            scope_type: Some(ScopeType::Project),
            scope_id: project_id,
        }
    }

    pub fn global() -> Self {
        Self {
            scope_type: Some(ScopeType::Global),
            scope_id: None,
        }
    }
}

/// Source of context identifiers used to resolve non-session scopes
pub trait ScopeContext: Send + Sync {
    /// The project a session is currently working in
    fn active_project(&self, session_id: &str) -> Option<String>;
}

/// In-process scope context: a default project plus per-session overrides
#[derive(Debug, Default)]
pub struct StaticScopeContext {
    default_project: Option<String>,
    sessions: RwLock<HashMap<String, String>>,
}

impl StaticScopeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_project(project_id: impl Into<String>) -> Self {
        Self {
            default_project: Some(project_id.into()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_project(&self, session_id: impl Into<String>, project_id: impl Into<String>) {
        self.sessions
            .write()
            .insert(session_id.into(), project_id.into());
    }
}

impl ScopeContext for StaticScopeContext {
    fn active_project(&self, session_id: &str) -> Option<String> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .or_else(|| self.default_project.clone())
    }
}

/// Owns the episode state machine and the per-session active episode rule.
pub struct EpisodeManager {
    store: Arc<dyn EpisodeStore>,
    capture: Arc<CapturePipeline>,
    scope_context: Arc<dyn ScopeContext>,
}

impl EpisodeManager {
    pub fn new(store: Arc<dyn EpisodeStore>, capture: Arc<CapturePipeline>) -> Self {
        Self {
            store,
            capture,
            scope_context: Arc::new(StaticScopeContext::new()),
        }
    }

    pub fn with_scope_context(mut self, scope_context: Arc<dyn ScopeContext>) -> Self {
        self.scope_context = scope_context;
        self
    }

    /// Resolve the stored scope fields for a new episode
    pub fn resolve_scope(
        &self,
        session_id: &str,
        hint: &ScopeHint,
    ) -> Result<(ScopeType, Option<String>)> {
        let explicit_id = hint
            .scope_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        match hint.scope_type {
            None | Some(ScopeType::Session) => Ok((
                ScopeType::Session,
                Some(explicit_id.unwrap_or_else(|| session_id.to_string())),
            )),
            Some(ScopeType::Project) => explicit_id
                .or_else(|| self.scope_context.active_project(session_id))
                .filter(|id| !id.is_empty())
                .map(|id| (ScopeType::Project, Some(id)))
                .ok_or_else(|| {
                    HippoError::scope_resolution(format!(
                        "no project id could be resolved for session {}",
                        session_id
                    ))
                }),
            Some(ScopeType::Global) => Ok((ScopeType::Global, None)),
        }
    }

    /// Start a new active episode for a session.
    ///
    /// Fails with `ActiveEpisodeExists` if the session already has one.
    pub async fn begin(
        &self,
        session_id: &str,
        hint: ScopeHint,
        name: impl Into<String>,
    ) -> Result<Episode> {
        if session_id.trim().is_empty() {
            return Err(HippoError::invalid_input("session id must not be empty"));
        }

        let (scope_type, scope_id) = self.resolve_scope(session_id, &hint)?;
        let episode = Episode::new(session_id, scope_type, scope_id, name);
        self.store.create(&episode).await?;

        info!(
            episode_id = %episode.id,
            session_id = %episode.session_id,
            scope_type = %episode.scope_type,
            "Episode started"
        );
        Ok(episode)
    }

    /// Complete an episode and capture its experiences
    pub async fn complete(&self, episode_id: HippoId) -> Result<Episode> {
        let (episode, _) = self.complete_with_report(episode_id).await?;
        Ok(episode)
    }

    /// Complete an episode, returning the capture outcome as well.
    ///
    /// Extraction faults never fail this call; only persistence errors do.
    pub async fn complete_with_report(
        &self,
        episode_id: HippoId,
    ) -> Result<(Episode, CaptureReport)> {
        let episode = self
            .transition(episode_id, EpisodeStatus::Completed, None)
            .await?;
        let report = self.capture.capture(&episode).await?;

        info!(
            episode_id = %episode.id,
            experiences = report.experiences.len(),
            fallback = ?report.fallback,
            "Episode completed"
        );
        Ok((episode, report))
    }

    /// Mark an episode as failed. No experiences are captured.
    pub async fn fail(&self, episode_id: HippoId, reason: impl Into<String>) -> Result<Episode> {
        let episode = self
            .transition(episode_id, EpisodeStatus::Failed, Some(reason.into()))
            .await?;
        info!(episode_id = %episode.id, reason = ?episode.failure_reason, "Episode failed");
        Ok(episode)
    }

    /// Cancel an episode. No experiences are captured.
    pub async fn cancel(&self, episode_id: HippoId) -> Result<Episode> {
        let episode = self
            .transition(episode_id, EpisodeStatus::Cancelled, None)
            .await?;
        info!(episode_id = %episode.id, "Episode cancelled");
        Ok(episode)
    }

    pub async fn get(&self, episode_id: HippoId) -> Result<Option<Episode>> {
        self.store.get(episode_id).await
    }

    pub async fn get_active(&self, session_id: &str) -> Result<Option<Episode>> {
        debug!(session_id, "Looking up active episode");
        self.store.get_active(session_id).await
    }

    pub async fn list(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>> {
        self.store.list(filter).await
    }

    async fn transition(
        &self,
        episode_id: HippoId,
        status: EpisodeStatus,
        reason: Option<String>,
    ) -> Result<Episode> {
        self.store
            .set_status(episode_id, status, Utc::now(), reason)
            .await
    }
}

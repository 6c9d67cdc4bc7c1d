//! Capture pipeline: turns a completed episode into experiences.

use crate::extraction::{CandidateExperience, ExtractionError, ExtractionProvider};
use crate::fallback::FallbackRecorder;
use crate::linker::MessageLinker;
use crate::scoring::ScoringTrigger;
use chrono::{DateTime, Utc};
use hippo_core::config::{CaptureConfig, MIN_EXTRACTION_MESSAGES};
use hippo_core::error::Result;
use hippo_core::id::HippoId;
use hippo_core::traits::ExperienceStore;
use hippo_core::types::{
    ConversationMessage, Episode, Experience, ExperienceSource, Role, ScopeType, normalize_title,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One message of the extraction input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

/// Ordered extraction input built from an episode's messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnData {
    pub turns: Vec<Turn>,
}

impl TurnData {
    pub fn from_messages(messages: &[ConversationMessage]) -> Self {
        Self {
            turns: messages
                .iter()
                .map(|m| Turn {
                    role: m.role,
                    content: m.content.clone(),
                    timestamp: m.created_at.clone(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Aggregate figures over an episode's messages.
///
/// Telemetry the upstream source did not provide is reported as zero or
/// empty; every field is always present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    pub turn_count: usize,
    pub user_turn_count: usize,
    pub assistant_turn_count: usize,
    pub total_tokens: u64,
    pub tool_call_count: usize,
    pub unique_tools_used: BTreeSet<String>,
    pub error_count: usize,
    pub start_time: DateTime<Utc>,
    pub last_turn_time: DateTime<Utc>,
}

impl TurnMetrics {
    /// Derive metrics; times fall back to the episode start when no message
    /// timestamp parses.
    pub fn from_messages(messages: &[ConversationMessage], episode: &Episode) -> Self {
        let mut metrics = Self {
            turn_count: messages.len(),
            start_time: episode.started_at,
            last_turn_time: episode.started_at,
            ..Default::default()
        };

        let instants: Vec<DateTime<Utc>> = messages.iter().filter_map(|m| m.instant()).collect();
        if let (Some(first), Some(last)) = (instants.iter().min(), instants.iter().max()) {
            metrics.start_time = *first;
            metrics.last_turn_time = *last;
        }

        for message in messages {
            match message.role {
                Role::User => metrics.user_turn_count += 1,
                Role::Assistant => metrics.assistant_turn_count += 1,
                Role::System => {}
            }
            if let Some(meta) = &message.metadata {
                metrics.total_tokens += meta.tokens.unwrap_or(0);
                metrics.tool_call_count += meta.tool_calls.len();
                metrics
                    .unique_tools_used
                    .extend(meta.tool_calls.iter().cloned());
                if meta.is_error {
                    metrics.error_count += 1;
                }
            }
        }

        metrics
    }
}

/// Per-call extraction settings handed to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureOptions {
    pub scope_type: ScopeType,
    pub scope_id: Option<String>,
    pub project_id: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub auto_store: bool,
    pub confidence_threshold: f64,
    pub skip_duplicates: bool,
    /// Lets returned experiences be attributed to the episode
    pub episode_id: Option<HippoId>,
    pub focus_areas: Vec<String>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            scope_type: ScopeType::Session,
            scope_id: None,
            project_id: None,
            session_id: None,
            agent_id: None,
            auto_store: true,
            confidence_threshold: 0.7,
            skip_duplicates: true,
            episode_id: None,
            focus_areas: Vec::new(),
        }
    }
}

impl CaptureOptions {
    pub fn for_episode(episode: &Episode, policy: &CaptureConfig) -> Self {
        Self {
            scope_type: episode.scope_type,
            scope_id: episode.scope_id.clone(),
            project_id: project_of(episode),
            session_id: Some(episode.session_id.clone()),
            agent_id: policy.agent_id.clone(),
            auto_store: policy.auto_store,
            confidence_threshold: policy.confidence_threshold,
            skip_duplicates: policy.skip_duplicates,
            episode_id: Some(episode.id),
            focus_areas: policy.focus_areas.clone(),
        }
    }
}

pub(crate) fn project_of(episode: &Episode) -> Option<String> {
    match episode.scope_type {
        ScopeType::Project => episode.scope_id.clone(),
        _ => None,
    }
}

/// Why an episode ended up with a fallback record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    TooFewMessages,
    NoExperiences,
    Unavailable,
    Timeout,
    Malformed,
    ProviderFault,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooFewMessages => "too_few_messages",
            Self::NoExperiences => "no_experiences",
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::Malformed => "malformed",
            Self::ProviderFault => "provider_fault",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ExtractionError> for FallbackReason {
    fn from(error: &ExtractionError) -> Self {
        match error {
            ExtractionError::Unavailable => Self::Unavailable,
            ExtractionError::Timeout(_) => Self::Timeout,
            ExtractionError::MalformedResponse(_) => Self::Malformed,
            ExtractionError::Provider(_) => Self::ProviderFault,
        }
    }
}

/// What one capture produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureReport {
    /// Persisted experiences, each linked to the episode
    pub experiences: Vec<Experience>,
    pub skipped_low_confidence: usize,
    pub skipped_duplicates: usize,
    pub fallback: Option<FallbackReason>,
    pub processing_time_ms: u64,
}

impl CaptureReport {
    pub fn used_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs on episode completion: extraction, policy, persistence, fallback.
pub struct CapturePipeline {
    linker: Arc<MessageLinker>,
    provider: Arc<dyn ExtractionProvider>,
    experiences: Arc<dyn ExperienceStore>,
    fallback: FallbackRecorder,
    scoring: Option<ScoringTrigger>,
    policy: CaptureConfig,
    timeout: Duration,
}

impl CapturePipeline {
    pub fn new(
        linker: Arc<MessageLinker>,
        provider: Arc<dyn ExtractionProvider>,
        experiences: Arc<dyn ExperienceStore>,
        policy: CaptureConfig,
    ) -> Self {
        let fallback =
            FallbackRecorder::new(experiences.clone()).with_agent_id(policy.agent_id.clone());
        Self {
            linker,
            provider,
            experiences,
            fallback,
            scoring: None,
            policy,
            timeout: DEFAULT_EXTRACTION_TIMEOUT,
        }
    }

    /// Upper bound on one provider call, cascade included
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringTrigger) -> Self {
        self.scoring = Some(scoring);
        self
    }

    /// Capture experiences for a completed episode.
    ///
    /// Always yields at least one persisted experience. Extraction faults are
    /// logged and answered with a fallback record; persistence errors are
    /// returned.
    pub async fn capture(&self, episode: &Episode) -> Result<CaptureReport> {
        let started = Instant::now();
        let messages = self.linker.messages_for_episode(episode.id).await?;
        let mut report = CaptureReport::default();

        let min_messages = self.policy.min_messages.max(MIN_EXTRACTION_MESSAGES);
        let fallback_reason = if messages.len() < min_messages {
            debug!(
                episode_id = %episode.id,
                messages = messages.len(),
                "Too few messages for extraction"
            );
            Some(FallbackReason::TooFewMessages)
        } else {
            self.extract(episode, &messages, &mut report).await?
        };

        if let Some(reason) = fallback_reason {
            let experience = self.fallback.record(episode, messages.len(), reason).await?;
            report.experiences.push(experience);
            report.fallback = Some(reason);
        }

        report.processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            episode_id = %episode.id,
            experiences = report.experiences.len(),
            skipped_low_confidence = report.skipped_low_confidence,
            skipped_duplicates = report.skipped_duplicates,
            fallback = ?report.fallback,
            "Capture finished"
        );

        if let Some(scoring) = &self.scoring {
            scoring.fire(episode.clone(), messages, report.experiences.clone());
        }

        Ok(report)
    }

    /// Run the provider and persist accepted candidates. Returns the fallback
    /// reason when nothing was accepted.
    async fn extract(
        &self,
        episode: &Episode,
        messages: &[ConversationMessage],
        report: &mut CaptureReport,
    ) -> Result<Option<FallbackReason>> {
        let turns = TurnData::from_messages(messages);
        let metrics = TurnMetrics::from_messages(messages, episode);
        let options = CaptureOptions::for_episode(episode, &self.policy);

        let call = self.provider.capture(&turns, &metrics, &options);
        let outcome = tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(ExtractionError::Timeout(self.timeout)));
        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                warn!(
                    episode_id = %episode.id,
                    error = %e,
                    "Extraction failed, recording fallback"
                );
                return Ok(Some(FallbackReason::from(&e)));
            }
        };

        report.skipped_duplicates += output.skipped_duplicates;
        let mut seen = HashSet::new();

        for candidate in output.experiences {
            if !(candidate.confidence >= options.confidence_threshold) {
                report.skipped_low_confidence += 1;
                continue;
            }

            if options.skip_duplicates {
                let key = normalize_title(&candidate.title);
                let known = seen.contains(&key)
                    || self
                        .experiences
                        .find_by_title(
                            episode.scope_type,
                            episode.scope_id.as_deref(),
                            &candidate.title,
                        )
                        .await?
                        .is_some();
                if known {
                    debug!(title = %candidate.title, "Skipping duplicate experience");
                    report.skipped_duplicates += 1;
                    continue;
                }
                seen.insert(key);
            }

            let mut experience = self.to_experience(candidate, episode, &options, &output.provider);
            self.experiences.store(&experience).await?;
            self.experiences
                .link_to_episode(experience.id, episode.id)
                .await?;
            experience.source_episode_id = Some(episode.id);
            report.experiences.push(experience);
        }

        if report.experiences.is_empty() {
            Ok(Some(FallbackReason::NoExperiences))
        } else {
            Ok(None)
        }
    }

    fn to_experience(
        &self,
        candidate: CandidateExperience,
        episode: &Episode,
        options: &CaptureOptions,
        provider: &str,
    ) -> Experience {
        let mut experience = Experience::new(
            candidate.title,
            candidate.scenario,
            candidate.outcome,
            ExperienceSource::Extraction {
                provider: provider.to_string(),
            },
        );
        experience.confidence = Some(candidate.confidence);
        experience.trajectory = candidate.trajectory;
        experience.scope_type = episode.scope_type;
        experience.scope_id = episode.scope_id.clone();
        experience.project_id = options.project_id.clone();
        experience.session_id = options.session_id.clone();
        experience.agent_id = options.agent_id.clone();
        experience
    }
}

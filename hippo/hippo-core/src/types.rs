//! Domain types: episodes, conversation messages and experiences.

use crate::error::{HippoError, Result};
use crate::id::HippoId;
use crate::time::{format_instant, parse_instant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Episodes
// ============================================================================

/// Attribution level under which an episode or experience is filed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Session,
    Project,
    Global,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Project => "project",
            Self::Global => "global",
        }
    }
}

impl FromStr for ScopeType {
    type Err = HippoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "project" => Ok(Self::Project),
            "global" => Ok(Self::Global),
            other => Err(HippoError::invalid_input(format!(
                "Invalid scope type '{}'. Must be one of: session, project, global",
                other
            ))),
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an episode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl EpisodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled admit no further transition
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl FromStr for EpisodeStatus {
    type Err = HippoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(HippoError::invalid_input(format!(
                "Unknown episode status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bounded span of session activity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Episode {
    pub id: HippoId,
    pub session_id: String,
    pub scope_type: ScopeType,
    /// Always populated unless `scope_type` is global
    pub scope_id: Option<String>,
    pub name: String,
    pub status: EpisodeStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Episode {
    /// Create a new active episode starting now
    pub fn new(
        session_id: impl Into<String>,
        scope_type: ScopeType,
        scope_id: Option<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: HippoId::new(),
            session_id: session_id.into(),
            scope_type,
            scope_id,
            name: name.into(),
            status: EpisodeStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            failure_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == EpisodeStatus::Active
    }

    /// Check the scope invariant before persisting
    pub fn validate_scope(&self) -> Result<()> {
        if self.scope_type != ScopeType::Global
            && self.scope_id.as_deref().map_or(true, str::is_empty)
        {
            return Err(HippoError::scope_resolution(format!(
                "episode {} has scope '{}' without a scope id",
                self.id, self.scope_type
            )));
        }
        Ok(())
    }
}

/// Filter for episode listing; all present fields must match
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EpisodeFilter {
    pub scope_type: Option<ScopeType>,
    pub scope_id: Option<String>,
    pub session_id: Option<String>,
}

impl EpisodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(mut self, scope_type: ScopeType, scope_id: impl Into<String>) -> Self {
        self.scope_type = Some(scope_type);
        self.scope_id = Some(scope_id.into());
        self
    }

    pub fn scope_type(mut self, scope_type: ScopeType) -> Self {
        self.scope_type = Some(scope_type);
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn matches(&self, episode: &Episode) -> bool {
        self.scope_type.map_or(true, |t| episode.scope_type == t)
            && self
                .scope_id
                .as_deref()
                .map_or(true, |id| episode.scope_id.as_deref() == Some(id))
            && self
                .session_id
                .as_deref()
                .map_or(true, |sid| episode.session_id == sid)
    }
}

// ============================================================================
// Conversation messages
// ============================================================================

/// Author role of a conversation message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl FromStr for Role {
    type Err = HippoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "user" | "human" => Ok(Self::User),
            "assistant" | "ai" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(HippoError::invalid_input(format!("Unknown role '{}'", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a message entered the system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum MessageSource {
    /// Recorded in real time through the direct linking path
    Direct,
    /// Bulk-imported from an external transcript source
    Imported(String),
}

impl MessageSource {
    /// Column representation: `direct` or `imported:<name>`
    pub fn to_db_string(&self) -> String {
        match self {
            Self::Direct => "direct".to_string(),
            Self::Imported(name) => format!("imported:{}", name),
        }
    }

    pub fn from_db_string(s: &str) -> Self {
        match s.strip_prefix("imported:") {
            Some(name) => Self::Imported(name.to_string()),
            None => Self::Direct,
        }
    }

    pub fn is_imported(&self) -> bool {
        matches!(self, Self::Imported(_))
    }
}

/// Telemetry attached by the upstream source, when it has any
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessageMetadata {
    pub tokens: Option<u64>,
    pub tool_calls: Vec<String>,
    pub is_error: bool,
}

/// A persisted conversation message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub id: HippoId,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    /// Raw timestamp as received; compared only through [`parse_instant`]
    pub created_at: String,
    /// Set at most once, never overwritten
    pub episode_id: Option<HippoId>,
    pub source: MessageSource,
    pub metadata: Option<MessageMetadata>,
}

impl ConversationMessage {
    /// Create a direct message timestamped now
    pub fn new(conversation_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: HippoId::new(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            created_at: format_instant(&Utc::now()),
            episode_id: None,
            source: MessageSource::Direct,
            metadata: None,
        }
    }

    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = created_at.into();
        self
    }

    pub fn with_source(mut self, source: MessageSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Absolute instant of `created_at`, if it parses
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        parse_instant(&self.created_at)
    }
}

/// Sort messages ascending by parsed timestamp; unparseable ones keep their
/// relative order at the end.
pub fn sort_by_instant(messages: &mut [ConversationMessage]) {
    messages.sort_by_key(|m| match m.instant() {
        Some(t) => (0u8, Some(t)),
        None => (1u8, None),
    });
}

// ============================================================================
// Experiences
// ============================================================================

/// Provenance of an experience record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExperienceSource {
    Extraction { provider: String },
    Fallback { reason: String },
}

impl ExperienceSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// A structured, reusable record of what happened during an episode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experience {
    pub id: HippoId,
    pub title: String,
    pub scenario: String,
    pub outcome: String,
    /// 0..=1 for extracted experiences, absent for fallback records
    pub confidence: Option<f64>,
    pub trajectory: Option<serde_json::Value>,
    pub source_episode_id: Option<HippoId>,
    pub scope_type: ScopeType,
    pub scope_id: Option<String>,
    pub project_id: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub provenance: ExperienceSource,
    pub created_at: DateTime<Utc>,
}

impl Experience {
    pub fn new(
        title: impl Into<String>,
        scenario: impl Into<String>,
        outcome: impl Into<String>,
        provenance: ExperienceSource,
    ) -> Self {
        Self {
            id: HippoId::new(),
            title: title.into(),
            scenario: scenario.into(),
            outcome: outcome.into(),
            confidence: None,
            trajectory: None,
            source_episode_id: None,
            scope_type: ScopeType::Global,
            scope_id: None,
            project_id: None,
            session_id: None,
            agent_id: None,
            provenance,
            created_at: Utc::now(),
        }
    }

    pub fn normalized_title(&self) -> String {
        normalize_title(&self.title)
    }
}

/// Lowercase and collapse whitespace; the key used for duplicate detection
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

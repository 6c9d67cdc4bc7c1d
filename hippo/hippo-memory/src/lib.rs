//! Episodic memory for Hippo.
//!
//! This crate groups session activity into episodes and turns each finished
//! episode into experience records:
//!
//! - [`EpisodeManager`]: lifecycle state machine and scope resolution
//! - [`MessageLinker`]: direct real-time linking and retroactive time-range
//!   linking of imported transcripts
//! - [`CapturePipeline`]: extraction through the provider cascade, confidence
//!   and duplicate policy, and the deterministic [`FallbackRecorder`]
//! - [`ScoringTrigger`]: fire-and-forget relevance scoring after capture
//!
//! [`EpisodicMemory`] wires everything from a [`HippoConfig`](hippo_core::HippoConfig).
//!
//! # Example
//!
//! ```no_run
//! use hippo_core::HippoConfig;
//! use hippo_memory::{EpisodicMemory, ScopeHint};
//!
//! # async fn example() -> hippo_core::Result<()> {
//! let memory = EpisodicMemory::from_config(&HippoConfig::default()).await?;
//! let episode = memory
//!     .episodes()
//!     .begin("session-1", ScopeHint::default(), "fix the flaky test")
//!     .await?;
//! // ... record messages through memory.linker() ...
//! let (episode, report) = memory.episodes().complete_with_report(episode.id).await?;
//! println!("{} -> {} experiences", episode.id, report.experiences.len());
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod episode;
pub mod extraction;
pub mod facade;
pub mod fallback;
pub mod linker;
pub mod scoring;
pub mod transcript;

pub use capture::{
    CaptureOptions, CapturePipeline, CaptureReport, FallbackReason, TurnData, TurnMetrics,
};
pub use episode::{EpisodeManager, ScopeContext, ScopeHint, StaticScopeContext};
pub use extraction::{
    CandidateExperience, ExtractionError, ExtractionOutput, ExtractionProvider,
    HttpExtractionProvider, ProviderCascade,
};
pub use facade::{EpisodicMemory, EpisodicMemoryBuilder};
pub use fallback::FallbackRecorder;
pub use linker::{ImportReport, MessageLinker};
pub use scoring::{MaintenanceHook, NoopScorer, RelevanceScorer, ScoringTrigger};
pub use transcript::{JsonlTranscript, TranscriptRecord, TranscriptSource};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::capture::{CapturePipeline, CaptureReport, FallbackReason};
    pub use crate::episode::{EpisodeManager, ScopeHint};
    pub use crate::extraction::{ExtractionError, ExtractionProvider, ProviderCascade};
    pub use crate::facade::EpisodicMemory;
    pub use crate::linker::{ImportReport, MessageLinker};
    pub use crate::scoring::{RelevanceScorer, ScoringTrigger};
    pub use crate::transcript::{JsonlTranscript, TranscriptRecord, TranscriptSource};
    pub use hippo_core::prelude::*;
}

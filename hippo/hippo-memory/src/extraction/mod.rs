//! Experience extraction providers.
//!
//! An [`ExtractionProvider`] turns a transcript and its metrics into candidate
//! experiences. Providers are arranged in a [`ProviderCascade`], resolved once
//! at start-up, which is itself a provider.

mod cascade;
mod http;

pub use cascade::ProviderCascade;
pub use http::{ApiKind, HttpExtractionProvider};

use crate::capture::{CaptureOptions, TurnData, TurnMetrics};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Faults an extraction attempt can end with.
///
/// None of them is fatal to episode completion; the capture pipeline turns
/// every variant into a fallback record.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    /// No configured candidate could be reached
    #[error("No extraction provider available")]
    Unavailable,

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed extraction response: {0}")]
    MalformedResponse(String),

    #[error("Extraction provider error: {0}")]
    Provider(String),
}

/// A candidate experience proposed by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateExperience {
    pub title: String,
    pub scenario: String,
    pub outcome: String,
    pub confidence: f64,
    #[serde(default)]
    pub trajectory: Option<serde_json::Value>,
}

/// Successful provider answer. Zero experiences is a valid answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub experiences: Vec<CandidateExperience>,
    /// Candidates the provider already dropped as duplicates
    pub skipped_duplicates: usize,
    pub processing_time_ms: u64,
    /// Name of the provider that answered
    pub provider: String,
}

#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the provider has what it needs (credentials, endpoint) to run
    fn is_configured(&self) -> bool {
        true
    }

    async fn capture(
        &self,
        turns: &TurnData,
        metrics: &TurnMetrics,
        options: &CaptureOptions,
    ) -> Result<ExtractionOutput, ExtractionError>;
}

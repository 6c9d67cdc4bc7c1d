//! External transcript sources for bulk import.

use async_trait::async_trait;
use hippo_core::error::{HippoError, Result};
use hippo_core::types::{MessageMetadata, Role};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One message as produced by a transcript reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub role: Role,
    pub content: String,
    /// Source-side timestamp, kept verbatim
    #[serde(alias = "created_at")]
    pub timestamp: String,
    #[serde(default)]
    pub metadata: Option<MessageMetadata>,
}

/// A reader of some external transcript format
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Short name recorded as the message source
    fn name(&self) -> &str;

    async fn read(&self) -> Result<Vec<TranscriptRecord>>;
}

/// Newline-delimited JSON transcript, one [`TranscriptRecord`] per line
#[derive(Debug, Clone)]
pub struct JsonlTranscript {
    name: String,
    path: PathBuf,
}

impl JsonlTranscript {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            name: "jsonl".to_string(),
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Parse JSONL content. Blank and malformed lines are skipped.
    pub fn parse(content: &str) -> Vec<TranscriptRecord> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(index, line)| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(line = index + 1, error = %e, "Skipping malformed transcript line");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl TranscriptSource for JsonlTranscript {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Result<Vec<TranscriptRecord>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            HippoError::invalid_input(format!(
                "Failed to read transcript {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let records = Self::parse(&content);
        debug!(path = %self.path.display(), records = records.len(), "Transcript read");
        Ok(records)
    }
}

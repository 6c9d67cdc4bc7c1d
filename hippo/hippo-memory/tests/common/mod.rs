//! Shared fixtures for the hippo-memory integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use hippo_core::prelude::*;
use hippo_memory::capture::{CaptureOptions, TurnData, TurnMetrics};
use hippo_memory::{
    CandidateExperience, EpisodicMemory, ExtractionError, ExtractionOutput, ExtractionProvider,
    ProviderCascade, RelevanceScorer,
};
use hippo_storage::{MemoryStorage, Stores};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

pub enum Behaviour {
    Answer(Vec<(&'static str, f64)>),
    Fail(ExtractionError),
    Hang,
}

/// Extraction provider with a scripted answer that counts its calls
pub struct FakeProvider {
    behaviour: Behaviour,
    calls: AtomicUsize,
    last_options: Mutex<Option<CaptureOptions>>,
}

impl FakeProvider {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
            last_options: Mutex::new(None),
        })
    }

    pub fn answering(titles: Vec<(&'static str, f64)>) -> Arc<Self> {
        Self::new(Behaviour::Answer(titles))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<CaptureOptions> {
        self.last_options.lock().clone()
    }
}

#[async_trait]
impl ExtractionProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn capture(
        &self,
        _turns: &TurnData,
        _metrics: &TurnMetrics,
        options: &CaptureOptions,
    ) -> std::result::Result<ExtractionOutput, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock() = Some(options.clone());

        match &self.behaviour {
            Behaviour::Answer(titles) => Ok(ExtractionOutput {
                experiences: titles
                    .iter()
                    .map(|(title, confidence)| CandidateExperience {
                        title: title.to_string(),
                        scenario: format!("scenario for {}", title),
                        outcome: "it worked".to_string(),
                        confidence: *confidence,
                        trajectory: None,
                    })
                    .collect(),
                skipped_duplicates: 0,
                processing_time_ms: 1,
                provider: "fake".to_string(),
            }),
            Behaviour::Fail(error) => Err(error.clone()),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ExtractionError::Unavailable)
            }
        }
    }
}

/// Scorer that forwards the message count it saw
pub struct ChannelScorer {
    tx: mpsc::UnboundedSender<usize>,
}

impl ChannelScorer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl RelevanceScorer for ChannelScorer {
    async fn score(&self, messages: &[ConversationMessage]) -> anyhow::Result<()> {
        self.tx.send(messages.len())?;
        Ok(())
    }
}

pub fn memory_config() -> HippoConfig {
    let mut config = HippoConfig::default();
    config.database.backend = "memory".to_string();
    config
}

/// In-memory episodic memory around a single provider
pub fn memory_with(provider: Arc<dyn ExtractionProvider>) -> EpisodicMemory {
    EpisodicMemory::builder(&memory_config(), Stores::from_backend(MemoryStorage::new()))
        .provider(provider)
        .build()
}

/// Cascade with one provider and a short timeout
pub fn cascade_of(
    provider: Arc<dyn ExtractionProvider>,
    timeout: Duration,
) -> Arc<ProviderCascade> {
    Arc::new(ProviderCascade::resolve(vec![provider], timeout))
}

/// Record `count` alternating user/assistant messages for a session
pub async fn record_messages(memory: &EpisodicMemory, session: &str, count: usize) -> Result<()> {
    for i in 0..count {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        let message = ConversationMessage::new(session, role, format!("message {}", i));
        memory.linker().record(session, message).await?;
    }
    Ok(())
}

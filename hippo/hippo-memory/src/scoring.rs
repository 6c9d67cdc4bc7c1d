//! Background triggers fired after capture.

use async_trait::async_trait;
use hippo_core::config::ScoringConfig;
use hippo_core::types::{ConversationMessage, Episode, Experience};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// External relevance scoring over a finished episode's messages
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(&self, messages: &[ConversationMessage]) -> anyhow::Result<()>;
}

/// Downstream consumer notified once an episode's experiences are persisted
#[async_trait]
pub trait MaintenanceHook: Send + Sync {
    async fn on_episode_captured(
        &self,
        episode: &Episode,
        experiences: &[Experience],
    ) -> anyhow::Result<()>;
}

/// Scorer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScorer;

#[async_trait]
impl RelevanceScorer for NoopScorer {
    async fn score(&self, messages: &[ConversationMessage]) -> anyhow::Result<()> {
        debug!(messages = messages.len(), "No relevance scorer configured");
        Ok(())
    }
}

/// Fire-and-forget dispatch of relevance scoring and the maintenance hook.
///
/// Each dispatch is a single attempt bounded by `timeout`. Errors, timeouts
/// and panics are logged and dropped.
#[derive(Clone)]
pub struct ScoringTrigger {
    scorer: Arc<dyn RelevanceScorer>,
    hook: Option<Arc<dyn MaintenanceHook>>,
    timeout: Duration,
}

impl ScoringTrigger {
    pub fn new(scorer: Arc<dyn RelevanceScorer>, timeout: Duration) -> Self {
        Self {
            scorer,
            hook: None,
            timeout,
        }
    }

    pub fn from_config(scorer: Arc<dyn RelevanceScorer>, config: &ScoringConfig) -> Self {
        Self::new(scorer, Duration::from_secs(config.timeout_secs))
    }

    pub fn with_hook(mut self, hook: Arc<dyn MaintenanceHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Spawn the background work and return immediately.
    ///
    /// The handle may be dropped; the task runs to completion on its own.
    pub fn fire(
        &self,
        episode: Episode,
        messages: Vec<ConversationMessage>,
        experiences: Vec<Experience>,
    ) -> JoinHandle<()> {
        let scorer = self.scorer.clone();
        let hook = self.hook.clone();
        let timeout = self.timeout;
        let episode_id = episode.id;

        tokio::spawn(async move {
            let work = tokio::spawn(async move {
                match tokio::time::timeout(timeout, scorer.score(&messages)).await {
                    Ok(Ok(())) => debug!(episode_id = %episode.id, "Relevance scoring done"),
                    Ok(Err(e)) => {
                        warn!(episode_id = %episode.id, error = %e, "Relevance scoring failed")
                    }
                    Err(_) => {
                        warn!(episode_id = %episode.id, ?timeout, "Relevance scoring timed out")
                    }
                }

                if let Some(hook) = hook {
                    let captured = hook.on_episode_captured(&episode, &experiences);
                    match tokio::time::timeout(timeout, captured).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(episode_id = %episode.id, error = %e, "Maintenance hook failed")
                        }
                        Err(_) => {
                            warn!(episode_id = %episode.id, ?timeout, "Maintenance hook timed out")
                        }
                    }
                }
            });

            if let Err(e) = work.await {
                warn!(%episode_id, error = %e, "Scoring task aborted");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippo_core::types::{Role, ScopeType};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl RelevanceScorer for Recording {
        async fn score(&self, messages: &[ConversationMessage]) -> anyhow::Result<()> {
            self.seen.lock().push(messages.len());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl RelevanceScorer for Failing {
        async fn score(&self, _messages: &[ConversationMessage]) -> anyhow::Result<()> {
            anyhow::bail!("scoring backend offline")
        }
    }

    struct Panicking;

    #[async_trait]
    impl RelevanceScorer for Panicking {
        async fn score(&self, _messages: &[ConversationMessage]) -> anyhow::Result<()> {
            panic!("scorer bug")
        }
    }

    struct Hanging;

    #[async_trait]
    impl RelevanceScorer for Hanging {
        async fn score(&self, _messages: &[ConversationMessage]) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn episode() -> Episode {
        Episode::new("s1", ScopeType::Session, Some("s1".into()), "e")
    }

    fn messages() -> Vec<ConversationMessage> {
        vec![
            ConversationMessage::new("s1", Role::User, "a"),
            ConversationMessage::new("s1", Role::Assistant, "b"),
        ]
    }

    #[tokio::test]
    async fn test_scorer_receives_messages() {
        let scorer = Arc::new(Recording::default());
        let trigger = ScoringTrigger::new(scorer.clone(), Duration::from_secs(1));
        trigger.fire(episode(), messages(), Vec::new()).await.unwrap();
        assert_eq!(*scorer.seen.lock(), vec![2]);
    }

    #[tokio::test]
    async fn test_failures_never_escape() {
        for scorer in [
            Arc::new(Failing) as Arc<dyn RelevanceScorer>,
            Arc::new(Panicking),
            Arc::new(Hanging),
        ] {
            let trigger = ScoringTrigger::new(scorer, Duration::from_millis(20));
            let handle = trigger.fire(episode(), messages(), Vec::new());
            assert!(handle.await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_hook_sees_experiences() {
        struct Counting(Mutex<usize>);

        #[async_trait]
        impl MaintenanceHook for Counting {
            async fn on_episode_captured(
                &self,
                _episode: &Episode,
                experiences: &[Experience],
            ) -> anyhow::Result<()> {
                *self.0.lock() += experiences.len();
                Ok(())
            }
        }

        let hook = Arc::new(Counting(Mutex::new(0)));
        let trigger = ScoringTrigger::new(Arc::new(NoopScorer), Duration::from_secs(1))
            .with_hook(hook.clone());
        let experience = Experience::new(
            "t",
            "s",
            "o",
            hippo_core::types::ExperienceSource::Fallback {
                reason: "test".into(),
            },
        );
        trigger
            .fire(episode(), messages(), vec![experience])
            .await
            .unwrap();
        assert_eq!(*hook.0.lock(), 1);
    }
}

//! Wiring of the episodic memory components.

use crate::capture::CapturePipeline;
use crate::episode::{EpisodeManager, ScopeContext};
use crate::extraction::{ExtractionProvider, ProviderCascade};
use crate::linker::MessageLinker;
use crate::scoring::{MaintenanceHook, NoopScorer, RelevanceScorer, ScoringTrigger};
use hippo_core::config::HippoConfig;
use hippo_core::error::Result;
use hippo_core::id::HippoId;
use hippo_core::types::Experience;
use hippo_storage::{StorageBackend, Stores};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Episode manager, message linker and capture pipeline over one set of stores
pub struct EpisodicMemory {
    stores: Stores,
    linker: Arc<MessageLinker>,
    manager: Arc<EpisodeManager>,
}

impl EpisodicMemory {
    /// Open the configured storage and resolve the provider cascade once
    pub async fn from_config(config: &HippoConfig) -> Result<Self> {
        let backend = StorageBackend::from_config(config)?;
        let stores = Stores::open(&backend).await?;
        let cascade = ProviderCascade::from_config(&config.extraction)?;
        // each cascade step has its own bound, the whole walk gets their sum
        let steps = cascade.provider_names().len().max(1) as u32;
        let budget = cascade.timeout().saturating_mul(steps);

        Ok(Self::builder(config, stores)
            .provider(Arc::new(cascade))
            .extraction_timeout(budget)
            .build())
    }

    pub fn builder(config: &HippoConfig, stores: Stores) -> EpisodicMemoryBuilder {
        EpisodicMemoryBuilder {
            config: config.clone(),
            stores,
            provider: None,
            extraction_timeout: None,
            scorer: None,
            hook: None,
            scope_context: None,
        }
    }

    pub fn episodes(&self) -> &EpisodeManager {
        &self.manager
    }

    pub fn linker(&self) -> &MessageLinker {
        &self.linker
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Experiences whose source is the given episode
    pub async fn experiences_for(&self, episode_id: HippoId) -> Result<Vec<Experience>> {
        self.stores.experiences.get_by_episode(episode_id).await
    }
}

/// Builder for [`EpisodicMemory`] with replaceable collaborators
pub struct EpisodicMemoryBuilder {
    config: HippoConfig,
    stores: Stores,
    provider: Option<Arc<dyn ExtractionProvider>>,
    extraction_timeout: Option<Duration>,
    scorer: Option<Arc<dyn RelevanceScorer>>,
    hook: Option<Arc<dyn MaintenanceHook>>,
    scope_context: Option<Arc<dyn ScopeContext>>,
}

impl EpisodicMemoryBuilder {
    pub fn provider(mut self, provider: Arc<dyn ExtractionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Bound on one extraction call. Defaults to `extraction.timeout_secs`.
    pub fn extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = Some(timeout);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn maintenance_hook(mut self, hook: Arc<dyn MaintenanceHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn scope_context(mut self, scope_context: Arc<dyn ScopeContext>) -> Self {
        self.scope_context = Some(scope_context);
        self
    }

    pub fn build(self) -> EpisodicMemory {
        let config = self.config;
        let stores = self.stores;

        let linker = Arc::new(MessageLinker::from_config(
            stores.episodes.clone(),
            stores.messages.clone(),
            &config.linking,
        ));

        let step_timeout = Duration::from_secs(config.extraction.timeout_secs);
        let provider = self.provider.unwrap_or_else(|| {
            Arc::new(ProviderCascade::resolve(Vec::new(), step_timeout))
                as Arc<dyn ExtractionProvider>
        });

        let mut pipeline = CapturePipeline::new(
            linker.clone(),
            provider,
            stores.experiences.clone(),
            config.capture.clone(),
        )
        .with_timeout(self.extraction_timeout.unwrap_or(step_timeout));
        if config.scoring.enabled {
            let scorer = self
                .scorer
                .unwrap_or_else(|| Arc::new(NoopScorer) as Arc<dyn RelevanceScorer>);
            let mut trigger = ScoringTrigger::from_config(scorer, &config.scoring);
            if let Some(hook) = self.hook {
                trigger = trigger.with_hook(hook);
            }
            pipeline = pipeline.with_scoring(trigger);
        }

        let mut manager = EpisodeManager::new(stores.episodes.clone(), Arc::new(pipeline));
        if let Some(scope_context) = self.scope_context {
            manager = manager.with_scope_context(scope_context);
        }

        info!(
            scoring = config.scoring.enabled,
            threshold = config.capture.confidence_threshold,
            "Episodic memory ready"
        );

        EpisodicMemory {
            stores,
            linker,
            manager: Arc::new(manager),
        }
    }
}

use super::{ExtractionError, ExtractionOutput, ExtractionProvider, HttpExtractionProvider};
use crate::capture::{CaptureOptions, TurnData, TurnMetrics};
use async_trait::async_trait;
use hippo_core::config::ExtractionConfig;
use hippo_core::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ordered list of extraction providers, tried in turn.
///
/// The list is fixed when the cascade is resolved; each call walks it from
/// the top, bounding every attempt by the configured timeout.
pub struct ProviderCascade {
    providers: Vec<Arc<dyn ExtractionProvider>>,
    timeout: Duration,
}

impl ProviderCascade {
    /// Keep the configured candidates, in order
    pub fn resolve(candidates: Vec<Arc<dyn ExtractionProvider>>, timeout: Duration) -> Self {
        let providers: Vec<_> = candidates
            .into_iter()
            .filter(|p| {
                let configured = p.is_configured();
                if !configured {
                    debug!(provider = p.name(), "Skipping unconfigured extraction provider");
                }
                configured
            })
            .collect();

        if providers.is_empty() {
            warn!("No extraction provider configured; episodes will use fallback records");
        } else {
            info!(
                providers = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
                "Extraction provider cascade resolved"
            );
        }

        Self { providers, timeout }
    }

    /// Build HTTP providers for every configured candidate and resolve them
    pub fn from_config(config: &ExtractionConfig) -> Result<Self> {
        let mut candidates: Vec<Arc<dyn ExtractionProvider>> = Vec::new();
        for provider in &config.providers {
            candidates.push(Arc::new(HttpExtractionProvider::from_config(provider)?));
        }
        Ok(Self::resolve(
            candidates,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    pub fn is_available(&self) -> bool {
        !self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl ExtractionProvider for ProviderCascade {
    fn name(&self) -> &str {
        "cascade"
    }

    fn is_configured(&self) -> bool {
        self.is_available()
    }

    async fn capture(
        &self,
        turns: &TurnData,
        metrics: &TurnMetrics,
        options: &CaptureOptions,
    ) -> std::result::Result<ExtractionOutput, ExtractionError> {
        let mut last_error = None;

        for provider in &self.providers {
            let attempt =
                tokio::time::timeout(self.timeout, provider.capture(turns, metrics, options)).await;

            match attempt {
                Ok(Ok(mut output)) => {
                    if output.provider.is_empty() {
                        output.provider = provider.name().to_string();
                    }
                    debug!(
                        provider = provider.name(),
                        experiences = output.experiences.len(),
                        "Extraction provider answered"
                    );
                    return Ok(output);
                }
                Ok(Err(e)) => {
                    warn!(provider = provider.name(), error = %e, "Extraction provider failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(
                        provider = provider.name(),
                        timeout = ?self.timeout,
                        "Extraction provider timed out"
                    );
                    last_error = Some(ExtractionError::Timeout(self.timeout));
                }
            }
        }

        Err(last_error.unwrap_or(ExtractionError::Unavailable))
    }
}

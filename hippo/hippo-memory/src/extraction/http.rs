use super::{CandidateExperience, ExtractionError, ExtractionOutput, ExtractionProvider};
use crate::capture::{CaptureOptions, TurnData, TurnMetrics};
use async_trait::async_trait;
use hippo_core::config::ProviderConfig;
use hippo_core::error::{HippoError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info};

const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You review a finished software development session and extract \
reusable experiences from it. Answer with a single JSON object of the form \
{\"experiences\": [{\"title\": string, \"scenario\": string, \"outcome\": string, \
\"confidence\": number between 0 and 1, \"trajectory\": object or null}]}. \
Return an empty list when nothing is worth keeping.";

/// Wire dialect of an HTTP extraction endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKind {
    /// OpenAI-compatible chat completions
    OpenAi,
    /// Anthropic messages API
    Anthropic,
}

impl FromStr for ApiKind {
    type Err = HippoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(HippoError::config(format!(
                "Unknown extraction provider kind '{}'",
                other
            ))),
        }
    }
}

/// LLM-backed extraction provider speaking an HTTP JSON API
pub struct HttpExtractionProvider {
    client: Client,
    name: String,
    kind: ApiKind,
    endpoint: String,
    model: String,
    max_tokens: u32,
    api_key: Option<String>,
    requires_key: bool,
}

#[derive(Deserialize)]
struct ExtractionPayload {
    experiences: Vec<CandidateExperience>,
    #[serde(default)]
    skipped_duplicates: usize,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
struct PromptContext<'a> {
    metrics: &'a TurnMetrics,
    confidence_threshold: f64,
    focus_areas: &'a [String],
    scope_type: String,
    project_id: Option<&'a str>,
}

impl HttpExtractionProvider {
    pub fn new(
        name: impl Into<String>,
        kind: ApiKind,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| HippoError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            name: name.into(),
            kind,
            endpoint: endpoint.into(),
            model: model.into(),
            max_tokens: 2048,
            api_key: None,
            requires_key: false,
        })
    }

    /// Build from configuration; the API key is read from the environment now
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let mut provider = Self::new(
            &config.name,
            config.kind.parse()?,
            &config.endpoint,
            &config.model,
        )?;
        provider.max_tokens = config.max_tokens;

        if let Some(var) = &config.api_key_env {
            provider.requires_key = true;
            provider.api_key = std::env::var(var).ok().filter(|key| !key.trim().is_empty());
            if provider.api_key.is_none() {
                debug!(provider = %config.name, env = %var, "API key not set");
            }
        }

        Ok(provider)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self.requires_key = true;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_prompt(
        &self,
        turns: &TurnData,
        metrics: &TurnMetrics,
        options: &CaptureOptions,
    ) -> std::result::Result<String, ExtractionError> {
        let context = PromptContext {
            metrics,
            confidence_threshold: options.confidence_threshold,
            focus_areas: &options.focus_areas,
            scope_type: options.scope_type.to_string(),
            project_id: options.project_id.as_deref(),
        };
        let context = serde_json::to_string_pretty(&context)
            .map_err(|e| ExtractionError::Provider(format!("Failed to encode context: {}", e)))?;

        let mut prompt = String::from("## Session context\n");
        prompt.push_str(&context);
        prompt.push_str("\n\n## Transcript\n");
        for turn in &turns.turns {
            prompt.push_str(&format!("[{}] {}: {}\n", turn.timestamp, turn.role, turn.content));
        }
        Ok(prompt)
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        match self.kind {
            ApiKind::OpenAi => json!({
                "model": self.model,
                "max_tokens": self.max_tokens,
                "response_format": { "type": "json_object" },
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": prompt },
                ],
            }),
            ApiKind::Anthropic => json!({
                "model": self.model,
                "max_tokens": self.max_tokens,
                "system": SYSTEM_PROMPT,
                "messages": [
                    { "role": "user", "content": prompt },
                ],
            }),
        }
    }

    async fn send(&self, body: &serde_json::Value) -> std::result::Result<String, ExtractionError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = match self.kind {
                ApiKind::OpenAi => request.bearer_auth(key),
                ApiKind::Anthropic => request
                    .header("x-api-key", key)
                    .header("anthropic-version", ANTHROPIC_VERSION),
            };
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                ExtractionError::Unavailable
            } else {
                ExtractionError::Provider(format!("{} request failed: {}", self.name, e))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExtractionError::Provider(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(ExtractionError::Provider(format!(
                "{} API error ({}): {}",
                self.name, status, text
            )));
        }

        match self.kind {
            ApiKind::OpenAi => {
                let response: OpenAiResponse = serde_json::from_str(&text)
                    .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;
                response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .ok_or_else(|| {
                        ExtractionError::MalformedResponse("response has no message content".into())
                    })
            }
            ApiKind::Anthropic => {
                let response: AnthropicResponse = serde_json::from_str(&text)
                    .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;
                response
                    .content
                    .into_iter()
                    .find(|block| block.kind == "text")
                    .and_then(|block| block.text)
                    .ok_or_else(|| {
                        ExtractionError::MalformedResponse("response has no text block".into())
                    })
            }
        }
    }
}

/// Pull the JSON object out of a model answer, which may be fenced or
/// surrounded by prose.
fn json_slice(answer: &str) -> Option<&str> {
    let trimmed = answer.trim();
    let unfenced = match trimmed.find("```") {
        Some(open) => {
            let after = &trimmed[open + 3..];
            let body_start = after.find('\n').map_or(0, |i| i + 1);
            let body = &after[body_start..];
            body.find("```").map_or(body, |close| &body[..close])
        }
        None => trimmed,
    };

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    (start < end).then(|| &unfenced[start..=end])
}

fn parse_answer(answer: &str) -> std::result::Result<ExtractionPayload, ExtractionError> {
    let slice = json_slice(answer).ok_or_else(|| {
        ExtractionError::MalformedResponse("answer contains no JSON object".into())
    })?;
    let mut payload: ExtractionPayload = serde_json::from_str(slice)
        .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;

    for candidate in &mut payload.experiences {
        if !candidate.confidence.is_finite() {
            return Err(ExtractionError::MalformedResponse(format!(
                "experience '{}' has no usable confidence",
                candidate.title
            )));
        }
        candidate.confidence = candidate.confidence.clamp(0.0, 1.0);
    }
    Ok(payload)
}

#[async_trait]
impl ExtractionProvider for HttpExtractionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        !self.endpoint.is_empty() && (!self.requires_key || self.api_key.is_some())
    }

    async fn capture(
        &self,
        turns: &TurnData,
        metrics: &TurnMetrics,
        options: &CaptureOptions,
    ) -> std::result::Result<ExtractionOutput, ExtractionError> {
        let started = Instant::now();
        let prompt = self.build_prompt(turns, metrics, options)?;
        let body = self.request_body(&prompt);

        debug!(provider = %self.name, turns = turns.turns.len(), "Requesting extraction");
        let answer = self.send(&body).await?;
        let payload = parse_answer(&answer)?;

        let output = ExtractionOutput {
            experiences: payload.experiences,
            skipped_duplicates: payload.skipped_duplicates,
            processing_time_ms: started.elapsed().as_millis() as u64,
            provider: self.name.clone(),
        };
        info!(
            provider = %self.name,
            experiences = output.experiences.len(),
            elapsed_ms = output.processing_time_ms,
            "Extraction finished"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Turn;
    use hippo_core::types::Role;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn turns() -> TurnData {
        TurnData {
            turns: vec![
                Turn {
                    role: Role::User,
                    content: "the build is red".into(),
                    timestamp: "2024-01-01T00:00:00Z".into(),
                },
                Turn {
                    role: Role::Assistant,
                    content: "pinned the toolchain".into(),
                    timestamp: "2024-01-01T00:00:05Z".into(),
                },
            ],
        }
    }

    async fn capture(
        provider: &HttpExtractionProvider,
    ) -> std::result::Result<ExtractionOutput, ExtractionError> {
        provider
            .capture(&turns(), &TurnMetrics::default(), &CaptureOptions::default())
            .await
    }

    #[test]
    fn test_json_slice_handles_fences_and_prose() {
        assert_eq!(json_slice("{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(
            json_slice("Here you go:\n```json\n{\"a\":1}\n```\nDone."),
            Some("{\"a\":1}")
        );
        assert_eq!(
            json_slice("Sure! {\"a\": {\"b\": 2}} hope it helps"),
            Some("{\"a\": {\"b\": 2}}")
        );
        assert_eq!(json_slice("no json here"), None);
    }

    #[test]
    fn test_parse_answer_requires_fields() {
        let missing_outcome = r#"{"experiences":[{"title":"t","scenario":"s","confidence":0.8}]}"#;
        assert!(matches!(
            parse_answer(missing_outcome),
            Err(ExtractionError::MalformedResponse(_))
        ));

        let clamped = parse_answer(
            r#"{"experiences":[{"title":"t","scenario":"s","outcome":"o","confidence":1.5}]}"#,
        )
        .unwrap();
        assert_eq!(clamped.experiences[0].confidence, 1.0);
    }

    #[test]
    fn test_missing_api_key_means_not_configured() {
        let config = ProviderConfig {
            name: "anthropic".into(),
            kind: "anthropic".into(),
            endpoint: "https://example.invalid/v1/messages".into(),
            model: "m".into(),
            api_key_env: Some("HIPPO_TEST_KEY_THAT_IS_NEVER_SET".into()),
            max_tokens: 512,
        };
        let provider = HttpExtractionProvider::from_config(&config).unwrap();
        assert!(!provider.is_configured());
        assert!(provider.with_api_key("k").is_configured());
    }

    #[tokio::test]
    async fn test_openai_dialect() {
        let mock_server = MockServer::start().await;
        let answer = json!({
            "experiences": [
                {
                    "title": "Pin toolchain",
                    "scenario": "CI broke",
                    "outcome": "green",
                    "confidence": 0.92
                },
                { "title": "Guess", "scenario": "?", "outcome": "?", "confidence": 0.3 }
            ]
        });

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": answer.to_string() } }]
            })))
            .mount(&mock_server)
            .await;

        let provider = HttpExtractionProvider::new(
            "openai",
            ApiKind::OpenAi,
            format!("{}/v1/chat/completions", mock_server.uri()),
            "gpt-test",
        )
        .unwrap()
        .with_api_key("test-key");

        let output = capture(&provider).await.unwrap();
        assert_eq!(output.provider, "openai");
        assert_eq!(output.experiences.len(), 2);
        assert_eq!(output.experiences[0].title, "Pin toolchain");
    }

    #[tokio::test]
    async fn test_anthropic_dialect_with_fenced_answer() {
        let mock_server = MockServer::start().await;
        let fenced = "```json\n{\"experiences\": []}\n```";

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{ "type": "text", "text": fenced }]
            })))
            .mount(&mock_server)
            .await;

        let provider = HttpExtractionProvider::new(
            "anthropic",
            ApiKind::Anthropic,
            format!("{}/v1/messages", mock_server.uri()),
            "claude-test",
        )
        .unwrap()
        .with_api_key("test-key");

        let output = capture(&provider).await.unwrap();
        assert!(output.experiences.is_empty());
    }

    #[tokio::test]
    async fn test_http_errors_and_garbage() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "I could not find anything." } }]
            })))
            .mount(&mock_server)
            .await;

        let broken = HttpExtractionProvider::new(
            "broken",
            ApiKind::OpenAi,
            format!("{}/broken", mock_server.uri()),
            "m",
        )
        .unwrap();
        assert!(matches!(
            capture(&broken).await,
            Err(ExtractionError::Provider(_))
        ));

        let garbage = HttpExtractionProvider::new(
            "garbage",
            ApiKind::OpenAi,
            format!("{}/garbage", mock_server.uri()),
            "m",
        )
        .unwrap();
        assert!(matches!(
            capture(&garbage).await,
            Err(ExtractionError::MalformedResponse(_))
        ));
    }
}

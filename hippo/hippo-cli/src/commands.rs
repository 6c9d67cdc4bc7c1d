//! Subcommand implementations.

use crate::output::{self, OutputFormat};
use anyhow::{Context, Result, bail};
use hippo_core::config::HippoConfig;
use hippo_core::id::HippoId;
use hippo_core::types::{ConversationMessage, EpisodeFilter, Role, ScopeType};
use hippo_memory::{EpisodicMemory, JsonlTranscript, ScopeHint};
use serde_json::json;
use std::path::{Path, PathBuf};

fn parse_id(raw: &str) -> Result<HippoId> {
    HippoId::parse(raw).with_context(|| format!("Invalid episode id '{}'", raw))
}

pub async fn begin(
    memory: &EpisodicMemory,
    session: &str,
    scope: Option<ScopeType>,
    scope_id: Option<String>,
    name: String,
    format: OutputFormat,
) -> Result<()> {
    let hint = ScopeHint {
        scope_type: scope,
        scope_id,
    };
    let episode = memory.episodes().begin(session, hint, name).await?;

    match format {
        OutputFormat::Json => output::json(&episode)?,
        OutputFormat::Human => {
            output::success(format!("Started episode {}", episode.id));
            output::episode(&episode);
        }
    }
    Ok(())
}

pub async fn complete(memory: &EpisodicMemory, id: &str, format: OutputFormat) -> Result<()> {
    let (episode, report) = memory.episodes().complete_with_report(parse_id(id)?).await?;

    match format {
        OutputFormat::Json => output::json(&json!({ "episode": episode, "capture": report }))?,
        OutputFormat::Human => {
            output::success(format!("Completed episode {}", episode.id));
            output::episode(&episode);
            output::header(format!("Experiences ({})", report.experiences.len()));
            for experience in &report.experiences {
                output::experience(experience);
            }
            if let Some(reason) = report.fallback {
                output::warning(format!("Fallback record used: {}", reason));
            }
            if report.skipped_low_confidence + report.skipped_duplicates > 0 {
                output::info(format!(
                    "Skipped {} below threshold, {} duplicates",
                    report.skipped_low_confidence, report.skipped_duplicates
                ));
            }
        }
    }
    Ok(())
}

pub async fn fail(
    memory: &EpisodicMemory,
    id: &str,
    reason: String,
    format: OutputFormat,
) -> Result<()> {
    let episode = memory.episodes().fail(parse_id(id)?, reason).await?;
    match format {
        OutputFormat::Json => output::json(&episode)?,
        OutputFormat::Human => {
            output::success(format!("Episode {} marked failed", episode.id));
            output::episode(&episode);
        }
    }
    Ok(())
}

pub async fn cancel(memory: &EpisodicMemory, id: &str, format: OutputFormat) -> Result<()> {
    let episode = memory.episodes().cancel(parse_id(id)?).await?;
    match format {
        OutputFormat::Json => output::json(&episode)?,
        OutputFormat::Human => output::success(format!("Episode {} cancelled", episode.id)),
    }
    Ok(())
}

pub async fn active(memory: &EpisodicMemory, session: &str, format: OutputFormat) -> Result<()> {
    let episode = memory.episodes().get_active(session).await?;
    match (format, episode) {
        (OutputFormat::Json, episode) => output::json(&episode)?,
        (OutputFormat::Human, Some(episode)) => output::episode(&episode),
        (OutputFormat::Human, None) => {
            output::info(format!("No active episode for session {}", session))
        }
    }
    Ok(())
}

pub async fn list(
    memory: &EpisodicMemory,
    session: Option<String>,
    scope: Option<ScopeType>,
    scope_id: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let filter = EpisodeFilter {
        scope_type: scope,
        scope_id,
        session_id: session,
    };
    let episodes = memory.episodes().list(&filter).await?;

    match format {
        OutputFormat::Json => output::json(&episodes)?,
        OutputFormat::Human => {
            if episodes.is_empty() {
                output::info("No episodes found");
            }
            for episode in &episodes {
                output::episode(episode);
            }
        }
    }
    Ok(())
}

pub async fn record(
    memory: &EpisodicMemory,
    session: &str,
    conversation: Option<String>,
    role: Role,
    content: String,
    created_at: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let conversation = conversation.unwrap_or_else(|| session.to_string());
    let mut message = ConversationMessage::new(conversation, role, content);
    if let Some(created_at) = created_at {
        message = message.with_created_at(created_at);
    }

    let message = memory.linker().record(session, message).await?;
    match format {
        OutputFormat::Json => output::json(&message)?,
        OutputFormat::Human => match message.episode_id {
            Some(episode_id) => output::success(format!(
                "Recorded message {} in episode {}",
                message.id, episode_id
            )),
            None => output::warning(format!(
                "Recorded message {} without an episode (none active)",
                message.id
            )),
        },
    }
    Ok(())
}

pub async fn import(
    memory: &EpisodicMemory,
    session: &str,
    conversation: Option<String>,
    file: &Path,
    source_name: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    if !file.exists() {
        bail!("Transcript file not found: {}", file.display());
    }
    let conversation = conversation.unwrap_or_else(|| session.to_string());
    let mut source = JsonlTranscript::new(file);
    if let Some(name) = source_name {
        source = source.with_name(name);
    }

    let report = memory
        .linker()
        .import_transcript(session, &conversation, &source)
        .await?;

    match format {
        OutputFormat::Json => output::json(&report)?,
        OutputFormat::Human => {
            output::success(format!("Imported {} messages", report.imported));
            output::kv("Linked", report.linked);
            output::kv("Unlinked", report.unlinked);
        }
    }
    Ok(())
}

pub async fn messages(memory: &EpisodicMemory, id: &str, format: OutputFormat) -> Result<()> {
    let messages = memory.linker().messages_for_episode(parse_id(id)?).await?;
    match format {
        OutputFormat::Json => output::json(&messages)?,
        OutputFormat::Human => {
            output::header(format!("Messages ({})", messages.len()));
            for message in &messages {
                output::message(message);
            }
        }
    }
    Ok(())
}

pub fn config_show(config: &HippoConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => output::json(config)?,
        OutputFormat::Human => {
            output::header("Configuration");
            output::kv("Database backend", &config.database.backend);
            output::kv("Database path", config.database_path()?.display());
            output::kv("Confidence threshold", config.capture.confidence_threshold);
            output::kv("Skip duplicates", config.capture.skip_duplicates);
            output::kv("Import grace (s)", config.linking.import_grace_secs);
            output::kv("Direct grace (s)", config.linking.direct_grace_secs);
            output::kv("Extraction timeout (s)", config.extraction.timeout_secs);
            let providers: Vec<_> = config
                .extraction
                .providers
                .iter()
                .map(|p| p.name.as_str())
                .collect();
            output::kv("Providers", providers.join(" → "));
            output::kv("Scoring", config.scoring.enabled);
        }
    }
    Ok(())
}

pub async fn config_init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => HippoConfig::config_path()?,
    };
    if path.exists() && !force {
        bail!(
            "Configuration already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    HippoConfig::default().save_to_path(&path).await?;
    output::success(format!("Wrote default configuration to {}", path.display()));
    Ok(())
}

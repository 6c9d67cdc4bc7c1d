//! Terminal output helpers.

use anyhow::Result;
use console::style;
use hippo_core::types::{ConversationMessage, Episode, Experience};
use serde::Serialize;
use std::fmt::Display;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Human,
    /// JSON output for scripting
    Json,
}

pub fn success(msg: impl Display) {
    println!("{} {}", style("✓").green().bold(), msg);
}

pub fn error(msg: impl Display) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

pub fn warning(msg: impl Display) {
    println!("{} {}", style("⚠").yellow().bold(), msg);
}

pub fn info(msg: impl Display) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

pub fn header(msg: impl Display) {
    println!("\n{}", style(msg).bold().underlined());
}

pub fn kv(key: impl Display, value: impl Display) {
    println!("  {}: {}", style(key).cyan(), value);
}

pub fn json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn episode(episode: &Episode) {
    header(format!("Episode {}", episode.id));
    kv("Name", &episode.name);
    kv("Session", &episode.session_id);
    kv(
        "Scope",
        match &episode.scope_id {
            Some(id) => format!("{} ({})", episode.scope_type, id),
            None => episode.scope_type.to_string(),
        },
    );
    kv("Status", episode.status);
    kv("Started", episode.started_at.to_rfc3339());
    if let Some(ended) = episode.ended_at {
        kv("Ended", ended.to_rfc3339());
    }
    if let Some(reason) = &episode.failure_reason {
        kv("Reason", reason);
    }
}

pub fn experience(experience: &Experience) {
    let confidence = experience
        .confidence
        .map(|c| format!("{:.2}", c))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {} {} {}",
        style("•").dim(),
        style(&experience.title).bold(),
        style(format!("[confidence {}]", confidence)).dim()
    );
    println!("    {}", experience.scenario);
    println!("    → {}", experience.outcome);
}

pub fn message(message: &ConversationMessage) {
    println!(
        "  {} {} {}",
        style(&message.created_at).dim(),
        style(format!("{:<9}", message.role.as_str())).cyan(),
        message.content
    );
}

//! SQLite schema.

use hippo_core::error::{HippoError, Result};
use hippo_core::types::normalize_title;
use sqlx::{Row, SqlitePool};
use tracing::debug;

const STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS episodes (
        id TEXT PRIMARY KEY NOT NULL,
        session_id TEXT NOT NULL,
        scope_type TEXT NOT NULL,
        scope_id TEXT,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        failure_reason TEXT,
        CHECK (scope_type = 'global' OR (scope_id IS NOT NULL AND scope_id <> ''))
    )
    ",
    // At most one active episode per session, enforced by the database
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_episodes_one_active
        ON episodes(session_id) WHERE status = 'active'
    ",
    r"CREATE INDEX IF NOT EXISTS idx_episodes_scope ON episodes(scope_type, scope_id)",
    r"CREATE INDEX IF NOT EXISTS idx_episodes_session ON episodes(session_id)",
    r"
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY NOT NULL,
        conversation_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL,
        episode_id TEXT,
        source TEXT NOT NULL,
        metadata TEXT
    )
    ",
    r"CREATE INDEX IF NOT EXISTS idx_messages_episode ON messages(episode_id)",
    r"
    CREATE INDEX IF NOT EXISTS idx_messages_conversation
        ON messages(conversation_id, episode_id)
    ",
    r"
    CREATE TABLE IF NOT EXISTS experiences (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        scenario TEXT NOT NULL,
        outcome TEXT NOT NULL,
        confidence REAL,
        trajectory TEXT,
        source_episode_id TEXT,
        scope_type TEXT NOT NULL,
        scope_id TEXT,
        project_id TEXT,
        session_id TEXT,
        agent_id TEXT,
        provenance TEXT NOT NULL,
        created_at TEXT NOT NULL,
        normalized_title TEXT NOT NULL DEFAULT ''
    )
    ",
    r"CREATE INDEX IF NOT EXISTS idx_experiences_episode ON experiences(source_episode_id)",
    r"CREATE INDEX IF NOT EXISTS idx_experiences_scope ON experiences(scope_type, scope_id)",
];

// Applied once `normalized_title` is known to exist
const TITLE_INDEX: &str = r"
    CREATE INDEX IF NOT EXISTS idx_experiences_title
        ON experiences(scope_type, scope_id, normalized_title)
";

/// Create tables and indexes if they do not exist
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| HippoError::persistence(format!("Failed to apply schema: {}", e)))?;
    }
    add_normalized_title(pool).await?;
    sqlx::query(TITLE_INDEX)
        .execute(pool)
        .await
        .map_err(|e| HippoError::persistence(format!("Failed to apply schema: {}", e)))?;
    debug!("SQLite schema up to date");
    Ok(())
}

/// Databases created before the duplicate lookup was indexed lack the
/// column. Add it and fill it from the stored titles.
async fn add_normalized_title(pool: &SqlitePool) -> Result<()> {
    let columns = sqlx::query("PRAGMA table_info(experiences)")
        .fetch_all(pool)
        .await
        .map_err(|e| HippoError::persistence(format!("Failed to inspect schema: {}", e)))?;
    let present = columns
        .iter()
        .any(|row| row.try_get::<String, _>("name").is_ok_and(|name| name == "normalized_title"));
    if present {
        return Ok(());
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| HippoError::persistence(format!("Failed to begin migration: {}", e)))?;
    sqlx::query("ALTER TABLE experiences ADD COLUMN normalized_title TEXT NOT NULL DEFAULT ''")
        .execute(&mut *tx)
        .await
        .map_err(|e| HippoError::persistence(format!("Failed to add column: {}", e)))?;

    let rows = sqlx::query("SELECT id, title FROM experiences")
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| HippoError::persistence(format!("Failed to read titles: {}", e)))?;
    for row in &rows {
        let id: String = row
            .try_get("id")
            .map_err(|e| HippoError::persistence(e.to_string()))?;
        let title: String = row
            .try_get("title")
            .map_err(|e| HippoError::persistence(e.to_string()))?;
        sqlx::query("UPDATE experiences SET normalized_title = ?1 WHERE id = ?2")
            .bind(normalize_title(&title))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| HippoError::persistence(format!("Failed to backfill titles: {}", e)))?;
    }

    tx.commit()
        .await
        .map_err(|e| HippoError::persistence(format!("Failed to commit migration: {}", e)))?;
    debug!(backfilled = rows.len(), "Added normalized_title to experiences");
    Ok(())
}

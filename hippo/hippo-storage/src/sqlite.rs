//! SQLite storage backend (sqlx).

use crate::schema;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hippo_core::error::{HippoError, Result};
use hippo_core::id::HippoId;
use hippo_core::time::{format_instant, parse_instant};
use hippo_core::traits::{EpisodeStore, ExperienceStore, MessageStore};
use hippo_core::types::*;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const EPISODE_COLUMNS: &str =
    "id, session_id, scope_type, scope_id, name, status, started_at, ended_at, failure_reason";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, role, content, created_at, episode_id, source, metadata";

const EXPERIENCE_COLUMNS: &str = "id, title, scenario, outcome, confidence, trajectory, \
     source_episode_id, scope_type, scope_id, project_id, session_id, agent_id, provenance, \
     created_at";

/// SQLite-based storage for episodes, messages and experiences
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a database file and apply the schema
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| db_error("Failed to connect to SQLite database", e))?;

        schema::run_migrations(&pool).await?;
        info!(path = %path.display(), "SQLite storage ready");

        Ok(Self { pool })
    }

    /// Private in-memory database; a single connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| db_error("Invalid in-memory connection string", e))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| db_error("Failed to open in-memory SQLite database", e))?;

        schema::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn fetch_episode(&self, id: HippoId) -> Result<Option<Episode>> {
        let sql = format!("SELECT {} FROM episodes WHERE id = ?1", EPISODE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load episode", e))?;

        row.as_ref().map(episode_from_row).transpose()
    }
}

fn db_error(context: &str, e: sqlx::Error) -> HippoError {
    HippoError::persistence(format!("{}: {}", context, e))
}

fn is_active_conflict(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.message().contains("episodes.session_id")
        }
        _ => false,
    }
}

fn parse_id(raw: &str) -> Result<HippoId> {
    HippoId::parse(raw).map_err(|e| HippoError::persistence(format!("Invalid id '{}': {}", raw, e)))
}

fn parse_stored_instant(raw: &str) -> Result<DateTime<Utc>> {
    parse_instant(raw)
        .ok_or_else(|| HippoError::persistence(format!("Invalid stored timestamp '{}'", raw)))
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| db_error(&format!("Failed to read column '{}'", column), e))
}

fn episode_from_row(row: &SqliteRow) -> Result<Episode> {
    let ended_at: Option<String> = get(row, "ended_at")?;
    Ok(Episode {
        id: parse_id(&get::<String>(row, "id")?)?,
        session_id: get(row, "session_id")?,
        scope_type: get::<String>(row, "scope_type")?.parse()?,
        scope_id: get(row, "scope_id")?,
        name: get(row, "name")?,
        status: get::<String>(row, "status")?.parse()?,
        started_at: parse_stored_instant(&get::<String>(row, "started_at")?)?,
        ended_at: ended_at.as_deref().map(parse_stored_instant).transpose()?,
        failure_reason: get(row, "failure_reason")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<ConversationMessage> {
    let episode_id: Option<String> = get(row, "episode_id")?;
    let metadata: Option<String> = get(row, "metadata")?;
    Ok(ConversationMessage {
        id: parse_id(&get::<String>(row, "id")?)?,
        conversation_id: get(row, "conversation_id")?,
        role: get::<String>(row, "role")?.parse()?,
        content: get(row, "content")?,
        created_at: get(row, "created_at")?,
        episode_id: episode_id.as_deref().map(parse_id).transpose()?,
        source: MessageSource::from_db_string(&get::<String>(row, "source")?),
        metadata: metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
    })
}

fn experience_from_row(row: &SqliteRow) -> Result<Experience> {
    let source_episode_id: Option<String> = get(row, "source_episode_id")?;
    let trajectory: Option<String> = get(row, "trajectory")?;
    Ok(Experience {
        id: parse_id(&get::<String>(row, "id")?)?,
        title: get(row, "title")?,
        scenario: get(row, "scenario")?,
        outcome: get(row, "outcome")?,
        confidence: get(row, "confidence")?,
        trajectory: trajectory
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        source_episode_id: source_episode_id.as_deref().map(parse_id).transpose()?,
        scope_type: get::<String>(row, "scope_type")?.parse()?,
        scope_id: get(row, "scope_id")?,
        project_id: get(row, "project_id")?,
        session_id: get(row, "session_id")?,
        agent_id: get(row, "agent_id")?,
        provenance: serde_json::from_str(&get::<String>(row, "provenance")?)?,
        created_at: parse_stored_instant(&get::<String>(row, "created_at")?)?,
    })
}

#[async_trait]
impl EpisodeStore for SqliteStorage {
    async fn create(&self, episode: &Episode) -> Result<()> {
        episode.validate_scope()?;

        let result = sqlx::query(
            r"
            INSERT INTO episodes (id, session_id, scope_type, scope_id, name, status,
                                  started_at, ended_at, failure_reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(episode.id.to_string())
        .bind(&episode.session_id)
        .bind(episode.scope_type.as_str())
        .bind(&episode.scope_id)
        .bind(&episode.name)
        .bind(episode.status.as_str())
        .bind(format_instant(&episode.started_at))
        .bind(episode.ended_at.as_ref().map(format_instant))
        .bind(&episode.failure_reason)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_active_conflict(&e) => {
                let existing = self
                    .get_active(&episode.session_id)
                    .await?
                    .map(|ep| ep.id.to_string())
                    .unwrap_or_default();
                Err(HippoError::active_episode_exists(
                    &episode.session_id,
                    existing,
                ))
            }
            Err(e) => Err(db_error("Failed to insert episode", e)),
        }
    }

    async fn get(&self, id: HippoId) -> Result<Option<Episode>> {
        self.fetch_episode(id).await
    }

    async fn get_active(&self, session_id: &str) -> Result<Option<Episode>> {
        let sql = format!(
            "SELECT {} FROM episodes WHERE session_id = ?1 AND status = 'active'",
            EPISODE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load active episode", e))?;

        row.as_ref().map(episode_from_row).transpose()
    }

    async fn set_status(
        &self,
        id: HippoId,
        status: EpisodeStatus,
        ended_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Episode> {
        let result = sqlx::query(
            r"
            UPDATE episodes SET status = ?1, ended_at = ?2, failure_reason = ?3
            WHERE id = ?4 AND status = 'active'
            ",
        )
        .bind(status.as_str())
        .bind(format_instant(&ended_at))
        .bind(&reason)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update episode status", e))?;

        let episode = self
            .fetch_episode(id)
            .await?
            .ok_or_else(|| HippoError::not_found("episode", id.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(HippoError::already_terminal(id.to_string(), episode.status));
        }

        debug!(episode_id = %id, status = %status, "Episode status updated");
        Ok(episode)
    }

    async fn list(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>> {
        let sql = format!(
            r"
            SELECT {} FROM episodes
            WHERE (?1 IS NULL OR scope_type = ?1)
              AND (?2 IS NULL OR scope_id = ?2)
              AND (?3 IS NULL OR session_id = ?3)
            ORDER BY started_at ASC, rowid ASC
            ",
            EPISODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(filter.scope_type.map(|t| t.as_str()))
            .bind(&filter.scope_id)
            .bind(&filter.session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list episodes", e))?;

        rows.iter().map(episode_from_row).collect()
    }

    async fn latest_ended(&self, session_id: &str) -> Result<Option<Episode>> {
        let sql = format!(
            r"
            SELECT {} FROM episodes
            WHERE session_id = ?1 AND ended_at IS NOT NULL
            ORDER BY ended_at DESC, rowid DESC
            LIMIT 1
            ",
            EPISODE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load latest episode", e))?;

        row.as_ref().map(episode_from_row).transpose()
    }
}

#[async_trait]
impl MessageStore for SqliteStorage {
    async fn insert(
        &self,
        message: &ConversationMessage,
        episode_id: Option<HippoId>,
    ) -> Result<()> {
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r"
            INSERT INTO messages (id, conversation_id, role, content, created_at,
                                  episode_id, source, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(message.id.to_string())
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.created_at)
        .bind(episode_id.map(|id| id.to_string()))
        .bind(message.source.to_db_string())
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert message", e))?;

        Ok(())
    }

    async fn insert_for_session(
        &self,
        message: &ConversationMessage,
        session_id: &str,
        fallback: Option<HippoId>,
    ) -> Result<Option<HippoId>> {
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // single statement: the active lookup cannot interleave with an update
        let row = sqlx::query(
            r"
            INSERT INTO messages (id, conversation_id, role, content, created_at,
                                  episode_id, source, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5,
                    COALESCE(
                        (SELECT id FROM episodes WHERE session_id = ?6 AND status = 'active'),
                        ?7
                    ),
                    ?8, ?9)
            RETURNING episode_id
            ",
        )
        .bind(message.id.to_string())
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.created_at)
        .bind(session_id)
        .bind(fallback.map(|id| id.to_string()))
        .bind(message.source.to_db_string())
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert message", e))?;

        let episode_id: Option<String> = get(&row, "episode_id")?;
        episode_id.as_deref().map(parse_id).transpose()
    }

    async fn get(&self, id: HippoId) -> Result<Option<ConversationMessage>> {
        let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load message", e))?;

        row.as_ref().map(message_from_row).transpose()
    }

    async fn get_by_episode(&self, episode_id: HippoId) -> Result<Vec<ConversationMessage>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE episode_id = ?1 ORDER BY rowid ASC",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(episode_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load episode messages", e))?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        // created_at is stored verbatim, so ordering happens on parsed instants
        sort_by_instant(&mut messages);
        Ok(messages)
    }

    async fn get_by_time_range(
        &self,
        conversation_id: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConversationMessage>> {
        let sql = format!(
            r"
            SELECT {} FROM messages
            WHERE conversation_id = ?1
              AND episode_id IS NULL
              AND source LIKE 'imported:%'
            ORDER BY rowid ASC
            ",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load unlinked messages", e))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let message = message_from_row(row)?;
            let in_range = match message.instant() {
                Some(t) => t >= start && end.map_or(true, |end| t <= end),
                None => false,
            };
            if in_range {
                messages.push(message);
            }
        }
        sort_by_instant(&mut messages);
        Ok(messages)
    }

    async fn link_to_episode(&self, message_ids: &[HippoId], episode_id: HippoId) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let mut linked = 0;
        for id in message_ids {
            let result = sqlx::query(
                "UPDATE messages SET episode_id = ?1 WHERE id = ?2 AND episode_id IS NULL",
            )
            .bind(episode_id.to_string())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to link message", e))?;
            linked += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit message links", e))?;

        Ok(linked)
    }
}

#[async_trait]
impl ExperienceStore for SqliteStorage {
    async fn store(&self, experience: &Experience) -> Result<()> {
        let trajectory = experience
            .trajectory
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let provenance = serde_json::to_string(&experience.provenance)?;

        sqlx::query(
            r"
            INSERT INTO experiences (id, title, scenario, outcome, confidence, trajectory,
                                     source_episode_id, scope_type, scope_id, project_id,
                                     session_id, agent_id, provenance, created_at,
                                     normalized_title)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ",
        )
        .bind(experience.id.to_string())
        .bind(&experience.title)
        .bind(&experience.scenario)
        .bind(&experience.outcome)
        .bind(experience.confidence)
        .bind(trajectory)
        .bind(experience.source_episode_id.map(|id| id.to_string()))
        .bind(experience.scope_type.as_str())
        .bind(&experience.scope_id)
        .bind(&experience.project_id)
        .bind(&experience.session_id)
        .bind(&experience.agent_id)
        .bind(provenance)
        .bind(format_instant(&experience.created_at))
        .bind(experience.normalized_title())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to store experience", e))?;

        Ok(())
    }

    async fn link_to_episode(&self, experience_id: HippoId, episode_id: HippoId) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE experiences SET source_episode_id = ?1
            WHERE id = ?2 AND (source_episode_id IS NULL OR source_episode_id = ?1)
            ",
        )
        .bind(episode_id.to_string())
        .bind(experience_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to link experience", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists = sqlx::query("SELECT 1 FROM experiences WHERE id = ?1")
            .bind(experience_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load experience", e))?
            .is_some();

        if exists {
            Err(HippoError::invalid_input(format!(
                "experience {} is already linked to another episode",
                experience_id
            )))
        } else {
            Err(HippoError::not_found("experience", experience_id.to_string()))
        }
    }

    async fn get_by_episode(&self, episode_id: HippoId) -> Result<Vec<Experience>> {
        let sql = format!(
            "SELECT {} FROM experiences WHERE source_episode_id = ?1 \
             ORDER BY created_at ASC, rowid ASC",
            EXPERIENCE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(episode_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load episode experiences", e))?;

        rows.iter().map(experience_from_row).collect()
    }

    async fn find_by_title(
        &self,
        scope_type: ScopeType,
        scope_id: Option<&str>,
        title: &str,
    ) -> Result<Option<Experience>> {
        let sql = format!(
            "SELECT {} FROM experiences \
             WHERE scope_type = ?1 AND scope_id IS ?2 AND normalized_title = ?3 \
             ORDER BY created_at ASC, rowid ASC LIMIT 1",
            EXPERIENCE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(scope_type.as_str())
            .bind(scope_id)
            .bind(normalize_title(title))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to search experiences", e))?;

        row.as_ref().map(experience_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_storage() -> Result<(SqliteStorage, TempDir)> {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test_hippo.db");
        let storage = SqliteStorage::open(&db_path, 5).await?;
        Ok((storage, temp_dir))
    }

    #[tokio::test]
    async fn test_episode_roundtrip() -> Result<()> {
        let (storage, _temp_dir) = create_test_storage().await?;

        let episode = Episode::new("s1", ScopeType::Session, Some("s1".into()), "refactor");
        storage.create(&episode).await?;

        let loaded = EpisodeStore::get(&storage, episode.id).await?.unwrap();
        assert_eq!(loaded.session_id, "s1");
        assert_eq!(loaded.scope_id.as_deref(), Some("s1"));
        assert_eq!(loaded.status, EpisodeStatus::Active);
        assert_eq!(
            loaded.started_at.timestamp_millis(),
            episode.started_at.timestamp_millis()
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_partial_unique_index() -> Result<()> {
        let (storage, _temp_dir) = create_test_storage().await?;

        let first = Episode::new("s1", ScopeType::Session, Some("s1".into()), "one");
        storage.create(&first).await?;

        let second = Episode::new("s1", ScopeType::Session, Some("s1".into()), "two");
        match storage.create(&second).await {
            Err(HippoError::ActiveEpisodeExists { episode_id, .. }) => {
                assert_eq!(episode_id, first.id.to_string());
            }
            other => panic!("expected ActiveEpisodeExists, got {:?}", other),
        }

        storage
            .set_status(first.id, EpisodeStatus::Failed, Utc::now(), Some("boom".into()))
            .await?;
        storage.create(&second).await?;

        let failed = EpisodeStore::get(&storage, first.id).await?.unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some("boom"));
        Ok(())
    }

    #[tokio::test]
    async fn test_scope_check() -> Result<()> {
        let (storage, _temp_dir) = create_test_storage().await?;
        let episode = Episode::new("s1", ScopeType::Project, None, "no scope id");
        let err = storage.create(&episode).await.unwrap_err();
        assert!(err.is_scope_resolution());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_with_null_filters() -> Result<()> {
        let (storage, _temp_dir) = create_test_storage().await?;

        let a = Episode::new("s1", ScopeType::Session, Some("s1".into()), "a");
        storage.create(&a).await?;
        storage
            .set_status(a.id, EpisodeStatus::Completed, Utc::now(), None)
            .await?;
        let b = Episode::new("s1", ScopeType::Project, Some("p1".into()), "b");
        storage.create(&b).await?;
        let c = Episode::new("s2", ScopeType::Global, None, "c");
        storage.create(&c).await?;

        assert_eq!(storage.list(&EpisodeFilter::new()).await?.len(), 3);
        assert_eq!(storage.list(&EpisodeFilter::new().session("s1")).await?.len(), 2);
        let global = storage
            .list(&EpisodeFilter::new().scope_type(ScopeType::Global))
            .await?;
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].id, c.id);
        assert_eq!(
            storage
                .list(&EpisodeFilter::new().scope(ScopeType::Project, "p1"))
                .await?[0]
                .id,
            b.id
        );
        Ok(())
    }

    fn experience(title: &str) -> Experience {
        let mut experience = Experience::new(
            title,
            "scenario",
            "outcome",
            ExperienceSource::Extraction {
                provider: "fake".into(),
            },
        );
        experience.scope_type = ScopeType::Project;
        experience.scope_id = Some("p1".into());
        experience
    }

    #[tokio::test]
    async fn test_find_by_title_uses_title_index() -> Result<()> {
        let (storage, _temp_dir) = create_test_storage().await?;
        for i in 0..20 {
            storage.store(&experience(&format!("Other lesson {}", i))).await?;
        }
        let wanted = experience("  Retry  The Upload ");
        storage.store(&wanted).await?;

        let stored: String =
            sqlx::query_scalar("SELECT normalized_title FROM experiences WHERE id = ?1")
                .bind(wanted.id.to_string())
                .fetch_one(&storage.pool)
                .await
                .unwrap();
        assert_eq!(stored, "retry the upload");

        let plan = sqlx::query(
            "EXPLAIN QUERY PLAN SELECT id FROM experiences \
             WHERE scope_type = ?1 AND scope_id IS ?2 AND normalized_title = ?3",
        )
        .bind("project")
        .bind("p1")
        .bind("retry the upload")
        .fetch_all(&storage.pool)
        .await
        .unwrap();
        let details: Vec<String> = plan.iter().map(|row| row.get("detail")).collect();
        assert!(
            details.iter().any(|d| d.contains("idx_experiences_title")),
            "plan: {:?}",
            details
        );

        let hit = storage
            .find_by_title(ScopeType::Project, Some("p1"), "RETRY the upload")
            .await?
            .unwrap();
        assert_eq!(hit.id, wanted.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_backfills_normalized_title() -> Result<()> {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("legacy.db");

        let legacy = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&db_path)
                    .create_if_missing(true),
            )
            .await
            .unwrap();
        sqlx::query(
            r"
            CREATE TABLE experiences (
                id TEXT PRIMARY KEY NOT NULL, title TEXT NOT NULL, scenario TEXT NOT NULL,
                outcome TEXT NOT NULL, confidence REAL, trajectory TEXT,
                source_episode_id TEXT, scope_type TEXT NOT NULL, scope_id TEXT,
                project_id TEXT, session_id TEXT, agent_id TEXT,
                provenance TEXT NOT NULL, created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&legacy)
        .await
        .unwrap();
        let old = experience("Pin  The Seed");
        sqlx::query(
            "INSERT INTO experiences (id, title, scenario, outcome, scope_type, scope_id, \
             provenance, created_at) VALUES (?1, ?2, 's', 'o', 'project', 'p1', ?3, ?4)",
        )
        .bind(old.id.to_string())
        .bind(&old.title)
        .bind(serde_json::to_string(&old.provenance)?)
        .bind(format_instant(&old.created_at))
        .execute(&legacy)
        .await
        .unwrap();
        legacy.close().await;

        let storage = SqliteStorage::open(&db_path, 2).await?;
        let hit = storage
            .find_by_title(ScopeType::Project, Some("p1"), "pin the seed")
            .await?
            .map(|e| e.id);
        assert_eq!(hit, Some(old.id));

        // reopening finds the column and leaves it alone
        drop(storage);
        let storage = SqliteStorage::open(&db_path, 2).await?;
        assert!(
            storage
                .find_by_title(ScopeType::Project, Some("p1"), "pin the seed")
                .await?
                .is_some()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_in_memory_database() -> Result<()> {
        let storage = SqliteStorage::in_memory().await?;
        let msg = ConversationMessage::new("c1", Role::Assistant, "hi").with_metadata(
            MessageMetadata {
                tokens: Some(12),
                tool_calls: vec!["grep".into()],
                is_error: false,
            },
        );
        let episode_id = HippoId::new();
        storage.insert(&msg, Some(episode_id)).await?;

        let loaded = MessageStore::get_by_episode(&storage, episode_id).await?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].metadata.as_ref().unwrap().tokens, Some(12));
        assert_eq!(loaded[0].source, MessageSource::Direct);
        Ok(())
    }
}

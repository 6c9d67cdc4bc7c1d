//! Behaviour shared by every storage backend.

use chrono::{Duration, TimeZone, Utc};
use futures::future::join_all;
use hippo_core::prelude::*;
use hippo_storage::{MemoryStorage, SqliteStorage, StorageBackend, Stores};
use tempfile::TempDir;

async fn backends() -> Result<(Vec<(&'static str, Stores)>, TempDir)> {
    let temp_dir = tempfile::tempdir()?;
    let sqlite = SqliteStorage::open(&temp_dir.path().join("contract.db"), 5).await?;
    Ok((
        vec![
            ("memory", Stores::from_backend(MemoryStorage::new())),
            ("sqlite", Stores::from_backend(sqlite)),
        ],
        temp_dir,
    ))
}

fn imported(conversation: &str, created_at: &str) -> ConversationMessage {
    ConversationMessage::new(conversation, Role::User, format!("at {}", created_at))
        .with_created_at(created_at)
        .with_source(MessageSource::Imported("jsonl".into()))
}

#[tokio::test]
async fn test_concurrent_creates_admit_one_active_episode() -> Result<()> {
    let (backends, _temp_dir) = backends().await?;

    for (name, stores) in backends {
        let attempts = (0..8).map(|i| {
            let episodes = stores.episodes.clone();
            async move {
                let episode = Episode::new(
                    "racy",
                    ScopeType::Session,
                    Some("racy".to_string()),
                    format!("attempt {}", i),
                );
                episodes.create(&episode).await
            }
        });

        let results = join_all(attempts).await;
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "backend {}", name);
        for result in results.iter().filter(|r| r.is_err()) {
            assert!(
                matches!(result, Err(HippoError::ActiveEpisodeExists { .. })),
                "backend {} returned {:?}",
                name,
                result
            );
        }

        let active = stores.episodes.list(&EpisodeFilter::new().session("racy")).await?;
        assert_eq!(active.len(), 1, "backend {}", name);
    }

    Ok(())
}

#[tokio::test]
async fn test_time_range_compares_parsed_instants() -> Result<()> {
    let (backends, _temp_dir) = backends().await?;
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let end = start + Duration::seconds(60);

    for (name, stores) in backends {
        let messages = vec![
            imported("c1", "2024-01-01T00:00:00Z"),
            imported("c1", "2024-01-01T05:30:30+05:30"),
            imported("c1", "2024-01-01 00:01:00.000"),
            imported("c1", "2024-01-01T00:01:00.001Z"),
            imported("c1", "yesterday-ish"),
            imported("c2", "2024-01-01T00:00:10Z"),
        ];
        for message in &messages {
            stores.messages.insert(message, None).await?;
        }
        // direct rows are never range candidates
        let direct = ConversationMessage::new("c1", Role::User, "live")
            .with_created_at("2024-01-01T00:00:20Z");
        stores.messages.insert(&direct, None).await?;

        let found = stores
            .messages
            .get_by_time_range("c1", start, Some(end))
            .await?;
        let ids: Vec<_> = found.iter().map(|m| m.id).collect();
        assert_eq!(
            ids,
            vec![messages[0].id, messages[1].id, messages[2].id],
            "backend {}",
            name
        );

        let open_ended = stores.messages.get_by_time_range("c1", start, None).await?;
        assert_eq!(open_ended.len(), 4, "backend {}", name);
    }

    Ok(())
}

#[tokio::test]
async fn test_messages_by_episode_follow_parsed_order() -> Result<()> {
    let (backends, _temp_dir) = backends().await?;

    for (name, stores) in backends {
        let episode_id = HippoId::new();
        let late = ConversationMessage::new("c1", Role::Assistant, "late")
            .with_created_at("2024-01-01T00:00:01.5Z");
        let early = ConversationMessage::new("c1", Role::User, "early")
            .with_created_at("2024-01-01T05:30:01+05:30");
        stores.messages.insert(&late, Some(episode_id)).await?;
        stores.messages.insert(&early, Some(episode_id)).await?;

        let contents: Vec<_> = stores
            .messages
            .get_by_episode(episode_id)
            .await?
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["early", "late"], "backend {}", name);
    }

    Ok(())
}

#[tokio::test]
async fn test_insert_for_session_stamps_active_episode() -> Result<()> {
    let (backends, _temp_dir) = backends().await?;

    for (name, stores) in backends {
        let fallback = HippoId::new();
        let orphan = ConversationMessage::new("s1", Role::User, "before");
        let stamped = stores
            .messages
            .insert_for_session(&orphan, "s1", Some(fallback))
            .await?;
        assert_eq!(stamped, Some(fallback), "backend {}", name);

        let episode = Episode::new("s1", ScopeType::Session, Some("s1".into()), "work");
        stores.episodes.create(&episode).await?;
        let during = ConversationMessage::new("s1", Role::User, "during");
        let stamped = stores
            .messages
            .insert_for_session(&during, "s1", Some(fallback))
            .await?;
        assert_eq!(stamped, Some(episode.id), "backend {}", name);

        stores
            .episodes
            .set_status(episode.id, EpisodeStatus::Completed, Utc::now(), None)
            .await?;
        let after = ConversationMessage::new("s1", Role::User, "after");
        let stamped = stores.messages.insert_for_session(&after, "s1", None).await?;
        assert_eq!(stamped, None, "backend {}", name);

        let linked: Vec<_> = stores
            .messages
            .get_by_episode(episode.id)
            .await?
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(linked, vec!["during"], "backend {}", name);
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_insert_for_session_races_completion() -> Result<()> {
    let (backends, _temp_dir) = backends().await?;

    for (name, stores) in backends {
        let episode = Episode::new("s1", ScopeType::Session, Some("s1".into()), "racy");
        stores.episodes.create(&episode).await?;

        let writers: Vec<_> = (0..32)
            .map(|i| {
                let messages = stores.messages.clone();
                tokio::spawn(async move {
                    let message = ConversationMessage::new("s1", Role::User, format!("m{}", i));
                    messages.insert_for_session(&message, "s1", None).await
                })
            })
            .collect();
        let episodes = stores.episodes.clone();
        let closer = tokio::spawn(async move {
            episodes
                .set_status(episode.id, EpisodeStatus::Completed, Utc::now(), None)
                .await
        });

        let mut stamped = 0;
        for writer in writers {
            if writer.await.expect("writer task")?.is_some() {
                stamped += 1;
            }
        }
        closer.await.expect("closer task")?;

        // a stamped row always points at the episode that was active when it landed
        let linked = stores.messages.get_by_episode(episode.id).await?;
        assert_eq!(linked.len(), stamped, "backend {}", name);
        assert!(stores.episodes.get_active("s1").await?.is_none(), "backend {}", name);
    }

    Ok(())
}

#[tokio::test]
async fn test_find_by_title_is_scoped_and_normalised() -> Result<()> {
    let (backends, _temp_dir) = backends().await?;

    for (name, stores) in backends {
        let mut experience = Experience::new(
            "Fix  Flaky Test",
            "ci was red",
            "pinned the seed",
            ExperienceSource::Extraction {
                provider: "fake".into(),
            },
        );
        experience.scope_type = ScopeType::Project;
        experience.scope_id = Some("p1".into());
        experience.confidence = Some(0.9);
        experience.trajectory = Some(serde_json::json!({ "steps": 3 }));
        stores.experiences.store(&experience).await?;

        let hit = stores
            .experiences
            .find_by_title(ScopeType::Project, Some("p1"), "fix flaky test")
            .await?
            .expect("normalised title should match");
        assert_eq!(hit.id, experience.id, "backend {}", name);
        assert_eq!(hit.confidence, Some(0.9));
        assert_eq!(hit.trajectory, experience.trajectory);

        let miss = stores
            .experiences
            .find_by_title(ScopeType::Project, Some("p2"), "fix flaky test")
            .await?;
        assert!(miss.is_none(), "backend {}", name);
    }

    Ok(())
}

#[tokio::test]
async fn test_backend_from_config() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let mut config = HippoConfig::default();
    config.database.path = Some(temp_dir.path().join("nested").join("hippo.db"));

    let backend = StorageBackend::from_config(&config)?;
    assert!(matches!(backend, StorageBackend::Sqlite { .. }));
    let stores = Stores::open(&backend).await?;

    let episode = Episode::new("s1", ScopeType::Global, None, "global work");
    stores.episodes.create(&episode).await?;
    assert_eq!(
        stores.episodes.get_active("s1").await?.map(|e| e.id),
        Some(episode.id)
    );

    config.database.backend = "memory".into();
    assert!(matches!(
        StorageBackend::from_config(&config)?,
        StorageBackend::Memory
    ));

    config.database.backend = "postgres".into();
    assert!(StorageBackend::from_config(&config).is_err());

    Ok(())
}

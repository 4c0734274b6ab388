mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::{TelemetryEvent, TestContext};
use common_cache::codec::{MARKER_GZIP, MARKER_RAW};
use common_cache::{
    CacheEntry, CacheError, CacheKey, CacheLayer, CacheOperation, CachePolicy, CacheSettings,
    InvalidationKind, InvalidationTargets, PipelineOperation,
};
use common_redis::{CustomRedisError, MockRedisClient};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Todo {
    id: i64,
    title: String,
    notes: String,
}

fn todo(id: i64) -> Todo {
    Todo {
        id,
        title: format!("todo {id}"),
        notes: "remember the milk ".repeat(200),
    }
}

fn key(feature: &str, value: &str) -> CacheKey {
    CacheKey::new(feature, value).unwrap()
}

#[tokio::test]
async fn test_set_get_remove_by_feature_example() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let cancel = CancellationToken::new();
    let todos_1 = key("todos", "1");

    ctx.store
        .set(
            &todos_1,
            &CacheEntry::with_value(42),
            Duration::from_secs(300),
            Some("v1"),
            false,
            &cancel,
        )
        .await?;

    let entry = ctx.store.get::<i32>(&todos_1, Some("v1"), &cancel).await?;
    assert_eq!(
        entry,
        Some(CacheEntry {
            value: Some(42),
            has_value: true
        })
    );

    ctx.store.remove_by_feature("todos", &cancel).await?;
    assert_eq!(ctx.store.get::<i32>(&todos_1, Some("v1"), &cancel).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_repeated_miss_is_idempotent() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        let entry = ctx
            .store
            .get::<Todo>(&key("todos", "404"), Some("v1"), &cancel)
            .await?;
        assert_eq!(entry, None);
    }

    assert_eq!(
        ctx.telemetry
            .count(|e| matches!(e, TelemetryEvent::Miss(f) if f == "todos")),
        3
    );
    assert!(ctx.client.calls_for("set_bytes").is_empty());
    assert!(ctx.client.calls_for("del").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_round_trip_with_and_without_compression() -> anyhow::Result<()> {
    let ctx = TestContext::with_settings(CacheSettings {
        compression_threshold_bytes: 256,
        ..CacheSettings::default()
    });
    let cancel = CancellationToken::new();

    for (id, use_compression, marker) in [("1", false, MARKER_RAW), ("2", true, MARKER_GZIP)] {
        let k = key("todos", id);
        let value = todo(id.parse()?);

        let result = ctx
            .store
            .set(
                &k,
                &CacheEntry::with_value(value.clone()),
                Duration::from_secs(60),
                Some("v1"),
                use_compression,
                &cancel,
            )
            .await?;
        assert_eq!(result.is_compressed, use_compression);

        let stored = ctx.client.stored_bytes(&k.wire_key(Some("v1"))).unwrap();
        assert_eq!(stored[0], marker);

        let entry = ctx.store.get::<Todo>(&k, Some("v1"), &cancel).await?;
        assert_eq!(entry.and_then(CacheEntry::into_value), Some(value));
    }

    let sizes: Vec<bool> = ctx
        .telemetry
        .events()
        .into_iter()
        .filter_map(|e| match e {
            TelemetryEvent::EntrySize { compressed, .. } => Some(compressed),
            _ => None,
        })
        .collect();
    assert_eq!(sizes, vec![false, true]);
    assert_eq!(
        ctx.telemetry
            .count(|e| matches!(e, TelemetryEvent::CompressionRatio(_, r) if *r > 1.0)),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_version_isolation() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let cancel = CancellationToken::new();
    let k = key("todos", "1");

    ctx.store
        .set(
            &k,
            &CacheEntry::with_value("old"),
            Duration::from_secs(60),
            Some("v1"),
            false,
            &cancel,
        )
        .await?;

    assert_eq!(ctx.store.get::<String>(&k, Some("v2"), &cancel).await?, None);
    assert_eq!(ctx.store.get::<String>(&k, None, &cancel).await?, None);
    assert!(ctx.store.get::<String>(&k, Some("v1"), &cancel).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_version_bump_orphans_cached_reads() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let layer = CacheLayer::new(ctx.store.clone());
    let cancel = CancellationToken::new();
    let policy = CachePolicy::new(key("todos", "1"));

    let first: String = layer
        .caching()
        .handle(Some(&policy), &cancel, || async {
            Ok::<_, CacheError>("from v1".to_string())
        })
        .await?;
    assert_eq!(first, "from v1");

    ctx.settings.replace(CacheSettings {
        feature_versions: HashMap::from([("todos".to_string(), "v2".to_string())]),
        ..CacheSettings::default()
    });

    let second: String = layer
        .caching()
        .handle(Some(&policy), &cancel, || async {
            Ok::<_, CacheError>("from v2".to_string())
        })
        .await?;
    assert_eq!(second, "from v2");
    assert!(ctx.client.contains_key("v1:todos:1"));
    assert!(ctx.client.contains_key("v2:todos:1"));
    Ok(())
}

#[tokio::test]
async fn test_feature_invalidation_is_complete_across_versions() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let cancel = CancellationToken::new();

    for (version, id) in [("v1", "1"), ("v1", "2"), ("v2", "3"), ("v9", "4")] {
        ctx.store
            .set(
                &key("todos", id),
                &CacheEntry::with_value(id),
                Duration::from_secs(60),
                Some(version),
                false,
                &cancel,
            )
            .await?;
    }
    ctx.store
        .set(
            &key("users", "1"),
            &CacheEntry::with_value("alice"),
            Duration::from_secs(60),
            Some("v1"),
            false,
            &cancel,
        )
        .await?;

    let removed = ctx.store.remove_by_feature("todos", &cancel).await?;
    assert_eq!(removed, 4);

    for (version, id) in [("v1", "1"), ("v1", "2"), ("v2", "3"), ("v9", "4")] {
        assert_eq!(
            ctx.store
                .get::<String>(&key("todos", id), Some(version), &cancel)
                .await?,
            None
        );
    }
    assert!(ctx
        .store
        .get::<String>(&key("users", "1"), Some("v1"), &cancel)
        .await?
        .is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writes_racing_feature_invalidation_stay_reachable() -> anyhow::Result<()> {
    let ctx = TestContext::new();

    let writers = (0..4).map(|writer| {
        let store = ctx.store.clone();
        tokio::spawn(async move {
            for i in 0..50 {
                store
                    .set(
                        &key("todos", &format!("{writer}-{i}")),
                        &CacheEntry::with_value(i),
                        Duration::from_secs(60),
                        Some("v1"),
                        false,
                        &CancellationToken::new(),
                    )
                    .await?;
                tokio::task::yield_now().await;
            }
            Ok::<_, CacheError>(())
        })
    });
    let invalidator = {
        let store = ctx.store.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                store
                    .remove_by_feature("todos", &CancellationToken::new())
                    .await?;
                tokio::task::yield_now().await;
            }
            Ok::<_, CacheError>(())
        })
    };

    for writer in futures::future::join_all(writers).await {
        writer??;
    }
    invalidator.await??;

    // Every entry that survived is still listed in the tag set
    let members = ctx.client.set_members("tag:todos");
    let mut live = 0;
    for writer in 0..4 {
        for i in 0..50 {
            let wire_key = format!("v1:todos:{writer}-{i}");
            if ctx.client.contains_key(&wire_key) {
                assert!(members.contains(&wire_key), "{wire_key} is not tagged");
                live += 1;
            }
        }
    }

    let cancel = CancellationToken::new();
    assert_eq!(ctx.store.remove_by_feature("todos", &cancel).await?, live);
    for writer in 0..4 {
        for i in 0..50 {
            assert!(!ctx.client.contains_key(&format!("v1:todos:{writer}-{i}")));
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_tag_set_ttl_only_grows() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let cancel = CancellationToken::new();

    for (id, secs) in [("1", 3600), ("2", 60)] {
        ctx.store
            .set(
                &key("todos", id),
                &CacheEntry::with_value(id),
                Duration::from_secs(secs),
                Some("v1"),
                false,
                &cancel,
            )
            .await?;
    }

    assert_eq!(ctx.client.ttl_of("tag:todos"), Some(3600 + 300));
    Ok(())
}

#[tokio::test]
async fn test_corrupted_entry_heals() -> anyhow::Result<()> {
    let mut client = MockRedisClient::new();
    client.get_raw_bytes_ret("v1:todos:1", Ok(vec![0x7f, 1, 2, 3]));
    client.smembers_ret("tag:todos", Ok(vec!["v1:todos:1".to_string()]));
    let ctx = TestContext::with_client(client, CacheSettings::default());
    let cancel = CancellationToken::new();

    let entry = ctx
        .store
        .get::<Todo>(&key("todos", "1"), Some("v1"), &cancel)
        .await?;

    assert_eq!(entry, None);
    assert!(!ctx.client.contains_key("v1:todos:1"));
    assert!(ctx.client.set_members("tag:todos").is_empty());
    assert_eq!(
        ctx.telemetry
            .count(|e| matches!(e, TelemetryEvent::Corrupted(f) if f == "todos")),
        1
    );

    // The next read is a plain miss
    assert_eq!(
        ctx.store
            .get::<Todo>(&key("todos", "1"), Some("v1"), &cancel)
            .await?,
        None
    );
    assert_eq!(
        ctx.telemetry
            .count(|e| matches!(e, TelemetryEvent::Corrupted(_))),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_type_mismatch_counts_as_corruption() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let cancel = CancellationToken::new();
    let k = key("todos", "1");

    ctx.store
        .set(
            &k,
            &CacheEntry::with_value("not a todo"),
            Duration::from_secs(60),
            Some("v1"),
            false,
            &cancel,
        )
        .await?;

    assert_eq!(ctx.store.get::<Todo>(&k, Some("v1"), &cancel).await?, None);
    assert!(!ctx.client.contains_key("v1:todos:1"));
    Ok(())
}

#[tokio::test]
async fn test_degraded_client_skips_tags() -> anyhow::Result<()> {
    let client = MockRedisClient::new().without_set_operations();
    let ctx = TestContext::with_client(client, CacheSettings::default());
    let cancel = CancellationToken::new();
    let k = key("todos", "1");

    ctx.store
        .set(
            &k,
            &CacheEntry::with_value(1),
            Duration::from_secs(60),
            Some("v1"),
            false,
            &cancel,
        )
        .await?;
    assert!(ctx.client.contains_key("v1:todos:1"));
    assert!(!ctx.client.contains_key("tag:todos"));

    assert_eq!(ctx.store.remove_by_feature("todos", &cancel).await?, 0);
    assert!(ctx.client.contains_key("v1:todos:1"));

    ctx.store.remove(&k, Some("v1"), &cancel).await?;
    assert!(!ctx.client.contains_key("v1:todos:1"));
    Ok(())
}

#[tokio::test]
async fn test_store_outage_is_reported_in_operation_telemetry() {
    let mut client = MockRedisClient::new();
    client.set_ret(
        "v1:todos:1",
        Err(CustomRedisError::from_redis_kind(
            common_redis::RedisErrorKind::IoError,
            "Connection refused",
        )),
    );
    let ctx = TestContext::with_client(client, CacheSettings::default());

    let result = ctx
        .store
        .set(
            &key("todos", "1"),
            &CacheEntry::with_value(1),
            Duration::from_secs(60),
            Some("v1"),
            false,
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(CacheError::Store(_))));
    assert!(ctx.telemetry.events().contains(&TelemetryEvent::Operation {
        operation: CacheOperation::Set,
        feature: "todos".to_string(),
        success: false,
    }));
}

struct ListTodos;

impl PipelineOperation for ListTodos {
    fn cache_policy(&self) -> Option<CachePolicy> {
        CacheKey::new("todos", "all").ok().map(CachePolicy::new)
    }
}

struct CreateTodo;

impl PipelineOperation for CreateTodo {
    fn invalidation_targets(&self) -> Option<InvalidationTargets> {
        Some(InvalidationTargets::new().with_feature("todos"))
    }
}

#[tokio::test]
async fn test_pipeline_write_invalidates_cached_list() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let layer = CacheLayer::new(ctx.store.clone());
    let cancel = CancellationToken::new();

    let list: Vec<Todo> = layer
        .run(&ListTodos, &cancel, || async {
            Ok::<_, CacheError>(vec![todo(1)])
        })
        .await?;
    assert_eq!(list.len(), 1);
    assert!(ctx.client.contains_key("v1:todos:all"));

    layer
        .run(&CreateTodo, &cancel, || async { Ok::<_, CacheError>(todo(2)) })
        .await?;
    assert!(!ctx.client.contains_key("v1:todos:all"));
    assert!(ctx.telemetry.events().contains(&TelemetryEvent::Invalidation {
        kind: InvalidationKind::Feature,
        feature: "todos".to_string(),
        affected: 1,
    }));

    let list: Vec<Todo> = layer
        .run(&ListTodos, &cancel, || async {
            Ok::<_, CacheError>(vec![todo(1), todo(2)])
        })
        .await?;
    assert_eq!(list.len(), 2);
    Ok(())
}

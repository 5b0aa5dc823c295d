//! Embedded KV Concurrency Tests
//!
//! Integration tests for the connection manager's core guarantee: one live
//! RocksDB handle per identifier, no matter how requests interleave.
//!
//! ## Test Coverage
//! - Many concurrent writers and readers on one identifier never hit the lock
//! - Distinct identifiers are independent of each other
//! - Immediate release under churn reopens cleanly
//! - Create/update/delete semantics through the adapter

#[cfg(test)]
mod kv_concurrency_tests {
    use anyhow::Result;
    use dbgate_core::config::{EmbeddedKvConfig, ReleasePolicyKind};
    use dbgate_core::db::{ConnectionManager, ErrorKind, KvAdapter};
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    fn adapter(root: &Path, policy: ReleasePolicyKind) -> KvAdapter {
        KvAdapter::new(ConnectionManager::new(EmbeddedKvConfig {
            root: root.to_path_buf(),
            release_policy: policy,
            idle_grace_ms: 200,
            acquire_timeout_ms: 10_000,
            sync_writes: false,
        }))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_and_gets_on_one_identifier() -> Result<()> {
        let dir = TempDir::new()?;
        let kv = adapter(dir.path(), ReleasePolicyKind::Immediate);

        let mut tasks = Vec::new();
        for i in 0..64 {
            let kv = kv.clone();
            tasks.push(tokio::spawn(async move {
                let key = format!("k{}", i);
                kv.put("shared", &key, &json!({ "n": i })).await?;
                kv.get("shared", &key).await
            }));
        }

        for (i, task) in tasks.into_iter().enumerate() {
            let value = task.await??;
            assert_eq!(value, json!({ "n": i }));
        }

        let all = kv.scan("shared", "").await?;
        assert_eq!(all.len(), 64);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_release_churn_never_reports_lock_conflict() -> Result<()> {
        let dir = TempDir::new()?;
        let kv = adapter(dir.path(), ReleasePolicyKind::Immediate);
        kv.put("churn", "counter", &json!(0)).await?;

        // Sequential bursts force the handle to close and reopen repeatedly
        for round in 0..20 {
            let mut tasks = Vec::new();
            for _ in 0..4 {
                let kv = kv.clone();
                tasks.push(tokio::spawn(async move { kv.get("churn", "counter").await }));
            }
            for task in tasks {
                let result = task.await?;
                assert!(
                    result.is_ok(),
                    "round {} failed: {:?}",
                    round,
                    result.unwrap_err()
                );
            }
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_identifiers_are_independent() -> Result<()> {
        let dir = TempDir::new()?;
        let kv = adapter(dir.path(), ReleasePolicyKind::Idle);

        let mut tasks = Vec::new();
        for db in ["alpha", "beta", "gamma"] {
            for i in 0..10 {
                let kv = kv.clone();
                tasks.push(tokio::spawn(async move {
                    kv.put(db, &format!("key{}", i), &json!(db)).await
                }));
            }
        }
        for task in tasks {
            assert_ok!(task.await?);
        }

        assert_eq!(kv.manager().open_count(), 3);
        assert_eq!(kv.get("beta", "key3").await?, json!("beta"));

        kv.manager().shutdown().await;
        assert_eq!(kv.manager().open_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_leases_share_one_handle() -> Result<()> {
        let dir = TempDir::new()?;
        let manager = ConnectionManager::new(EmbeddedKvConfig {
            root: dir.path().to_path_buf(),
            release_policy: ReleasePolicyKind::Immediate,
            ..Default::default()
        });

        let first = manager.acquire("db1").await?;
        let second = manager.acquire("db1").await?;
        let other = manager.acquire("db2").await?;

        assert!(first.same_handle(&second));
        assert!(!first.same_handle(&other));
        assert_eq!(manager.open_count(), 2);

        manager.release(first);
        assert_eq!(manager.open_count(), 2);
        manager.release(second);
        assert_eq!(manager.open_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_key_lifecycle() -> Result<()> {
        let dir = TempDir::new()?;
        let kv = adapter(dir.path(), ReleasePolicyKind::Immediate);

        kv.put("db1", "user:42", &json!({"name": "a"})).await?;

        let err = kv
            .put("db1", "user:42", &json!({"name": "b"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(kv.get("db1", "user:42").await?, json!({"name": "a"}));

        let err = kv.update("db1", "user:7", &json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            kv.get("db1", "user:7").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );

        kv.update("db1", "user:42", &json!({"name": "c"})).await?;
        assert_eq!(kv.get("db1", "user:42").await?, json!({"name": "c"}));

        kv.delete("db1", "user:42").await?;
        kv.delete("db1", "user:42").await?;
        assert_eq!(
            kv.get("db1", "user:42").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_scan_pattern_is_bad_request() -> Result<()> {
        let dir = TempDir::new()?;
        let kv = adapter(dir.path(), ReleasePolicyKind::Immediate);
        let err = kv.scan("db1", "(unclosed").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        Ok(())
    }
}

//! Dispatcher Integration Tests
//!
//! Drives the dispatcher with raw JSON envelopes against real local-sql and
//! embedded-kv engines in temporary directories. The networked engine is
//! replaced by a stub adapter so these tests run without a server.
//!
//! ## Test Coverage
//! - Key-value create/select/conflict round trip from the envelope examples
//! - Local SQL schema, parameterized writes and typed reads
//! - Placeholder mismatches rejected as BadRequest
//! - Unsupported engine/operation pairs
//! - Adapter panics contained as Internal errors
//! - Legacy field names

#[cfg(test)]
mod dispatcher_tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use dbgate_core::config::{EmbeddedKvConfig, LocalSqlConfig, ReleasePolicyKind};
    use dbgate_core::db::{
        ConnectionManager, ErrorKind, GatewayResult, KvAdapter, LocalSqlAdapter, SqlAdapter,
    };
    use dbgate_core::models::{CanonicalValue, Engine, ResultSet};
    use dbgate_core::services::{Dispatcher, Status};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Stand-in for the networked engine that fails loudly
    struct PanickingAdapter;

    #[async_trait]
    impl SqlAdapter for PanickingAdapter {
        fn engine(&self) -> Engine {
            Engine::NetworkSql
        }

        async fn query(
            &self,
            _target: &str,
            _statement: &str,
            _params: &[CanonicalValue],
        ) -> GatewayResult<ResultSet> {
            panic!("driver exploded");
        }

        async fn execute(
            &self,
            _target: &str,
            _statement: &str,
            _params: &[CanonicalValue],
        ) -> GatewayResult<u64> {
            panic!("driver exploded");
        }

        async fn alter(&self, _target: &str, _statement: &str) -> GatewayResult<()> {
            panic!("driver exploded");
        }
    }

    fn dispatcher(dir: &TempDir) -> Dispatcher {
        let local = LocalSqlAdapter::new(LocalSqlConfig {
            root: dir.path().join("sql"),
            ..Default::default()
        });
        let kv = KvAdapter::new(ConnectionManager::new(EmbeddedKvConfig {
            root: dir.path().join("kv"),
            release_policy: ReleasePolicyKind::Immediate,
            sync_writes: false,
            ..Default::default()
        }));
        Dispatcher::new(Arc::new(local), Arc::new(PanickingAdapter), kv)
    }

    async fn call(dispatcher: &Dispatcher, envelope: Value) -> Result<Value> {
        Ok(serde_json::to_value(dispatcher.dispatch(envelope).await)?)
    }

    #[tokio::test]
    async fn test_kv_exec_select_and_conflict() -> Result<()> {
        let dir = TempDir::new()?;
        let d = dispatcher(&dir);
        let put = json!({
            "engine": "embedded-kv", "target": "db1", "operation": "exec",
            "statement": "user:42", "parameters": [{"name": "a"}]
        });

        assert_eq!(call(&d, put.clone()).await?, json!({"status": "success", "data": "ok"}));

        let got = call(
            &d,
            json!({"engine": "embedded-kv", "target": "db1", "operation": "select", "statement": "user:42"}),
        )
        .await?;
        assert_eq!(got, json!({"status": "success", "data": {"name": "a"}}));

        let again = call(&d, put).await?;
        assert_eq!(again["status"], "error");
        assert_eq!(again["kind"], "CONFLICT");
        assert_eq!(again["message"], "key exists: user:42");
        Ok(())
    }

    #[tokio::test]
    async fn test_kv_update_delete_scan() -> Result<()> {
        let dir = TempDir::new()?;
        let d = dispatcher(&dir);
        let kv = |operation: &str, key: &str, params: Value| {
            json!({"engine": "embedded-kv", "target": "db1", "operation": operation,
                   "statement": key, "parameters": params})
        };

        let missing = call(&d, kv("update", "a", json!([1]))).await?;
        assert_eq!(missing["kind"], "NOT_FOUND");

        call(&d, kv("exec", "b", json!([2]))).await?;
        call(&d, kv("exec", "a", json!([1, 2]))).await?;
        call(&d, kv("update", "b", json!(["two"]))).await?;

        let scanned = call(&d, kv("scan", "", Value::Null)).await?;
        assert_eq!(
            scanned,
            json!({"status": "success", "data": {"a": [1, 2], "b": "two"}})
        );

        let deleted = call(&d, kv("delete", "nope", Value::Null)).await?;
        assert_eq!(deleted["status"], "success");

        let alter = call(&d, kv("alter", "a", Value::Null)).await?;
        assert_eq!(alter["kind"], "BAD_REQUEST");
        Ok(())
    }

    #[tokio::test]
    async fn test_local_sql_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let d = dispatcher(&dir);
        let sql = |operation: &str, statement: &str, params: Value| {
            json!({"engine": "local-sql", "target": "app.db", "operation": operation,
                   "statement": statement, "parameters": params})
        };

        let created = call(
            &d,
            sql(
                "alter",
                "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, price REAL, note TEXT)",
                Value::Null,
            ),
        )
        .await?;
        assert_eq!(created, json!({"status": "success", "data": "ok"}));

        let inserted = call(
            &d,
            sql(
                "exec",
                "INSERT INTO items (name, price, note) VALUES (?, ?, ?), (?, ?, ?)",
                json!(["pen", 1.5, null, "ink", 3, "it's"]),
            ),
        )
        .await?;
        assert_eq!(inserted, json!({"status": "success", "data": 2}));

        let rows = call(
            &d,
            sql(
                "select",
                "SELECT id, name, price, note FROM items WHERE price > ? ORDER BY id",
                json!([1]),
            ),
        )
        .await?;
        assert_eq!(
            rows,
            json!({"status": "success", "data": [
                {"id": 1, "name": "pen", "price": 1.5, "note": null},
                {"id": 2, "name": "ink", "price": 3.0, "note": "it's"}
            ]})
        );

        // column order follows the statement, not the alphabet
        let ordered = d
            .dispatch(sql("select", "SELECT note, id FROM items WHERE id = 1", Value::Null))
            .await;
        let text = serde_json::to_string(&ordered)?;
        assert!(text.contains(r#"{"note":null,"id":1}"#));
        Ok(())
    }

    #[tokio::test]
    async fn test_local_sql_blob_stays_binary() -> Result<()> {
        let dir = TempDir::new()?;
        let d = dispatcher(&dir);
        let sql = |operation: &str, statement: &str| {
            json!({"engine": "local-sql", "target": "bin.db", "operation": operation,
                   "statement": statement})
        };

        call(&d, sql("alter", "CREATE TABLE b (data BLOB)")).await?;
        call(&d, sql("exec", "INSERT INTO b VALUES (X'00FF10')")).await?;

        let rows = call(&d, sql("select", "SELECT data FROM b")).await?;
        assert_eq!(rows["data"][0]["data"], "AP8Q");
        Ok(())
    }

    #[tokio::test]
    async fn test_placeholder_mismatch_is_bad_request() -> Result<()> {
        let dir = TempDir::new()?;
        let d = dispatcher(&dir);

        let response = d
            .dispatch(json!({
                "engine": "local-sql", "target": "app.db", "operation": "select",
                "statement": "SELECT ? + ?", "parameters": [1]
            }))
            .await;

        assert_eq!(response.status, Status::Error);
        assert_eq!(response.error_kind(), Some(ErrorKind::BadRequest));
        assert!(response.message.unwrap_or_default().contains("expects 2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_statement_error_is_statement_failed() -> Result<()> {
        let dir = TempDir::new()?;
        let d = dispatcher(&dir);

        let response = call(
            &d,
            json!({"engine": "local-sql", "target": "app.db", "operation": "select",
                   "statement": "SELECT * FROM missing_table"}),
        )
        .await?;
        assert_eq!(response["kind"], "STATEMENT_FAILED");
        Ok(())
    }

    #[tokio::test]
    async fn test_panicking_adapter_becomes_internal_error() -> Result<()> {
        let dir = TempDir::new()?;
        let d = dispatcher(&dir);

        let response = call(
            &d,
            json!({"engine": "network-sql", "target": "shop", "operation": "select",
                   "statement": "SELECT 1"}),
        )
        .await?;
        assert_eq!(response["status"], "error");
        assert_eq!(response["kind"], "INTERNAL");

        // the dispatcher keeps serving afterwards
        let next = call(
            &d,
            json!({"engine": "embedded-kv", "target": "db1", "operation": "delete",
                   "statement": "x"}),
        )
        .await?;
        assert_eq!(next["status"], "success");
        Ok(())
    }

    #[tokio::test]
    async fn test_envelope_validation() -> Result<()> {
        let dir = TempDir::new()?;
        let d = dispatcher(&dir);

        for envelope in [
            json!("not an object"),
            json!({"engine": "oracle", "target": "x", "operation": "select", "statement": "s"}),
            json!({"engine": "local-sql", "target": "../x", "operation": "select", "statement": "s"}),
            json!({"engine": "local-sql", "target": "x", "operation": "drop", "statement": "s"}),
            json!({"engine": "local-sql", "target": "x", "operation": "update", "statement": "s"}),
            json!({"engine": "local-sql", "target": "x", "operation": "select", "statement": "SELECT ?", "parameters": [[1]]}),
            json!({"engine": "local-sql", "target": "x", "operation": "alter", "statement": "s", "parameters": [1]}),
        ] {
            let response = call(&d, envelope.clone()).await?;
            assert_eq!(response["kind"], "BAD_REQUEST", "envelope {}", envelope);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_legacy_field_names() -> Result<()> {
        let dir = TempDir::new()?;
        let d = dispatcher(&dir);

        let put = call(
            &d,
            json!({"dbtype": "badgerdb", "dbname": "legacy", "querytype": "exec",
                   "dbquery": "k", "params": ["v"], "apikey": "ignored"}),
        )
        .await?;
        assert_eq!(put["status"], "success");

        let got = call(
            &d,
            json!({"dbtype": "badgerdb", "dbname": "legacy", "querytype": "select",
                   "dbquery": "k", "params": null}),
        )
        .await?;
        assert_eq!(got, json!({"status": "success", "data": "v"}));
        Ok(())
    }
}

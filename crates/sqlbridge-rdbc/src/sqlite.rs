//! SQLite backend
//!
//! Simple embedded driver. rusqlite is synchronous, so every statement runs
//! on the blocking thread pool while the connection sits behind an async
//! mutex; that mutex also serializes `disconnect` behind in-flight work.
//! `watch` is unsupported.

use async_trait::async_trait;
use rusqlite::types::Value as LiteValue;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bind::{bind_named, Placeholder};
use crate::driver::{CallerContext, Driver, DriverInfo};
use crate::dsn::Dsn;
use crate::error::{Error, Result};
use crate::types::{ParamInput, Params, QueryOutcome, Row, SqlValue, StatementInput, StatementSet};

const ENGINE: &str = "SQLITE3";
const ENGINE_VERSION: &str = "SQLITE3_3_8_2";

const ALLOWED_KEYS: &[&str] = &["db", "dbname"];

fn to_lite_value(value: SqlValue) -> LiteValue {
    match value {
        SqlValue::Null => LiteValue::Null,
        SqlValue::Bool(b) => LiteValue::Integer(i64::from(b)),
        SqlValue::Int(n) => LiteValue::Integer(n),
        SqlValue::Float(x) => LiteValue::Real(x),
        SqlValue::Text(s) => LiteValue::Text(s),
        SqlValue::Bytes(b) => LiteValue::Blob(b),
        SqlValue::Json(v) => LiteValue::Text(v.to_string()),
    }
}

fn from_lite_value(value: LiteValue) -> SqlValue {
    match value {
        LiteValue::Null => SqlValue::Null,
        LiteValue::Integer(n) => SqlValue::Int(n),
        LiteValue::Real(x) => SqlValue::Float(x),
        LiteValue::Text(s) => SqlValue::Text(s),
        LiteValue::Blob(b) => SqlValue::Bytes(b),
    }
}

struct SqliteHandle {
    conn: rusqlite::Connection,
    dsn: Dsn,
}

/// SQLite driver instance
pub struct SqliteDriver {
    topic_base: String,
    debug: bool,
    state: Arc<Mutex<Option<SqliteHandle>>>,
}

impl SqliteDriver {
    /// Create a driver instance; no database is opened until `connect`.
    pub fn new(topic_base: &str, debug: bool) -> Self {
        Self {
            topic_base: topic_base.to_string(),
            debug,
            state: Arc::new(Mutex::new(None)),
        }
    }

    async fn run(&self, set: StatementSet, collect: bool) -> Result<Vec<Vec<Row>>> {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let guard = state.blocking_lock();
            let handle = guard.as_ref().ok_or_else(Error::not_connected)?;

            let mut batches = Vec::with_capacity(set.len());
            for (stmt, params) in set.pairs() {
                let (sql, values) = bind_named(stmt, params, Placeholder::Question)?;
                let lite_values: Vec<LiteValue> =
                    values.into_iter().map(to_lite_value).collect();

                if collect {
                    let mut prepared = handle.conn.prepare(&sql).map_err(|e| {
                        Error::query_with_source("statement failed", stmt.clone(), e)
                    })?;
                    let columns: Vec<String> = prepared
                        .column_names()
                        .iter()
                        .map(|s| s.to_string())
                        .collect();
                    let mut rows = prepared
                        .query(rusqlite::params_from_iter(lite_values))
                        .map_err(|e| {
                            Error::query_with_source("statement failed", stmt.clone(), e)
                        })?;
                    let mut out = Vec::new();
                    while let Some(row) = rows.next().map_err(|e| {
                        Error::query_with_source("statement failed", stmt.clone(), e)
                    })? {
                        let mut values = Vec::with_capacity(columns.len());
                        for i in 0..columns.len() {
                            let v: LiteValue = row.get(i).map_err(|e| {
                                Error::query_with_source("statement failed", stmt.clone(), e)
                            })?;
                            values.push(from_lite_value(v));
                        }
                        out.push(Row::new(columns.clone(), values));
                    }
                    batches.push(out);
                } else {
                    handle
                        .conn
                        .execute(&sql, rusqlite::params_from_iter(lite_values))
                        .map_err(|e| {
                            Error::query_with_source("statement failed", stmt.clone(), e)
                        })?;
                    batches.push(Vec::new());
                }
            }
            Ok(batches)
        })
        .await
        .map_err(|e| Error::internal(format!("database task failed: {e}")))?
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn connect(&self, dsn: &str) -> Result<()> {
        let parsed = Dsn::parse(dsn)?;
        parsed.check_keys(ALLOWED_KEYS)?;
        let path = parsed
            .dbname()
            .ok_or_else(|| {
                Error::connection("descriptor must name the database, e.g. db=/path/data.db")
            })?
            .to_string();

        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(Error::connection("already connected; disconnect first"));
        }

        info!(dsn = %parsed, "opening sqlite database");
        let conn = tokio::task::spawn_blocking(move || rusqlite::Connection::open(path))
            .await
            .map_err(|e| Error::internal(format!("open task failed: {e}")))?
            .map_err(|e| Error::connection_with_source("failed to open sqlite database", e))?;

        *state = Some(SqliteHandle { conn, dsn: parsed });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(handle) = self.state.lock().await.take() {
            info!(dsn = %handle.dsn, "closing sqlite database");
            let closed = tokio::task::spawn_blocking(move || handle.conn.close())
                .await
                .map_err(|e| Error::internal(format!("close task failed: {e}")))?;
            if let Err((_conn, e)) = closed {
                warn!("sqlite close reported: {e}");
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        statements: StatementInput,
        params: Option<ParamInput>,
        _ctx: Option<&CallerContext>,
    ) -> Result<QueryOutcome> {
        let set = StatementSet::normalize(statements, params)?;
        debug!(statements = set.len(), "running query");
        let shaped = set.clone();
        let batches = self.run(set, true).await?;
        Ok(shaped.shape(batches))
    }

    async fn operation(
        &self,
        statement: &str,
        params: Params,
        _ctx: Option<&CallerContext>,
    ) -> Result<()> {
        let set = StatementSet::single(statement, params);
        debug!("running operation");
        self.run(set, false).await?;
        Ok(())
    }

    async fn watch(&self, channel: &str, _ctx: Option<&CallerContext>) -> Result<String> {
        Err(Error::unsupported(format!(
            "watch({channel}): sqlite has no asynchronous notification support"
        )))
    }

    async fn info(&self) -> DriverInfo {
        let dsn = self
            .state
            .lock()
            .await
            .as_ref()
            .map(|h| h.dsn.raw().to_string());
        DriverInfo {
            engine: ENGINE.to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            dsn,
            topic_base: self.topic_base.clone(),
            debug: self.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::SqlValue;

    fn driver() -> SqliteDriver {
        SqliteDriver::new("com.db", false)
    }

    fn params(entries: &[(&str, SqlValue)]) -> Params {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn connected() -> (SqliteDriver, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let d = driver();
        let dsn = format!("db={}", dir.path().join("t.db").display());
        d.connect(&dsn).await.expect("connect");
        (d, dir)
    }

    #[tokio::test]
    async fn test_info_without_connection() {
        let info = driver().info().await;
        assert_eq!(info.engine, "SQLITE3");
        assert_eq!(info.engine_version, "SQLITE3_3_8_2");
        assert_eq!(info.dsn, None);
        assert_eq!(info.topic_base, "com.db");
    }

    #[tokio::test]
    async fn test_watch_is_unsupported() {
        let err = driver().watch("ping", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_ne!(err.kind(), ErrorKind::Query);

        // Still unsupported with a live connection.
        let (d, _dir) = connected().await;
        let err = d.watch("ping", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_connect_requires_database_key() {
        let err = driver().connect("host=nowhere").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_descriptor() {
        let err = driver().connect("db=:memory: junk").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_operation_then_query_round_trip() {
        let (d, _dir) = connected().await;
        d.operation("create table t (v integer)", Params::new(), None)
            .await
            .unwrap();
        d.operation(
            "insert into t(v) values(%(v)s)",
            params(&[("v", SqlValue::Int(1))]),
            None,
        )
        .await
        .unwrap();

        let out = d
            .query(StatementInput::One("select v from t".into()), None, None)
            .await
            .unwrap();
        assert_eq!(serde_json::to_string(&out).unwrap(), r#"[{"v":1}]"#);
    }

    #[tokio::test]
    async fn test_multi_statement_shapes_and_broadcast() {
        let (d, _dir) = connected().await;
        d.operation("create table t (v integer)", Params::new(), None)
            .await
            .unwrap();

        let out = d
            .query(
                StatementInput::Many(vec![
                    "insert into t(v) values(%(v)s)".into(),
                    "select v from t".into(),
                ]),
                Some(ParamInput::One(params(&[("v", SqlValue::Int(7))]))),
                None,
            )
            .await
            .unwrap();
        // Batch input keeps the outer sequence even for one logical result.
        assert_eq!(
            serde_json::to_string(&out).unwrap(),
            r#"[[],[{"v":7}]]"#
        );
    }

    #[tokio::test]
    async fn test_missing_parameter_is_query_error() {
        let (d, _dir) = connected().await;
        let err = d
            .query(
                StatementInput::One("select %(gone)s".into()),
                None,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
    }

    #[tokio::test]
    async fn test_bad_statement_is_query_error() {
        let (d, _dir) = connected().await;
        let err = d
            .query(
                StatementInput::One("select * from missing_table".into()),
                None,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn test_connect_disconnect_connect_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dsn = format!("db={}", dir.path().join("t.db").display());
        let d = driver();

        d.connect(&dsn).await.unwrap();
        assert!(d.info().await.dsn.is_some());

        // A second connect is rejected while the handle is live.
        let err = d.connect(&dsn).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);

        d.disconnect().await.unwrap();
        assert_eq!(d.info().await.dsn, None);
        d.disconnect().await.unwrap(); // idempotent

        d.connect(&dsn).await.unwrap();
        assert!(d.info().await.dsn.is_some());
    }

    #[tokio::test]
    async fn test_query_after_disconnect_fails() {
        let (d, _dir) = connected().await;
        d.disconnect().await.unwrap();
        let err = d
            .query(StatementInput::One("select 1".into()), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }
}

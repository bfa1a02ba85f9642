//! MySQL backend
//!
//! Simple driver: statements execute sequentially on a pooled connection
//! without cross-statement transaction batching and without audit stamping.
//! MySQL has no notify/listen, so `watch` is unsupported.

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, Params as MyParams, Pool as MyPool, Row as MyRow, Value as MyValue};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::bind::{bind_named, Placeholder};
use crate::driver::{CallerContext, Driver, DriverInfo};
use crate::dsn::Dsn;
use crate::error::{Error, Result};
use crate::types::{ParamInput, Params, QueryOutcome, Row, SqlValue, StatementInput, StatementSet};

const ENGINE: &str = "MYSQL";
const ENGINE_VERSION: &str = "MYSQL14_14";

const ALLOWED_KEYS: &[&str] = &["host", "port", "user", "password", "passwd", "db", "dbname"];

fn to_my_params(values: Vec<SqlValue>) -> MyParams {
    if values.is_empty() {
        return MyParams::Empty;
    }
    MyParams::Positional(values.into_iter().map(to_my_value).collect())
}

fn to_my_value(value: SqlValue) -> MyValue {
    match value {
        SqlValue::Null => MyValue::NULL,
        SqlValue::Bool(b) => MyValue::from(b),
        SqlValue::Int(n) => MyValue::from(n),
        SqlValue::Float(x) => MyValue::from(x),
        SqlValue::Text(s) => MyValue::from(s),
        SqlValue::Bytes(b) => MyValue::from(b),
        SqlValue::Json(v) => MyValue::from(v.to_string()),
    }
}

fn from_my_value(value: MyValue) -> SqlValue {
    match value {
        MyValue::NULL => SqlValue::Null,
        MyValue::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => SqlValue::Text(s),
            Err(e) => SqlValue::Bytes(e.into_bytes()),
        },
        MyValue::Int(n) => SqlValue::Int(n),
        MyValue::UInt(n) => match i64::try_from(n) {
            Ok(n) => SqlValue::Int(n),
            Err(_) => SqlValue::Text(n.to_string()),
        },
        MyValue::Float(x) => SqlValue::Float(f64::from(x)),
        MyValue::Double(x) => SqlValue::Float(x),
        MyValue::Date(year, month, day, hour, minute, second, micros) => {
            if micros == 0 {
                SqlValue::Text(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
                ))
            } else {
                SqlValue::Text(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
                ))
            }
        }
        MyValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if negative { "-" } else { "" };
            let hours = u32::from(hours) + days * 24;
            if micros == 0 {
                SqlValue::Text(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}"))
            } else {
                SqlValue::Text(format!(
                    "{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
                ))
            }
        }
    }
}

fn my_row_to_row(row: MyRow) -> Row {
    let columns: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect();
    let values: Vec<SqlValue> = row.unwrap().into_iter().map(from_my_value).collect();
    Row::new(columns, values)
}

struct MyHandle {
    pool: MyPool,
    dsn: Dsn,
}

/// MySQL driver instance
pub struct MySqlDriver {
    topic_base: String,
    debug: bool,
    state: RwLock<Option<MyHandle>>,
}

impl MySqlDriver {
    /// Create a driver instance; no connection is made until `connect`.
    pub fn new(topic_base: &str, debug: bool) -> Self {
        Self {
            topic_base: topic_base.to_string(),
            debug,
            state: RwLock::new(None),
        }
    }

    async fn pool(&self) -> Result<MyPool> {
        self.state
            .read()
            .await
            .as_ref()
            .map(|h| h.pool.clone())
            .ok_or_else(Error::not_connected)
    }

    async fn run(&self, set: &StatementSet, collect: bool) -> Result<Vec<Vec<Row>>> {
        let pool = self.pool().await?;
        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| Error::connection_with_source("failed to check out connection", e))?;

        let mut batches = Vec::with_capacity(set.len());
        for (stmt, params) in set.pairs() {
            let (sql, values) = bind_named(stmt, params, Placeholder::Question)?;
            let my_params = to_my_params(values);
            if collect {
                let rows: Vec<MyRow> = conn
                    .exec(sql.as_str(), my_params)
                    .await
                    .map_err(|e| Error::query_with_source("statement failed", stmt.clone(), e))?;
                batches.push(rows.into_iter().map(my_row_to_row).collect());
            } else {
                conn.exec_drop(sql.as_str(), my_params)
                    .await
                    .map_err(|e| Error::query_with_source("statement failed", stmt.clone(), e))?;
                batches.push(Vec::new());
            }
        }
        Ok(batches)
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    async fn connect(&self, dsn: &str) -> Result<()> {
        let parsed = Dsn::parse(dsn)?;
        parsed.check_keys(ALLOWED_KEYS)?;

        let mut state = self.state.write().await;
        if state.is_some() {
            return Err(Error::connection("already connected; disconnect first"));
        }

        info!(dsn = %parsed, "connecting to mysql");
        let mut builder = OptsBuilder::default();
        if let Some(host) = parsed.host() {
            builder = builder.ip_or_hostname(host);
        }
        if let Some(port) = parsed.port()? {
            builder = builder.tcp_port(port);
        }
        builder = builder
            .user(parsed.user())
            .pass(parsed.password())
            .db_name(parsed.dbname());

        let pool = MyPool::new(builder);
        // Checkout probe so an unreachable backend fails here.
        let conn = pool
            .get_conn()
            .await
            .map_err(|e| Error::connection_with_source("failed to connect to mysql", e))?;
        drop(conn);

        *state = Some(MyHandle { pool, dsn: parsed });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(handle) = self.state.write().await.take() {
            info!(dsn = %handle.dsn, "disconnecting from mysql");
            // Pool teardown waits for checked-out connections to return.
            handle
                .pool
                .disconnect()
                .await
                .map_err(|e| Error::connection_with_source("disconnect failed", e))?;
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
        let batches = self.run(&set, true).await?;
        Ok(set.shape(batches))
    }

    async fn operation(
        &self,
        statement: &str,
        params: Params,
        _ctx: Option<&CallerContext>,
    ) -> Result<()> {
        let set = StatementSet::single(statement, params);
        debug!("running operation");
        self.run(&set, false).await?;
        Ok(())
    }

    async fn watch(&self, channel: &str, _ctx: Option<&CallerContext>) -> Result<String> {
        Err(Error::unsupported(format!(
            "watch({channel}): mysql has no asynchronous notification support"
        )))
    }

    async fn info(&self) -> DriverInfo {
        let dsn = self
            .state
            .read()
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

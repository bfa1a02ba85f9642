//! PostgreSQL backend
//!
//! The transactional reference driver:
//! - every `query`/`operation` runs as one interaction: a single transaction
//!   holding the optional audit stamp and the caller's statements, so both
//!   commit or roll back together
//! - `watch` bridges LISTEN/NOTIFY onto generated pub/sub topics via a
//!   dedicated notification connection and a relay task
//! - connections come from a bounded checkout pool, one logical connection
//!   per in-flight interaction

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::StreamExt;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_postgres::types::{IsNull, ToSql, Type};
use tokio_postgres::{AsyncMessage, NoTls};
use tracing::{debug, info, warn};

use crate::bind::{bind_named, Placeholder};
use crate::driver::{CallerContext, Driver, DriverInfo, TopicPublisher};
use crate::dsn::Dsn;
use crate::error::{Error, Result};
use crate::pool::{ConnectionFactory, Pool};
use crate::types::{ParamInput, Params, QueryOutcome, Row, SqlValue, StatementInput, StatementSet};
use crate::watch::WatchRegistry;

const ENGINE: &str = "PG";
const ENGINE_VERSION: &str = "PG9_4";

/// Connections held per driver instance
const MAX_POOL_SIZE: usize = 8;

/// Audit stamp executed inside the interaction so row-level triggers see the
/// true remote caller instead of the shared service account.
const AUDIT_STAMP_SQL: &str = "select private.set_session_variable('audit_user', $1)";

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(b) => match ty.name() {
                "text" | "varchar" => b.to_string().to_sql(ty, out),
                "int2" => i16::from(*b).to_sql(ty, out),
                "int4" => i32::from(*b).to_sql(ty, out),
                "int8" => i64::from(*b).to_sql(ty, out),
                _ => b.to_sql(ty, out),
            },
            SqlValue::Int(n) => match ty.name() {
                "int2" => i16::try_from(*n)?.to_sql(ty, out),
                "int4" => i32::try_from(*n)?.to_sql(ty, out),
                "oid" => u32::try_from(*n)?.to_sql(ty, out),
                "float4" => (*n as f32).to_sql(ty, out),
                "float8" => (*n as f64).to_sql(ty, out),
                "numeric" => Decimal::from(*n).to_sql(ty, out),
                "bool" => (*n != 0).to_sql(ty, out),
                "text" | "varchar" => n.to_string().to_sql(ty, out),
                _ => n.to_sql(ty, out),
            },
            SqlValue::Float(x) => match ty.name() {
                "float4" => (*x as f32).to_sql(ty, out),
                "numeric" => Decimal::try_from(*x)?.to_sql(ty, out),
                "text" | "varchar" => x.to_string().to_sql(ty, out),
                _ => x.to_sql(ty, out),
            },
            SqlValue::Text(s) => match ty.name() {
                "bool" => s.trim().parse::<bool>()?.to_sql(ty, out),
                "int2" => s.trim().parse::<i16>()?.to_sql(ty, out),
                "int4" => s.trim().parse::<i32>()?.to_sql(ty, out),
                "int8" => s.trim().parse::<i64>()?.to_sql(ty, out),
                "float4" => s.trim().parse::<f32>()?.to_sql(ty, out),
                "float8" => s.trim().parse::<f64>()?.to_sql(ty, out),
                "numeric" => Decimal::from_str(s.trim())?.to_sql(ty, out),
                "uuid" => uuid::Uuid::parse_str(s.trim())?.to_sql(ty, out),
                "json" | "jsonb" => serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out),
                _ => s.to_sql(ty, out),
            },
            SqlValue::Bytes(b) => b.as_slice().to_sql(ty, out),
            SqlValue::Json(v) => match ty.name() {
                "text" | "varchar" => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Conversion is decided per target type in to_sql.
        true
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        self.to_sql(ty, out)
    }
}

fn param_refs(values: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

/// Convert a result row. Types without a native wire mapping come back as
/// text so the result always serializes.
fn pg_row_to_row(row: &tokio_postgres::Row) -> Row {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values: Vec<SqlValue> = row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| decode_cell(row, i, col.type_()))
        .collect();
    Row::new(columns, values)
}

fn decode_cell(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> SqlValue {
    fn opt<T>(got: std::result::Result<Option<T>, tokio_postgres::Error>) -> Option<T> {
        got.ok().flatten()
    }

    match ty.name() {
        "bool" => opt(row.try_get::<_, Option<bool>>(idx))
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null),
        "int2" => opt(row.try_get::<_, Option<i16>>(idx))
            .map(|n| SqlValue::Int(i64::from(n)))
            .unwrap_or(SqlValue::Null),
        "int4" => opt(row.try_get::<_, Option<i32>>(idx))
            .map(|n| SqlValue::Int(i64::from(n)))
            .unwrap_or(SqlValue::Null),
        "int8" => opt(row.try_get::<_, Option<i64>>(idx))
            .map(SqlValue::Int)
            .unwrap_or(SqlValue::Null),
        "float4" => opt(row.try_get::<_, Option<f32>>(idx))
            .map(|x| SqlValue::Float(f64::from(x)))
            .unwrap_or(SqlValue::Null),
        "float8" => opt(row.try_get::<_, Option<f64>>(idx))
            .map(SqlValue::Float)
            .unwrap_or(SqlValue::Null),
        "numeric" => opt(row.try_get::<_, Option<Decimal>>(idx))
            .map(|d| SqlValue::Text(d.to_string()))
            .unwrap_or(SqlValue::Null),
        "text" | "varchar" | "bpchar" | "name" => opt(row.try_get::<_, Option<String>>(idx))
            .map(SqlValue::Text)
            .unwrap_or(SqlValue::Null),
        "bytea" => opt(row.try_get::<_, Option<Vec<u8>>>(idx))
            .map(SqlValue::Bytes)
            .unwrap_or(SqlValue::Null),
        "date" => opt(row.try_get::<_, Option<chrono::NaiveDate>>(idx))
            .map(|d| SqlValue::Text(d.to_string()))
            .unwrap_or(SqlValue::Null),
        "time" => opt(row.try_get::<_, Option<chrono::NaiveTime>>(idx))
            .map(|t| SqlValue::Text(t.to_string()))
            .unwrap_or(SqlValue::Null),
        "timestamp" => opt(row.try_get::<_, Option<chrono::NaiveDateTime>>(idx))
            .map(|dt| SqlValue::Text(dt.to_string()))
            .unwrap_or(SqlValue::Null),
        "timestamptz" => opt(row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx))
            .map(|dt| SqlValue::Text(dt.to_rfc3339()))
            .unwrap_or(SqlValue::Null),
        "uuid" => opt(row.try_get::<_, Option<uuid::Uuid>>(idx))
            .map(|u| SqlValue::Text(u.to_string()))
            .unwrap_or(SqlValue::Null),
        "json" | "jsonb" => opt(row.try_get::<_, Option<serde_json::Value>>(idx))
            .map(SqlValue::Json)
            .unwrap_or(SqlValue::Null),
        _ => opt(row.try_get::<_, Option<String>>(idx))
            .map(SqlValue::Text)
            .unwrap_or(SqlValue::Null),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn audit_stamp(ctx: Option<&CallerContext>) -> Option<(String, Vec<SqlValue>)> {
    let authid = ctx?.authid.clone()?;
    Some((AUDIT_STAMP_SQL.to_string(), vec![SqlValue::Text(authid)]))
}

struct PgConn {
    client: tokio_postgres::Client,
}

struct PgConnectionFactory {
    config: String,
}

#[async_trait]
impl ConnectionFactory<PgConn> for PgConnectionFactory {
    async fn connect(&self) -> Result<PgConn> {
        let (client, connection) = tokio_postgres::connect(&self.config, NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect to postgres", e))?;

        // The connection task drives the socket until the client drops.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("postgres connection task ended: {e}");
            }
        });

        Ok(PgConn { client })
    }

    fn is_valid(&self, conn: &PgConn) -> bool {
        !conn.client.is_closed()
    }
}

struct PgHandle {
    pool: Pool<PgConn>,
    dsn: Dsn,
}

struct Listener {
    client: tokio_postgres::Client,
    armed: HashSet<String>,
    task: JoinHandle<()>,
}

/// PostgreSQL driver instance
pub struct PostgresDriver {
    topic_base: String,
    debug: bool,
    publisher: Weak<dyn TopicPublisher>,
    registry: Arc<WatchRegistry>,
    state: RwLock<Option<PgHandle>>,
    listener: Mutex<Option<Listener>>,
}

impl PostgresDriver {
    /// Create a driver instance; no connection is made until `connect`.
    pub fn new(topic_base: &str, publisher: Weak<dyn TopicPublisher>, debug: bool) -> Self {
        Self {
            topic_base: topic_base.to_string(),
            debug,
            publisher,
            registry: Arc::new(WatchRegistry::new(topic_base)),
            state: RwLock::new(None),
            listener: Mutex::new(None),
        }
    }

    async fn pool(&self) -> Result<Pool<PgConn>> {
        self.state
            .read()
            .await
            .as_ref()
            .map(|h| h.pool.clone())
            .ok_or_else(Error::not_connected)
    }

    /// Run statements as one atomic unit: a single transaction holding the
    /// optional audit stamp and every statement of the set. Dropping the
    /// transaction on an error path issues the rollback.
    async fn run_interaction(
        &self,
        stamp: Option<(String, Vec<SqlValue>)>,
        set: &StatementSet,
        collect: bool,
    ) -> Result<Vec<Vec<Row>>> {
        let pool = self.pool().await?;
        let mut conn = pool.get().await?;
        let tx = conn
            .client
            .transaction()
            .await
            .map_err(|e| Error::query_with_source("failed to begin transaction", "begin", e))?;

        if let Some((sql, values)) = &stamp {
            let refs = param_refs(values);
            tx.execute(sql.as_str(), &refs)
                .await
                .map_err(|e| Error::query_with_source("audit stamp failed", sql.clone(), e))?;
        }

        let mut batches = Vec::with_capacity(set.len());
        for (stmt, params) in set.pairs() {
            let (sql, values) = bind_named(stmt, params, Placeholder::Dollar)?;
            let refs = param_refs(&values);
            if collect {
                let rows = tx
                    .query(sql.as_str(), &refs)
                    .await
                    .map_err(|e| Error::query_with_source("statement failed", stmt.clone(), e))?;
                batches.push(rows.iter().map(pg_row_to_row).collect());
            } else {
                tx.execute(sql.as_str(), &refs)
                    .await
                    .map_err(|e| Error::query_with_source("statement failed", stmt.clone(), e))?;
                batches.push(Vec::new());
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::query_with_source("commit failed", "commit", e))?;
        Ok(batches)
    }

    async fn spawn_listener(&self, dsn: &str) -> Result<Listener> {
        let (client, mut connection) = tokio_postgres::connect(dsn, NoTls)
            .await
            .map_err(|e| {
                Error::connection_with_source("failed to open notification connection", e)
            })?;

        let registry = Arc::clone(&self.registry);
        let publisher = self.publisher.clone();
        let task = tokio::spawn(async move {
            let mut messages =
                Box::pin(futures_util::stream::poll_fn(move |cx| {
                    connection.poll_message(cx)
                }));
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(n)) => {
                        let Some(topic) = registry.get(n.channel()) else {
                            debug!(
                                channel = %n.channel(),
                                "notification for unwatched channel dropped"
                            );
                            continue;
                        };
                        // Best effort, at most once: no publisher, no queue.
                        match publisher.upgrade() {
                            Some(p) => {
                                if let Err(e) = p.publish(&topic, n.payload()).await {
                                    warn!(topic = %topic, "failed to republish notification: {e}");
                                }
                            }
                            None => debug!("publisher gone; notification dropped"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("notification connection ended: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Listener {
            client,
            armed: HashSet::new(),
            task,
        })
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn connect(&self, dsn: &str) -> Result<()> {
        let parsed = Dsn::parse(dsn)?;
        let mut state = self.state.write().await;
        if state.is_some() {
            return Err(Error::connection("already connected; disconnect first"));
        }

        info!(dsn = %parsed, "connecting to postgres");
        let pool = Pool::new(
            PgConnectionFactory {
                config: dsn.to_string(),
            },
            MAX_POOL_SIZE,
        );
        // Checkout probe so an unreachable backend fails here, not on the
        // first query.
        drop(pool.get().await?);

        *state = Some(PgHandle { pool, dsn: parsed });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(handle) = self.state.write().await.take() {
            info!(dsn = %handle.dsn, "disconnecting from postgres");
            // In-flight interactions drain on the connections they hold.
            handle.pool.close();
        }
        if let Some(listener) = self.listener.lock().await.take() {
            listener.task.abort();
            drop(listener.client);
        }
        Ok(())
    }

    async fn query(
        &self,
        statements: StatementInput,
        params: Option<ParamInput>,
        ctx: Option<&CallerContext>,
    ) -> Result<QueryOutcome> {
        let set = StatementSet::normalize(statements, params)?;
        debug!(statements = set.len(), "running query interaction");
        let batches = self.run_interaction(audit_stamp(ctx), &set, true).await?;
        Ok(set.shape(batches))
    }

    async fn operation(
        &self,
        statement: &str,
        params: Params,
        ctx: Option<&CallerContext>,
    ) -> Result<()> {
        let set = StatementSet::single(statement, params);
        debug!("running operation interaction");
        self.run_interaction(audit_stamp(ctx), &set, false).await?;
        Ok(())
    }

    async fn watch(&self, channel: &str, _ctx: Option<&CallerContext>) -> Result<String> {
        let channel = channel.to_lowercase();
        let dsn = self
            .state
            .read()
            .await
            .as_ref()
            .map(|h| h.dsn.raw().to_string())
            .ok_or_else(Error::not_connected)?;

        let mut listener = self.listener.lock().await;
        if listener.is_none() {
            *listener = Some(self.spawn_listener(&dsn).await?);
        }
        let l = match listener.as_mut() {
            Some(l) => l,
            None => return Err(Error::internal("notification listener vanished")),
        };

        if !l.armed.contains(&channel) {
            let stmt = format!("listen {}", quote_ident(&channel));
            // Simple-query protocol; LISTEN takes no parameters.
            l.client
                .batch_execute(stmt.as_str())
                .await
                .map_err(|e| Error::query_with_source("listen failed", stmt.clone(), e))?;
            l.armed.insert(channel.clone());
            debug!(channel = %channel, "listen armed");
        }

        Ok(self.registry.topic_for(&channel))
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

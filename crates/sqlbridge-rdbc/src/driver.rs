//! Driver contract and engine selection
//!
//! Every backend implements [`Driver`] over the capability set
//! {connect, disconnect, query, operation, watch, info}. The session bridge
//! owns exactly one driver instance, selected by [`Engine`] identifier at
//! construction; an unknown identifier is a fatal configuration error with
//! no fallback.

use async_trait::async_trait;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Weak;

use crate::error::{Error, Result};
use crate::types::{ParamInput, Params, QueryOutcome, StatementInput};

/// Identity of the remote caller, threaded from the RPC invocation.
///
/// Used for audit stamping on backends that support it; every field is
/// optional because anonymous sessions carry none of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    /// Caller session id
    pub caller: Option<u64>,
    /// Authenticated principal
    pub authid: Option<String>,
    /// Authorization role
    pub authrole: Option<String>,
    /// Authentication method the caller used
    pub authmethod: Option<String>,
}

/// Read-only driver descriptor returned by `info()`.
///
/// Available before `connect`; `dsn` is `None` until a connection descriptor
/// has been accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverInfo {
    /// Engine identifier (`PG`, `MYSQL`, `SQLITE3`)
    pub engine: String,
    /// Engine version tag
    pub engine_version: String,
    /// Active connection descriptor, verbatim
    pub dsn: Option<String>,
    /// Topic prefix procedures and watch topics are rooted at
    pub topic_base: String,
    /// Debug flag the driver was constructed with
    pub debug: bool,
}

/// Sink for notification relay publishes.
///
/// Drivers hold this as a [`Weak`] back-reference so a driver never extends
/// its owner's lifetime; when the owner is gone, notifications are dropped.
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    /// Publish a payload to a topic, best effort
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;
}

/// Contract every database backend satisfies.
///
/// All entry points are suspension points; invocations on the same instance
/// are not ordered relative to each other. `connect`/`disconnect` mutate the
/// pooled-connection handle, everything else only borrows it.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Parse a `key=value` connection descriptor and establish the pooled
    /// connection.
    ///
    /// Fails with a connection error if the descriptor is malformed, the
    /// backend is unreachable, or a connection is already established (a
    /// second `connect` is rejected rather than replacing the handle).
    async fn connect(&self, dsn: &str) -> Result<()>;

    /// Release the pooled connection.
    ///
    /// Idempotent: disconnecting while not connected is a no-op. In-flight
    /// statements drain on the connections they already hold; subsequent
    /// calls fail with a connection error.
    async fn disconnect(&self) -> Result<()>;

    /// Execute one or more row-returning statements.
    ///
    /// Multi-statement input executes as one atomic unit on transactional
    /// backends. A single-statement call returns its row sequence directly;
    /// a multi-statement call returns one sequence per statement.
    async fn query(
        &self,
        statements: StatementInput,
        params: Option<ParamInput>,
        ctx: Option<&CallerContext>,
    ) -> Result<QueryOutcome>;

    /// Execute a single statement for its side effects, discarding rows.
    async fn operation(
        &self,
        statement: &str,
        params: Params,
        ctx: Option<&CallerContext>,
    ) -> Result<()>;

    /// Arm asynchronous notification delivery for a backend channel and
    /// return the pub/sub topic notifications will be republished to.
    ///
    /// Idempotent per channel. Backends without native notification support
    /// fail with an unsupported-operation error, never a query error.
    async fn watch(&self, channel: &str, ctx: Option<&CallerContext>) -> Result<String>;

    /// Describe this driver. Never fails and requires no connection.
    async fn info(&self) -> DriverInfo;
}

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    /// PostgreSQL (transactional, notification support)
    Postgres,
    /// MySQL / MariaDB
    MySql,
    /// SQLite (embedded)
    Sqlite,
}

impl Engine {
    /// Canonical identifier as reported by `info()`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "PG",
            Self::MySql => "MYSQL",
            Self::Sqlite => "SQLITE3",
        }
    }
}

impl FromStr for Engine {
    type Err = Error;

    /// Accepts the canonical identifiers plus their historical version-tag
    /// aliases.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PG" | "PG9_4" | "POSTGRES" => Ok(Self::Postgres),
            "MYSQL" | "MYSQL14_14" => Ok(Self::MySql),
            "SQLITE" | "SQLITE3" | "SQLITE3_3_8_2" => Ok(Self::Sqlite),
            other => Err(Error::config(format!("unknown database engine {other:?}"))),
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Instantiate the driver for an engine.
///
/// `publisher` is the relay sink for notification republishes; simple
/// backends ignore it. An engine whose backend was compiled out is a
/// configuration error.
pub fn for_engine(
    engine: Engine,
    topic_base: &str,
    publisher: Weak<dyn TopicPublisher>,
    debug: bool,
) -> Result<std::sync::Arc<dyn Driver>> {
    let _ = (&topic_base, &publisher, debug);
    match engine {
        #[cfg(feature = "postgres")]
        Engine::Postgres => Ok(std::sync::Arc::new(crate::postgres::PostgresDriver::new(
            topic_base, publisher, debug,
        ))),
        #[cfg(feature = "mysql")]
        Engine::MySql => Ok(std::sync::Arc::new(crate::mysql::MySqlDriver::new(
            topic_base, debug,
        ))),
        #[cfg(feature = "sqlite")]
        Engine::Sqlite => Ok(std::sync::Arc::new(crate::sqlite::SqliteDriver::new(
            topic_base, debug,
        ))),
        #[allow(unreachable_patterns)]
        other => Err(Error::config(format!(
            "engine {other} support is not compiled into this build"
        ))),
    }
}

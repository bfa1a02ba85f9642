//! # sqlbridge-rdbc
//!
//! Database driver layer for the sqlbridge session bridge.
//!
//! This crate defines the driver contract the bridge registers over an RPC
//! session, plus the concrete backends:
//!
//! - **Driver Interface**: connect / disconnect / query / operation / watch /
//!   info, polymorphic over backends
//! - **PostgreSQL**: transactional reference backend with audit stamping and
//!   a LISTEN/NOTIFY → pub/sub notification relay
//! - **MySQL**: simple backend without notification support
//! - **SQLite**: simple embedded backend without notification support
//! - **Named-parameter binding**: `%(key)s` placeholders rewritten to the
//!   backend's positional style; statement text otherwise passes through
//!   unchanged
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL support via tokio-postgres
//! - `mysql` - MySQL/MariaDB support via mysql_async
//! - `sqlite` - SQLite support via rusqlite
//! - `full` - All backends enabled

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bind;
pub mod driver;
pub mod dsn;
pub mod error;
pub mod pool;
pub mod types;
pub mod watch;

// Backend implementations (conditionally compiled)
#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bind::{bind_named, Placeholder};
    pub use crate::driver::{
        for_engine, CallerContext, Driver, DriverInfo, Engine, TopicPublisher,
    };
    pub use crate::dsn::Dsn;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::types::{
        ParamInput, Params, QueryOutcome, Row, SqlValue, StatementInput, StatementSet,
    };
    pub use crate::watch::WatchRegistry;
}

pub use error::{Error, Result};
pub use types::SqlValue;

//! # sqlbridge-session
//!
//! The database session bridge: the component that authenticates and joins
//! an RPC realm, registers the database driver's operations as procedures
//! rooted at a configurable topic prefix, and relays backend notifications
//! onto generated pub/sub topics for the driver.
//!
//! The RPC transport itself is an external collaborator, modelled by the
//! [`rpc::RpcSession`] trait; the transport drives the bridge's lifecycle
//! callbacks (`hello`, `on_challenge`, `on_join`, `leave`).
//!
//! ```rust,ignore
//! use sqlbridge_session::prelude::*;
//!
//! let config = BridgeConfig::new("realm1", "PG")
//!     .with_topic_base("com.db")
//!     .with_credentials("wampcra", "svc-db", "secret")
//!     .with_dsn("dbname=test host=127.0.0.1 user=svc");
//!
//! let mut bridge = SessionBridge::new(config, session)?;
//! let hello = bridge.hello();                  // present on transport connect
//! let signature = bridge.on_challenge(&challenge)?;
//! bridge.on_join().await?;                     // register com.db.* procedures
//! // ... remote callers use com.db.query, com.db.operation, com.db.watch ...
//! bridge.leave().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod rpc;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::auth::compute_challenge_response;
    pub use crate::bridge::{BridgeState, SessionBridge, OPERATIONS};
    pub use crate::config::{AuthConfig, BridgeConfig, DEFAULT_TOPIC_BASE};
    pub use crate::error::{Error, Result};
    pub use crate::rpc::{
        CallerDetails, Challenge, ChallengeExtra, Invocation, JoinRequest, ProcedureHandler,
        RegistrationId, RpcSession,
    };
}

pub use bridge::{BridgeState, SessionBridge};
pub use config::BridgeConfig;
pub use error::{Error, Result};

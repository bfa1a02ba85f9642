//! RPC session abstraction
//!
//! The realm/broker implementation is an external collaborator; the bridge
//! only needs register/unregister/publish/call plus the challenge message
//! shape, so that is all this module models. The transport drives the
//! bridge's lifecycle callbacks and hands invocations to the registered
//! handlers.

use async_trait::async_trait;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;

/// Opaque handle for a procedure registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

/// Identity details of the remote caller, as delivered with an invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerDetails {
    /// Caller session id
    pub caller: Option<u64>,
    /// Authenticated principal
    pub authid: Option<String>,
    /// Authorization role
    pub authrole: Option<String>,
    /// Authentication method the caller used
    pub authmethod: Option<String>,
}

/// One procedure invocation as delivered by the RPC session
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// Positional arguments
    pub args: Vec<serde_json::Value>,
    /// Keyword arguments
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    /// Remote caller identity
    pub details: CallerDetails,
}

impl Invocation {
    /// Build an invocation from positional arguments alone
    pub fn with_args(args: Vec<serde_json::Value>) -> Self {
        Self {
            args,
            ..Default::default()
        }
    }
}

/// Future returned by a procedure handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;

/// A registered procedure body
pub type ProcedureHandler = Arc<dyn Fn(Invocation) -> HandlerFuture + Send + Sync>;

/// What the bridge presents when the transport connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Realm to join
    pub realm: String,
    /// Authentication methods offered, in preference order
    pub authmethods: Vec<String>,
    /// Principal to authenticate as
    pub authid: String,
}

/// Authentication challenge delivered by the router
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    /// Declared authentication method
    pub method: String,
    /// Method-specific parameters
    #[serde(default)]
    pub extra: ChallengeExtra,
}

/// Method-specific challenge parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChallengeExtra {
    /// Challenge nonce to sign
    pub challenge: String,
    /// Salt for key derivation; absent means the raw secret is the key
    pub salt: Option<String>,
    /// Key-derivation iterations
    pub iterations: Option<u32>,
    /// Derived key length in bytes
    pub keylen: Option<usize>,
}

/// The RPC session operations the bridge consumes.
///
/// All calls are suspension points; the implementation is expected to be an
/// event-driven transport that never blocks the executor.
#[async_trait]
pub trait RpcSession: Send + Sync {
    /// Register a procedure, returning its registration handle
    async fn register(&self, procedure: &str, handler: ProcedureHandler) -> Result<RegistrationId>;

    /// Release a registration handle
    async fn unregister(&self, registration: RegistrationId) -> Result<()>;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    /// Call a procedure registered on the realm
    async fn call(&self, procedure: &str, args: Vec<serde_json::Value>)
        -> Result<serde_json::Value>;
}

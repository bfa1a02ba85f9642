//! Session bridge
//!
//! The component that joins an RPC realm, answers the authentication
//! challenge, instantiates exactly one database driver, registers the six
//! driver operations as procedures under the topic prefix, and tears all of
//! it down on leave.
//!
//! Lifecycle: `Unauthenticated -> Authenticating -> Joined -> Registered ->
//! Connected (optional) -> Leaving -> Closed`. The transport drives the
//! transitions through `hello`/`on_challenge`/`on_join`/`leave`; `Closed` is
//! terminal, re-joining takes a new instance.

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use sqlbridge_rdbc::driver::{self, CallerContext, Driver, Engine, TopicPublisher};
use sqlbridge_rdbc::types::{ParamInput, Params, StatementInput};

use crate::auth;
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::rpc::{
    CallerDetails, Challenge, Invocation, JoinRequest, ProcedureHandler, RegistrationId,
    RpcSession,
};

/// The six operations registered under `<topic_base>.<op>`
pub const OPERATIONS: [&str; 6] = [
    "connect",
    "disconnect",
    "query",
    "operation",
    "watch",
    "info",
];

/// Bridge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Constructed, transport not yet connected
    Unauthenticated,
    /// Hello presented, waiting for the router's decision
    Authenticating,
    /// Realm joined, procedures not yet registered
    Joined,
    /// All six procedures registered; the bridge is ready
    Registered,
    /// Bootstrap connect succeeded
    Connected,
    /// Teardown in progress
    Leaving,
    /// Terminal; a new instance is required to re-join
    Closed,
}

/// Publishes through the RPC session on behalf of the driver's notification
/// relay. The driver holds this weakly, so a dropped bridge silently ends
/// republishing instead of being kept alive by its own driver.
struct SessionPublisher {
    session: Arc<dyn RpcSession>,
}

#[async_trait]
impl TopicPublisher for SessionPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> sqlbridge_rdbc::Result<()> {
        self.session
            .publish(topic, payload)
            .await
            .map_err(|e| sqlbridge_rdbc::Error::internal(format!("publish failed: {e}")))
    }
}

/// One bridge per RPC session: owns the driver instance and the
/// registration table for the session's lifetime.
pub struct SessionBridge {
    config: BridgeConfig,
    engine: Engine,
    session: Arc<dyn RpcSession>,
    publisher: Arc<SessionPublisher>,
    driver: Option<Arc<dyn Driver>>,
    registrations: Vec<(&'static str, RegistrationId)>,
    state: BridgeState,
}

impl std::fmt::Debug for SessionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBridge")
            .field("engine", &self.engine)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SessionBridge {
    /// Create a bridge over an RPC session.
    ///
    /// The engine identifier is parsed eagerly: an unknown engine is a fatal
    /// configuration error raised here, before anything touches the realm.
    pub fn new(config: BridgeConfig, session: Arc<dyn RpcSession>) -> Result<Self> {
        let engine = config.parse_engine()?;
        let publisher = Arc::new(SessionPublisher {
            session: Arc::clone(&session),
        });
        Ok(Self {
            config,
            engine,
            session,
            publisher,
            driver: None,
            registrations: Vec::new(),
            state: BridgeState::Unauthenticated,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// The driver instance, once `on_join` has created it
    pub fn driver(&self) -> Option<&Arc<dyn Driver>> {
        self.driver.as_ref()
    }

    /// Configuration the bridge was constructed with
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Fully-qualified procedure name for an operation
    pub fn procedure(&self, op: &str) -> String {
        format!("{}.{}", self.config.topic_base, op)
    }

    /// Transport connected: present realm, method, and principal.
    pub fn hello(&mut self) -> JoinRequest {
        if self.state == BridgeState::Unauthenticated {
            self.state = BridgeState::Authenticating;
        }
        debug!(
            realm = %self.config.realm,
            method = %self.config.auth.method,
            authid = %self.config.auth.authid,
            "presenting hello"
        );
        JoinRequest {
            realm: self.config.realm.clone(),
            authmethods: vec![self.config.auth.method.clone()],
            authid: self.config.auth.authid.clone(),
        }
    }

    /// Challenge received: compute the signature from the configured secret.
    ///
    /// An unrecognized method is fatal; the caller must not proceed to join.
    pub fn on_challenge(&self, challenge: &Challenge) -> Result<String> {
        debug!(method = %challenge.method, "answering challenge");
        auth::compute_challenge_response(&self.config.auth.secret, challenge)
    }

    /// Join succeeded: instantiate the driver, register the six procedures,
    /// and apply the bootstrap connection descriptor if one was configured.
    ///
    /// A partial registration failure releases every registration already
    /// made before the error surfaces. A bootstrap-connect failure leaves
    /// the registrations standing so callers can issue `connect` later.
    pub async fn on_join(&mut self) -> Result<()> {
        match self.state {
            BridgeState::Unauthenticated | BridgeState::Authenticating => {}
            BridgeState::Closed | BridgeState::Leaving => {
                return Err(Error::rpc(
                    "session is closed; a new bridge instance is required to re-join",
                ));
            }
            other => {
                return Err(Error::rpc(format!(
                    "join while already in state {other:?}"
                )));
            }
        }
        self.state = BridgeState::Joined;
        info!(realm = %self.config.realm, engine = %self.engine, "session joined");

        let publisher: Arc<dyn TopicPublisher> = Arc::clone(&self.publisher) as Arc<dyn TopicPublisher>;
        let publisher: Weak<dyn TopicPublisher> = Arc::downgrade(&publisher);
        let driver = driver::for_engine(
            self.engine,
            &self.config.topic_base,
            publisher,
            self.config.debug,
        )
        .map_err(|e| Error::config(e.to_string()))?;
        self.driver = Some(Arc::clone(&driver));

        let mut registered: Vec<(&'static str, RegistrationId)> =
            Vec::with_capacity(OPERATIONS.len());
        for op in OPERATIONS {
            let name = self.procedure(op);
            let handler = procedure_handler(op, Arc::clone(&driver));
            match self.session.register(&name, handler).await {
                Ok(id) => {
                    debug!(procedure = %name, "registered");
                    registered.push((op, id));
                }
                Err(e) => {
                    warn!(procedure = %name, "registration failed, unwinding: {e}");
                    while let Some((op, id)) = registered.pop() {
                        if let Err(ue) = self.session.unregister(id).await {
                            warn!(procedure = op, "cleanup unregister failed: {ue}");
                        }
                    }
                    self.driver = None;
                    return Err(e);
                }
            }
        }
        self.registrations = registered;
        self.state = BridgeState::Registered;
        info!(topic_base = %self.config.topic_base, "db bootstrap procedures registered");

        if let Some(dsn) = self.config.dsn.clone() {
            info!("applying bootstrap connection descriptor");
            self.session
                .call(
                    &self.procedure("connect"),
                    vec![serde_json::Value::String(dsn)],
                )
                .await?;
            self.state = BridgeState::Connected;
            info!("bootstrap connection established");
        }

        Ok(())
    }

    /// Session leaving or transport gone: release every registration handle
    /// (reverse registration order, each exactly once), disconnect and drop
    /// the driver, and close.
    ///
    /// Cleanup continues past individual failures; calling `leave` on a
    /// closed bridge is a no-op.
    pub async fn leave(&mut self) -> Result<()> {
        if self.state == BridgeState::Closed {
            return Ok(());
        }
        self.state = BridgeState::Leaving;
        info!(realm = %self.config.realm, "leaving session");

        while let Some((op, id)) = self.registrations.pop() {
            if let Err(e) = self.session.unregister(id).await {
                warn!(procedure = op, "unregister failed: {e}");
            }
        }

        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.disconnect().await {
                warn!("driver disconnect during leave failed: {e}");
            }
        }

        self.state = BridgeState::Closed;
        Ok(())
    }
}

fn procedure_handler(op: &'static str, driver: Arc<dyn Driver>) -> ProcedureHandler {
    Arc::new(move |invocation: Invocation| {
        let driver = Arc::clone(&driver);
        Box::pin(async move { dispatch(op, driver, invocation).await })
    })
}

fn caller_context(details: &CallerDetails) -> CallerContext {
    CallerContext {
        caller: details.caller,
        authid: details.authid.clone(),
        authrole: details.authrole.clone(),
        authmethod: details.authmethod.clone(),
    }
}

fn invalid_call(message: impl Into<String>) -> Error {
    Error::Driver(sqlbridge_rdbc::Error::query(message))
}

fn required_arg<T: serde::de::DeserializeOwned>(
    invocation: &Invocation,
    index: usize,
    what: &str,
) -> Result<T> {
    let value = invocation
        .args
        .get(index)
        .cloned()
        .ok_or_else(|| invalid_call(format!("missing argument {index}: {what}")))?;
    serde_json::from_value(value)
        .map_err(|e| invalid_call(format!("bad argument {index} ({what}): {e}")))
}

fn optional_arg<T: serde::de::DeserializeOwned>(
    invocation: &Invocation,
    index: usize,
    what: &str,
) -> Result<Option<T>> {
    match invocation.args.get(index) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| invalid_call(format!("bad argument {index} ({what}): {e}"))),
    }
}

async fn dispatch(
    op: &str,
    driver: Arc<dyn Driver>,
    invocation: Invocation,
) -> Result<serde_json::Value> {
    let ctx = caller_context(&invocation.details);
    match op {
        "connect" => {
            let dsn = invocation
                .args
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::Driver(sqlbridge_rdbc::Error::connection(
                        "connect requires a connection descriptor string argument",
                    ))
                })?;
            driver.connect(dsn).await?;
            Ok(serde_json::Value::Null)
        }
        "disconnect" => {
            driver.disconnect().await?;
            Ok(serde_json::Value::Null)
        }
        "query" => {
            let statements: StatementInput =
                required_arg(&invocation, 0, "statement or statement list")?;
            let params: Option<ParamInput> = optional_arg(&invocation, 1, "parameters")?;
            let outcome = driver.query(statements, params, Some(&ctx)).await?;
            serde_json::to_value(outcome)
                .map_err(|e| Error::rpc(format!("failed to encode query result: {e}")))
        }
        "operation" => {
            let statement: String = required_arg(&invocation, 0, "statement")?;
            let params: Option<Params> = optional_arg(&invocation, 1, "parameters")?;
            driver
                .operation(&statement, params.unwrap_or_default(), Some(&ctx))
                .await?;
            Ok(serde_json::Value::Null)
        }
        "watch" => {
            let channel: String = required_arg(&invocation, 0, "channel name")?;
            let topic = driver.watch(&channel, Some(&ctx)).await?;
            Ok(serde_json::Value::String(topic))
        }
        "info" => {
            let info = driver.info().await;
            serde_json::to_value(info)
                .map_err(|e| Error::rpc(format!("failed to encode driver info: {e}")))
        }
        other => Err(Error::rpc(format!("unknown operation {other:?}"))),
    }
}

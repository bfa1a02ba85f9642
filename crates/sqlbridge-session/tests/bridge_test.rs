//! Session bridge lifecycle tests over an in-memory RPC session
//!
//! The mock session records registrations, routes calls to the registered
//! handlers, and collects publishes, so the whole bridge path (join →
//! register → bootstrap connect → remote calls → leave) runs for real
//! against the embedded SQLite backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlbridge_session::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct MockSession {
    next_id: AtomicU64,
    register_calls: AtomicUsize,
    fail_register_after: Option<usize>,
    handlers: Mutex<HashMap<String, (RegistrationId, ProcedureHandler)>>,
    unregistered: Mutex<Vec<RegistrationId>>,
    published: Mutex<Vec<(String, String)>>,
}

impl MockSession {
    fn failing_after(n: usize) -> Self {
        Self {
            fail_register_after: Some(n),
            ..Default::default()
        }
    }

    fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl RpcSession for MockSession {
    async fn register(
        &self,
        procedure: &str,
        handler: ProcedureHandler,
    ) -> Result<RegistrationId> {
        let n = self.register_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_register_after {
            if n >= limit {
                return Err(Error::rpc(format!("register {procedure} refused")));
            }
        }
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.handlers
            .lock()
            .insert(procedure.to_string(), (id, handler));
        Ok(id)
    }

    async fn unregister(&self, registration: RegistrationId) -> Result<()> {
        self.handlers.lock().retain(|_, (id, _)| *id != registration);
        self.unregistered.lock().push(registration);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.published
            .lock()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn call(
        &self,
        procedure: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let handler = {
            let handlers = self.handlers.lock();
            handlers.get(procedure).map(|(_, h)| Arc::clone(h))
        };
        let handler = handler.ok_or_else(|| Error::rpc(format!("no procedure {procedure}")))?;
        handler(Invocation::with_args(args)).await
    }
}

fn sqlite_config(dir: &tempfile::TempDir) -> BridgeConfig {
    let dsn = format!("db={}", dir.path().join("bridge.db").display());
    BridgeConfig::new("realm1", "SQLITE")
        .with_credentials("wampcra", "svc-db", "hunter2")
        .with_dsn(dsn)
}

fn wampcra_challenge() -> Challenge {
    Challenge {
        method: "wampcra".to_string(),
        extra: ChallengeExtra {
            challenge: "nonce".to_string(),
            salt: Some("salt".to_string()),
            iterations: Some(100),
            keylen: Some(32),
        },
    }
}

#[tokio::test]
async fn test_full_lifecycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = Arc::new(MockSession::default());
    let mut bridge =
        SessionBridge::new(sqlite_config(&dir), Arc::clone(&session) as Arc<dyn RpcSession>)
            .expect("bridge");

    assert_eq!(bridge.state(), BridgeState::Unauthenticated);

    let hello = bridge.hello();
    assert_eq!(bridge.state(), BridgeState::Authenticating);
    assert_eq!(hello.realm, "realm1");
    assert_eq!(hello.authmethods, vec!["wampcra".to_string()]);
    assert_eq!(hello.authid, "svc-db");

    let signature = bridge.on_challenge(&wampcra_challenge()).expect("signature");
    assert!(!signature.is_empty());

    bridge.on_join().await.expect("join");
    // Bootstrap descriptor was configured, so the bridge went all the way.
    assert_eq!(bridge.state(), BridgeState::Connected);
    assert_eq!(
        session.registered_names(),
        vec![
            "com.db.connect",
            "com.db.disconnect",
            "com.db.info",
            "com.db.operation",
            "com.db.query",
            "com.db.watch",
        ]
    );

    // Remote callers drive the database through the registered procedures.
    session
        .call(
            "com.db.operation",
            vec![serde_json::json!("create table t (v integer)")],
        )
        .await
        .expect("create");
    session
        .call(
            "com.db.operation",
            vec![
                serde_json::json!("insert into t(v) values(%(v)s)"),
                serde_json::json!({"v": 1}),
            ],
        )
        .await
        .expect("insert");

    let rows = session
        .call("com.db.query", vec![serde_json::json!("select v from t")])
        .await
        .expect("select");
    assert_eq!(rows, serde_json::json!([{"v": 1}]));

    // Multi-statement input keeps the outer sequence.
    let batches = session
        .call(
            "com.db.query",
            vec![serde_json::json!(["select v from t", "select v + 1 as w from t"])],
        )
        .await
        .expect("batch select");
    assert_eq!(batches, serde_json::json!([[{"v": 1}], [{"w": 2}]]));

    let info = session
        .call("com.db.info", vec![])
        .await
        .expect("info");
    assert_eq!(info["engine"], "SQLITE3");
    assert_eq!(info["topic_base"], "com.db");
    assert!(info["dsn"].as_str().expect("dsn set").starts_with("db="));

    // SQLite cannot watch; the distinct error kind survives the bridge.
    let err = session
        .call("com.db.watch", vec![serde_json::json!("ping")])
        .await
        .expect_err("watch unsupported");
    assert!(err.to_string().contains("unsupported"));

    bridge.leave().await.expect("leave");
    assert_eq!(bridge.state(), BridgeState::Closed);
    assert!(bridge.driver().is_none());
    assert_eq!(session.unregistered.lock().len(), 6);
    assert!(session.handlers.lock().is_empty());

    // Leave is a no-op on a closed bridge: no handle released twice.
    bridge.leave().await.expect("second leave");
    assert_eq!(session.unregistered.lock().len(), 6);
}

#[tokio::test]
async fn test_join_without_bootstrap_descriptor_stops_at_registered() {
    let session = Arc::new(MockSession::default());
    let config = BridgeConfig::new("realm1", "SQLITE");
    let mut bridge =
        SessionBridge::new(config, Arc::clone(&session) as Arc<dyn RpcSession>).expect("bridge");

    bridge.hello();
    bridge.on_join().await.expect("join");
    assert_eq!(bridge.state(), BridgeState::Registered);

    // info works before any connect and reports no descriptor.
    let info = session.call("com.db.info", vec![]).await.expect("info");
    assert_eq!(info["dsn"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_unknown_engine_is_fatal_at_construction() {
    let session = Arc::new(MockSession::default());
    let config = BridgeConfig::new("realm1", "DB2");
    let err = SessionBridge::new(config, session as Arc<dyn RpcSession>).unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[tokio::test]
async fn test_unknown_challenge_method_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = Arc::new(MockSession::default());
    let mut bridge =
        SessionBridge::new(sqlite_config(&dir), session as Arc<dyn RpcSession>).expect("bridge");
    bridge.hello();

    let mut challenge = wampcra_challenge();
    challenge.method = "ticket".to_string();
    let err = bridge.on_challenge(&challenge).unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }));
}

#[tokio::test]
async fn test_partial_registration_failure_unwinds() {
    let session = Arc::new(MockSession::failing_after(3));
    let config = BridgeConfig::new("realm1", "SQLITE");
    let mut bridge =
        SessionBridge::new(config, Arc::clone(&session) as Arc<dyn RpcSession>).expect("bridge");

    bridge.hello();
    let err = bridge.on_join().await.unwrap_err();
    assert!(matches!(err, Error::Rpc { .. }));

    // The three successful registrations were all released again.
    assert!(session.handlers.lock().is_empty());
    assert_eq!(session.unregistered.lock().len(), 3);
    assert!(bridge.driver().is_none());
    assert_eq!(bridge.state(), BridgeState::Joined);
}

#[tokio::test]
async fn test_bootstrap_failure_leaves_registrations_standing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = Arc::new(MockSession::default());
    let config = BridgeConfig::new("realm1", "SQLITE")
        .with_dsn("db=/nonexistent-dir/never/bridge.db");
    let mut bridge =
        SessionBridge::new(config, Arc::clone(&session) as Arc<dyn RpcSession>).expect("bridge");

    bridge.hello();
    let err = bridge.on_join().await.unwrap_err();
    assert!(err.to_string().contains("connection"));

    // Procedures survive the failed bootstrap; an explicit connect works.
    assert_eq!(bridge.state(), BridgeState::Registered);
    assert_eq!(session.registered_names().len(), 6);

    let good = format!("db={}", dir.path().join("late.db").display());
    session
        .call("com.db.connect", vec![serde_json::json!(good)])
        .await
        .expect("late connect");
    session
        .call(
            "com.db.operation",
            vec![serde_json::json!("create table t (v integer)")],
        )
        .await
        .expect("create");
}

#[tokio::test]
async fn test_closed_bridge_rejects_rejoin() {
    let session = Arc::new(MockSession::default());
    let config = BridgeConfig::new("realm1", "SQLITE");
    let mut bridge =
        SessionBridge::new(config, session as Arc<dyn RpcSession>).expect("bridge");

    bridge.hello();
    bridge.on_join().await.expect("join");
    bridge.leave().await.expect("leave");

    let err = bridge.on_join().await.unwrap_err();
    assert!(matches!(err, Error::Rpc { .. }));
    assert_eq!(bridge.state(), BridgeState::Closed);
}

#[tokio::test]
async fn test_missing_arguments_are_rejected() {
    let session = Arc::new(MockSession::default());
    let config = BridgeConfig::new("realm1", "SQLITE");
    let mut bridge =
        SessionBridge::new(config, Arc::clone(&session) as Arc<dyn RpcSession>).expect("bridge");
    bridge.hello();
    bridge.on_join().await.expect("join");

    let err = session
        .call("com.db.connect", vec![])
        .await
        .expect_err("connect without descriptor");
    assert!(err.to_string().contains("descriptor"));

    let err = session
        .call("com.db.query", vec![])
        .await
        .expect_err("query without statement");
    assert!(err.to_string().contains("missing argument"));
}

//! Bridge configuration
//!
//! An explicit struct holding exactly the recognized options, in place of a
//! keyword bag shared with the transport: realm, engine, topic prefix,
//! optional bootstrap descriptor, credentials, debug flag.

use crate::error::{Error, Result};
use sqlbridge_rdbc::driver::Engine;

/// Default topic prefix for procedures and generated watch topics
pub const DEFAULT_TOPIC_BASE: &str = "com.db";

/// Credentials the bridge authenticates with
#[derive(Clone)]
pub struct AuthConfig {
    /// Authentication method presented on join
    pub method: String,
    /// Principal to authenticate as
    pub authid: String,
    /// Shared secret used to answer challenges
    pub secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: "anonymous".to_string(),
            authid: "anon".to_string(),
            secret: String::new(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("method", &self.method)
            .field("authid", &self.authid)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Construction options for a session bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Realm to join
    pub realm: String,
    /// Engine identifier (`PG`, `MYSQL`, `SQLITE3`, or an alias)
    pub engine: String,
    /// Namespace root for procedures and watch topics
    pub topic_base: String,
    /// Bootstrap connection descriptor, applied right after registration
    pub dsn: Option<String>,
    /// Credentials for the join handshake
    pub auth: AuthConfig,
    /// Debug flag passed through to the driver
    pub debug: bool,
}

impl BridgeConfig {
    /// Configuration for a realm and engine with defaults everywhere else
    pub fn new(realm: impl Into<String>, engine: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            engine: engine.into(),
            topic_base: DEFAULT_TOPIC_BASE.to_string(),
            dsn: None,
            auth: AuthConfig::default(),
            debug: false,
        }
    }

    /// Set the topic prefix
    pub fn with_topic_base(mut self, topic_base: impl Into<String>) -> Self {
        self.topic_base = topic_base.into();
        self
    }

    /// Set the bootstrap connection descriptor
    pub fn with_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = Some(dsn.into());
        self
    }

    /// Set the credentials presented on join
    pub fn with_credentials(
        mut self,
        method: impl Into<String>,
        authid: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.auth = AuthConfig {
            method: method.into(),
            authid: authid.into(),
            secret: secret.into(),
        };
        self
    }

    /// Set the debug flag
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Parse the configured engine identifier.
    ///
    /// An unknown identifier is a fatal configuration error; there is no
    /// fallback engine.
    pub fn parse_engine(&self) -> Result<Engine> {
        self.engine
            .parse::<Engine>()
            .map_err(|e| Error::config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::new("realm1", "PG");
        assert_eq!(config.topic_base, "com.db");
        assert_eq!(config.dsn, None);
        assert_eq!(config.auth.method, "anonymous");
        assert_eq!(config.auth.authid, "anon");
        assert!(!config.debug);
    }

    #[test]
    fn test_builder() {
        let config = BridgeConfig::new("realm1", "SQLITE")
            .with_topic_base("org.example.db")
            .with_dsn("db=:memory:")
            .with_credentials("wampcra", "svc-db", "hunter2")
            .with_debug(true);
        assert_eq!(config.topic_base, "org.example.db");
        assert_eq!(config.dsn.as_deref(), Some("db=:memory:"));
        assert_eq!(config.auth.method, "wampcra");
        assert!(config.debug);
    }

    #[test]
    fn test_engine_parse() {
        assert!(BridgeConfig::new("r", "PG").parse_engine().is_ok());
        assert!(BridgeConfig::new("r", "DB2").parse_engine().is_err());
    }

    #[test]
    fn test_secret_redacted_from_debug() {
        let config = BridgeConfig::new("r", "PG").with_credentials("wampcra", "svc", "hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }
}

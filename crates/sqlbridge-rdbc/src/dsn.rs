//! Connection descriptor parsing
//!
//! Descriptors are whitespace-separated `key=value` tokens, e.g.
//! `dbname=mydb host=10.0.0.1 user=admin password=secret`. Tokens without
//! `=` are rejected with a descriptive error. The raw text is kept verbatim
//! for `info()`; logging goes through [`Dsn::redacted`], which masks the
//! password value.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// A parsed connection descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    raw: String,
    entries: HashMap<String, String>,
}

impl Dsn {
    /// Parse a `key=value` descriptor string.
    ///
    /// Later duplicates of a key override earlier ones.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut entries = HashMap::new();
        for token in raw.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                return Err(Error::connection(format!(
                    "malformed connection descriptor: token {token:?} is not key=value"
                )));
            };
            if key.is_empty() {
                return Err(Error::connection(format!(
                    "malformed connection descriptor: token {token:?} has an empty key"
                )));
            }
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(Self {
            raw: raw.to_string(),
            entries,
        })
    }

    /// The descriptor text exactly as supplied
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Look up a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// First present value among aliases, e.g. `dbname`/`db`
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    /// Database name (`dbname`, falling back to `db`)
    pub fn dbname(&self) -> Option<&str> {
        self.get_any(&["dbname", "db"])
    }

    /// Host name or address
    pub fn host(&self) -> Option<&str> {
        self.get("host")
    }

    /// TCP port, when present and numeric
    pub fn port(&self) -> Result<Option<u16>> {
        match self.get("port") {
            None => Ok(None),
            Some(p) => p.parse().map(Some).map_err(|_| {
                Error::connection(format!("malformed connection descriptor: bad port {p:?}"))
            }),
        }
    }

    /// Connecting user
    pub fn user(&self) -> Option<&str> {
        self.get("user")
    }

    /// Password (`password`, falling back to `passwd`)
    pub fn password(&self) -> Option<&str> {
        self.get_any(&["password", "passwd"])
    }

    /// Keys present in the descriptor
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Error unless every key is in `allowed`.
    ///
    /// Backends with a fixed option set use this so a typo fails loudly
    /// instead of being silently ignored.
    pub fn check_keys(&self, allowed: &[&str]) -> Result<()> {
        for key in self.entries.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(Error::connection(format!(
                    "unrecognized connection descriptor key {key:?} (expected one of {allowed:?})"
                )));
            }
        }
        Ok(())
    }

    /// Descriptor text with the password value masked, safe for logs
    pub fn redacted(&self) -> String {
        self.raw
            .split_whitespace()
            .map(|token| match token.split_once('=') {
                Some((key @ ("password" | "passwd"), _)) => format!("{key}=***"),
                _ => token.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display is the log-safe form; use raw() when the backend needs it.
        write!(f, "{}", self.redacted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_basic() {
        let dsn = Dsn::parse("dbname=mydb host=10.0.0.1 user=admin password=secret").unwrap();
        assert_eq!(dsn.dbname(), Some("mydb"));
        assert_eq!(dsn.host(), Some("10.0.0.1"));
        assert_eq!(dsn.user(), Some("admin"));
        assert_eq!(dsn.password(), Some("secret"));
        assert_eq!(dsn.port().unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_token_without_equals() {
        let err = Dsn::parse("dbname=mydb nonsense").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("nonsense"));
    }

    #[test]
    fn test_parse_rejects_empty_key() {
        let err = Dsn::parse("=oops").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_empty_descriptor_is_valid() {
        let dsn = Dsn::parse("").unwrap();
        assert_eq!(dsn.dbname(), None);
    }

    #[test]
    fn test_last_duplicate_wins() {
        let dsn = Dsn::parse("host=a host=b").unwrap();
        assert_eq!(dsn.host(), Some("b"));
    }

    #[test]
    fn test_value_may_contain_equals() {
        let dsn = Dsn::parse("password=a=b").unwrap();
        assert_eq!(dsn.password(), Some("a=b"));
    }

    #[test]
    fn test_port_parsing() {
        let dsn = Dsn::parse("port=5432").unwrap();
        assert_eq!(dsn.port().unwrap(), Some(5432));
        let dsn = Dsn::parse("port=abc").unwrap();
        assert!(dsn.port().is_err());
    }

    #[test]
    fn test_redacted_masks_password() {
        let dsn = Dsn::parse("dbname=mydb password=secret").unwrap();
        assert_eq!(dsn.redacted(), "dbname=mydb password=***");
        assert!(dsn.raw().contains("secret"));
        assert!(!format!("{dsn}").contains("secret"));
    }

    #[test]
    fn test_check_keys() {
        let dsn = Dsn::parse("dbname=x sslmode=require").unwrap();
        assert!(dsn.check_keys(&["dbname", "host"]).is_err());
        assert!(dsn.check_keys(&["dbname", "sslmode"]).is_ok());
    }
}

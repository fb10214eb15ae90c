use std::time::Duration;

use tracing::{info, warn};

pub const DEFAULT_ADDR: &str = "0.0.0.0:9001";
pub const DEFAULT_DB_PATH: &str = "portal.db";
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;

/// Runtime settings of the messaging server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: String,
    pub db_path: String,
    /// JSON file with users and orders for the in-memory directory
    pub seed_path: Option<String>,
    pub access_token: Option<String>,
    pub auth_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            db_path: DEFAULT_DB_PATH.to_string(),
            seed_path: None,
            access_token: None,
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    /// Read settings from the process environment, after loading `.env` if present
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            info!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let auth_timeout = match non_empty("PORTAL_AUTH_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!(value = %raw, "Invalid PORTAL_AUTH_TIMEOUT_SECS, using default");
                    defaults.auth_timeout
                }
            },
            None => defaults.auth_timeout,
        };

        Self {
            addr: non_empty("PORTAL_SERVER_ADDR").unwrap_or(defaults.addr),
            db_path: non_empty("PORTAL_DB_PATH").unwrap_or(defaults.db_path),
            seed_path: non_empty("PORTAL_SEED_PATH"),
            access_token: non_empty("PORTAL_ACCESS_TOKEN"),
            auth_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.addr, "0.0.0.0:9001");
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_reads_every_setting() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORTAL_SERVER_ADDR", "127.0.0.1:7000"),
            ("PORTAL_DB_PATH", "/tmp/chat.db"),
            ("PORTAL_SEED_PATH", "seed.json"),
            ("PORTAL_ACCESS_TOKEN", "secret"),
            ("PORTAL_AUTH_TIMEOUT_SECS", "3"),
        ]));

        assert_eq!(config.addr, "127.0.0.1:7000");
        assert_eq!(config.db_path, "/tmp/chat.db");
        assert_eq!(config.seed_path.as_deref(), Some("seed.json"));
        assert_eq!(config.access_token.as_deref(), Some("secret"));
        assert_eq!(config.auth_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_blank_and_invalid_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORTAL_ACCESS_TOKEN", "  "),
            ("PORTAL_AUTH_TIMEOUT_SECS", "soon"),
        ]));
        assert!(config.access_token.is_none());
        assert_eq!(config.auth_timeout, Duration::from_secs(10));

        let config = ServerConfig::from_lookup(lookup(&[("PORTAL_AUTH_TIMEOUT_SECS", "0")]));
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
    }
}

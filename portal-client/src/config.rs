use std::time::Duration;

use tracing::{info, warn};

/// Server URL: checked at compile time via option_env!, falls back to runtime env var, then default
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:9001";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub server_url: String,
    pub access_token: Option<String>,
    /// Refresh cadence of an open conversation
    pub conversation_poll: Duration,
    /// Refresh cadence of the unread badge
    pub badge_poll: Duration,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            access_token: None,
            conversation_poll: Duration::from_secs(3),
            badge_poll: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(option_env!("PORTAL_SERVER_URL"), |key| std::env::var(key).ok())
    }

    /// Priority for the server URL: build-time value -> runtime env -> default
    pub fn from_lookup(
        build_time_url: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let runtime_url = non_empty("PORTAL_SERVER_URL");

        info!(
            build_time = ?build_time_url,
            runtime = ?runtime_url,
            "WebSocket URL sources"
        );

        let server_url = build_time_url
            .map(String::from)
            .or(runtime_url)
            .unwrap_or(defaults.server_url);

        let secs = |key: &str, fallback: Duration| match non_empty(key) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(n) if n > 0 => Duration::from_secs(n),
                _ => {
                    warn!(key, value = %raw, "Invalid duration, using default");
                    fallback
                }
            },
            None => fallback,
        };

        Self {
            server_url,
            access_token: non_empty("PORTAL_ACCESS_TOKEN"),
            conversation_poll: secs("PORTAL_CONVERSATION_POLL_SECS", defaults.conversation_poll),
            badge_poll: secs("PORTAL_BADGE_POLL_SECS", defaults.badge_poll),
            request_timeout: secs("PORTAL_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            reconnect_delay: defaults.reconnect_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(None, |_| None);
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.server_url, "ws://localhost:9001");
        assert_eq!(config.conversation_poll, Duration::from_secs(3));
        assert_eq!(config.badge_poll, Duration::from_secs(5));
    }

    #[test]
    fn test_runtime_values() {
        let config = ClientConfig::from_lookup(None, |key| match key {
            "PORTAL_SERVER_URL" => Some("ws://portal.internal:9001".to_string()),
            "PORTAL_BADGE_POLL_SECS" => Some("15".to_string()),
            "PORTAL_CONVERSATION_POLL_SECS" => Some("nope".to_string()),
            "PORTAL_ACCESS_TOKEN" => Some("abc".to_string()),
            _ => None,
        });
        assert_eq!(config.server_url, "ws://portal.internal:9001");
        assert_eq!(config.badge_poll, Duration::from_secs(15));
        assert_eq!(config.conversation_poll, Duration::from_secs(3));
        assert_eq!(config.access_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_build_time_url_wins() {
        let config = ClientConfig::from_lookup(Some("wss://baked.example"), |key| {
            (key == "PORTAL_SERVER_URL").then(|| "ws://runtime".to_string())
        });
        assert_eq!(config.server_url, "wss://baked.example");
    }
}

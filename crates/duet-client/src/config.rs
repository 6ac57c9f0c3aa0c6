//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so the client starts with no configuration
//! against a database in the platform data directory.

use std::path::PathBuf;
use std::time::Duration;

use duet_shared::constants::DEFAULT_SUBSCRIPTION_BUFFER;
use duet_shared::UserEmail;
use duet_store::LocalStoreConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// SQLite database file.
    /// Env: `DUET_DB_PATH`
    /// Default: `None` (platform data directory).
    pub db_path: Option<PathBuf>,

    /// The signed-in user.
    /// Env: `DUET_USER_EMAIL`
    /// Default: `None` (not authenticated).
    pub user_email: Option<UserEmail>,

    /// Env: `DUET_PHOTO_URL`
    pub photo_url: Option<String>,

    /// Delay before the local store commits an append, making pending
    /// writes observable.
    /// Env: `DUET_COMMIT_LATENCY_MS`
    /// Default: `0`
    pub commit_latency: Duration,

    /// Env: `DUET_SUBSCRIPTION_BUFFER`
    /// Default: `16`
    pub subscription_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            user_email: None,
            photo_url: None,
            commit_latency: Duration::ZERO,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("DUET_DB_PATH").filter(|p| !p.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(email) = lookup("DUET_USER_EMAIL") {
            match UserEmail::parse(&email) {
                Ok(email) => config.user_email = Some(email),
                Err(e) => tracing::warn!(error = %e, "Invalid DUET_USER_EMAIL, staying signed out"),
            }
        }

        if let Some(url) = lookup("DUET_PHOTO_URL").filter(|u| !u.is_empty()) {
            config.photo_url = Some(url);
        }

        if let Some(val) = lookup("DUET_COMMIT_LATENCY_MS") {
            match val.parse::<u64>() {
                Ok(ms) => config.commit_latency = Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid DUET_COMMIT_LATENCY_MS, using default")
                }
            }
        }

        if let Some(val) = lookup("DUET_SUBSCRIPTION_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.subscription_buffer = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid DUET_SUBSCRIPTION_BUFFER, using default")
                }
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    pub fn store_config(&self) -> LocalStoreConfig {
        LocalStoreConfig {
            commit_latency: self.commit_latency,
            subscription_buffer: self.subscription_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ClientConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = from_pairs(&[]);
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.store_config().commit_latency, Duration::ZERO);
        assert_eq!(config.store_config().subscription_buffer, 16);
    }

    #[test]
    fn test_reads_all_settings() {
        let config = from_pairs(&[
            ("DUET_DB_PATH", "/tmp/duet.db"),
            ("DUET_USER_EMAIL", " a@x "),
            ("DUET_PHOTO_URL", "https://img/a.png"),
            ("DUET_COMMIT_LATENCY_MS", "250"),
            ("DUET_SUBSCRIPTION_BUFFER", "4"),
        ]);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/duet.db")));
        assert_eq!(config.user_email, Some(UserEmail::from("a@x")));
        assert_eq!(config.photo_url.as_deref(), Some("https://img/a.png"));
        assert_eq!(config.commit_latency, Duration::from_millis(250));
        assert_eq!(config.subscription_buffer, 4);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("DUET_USER_EMAIL", "nobody"),
            ("DUET_COMMIT_LATENCY_MS", "soon"),
            ("DUET_SUBSCRIPTION_BUFFER", "0"),
        ]);
        assert_eq!(config.user_email, None);
        assert_eq!(config.commit_latency, Duration::ZERO);
        assert_eq!(config.subscription_buffer, DEFAULT_SUBSCRIPTION_BUFFER);
    }
}

//! Repository configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the core works with zero
//! configuration.

use std::time::Duration;

use palaver_shared::constants::{DEFAULT_MESSAGE_PAGE, DEFAULT_USER_SEARCH_LIMIT};

/// Tuning knobs for [`crate::ChatRepository`].
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Deadline for a single store round-trip; elapsed operations fail
    /// with the transient `Timeout` error.
    /// Env: `PALAVER_OP_TIMEOUT_MS` (0 disables the deadline)
    /// Default: 10 seconds.
    pub op_timeout: Option<Duration>,

    /// Default page size for message history queries.
    /// Env: `PALAVER_MESSAGE_PAGE`
    /// Default: `50`
    pub message_page: u32,

    /// Default result cap for user search.
    /// Env: `PALAVER_USER_SEARCH_LIMIT`
    /// Default: `20`
    pub user_search_limit: u32,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            op_timeout: Some(Duration::from_secs(10)),
            message_page: DEFAULT_MESSAGE_PAGE,
            user_search_limit: DEFAULT_USER_SEARCH_LIMIT,
        }
    }
}

impl RepositoryConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PALAVER_OP_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(0) => config.op_timeout = None,
                Ok(ms) => config.op_timeout = Some(Duration::from_millis(ms)),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid PALAVER_OP_TIMEOUT_MS, using default");
                }
            }
        }

        if let Ok(val) = std::env::var("PALAVER_MESSAGE_PAGE") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.message_page = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid PALAVER_MESSAGE_PAGE, using default");
                }
            }
        }

        if let Ok(val) = std::env::var("PALAVER_USER_SEARCH_LIMIT") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.user_search_limit = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid PALAVER_USER_SEARCH_LIMIT, using default");
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RepositoryConfig::default();
        assert_eq!(config.op_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.message_page, 50);
        assert_eq!(config.user_search_limit, 20);
    }
}

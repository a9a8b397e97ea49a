//! Configuration and settings management
//!
//! Loads settings from environment variables and defines tuning constants
//! for the dispatch engine.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Comma-separated list of admin user IDs allowed to manage join requests
    #[serde(rename = "admin_ids")]
    pub admin_ids_str: Option<String>,

    /// Global ceiling on mutating Bot API calls per second
    #[serde(default = "default_approvals_per_second")]
    pub approvals_per_second: usize,

    /// Number of concurrent workers draining a bulk batch
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Message posted to the group after a single-item approval.
    /// Supports a `{mention}` placeholder for the new member.
    pub welcome_template: Option<String>,
}

const fn default_approvals_per_second() -> usize {
    20
}

const fn default_worker_pool_size() -> usize {
    25
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Environment::default() auto-converts UPPER_SNAKE_CASE to snake_case;
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// Returns the set of Telegram IDs allowed to manage join requests
    #[must_use]
    pub fn admin_ids(&self) -> HashSet<i64> {
        self.admin_ids_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the given user is an admin
    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids().contains(&user_id)
    }
}

// Dispatch engine tuning
/// Page size for listing pending join requests
pub const LIST_PAGE_SIZE: usize = 200;
/// Pause between pages of a bulk run, milliseconds
pub const INTER_PAGE_PAUSE_MS: u64 = 500;
/// How often the rate limiter re-checks its window when saturated, milliseconds
pub const LIMITER_RECHECK_MS: u64 = 50;

// Executor retry policy
/// Max attempts when Telegram signals "retry after N seconds"
pub const RATE_LIMIT_MAX_ATTEMPTS: usize = 8;
/// Safety margin added to a server-signaled wait, milliseconds
pub const RATE_LIMIT_MARGIN_MS: u64 = 500;
/// Max attempts on network/timeout failures
pub const NETWORK_MAX_ATTEMPTS: usize = 6;
/// Fixed sleep between network retries, milliseconds
pub const NETWORK_RETRY_DELAY_MS: u64 = 1000;

// Admin-facing messaging retry policy
/// Initial backoff for Telegram sends, milliseconds
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Max backoff for Telegram sends, milliseconds
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Max retries for Telegram sends
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

// Unauthorized-access flood protection
/// Cooldown between denial messages to the same user, seconds
pub const DENIED_COOLDOWN_SECS: u64 = 1200;
/// TTL for denial cache entries, seconds
pub const DENIED_CACHE_TTL_SECS: u64 = 7200;
/// Max entries in the denial cache
pub const DENIED_CACHE_MAX_SIZE: u64 = 10_000;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // The only test touching process env; the other tests build Settings
    // by hand to avoid environment variable races.
    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        // 1. Standard loading
        env::set_var("TELEGRAM_TOKEN", "dummy_token");
        env::set_var("ADMIN_IDS", "123, 456");

        let settings = Settings::new()?;
        assert_eq!(settings.telegram_token, "dummy_token");
        let admins = settings.admin_ids();
        assert!(admins.contains(&123));
        assert!(admins.contains(&456));

        env::remove_var("TELEGRAM_TOKEN");
        env::remove_var("ADMIN_IDS");

        // 2. Empty env var is treated as unset (ignore_empty)
        env::set_var("TELEGRAM_TOKEN", "dummy_token");
        env::set_var("WELCOME_TEMPLATE", "");

        let settings = Settings::new()?;
        assert_eq!(settings.welcome_template, None);
        assert!(settings.admin_ids().is_empty());

        // 3. Defaults kick in when the knobs are not set
        assert_eq!(settings.approvals_per_second, 20);
        assert_eq!(settings.worker_pool_size, 25);

        env::remove_var("TELEGRAM_TOKEN");
        env::remove_var("WELCOME_TEMPLATE");
        Ok(())
    }

    fn base_settings() -> Settings {
        Settings {
            telegram_token: "dummy".to_string(),
            admin_ids_str: None,
            approvals_per_second: default_approvals_per_second(),
            worker_pool_size: default_worker_pool_size(),
            welcome_template: None,
        }
    }

    #[test]
    fn test_admin_list_parsing() {
        let mut settings = base_settings();

        // Comma
        settings.admin_ids_str = Some("123,456".to_string());
        let admins = settings.admin_ids();
        assert!(admins.contains(&123));
        assert!(admins.contains(&456));
        assert_eq!(admins.len(), 2);

        // Space
        settings.admin_ids_str = Some("111 222".to_string());
        let admins = settings.admin_ids();
        assert!(admins.contains(&111));
        assert!(admins.contains(&222));
        assert_eq!(admins.len(), 2);

        // Semicolon and mixed
        settings.admin_ids_str = Some("333; 444, 555".to_string());
        let admins = settings.admin_ids();
        assert!(admins.contains(&333));
        assert!(admins.contains(&444));
        assert!(admins.contains(&555));
        assert_eq!(admins.len(), 3);

        // Bad tokens are skipped
        settings.admin_ids_str = Some("abc, 777".to_string());
        let admins = settings.admin_ids();
        assert!(admins.contains(&777));
        assert_eq!(admins.len(), 1);
    }

    #[test]
    fn test_no_admins_means_nobody() {
        let settings = base_settings();
        assert!(settings.admin_ids().is_empty());
        assert!(!settings.is_admin(1));
    }

    #[test]
    fn test_defaults() {
        let settings = base_settings();
        assert_eq!(settings.approvals_per_second, 20);
        assert_eq!(settings.worker_pool_size, 25);
    }
}

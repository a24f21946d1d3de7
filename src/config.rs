//! Configuration and settings management
//!
//! Loads settings from environment variables and defines the point-economy
//! constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// The single administrator allowed to author broadcasts
    pub super_admin_id: i64,

    /// Comma-separated list of additional administrator IDs
    #[serde(rename = "admin_ids")]
    pub admin_ids_str: Option<String>,

    /// Base URL of the WhatsApp login provider
    #[serde(default = "default_provider_base_url")]
    pub provider_base_url: String,

    /// SQLite database URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Points required per currency unit withdrawn
    #[serde(default = "default_points_per_unit")]
    pub points_per_unit: i64,

    /// Minimum withdrawal amount in currency units
    #[serde(default = "default_min_withdrawal")]
    pub min_withdrawal: f64,

    /// Items per page in administrator listings
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// How long a pending QR login stays confirmable
    #[serde(default = "default_login_confirm_timeout_secs")]
    pub login_confirm_timeout_secs: i64,
}

fn default_provider_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_database_url() -> String {
    "sqlite://bot_database.db".to_string()
}

const fn default_points_per_unit() -> i64 {
    10
}

const fn default_min_withdrawal() -> f64 {
    100.0
}

const fn default_page_size() -> usize {
    5
}

const fn default_login_confirm_timeout_secs() -> i64 {
    300
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
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Environment::default() auto-converts UPPER_SNAKE_CASE to
            // snake_case; ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// Returns every administrator ID, the super admin included
    #[must_use]
    pub fn admin_ids(&self) -> HashSet<i64> {
        let mut ids: HashSet<i64> = self
            .admin_ids_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default();
        ids.insert(self.super_admin_id);
        ids
    }

    /// Whether the given user may trigger administrator actions
    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids().contains(&user_id)
    }

    /// Whether the given user is the super administrator
    #[must_use]
    pub const fn is_super_admin(&self, user_id: i64) -> bool {
        self.super_admin_id == user_id
    }
}

// Point-economy constants

/// Points credited for each confirmed WhatsApp login
pub const POINTS_PER_LOGIN: i64 = 10;
/// Points for a successful referral (reserved: configured but no crediting
/// path is wired up)
pub const POINTS_PER_REFERRAL: i64 = 20;
/// Points credited once per UTC calendar day on contact
pub const POINTS_PER_DAILY_LOGIN: i64 = 5;
/// Streak bonus (reserved, same treatment as the referral reward)
pub const POINTS_STREAK_BONUS: i64 = 50;

//! SQLite-backed persistence for users, sessions, and withdrawals.
//!
//! All balance mutations go through single conditional statements or short
//! transactions so that a crash can never leave held points unaccounted for.

/// Points ledger operations on the users table
pub mod ledger;
/// WhatsApp session rows
pub mod sessions;
/// Withdrawal request rows
pub mod withdrawals;

use crate::error::{BotError, BotResult};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY,
    username TEXT NOT NULL,
    points INTEGER NOT NULL DEFAULT 0,
    referral_code TEXT NOT NULL UNIQUE,
    referred_by INTEGER,
    last_login TEXT NOT NULL,
    login_streak INTEGER NOT NULL DEFAULT 0,
    successful_logins INTEGER NOT NULL DEFAULT 0,
    failed_logins INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS sessions (
    session_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users (user_id),
    phone_number TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS sessions_active_phone
    ON sessions (phone_number) WHERE status = 'active';
CREATE TABLE IF NOT EXISTS withdrawals (
    request_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users (user_id),
    amount REAL NOT NULL,
    points_held INTEGER NOT NULL,
    payment_number TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    requested_at TEXT NOT NULL
);
";

/// A registered bot user with their points balance.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    /// Telegram user ID
    pub user_id: i64,
    /// Display name captured at first contact
    pub username: String,
    /// Current points balance, never negative
    pub points: i64,
    /// Unique referral code generated at registration
    pub referral_code: String,
    /// Referrer, referential only
    pub referred_by: Option<i64>,
    /// Last day (UTC) the daily bonus was granted
    pub last_login: NaiveDate,
    /// Consecutive daily-login streak
    pub login_streak: i64,
    /// Lifetime confirmed logins
    pub successful_logins: i64,
    /// Lifetime failed login confirmations
    pub failed_logins: i64,
}

/// Lifecycle of a linked WhatsApp session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Linked and usable
    Active,
    /// Revoked by an administrator; kept for audit
    Inactive,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// A linked WhatsApp account. Rows are never deleted.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    /// Row ID
    pub session_id: i64,
    /// Owning user
    pub user_id: i64,
    /// Phone number; at most one *active* session per phone system-wide
    pub phone_number: String,
    /// Current lifecycle state
    pub status: SessionStatus,
    /// When the login was confirmed
    pub created_at: DateTime<Utc>,
}

/// Terminal-once lifecycle of a withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    /// Awaiting administrator review
    Pending,
    /// Paid out; the held points stay spent
    Approved,
    /// Rejected; the held points were refunded
    Declined,
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Declined => write!(f, "declined"),
        }
    }
}

/// A request to convert held points into a currency payout.
#[derive(Debug, Clone, FromRow)]
pub struct Withdrawal {
    /// Row ID
    pub request_id: i64,
    /// Owning user
    pub user_id: i64,
    /// Requested amount in currency units
    pub amount: f64,
    /// Points debited when the request was created
    pub points_held: i64,
    /// Destination payment identifier
    pub payment_number: String,
    /// Current lifecycle state
    pub status: WithdrawalStatus,
    /// When the request was created
    pub requested_at: DateTime<Utc>,
}

/// Handle to the SQLite database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `database_url` and apply
    /// the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed or the database is
    /// unreachable.
    pub async fn connect(database_url: &str) -> BotResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(BotError::Database)?
            .create_if_missing(true);
        // SQLite allows a single writer; one pooled connection also keeps
        // `sqlite::memory:` databases coherent across queries.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open a fresh in-memory database. Used by tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn in_memory() -> BotResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> BotResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

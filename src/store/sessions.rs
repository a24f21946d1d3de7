//! Session rows: one per linked WhatsApp account, never deleted.

use super::{Session, SessionStatus, Store};
use crate::error::{BotError, BotResult};
use chrono::{DateTime, Utc};
use tracing::info;

impl Store {
    /// Find the session row for a (user, phone) pair, regardless of status.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn find_session(&self, user_id: i64, phone: &str) -> BotResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE user_id = ? AND phone_number = ?",
        )
        .bind(user_id)
        .bind(phone)
        .fetch_optional(self.pool())
        .await?;
        Ok(session)
    }

    /// Insert an active session unless one already exists for this
    /// (user, phone) pair; the existing row is returned unchanged so the
    /// confirmation path never duplicates rows.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when another user already holds an active
    /// session for the phone (at most one active session per phone
    /// system-wide).
    pub async fn create_session(
        &self,
        user_id: i64,
        phone: &str,
        now: DateTime<Utc>,
    ) -> BotResult<Session> {
        if let Some(existing) = self.find_session(user_id, phone).await? {
            return Ok(existing);
        }
        if self.active_session_holder(phone).await?.is_some() {
            return Err(BotError::InvalidInput(format!(
                "phone {phone} is already linked to another account"
            )));
        }
        let session = sqlx::query_as::<_, Session>(
            r"
            INSERT INTO sessions (user_id, phone_number, status, created_at)
            VALUES (?, ?, 'active', ?)
            RETURNING *
            ",
        )
        .bind(user_id)
        .bind(phone)
        .bind(now)
        .fetch_one(self.pool())
        .await?;
        info!(user_id, phone, "session created");
        Ok(session)
    }

    /// Record a confirmed login: create the session if absent, credit the
    /// login reward, and bump the success counter, all in one transaction.
    /// Returns the session and whether it was newly created.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when another user holds the phone's active
    /// session, or on database failure.
    pub async fn record_confirmed_login(
        &self,
        user_id: i64,
        phone: &str,
        reward: i64,
        now: DateTime<Utc>,
    ) -> BotResult<(Session, bool)> {
        let mut tx = self.pool().begin().await?;

        let existing = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE user_id = ? AND phone_number = ?",
        )
        .bind(user_id)
        .bind(phone)
        .fetch_optional(&mut *tx)
        .await?;

        let (session, created) = match existing {
            Some(session) => (session, false),
            None => {
                let holder = sqlx::query_scalar::<_, i64>(
                    "SELECT user_id FROM sessions WHERE phone_number = ? AND status = 'active'",
                )
                .bind(phone)
                .fetch_optional(&mut *tx)
                .await?;
                if holder.is_some() {
                    return Err(BotError::InvalidInput(format!(
                        "phone {phone} is already linked to another account"
                    )));
                }
                let session = sqlx::query_as::<_, Session>(
                    r"
                    INSERT INTO sessions (user_id, phone_number, status, created_at)
                    VALUES (?, ?, 'active', ?)
                    RETURNING *
                    ",
                )
                .bind(user_id)
                .bind(phone)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;
                (session, true)
            }
        };

        sqlx::query(
            r"
            UPDATE users
            SET points = points + ?, successful_logins = successful_logins + 1
            WHERE user_id = ?
            ",
        )
        .bind(reward)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(user_id, phone, created, reward, "login confirmed");
        Ok((session, created))
    }

    /// All active sessions owned by a user.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn active_sessions(&self, user_id: i64) -> BotResult<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE user_id = ? AND status = 'active' ORDER BY session_id",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(sessions)
    }

    /// Number of active sessions owned by a user.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn active_session_count(&self, user_id: i64) -> BotResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sessions WHERE user_id = ? AND status = 'active'",
        )
        .bind(user_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    /// Every phone number that has a session row. Used by the administrator
    /// session-management listing.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn all_session_phones(&self) -> BotResult<Vec<String>> {
        let phones = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT phone_number FROM sessions ORDER BY phone_number",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(phones)
    }

    /// Mark the active session for a phone inactive. Returns `false` when
    /// there was no active session to deactivate. The row stays in place as
    /// an audit trail.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn deactivate_session(&self, phone: &str) -> BotResult<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'inactive' WHERE phone_number = ? AND status = 'active'",
        )
        .bind(phone)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_session_holder(&self, phone: &str) -> BotResult<Option<i64>> {
        let holder = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM sessions WHERE phone_number = ? AND status = 'active'",
        )
        .bind(phone)
        .fetch_optional(self.pool())
        .await?;
        Ok(holder)
    }
}

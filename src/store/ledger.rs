//! Points ledger: atomic balance mutations on the users table.
//!
//! Every mutation is a single conditional `UPDATE`, so concurrent operations
//! against the same user serialize on the row and the balance can never go
//! negative.

use super::{Store, User};
use crate::error::{BotError, BotResult};
use chrono::NaiveDate;
use tracing::info;

/// Debit `amount` points on the given executor. Returns `false` when the
/// balance cannot cover the debit; the statement then changes nothing.
pub(crate) async fn try_debit<'e, E>(executor: E, user_id: i64, amount: i64) -> BotResult<bool>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result =
        sqlx::query("UPDATE users SET points = points - ?1 WHERE user_id = ?2 AND points >= ?1")
            .bind(amount)
            .bind(user_id)
            .execute(executor)
            .await?;
    Ok(result.rows_affected() > 0)
}

impl Store {
    /// Fetch a user row by Telegram ID.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_user(&self, user_id: i64) -> BotResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(user)
    }

    /// Register a user at first contact: generated referral code, streak of
    /// one, and the initial points grant.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure (including an already-registered
    /// user ID).
    pub async fn create_user(
        &self,
        user_id: i64,
        username: &str,
        today: NaiveDate,
        initial_points: i64,
    ) -> BotResult<User> {
        let referral_code = format!("ref_{user_id}");
        let user = sqlx::query_as::<_, User>(
            r"
            INSERT INTO users (user_id, username, points, referral_code, last_login, login_streak)
            VALUES (?, ?, ?, ?, ?, 1)
            RETURNING *
            ",
        )
        .bind(user_id)
        .bind(username)
        .bind(initial_points)
        .bind(referral_code)
        .bind(today)
        .fetch_one(self.pool())
        .await?;
        info!(user_id, "registered new user");
        Ok(user)
    }

    /// Grant the daily login bonus at most once per calendar day (UTC).
    ///
    /// The points grant, the `last_login` advance, and the streak update all
    /// happen in one statement, so two concurrent claims cannot both win.
    /// Returns `true` when the bonus was credited.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn claim_daily_bonus(
        &self,
        user_id: i64,
        today: NaiveDate,
        bonus: i64,
    ) -> BotResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE users SET
                points = points + ?1,
                login_streak = CASE
                    WHEN last_login = date(?2, '-1 day') THEN login_streak + 1
                    ELSE 1
                END,
                last_login = ?2
            WHERE user_id = ?3 AND last_login < ?2
            ",
        )
        .bind(bonus)
        .bind(today)
        .bind(user_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Credit points to a user. Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a non-positive amount or an unknown user.
    pub async fn credit(&self, user_id: i64, amount: i64, reason: &str) -> BotResult<i64> {
        if amount <= 0 {
            return Err(BotError::InvalidInput(format!(
                "credit amount must be positive, got {amount}"
            )));
        }
        let balance = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET points = points + ? WHERE user_id = ? RETURNING points",
        )
        .bind(amount)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| BotError::InvalidInput(format!("unknown user {user_id}")))?;
        info!(user_id, amount, reason, balance, "points credited");
        Ok(balance)
    }

    /// Debit points from a user, failing when the balance cannot cover it.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientBalance` when `amount` exceeds the balance, or
    /// `InvalidInput` for a non-positive amount.
    pub async fn debit(&self, user_id: i64, amount: i64) -> BotResult<i64> {
        if amount <= 0 {
            return Err(BotError::InvalidInput(format!(
                "debit amount must be positive, got {amount}"
            )));
        }
        if try_debit(self.pool(), user_id, amount).await? {
            return self.balance(user_id).await;
        }
        let available = self.balance(user_id).await?;
        Err(BotError::InsufficientBalance {
            required: amount,
            available,
        })
    }

    /// Current points balance of a user.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an unknown user.
    pub async fn balance(&self, user_id: i64) -> BotResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT points FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| BotError::InvalidInput(format!("unknown user {user_id}")))
    }

    /// Bump the lifetime failed-login counter.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn record_login_failure(&self, user_id: i64) -> BotResult<()> {
        sqlx::query("UPDATE users SET failed_logins = failed_logins + 1 WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// All users, ordered by ID. Used by administrator listings.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_users(&self) -> BotResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY user_id")
            .fetch_all(self.pool())
            .await?;
        Ok(users)
    }

    /// Every known user ID. Used for broadcast delivery.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn user_ids(&self) -> BotResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT user_id FROM users ORDER BY user_id")
            .fetch_all(self.pool())
            .await?;
        Ok(ids)
    }
}

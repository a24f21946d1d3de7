//! Withdrawal rows: debit-then-persist creation and guarded terminal
//! transitions, each inside a single transaction.

use super::ledger::try_debit;
use super::{Store, Withdrawal};
use crate::error::{BotError, BotResult};
use chrono::{DateTime, Utc};
use tracing::info;

impl Store {
    /// Create a pending withdrawal, debiting `points_held` in the same
    /// transaction as the insert. The hold is immediate: two concurrent
    /// requests cannot double-spend the same points, and a failed insert
    /// rolls the debit back.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientBalance` when the balance cannot cover the hold,
    /// checked at debit time.
    pub async fn create_withdrawal(
        &self,
        user_id: i64,
        amount: f64,
        points_held: i64,
        payment_number: &str,
        now: DateTime<Utc>,
    ) -> BotResult<Withdrawal> {
        let mut tx = self.pool().begin().await?;

        if !try_debit(&mut *tx, user_id, points_held).await? {
            let available =
                sqlx::query_scalar::<_, i64>("SELECT points FROM users WHERE user_id = ?")
                    .bind(user_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .unwrap_or(0);
            return Err(BotError::InsufficientBalance {
                required: points_held,
                available,
            });
        }

        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r"
            INSERT INTO withdrawals (user_id, amount, points_held, payment_number, status, requested_at)
            VALUES (?, ?, ?, ?, 'pending', ?)
            RETURNING *
            ",
        )
        .bind(user_id)
        .bind(amount)
        .bind(points_held)
        .bind(payment_number)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            user_id,
            request_id = withdrawal.request_id,
            amount,
            points_held,
            "withdrawal requested"
        );
        Ok(withdrawal)
    }

    /// Transition a pending request to approved. The held points stay spent.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyProcessed` when the request is already terminal, or
    /// `InvalidInput` when it does not exist.
    pub async fn approve_withdrawal(&self, request_id: i64) -> BotResult<Withdrawal> {
        let updated = sqlx::query_as::<_, Withdrawal>(
            r"
            UPDATE withdrawals SET status = 'approved'
            WHERE request_id = ? AND status = 'pending'
            RETURNING *
            ",
        )
        .bind(request_id)
        .fetch_optional(self.pool())
        .await?;

        match updated {
            Some(withdrawal) => {
                info!(request_id, "withdrawal approved");
                Ok(withdrawal)
            }
            None => Err(self.terminal_error(request_id).await?),
        }
    }

    /// Transition a pending request to declined and refund the held points
    /// to the owner, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyProcessed` when the request is already terminal, or
    /// `InvalidInput` when it does not exist.
    pub async fn decline_withdrawal(&self, request_id: i64) -> BotResult<Withdrawal> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query_as::<_, Withdrawal>(
            r"
            UPDATE withdrawals SET status = 'declined'
            WHERE request_id = ? AND status = 'pending'
            RETURNING *
            ",
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(withdrawal) = updated else {
            drop(tx);
            return Err(self.terminal_error(request_id).await?);
        };

        sqlx::query("UPDATE users SET points = points + ? WHERE user_id = ?")
            .bind(withdrawal.points_held)
            .bind(withdrawal.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(
            request_id,
            user_id = withdrawal.user_id,
            refunded = withdrawal.points_held,
            "withdrawal declined, points refunded"
        );
        Ok(withdrawal)
    }

    /// All requests still awaiting review, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn pending_withdrawals(&self) -> BotResult<Vec<Withdrawal>> {
        let pending = sqlx::query_as::<_, Withdrawal>(
            "SELECT * FROM withdrawals WHERE status = 'pending' ORDER BY request_id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(pending)
    }

    /// Fetch a request by ID.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_withdrawal(&self, request_id: i64) -> BotResult<Option<Withdrawal>> {
        let withdrawal =
            sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE request_id = ?")
                .bind(request_id)
                .fetch_optional(self.pool())
                .await?;
        Ok(withdrawal)
    }

    /// Distinguish a terminal request from an unknown one after a guarded
    /// update matched no row.
    async fn terminal_error(&self, request_id: i64) -> BotResult<BotError> {
        Ok(match self.get_withdrawal(request_id).await? {
            Some(_) => BotError::AlreadyProcessed(request_id),
            None => BotError::InvalidInput(format!("unknown withdrawal request {request_id}")),
        })
    }
}

//! Withdrawal workflow: request, approve, decline.
//!
//! Each request holds its points the moment it is created; approval leaves
//! the debit permanent and decline refunds it exactly once.

use crate::error::BotResult;
use crate::notify::Notifier;
use crate::store::{Store, Withdrawal};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

/// Request/approve/decline state machine built on the points ledger.
pub struct WithdrawalWorkflow {
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
    points_per_unit: i64,
    min_withdrawal: f64,
}

impl WithdrawalWorkflow {
    /// Compose the workflow over the shared store and notifier.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        notifier: Arc<dyn Notifier>,
        points_per_unit: i64,
        min_withdrawal: f64,
    ) -> Self {
        Self {
            store,
            notifier,
            points_per_unit,
            min_withdrawal,
        }
    }

    /// Minimum withdrawal amount in currency units.
    #[must_use]
    pub const fn min_amount(&self) -> f64 {
        self.min_withdrawal
    }

    /// Points the ledger must hold for a withdrawal of `amount` units.
    #[must_use]
    pub fn required_points(&self, amount: f64) -> i64 {
        (amount * self.points_per_unit as f64).round() as i64
    }

    /// Create a pending request, debiting the required points immediately.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for amounts below the minimum and
    /// `InsufficientBalance` when the debit cannot be satisfied; the debit
    /// check happens at debit time, not earlier.
    pub async fn create(
        &self,
        user_id: i64,
        amount: f64,
        payment_number: &str,
    ) -> BotResult<Withdrawal> {
        if !amount.is_finite() || amount < self.min_withdrawal {
            return Err(crate::error::BotError::InvalidInput(format!(
                "withdrawal amount must be at least {:.2}",
                self.min_withdrawal
            )));
        }
        let points = self.required_points(amount);
        self.store
            .create_withdrawal(user_id, amount, points, payment_number, Utc::now())
            .await
    }

    /// Approve a pending request. The held points stay spent; the owner is
    /// notified best-effort.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyProcessed` when the request is already terminal.
    pub async fn approve(&self, request_id: i64) -> BotResult<Withdrawal> {
        let withdrawal = self.store.approve_withdrawal(request_id).await?;
        let text = format!(
            "✅ Your withdrawal of {:.2} has been approved! Expect the payment within 24 hours.",
            withdrawal.amount
        );
        if let Err(e) = self.notifier.notify(withdrawal.user_id, &text).await {
            warn!(request_id, user_id = withdrawal.user_id, error = %e, "approval notice undelivered");
        }
        Ok(withdrawal)
    }

    /// Decline a pending request, refunding the held points exactly once.
    /// The owner is notified of the refunded amount best-effort.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyProcessed` when the request is already terminal.
    pub async fn decline(&self, request_id: i64) -> BotResult<Withdrawal> {
        let withdrawal = self.store.decline_withdrawal(request_id).await?;
        let text = format!(
            "❌ Your withdrawal of {:.2} was declined. {} points were returned to your balance.",
            withdrawal.amount, withdrawal.points_held
        );
        if let Err(e) = self.notifier.notify(withdrawal.user_id, &text).await {
            warn!(request_id, user_id = withdrawal.user_id, error = %e, "decline notice undelivered");
        }
        Ok(withdrawal)
    }

    /// Requests still awaiting review.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn pending(&self) -> BotResult<Vec<Withdrawal>> {
        self.store.pending_withdrawals().await
    }
}

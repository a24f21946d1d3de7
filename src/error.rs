//! Domain error taxonomy shared across the bot's components.

use thiserror::Error;

/// Errors produced by the ledger, workflows, and dialog engine.
#[derive(Debug, Error)]
pub enum BotError {
    /// Malformed user input (phone number, amount, callback key). Recovered
    /// locally by re-prompting; never corrupts dialog state.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A debit was blocked because it would make the balance negative.
    #[error("insufficient balance: {required} points required, {available} available")]
    InsufficientBalance {
        /// Points the operation needed
        required: i64,
        /// Points actually on the balance
        available: i64,
    },

    /// The external login provider failed or returned a non-success code.
    #[error("login provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// An administrator re-applied approve/decline to a terminal request.
    #[error("withdrawal request {0} was already processed")]
    AlreadyProcessed(i64),

    /// Best-effort message delivery failed. Logged by callers; never rolls
    /// back the committed mutation it was reporting on.
    #[error("notification delivery failed: {0}")]
    NotificationFailure(String),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Convenience alias used throughout the crate.
pub type BotResult<T> = Result<T, BotError>;

//! Per-user dialog state.
//!
//! Each state carries exactly the scratch data that state needs, so a later
//! dialog can never read stale fields left behind by an earlier one.

use chrono::{DateTime, Utc};

/// Represents the current state of the user dialogue
#[derive(Clone, Debug, Default, PartialEq)]
pub enum DialogState {
    /// No dialog in progress
    #[default]
    Idle,
    /// Waiting for a phone number to start the login flow
    AwaitingPhoneNumber,
    /// A QR code was issued; waiting for the user to scan and /confirm
    AwaitingLoginConfirmation {
        /// Phone the login was initiated for
        phone: String,
        /// When the pending login stops being confirmable
        expires_at: DateTime<Utc>,
    },
    /// Waiting for the withdrawal amount in currency units
    AwaitingWithdrawAmount,
    /// Amount accepted; waiting for the payout destination number
    AwaitingWithdrawNumber {
        /// Accepted amount in currency units
        amount: f64,
        /// Points that will be held for this amount
        points: i64,
    },
    /// Super admin is composing a broadcast
    AwaitingBroadcastText,
    /// Admin picked a session and must choose an action
    AwaitingAdminSessionChoice {
        /// Phone number of the selected session
        phone: String,
    },
}

impl DialogState {
    /// Whether any dialog is in progress.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}
